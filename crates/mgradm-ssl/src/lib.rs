//! mgradm-ssl — TLS certificate deployment.
//!
//! Either hands an existing certificate chain to the backend before the
//! server starts, or describes the self-signed certificate the server's
//! setup should generate. Certificates are never generated here.

pub mod deploy;
pub mod error;
pub mod flags;
pub mod pem;

pub use deploy::{deploy_certificate, CertificateDeployment, CertificateSource};
pub use error::{SslError, SslResult};
pub use flags::{SslSpec, Subject, PLACEHOLDER_CA_PASSWORD};
