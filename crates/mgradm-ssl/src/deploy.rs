//! Certificate deployment for a new server.

use std::fmt;

use mgradm_backend::{BackendAdapter, TlsSecret, TLS_SECRET_NAME};
use tracing::info;

use crate::error::SslResult;
use crate::flags::{SslSpec, Subject, PLACEHOLDER_CA_PASSWORD};
use crate::pem;

/// Where the server's certificate comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertificateSource {
    /// A user-provided chain, already stored through the backend.
    Existing { fingerprint: String },
    /// The server setup generates a CA and a certificate.
    SelfSigned,
}

/// Outcome of [`deploy_certificate`]: what the setup and the chart need.
#[derive(Clone, PartialEq, Eq)]
pub struct CertificateDeployment {
    pub source: CertificateSource,
    /// FQDN first, then the extra names.
    pub cnames: Vec<String>,
    pub subject: Subject,
    ca_password: String,
}

impl fmt::Debug for CertificateDeployment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateDeployment")
            .field("source", &self.source)
            .field("cnames", &self.cnames)
            .field("subject", &self.subject)
            .finish_non_exhaustive()
    }
}

impl CertificateDeployment {
    pub fn is_existing(&self) -> bool {
        matches!(self.source, CertificateSource::Existing { .. })
    }

    /// Chart values describing the self-signed issuer. Empty for an
    /// existing chain, which the chart finds in the TLS secret.
    pub fn helm_values(&self) -> Vec<(String, String)> {
        if self.is_existing() {
            return Vec::new();
        }
        let mut values = vec![(
            "ssl.cnames".to_string(),
            format!("{{{}}}", self.cnames.join(",")),
        )];
        let fields = [
            ("ssl.country", &self.subject.country),
            ("ssl.state", &self.subject.state),
            ("ssl.city", &self.subject.city),
            ("ssl.org", &self.subject.org),
            ("ssl.ou", &self.subject.ou),
            ("ssl.email", &self.subject.email),
        ];
        values.extend(
            fields
                .into_iter()
                .filter(|(_, value)| !value.is_empty())
                .map(|(key, value)| (key.to_string(), value.clone())),
        );
        values
    }

    /// `CERT_*` environment for the server setup script.
    pub fn setup_env(&self) -> Vec<(String, String)> {
        let cnames = self.cnames.join(",");
        [
            ("CERT_O", self.subject.org.as_str()),
            ("CERT_OU", self.subject.ou.as_str()),
            ("CERT_CITY", self.subject.city.as_str()),
            ("CERT_STATE", self.subject.state.as_str()),
            ("CERT_COUNTRY", self.subject.country.as_str()),
            ("CERT_EMAIL", self.subject.email.as_str()),
            ("CERT_CNAMES", cnames.as_str()),
            ("CERT_PASS", self.ca_password.as_str()),
        ]
        .into_iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
    }
}

/// Validate the certificate options and, for an existing chain, store it
/// through the backend. Nothing else is touched.
pub fn deploy_certificate<B>(backend: &B, spec: &SslSpec, fqdn: &str) -> SslResult<CertificateDeployment>
where
    B: BackendAdapter + ?Sized,
{
    spec.check()?;
    let cnames = spec.cnames_for(fqdn);

    let (source, ca_password) = match (&spec.root_ca, &spec.server_cert, &spec.server_key) {
        (Some(root_ca), Some(server_cert), Some(server_key)) => {
            let leaf = pem::read_certificates(server_cert)?;
            let fingerprint = leaf.fingerprint();
            let mut chain = vec![leaf];
            for intermediate in &spec.intermediate_cas {
                chain.push(pem::read_certificates(intermediate)?);
            }
            let root = pem::read_certificates(root_ca)?;
            let key = pem::read_private_key(server_key)?;

            let secret = TlsSecret {
                name: TLS_SECRET_NAME.to_string(),
                cert_chain_pem: chain.iter().map(|file| file.pem.as_str()).collect(),
                key_pem: key,
                root_ca_pem: root.pem,
                fingerprint: fingerprint.clone(),
            };
            backend.put_secret(&secret)?;
            info!(
                backend = %backend.kind(),
                fingerprint = %fingerprint,
                chain_len = chain.iter().map(|file| file.der.len()).sum::<usize>(),
                "existing certificate deployed"
            );
            (
                CertificateSource::Existing { fingerprint },
                PLACEHOLDER_CA_PASSWORD.to_string(),
            )
        }
        _ => {
            info!(cnames = ?cnames, "server setup will generate a self-signed certificate");
            (CertificateSource::SelfSigned, spec.password.clone())
        }
    };

    Ok(CertificateDeployment {
        source,
        cnames,
        subject: spec.subject.clone(),
        ca_password,
    })
}
