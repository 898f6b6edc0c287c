use std::path::PathBuf;

use mgradm_backend::AdapterError;
use thiserror::Error;

pub type SslResult<T> = Result<T, SslError>;

#[derive(Debug, Error)]
pub enum SslError {
    /// Some, but not all, of the existing-certificate files were given.
    #[error("incomplete SSL configuration, missing: {}", .missing.join(", "))]
    Incomplete { missing: Vec<&'static str> },

    #[error("a CA password is required to generate a self-signed certificate")]
    MissingPassword,

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{path} does not contain a valid PEM {expected}: {reason}")]
    InvalidPem {
        path: PathBuf,
        expected: &'static str,
        reason: String,
    },

    #[error("failed to store the certificate: {0}")]
    Backend(#[from] AdapterError),
}
