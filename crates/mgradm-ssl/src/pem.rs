//! PEM file loading and certificate fingerprints.
//!
//! Blocks are decoded with `rustls-pemfile` so broken base64 framing is
//! rejected here instead of by the server. The DER content itself is not
//! parsed; the stored material is the file text as given.

use std::fs;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::{SslError, SslResult};

/// A PEM file holding one or more certificates.
#[derive(Debug, Clone)]
pub struct CertificateFile {
    /// File text, newline terminated.
    pub pem: String,
    /// Decoded certificates in file order. Never empty.
    pub der: Vec<Vec<u8>>,
}

impl CertificateFile {
    /// Fingerprint of the first certificate in the file.
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.der[0])
    }
}

pub fn read_certificates(path: &Path) -> SslResult<CertificateFile> {
    let text = read(path)?;
    let der = rustls_pemfile::certs(&mut text.as_bytes())
        .map(|cert| cert.map(|cert| cert.to_vec()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| invalid(path, "certificate", err.to_string()))?;
    if der.is_empty() {
        return Err(invalid(path, "certificate", "no CERTIFICATE block".to_string()));
    }
    Ok(CertificateFile {
        pem: terminated(text),
        der,
    })
}

/// PEM text of a private key file after checking it decodes to a key.
pub fn read_private_key(path: &Path) -> SslResult<String> {
    let text = read(path)?;
    let key = rustls_pemfile::private_key(&mut text.as_bytes());
    match key {
        Ok(Some(_)) => Ok(terminated(text)),
        Ok(None) => Err(invalid(path, "private key", "no PRIVATE KEY block".to_string())),
        Err(err) => Err(invalid(path, "private key", err.to_string())),
    }
}

/// SHA-256 of DER bytes, hex encoded.
pub fn fingerprint(der: &[u8]) -> String {
    hex::encode(Sha256::digest(der))
}

fn read(path: &Path) -> SslResult<String> {
    fs::read_to_string(path).map_err(|source| SslError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn invalid(path: &Path, expected: &'static str, reason: String) -> SslError {
    SslError::InvalidPem {
        path: path.to_path_buf(),
        expected,
        reason,
    }
}

fn terminated(mut text: String) -> String {
    if !text.ends_with('\n') {
        text.push('\n');
    }
    text
}
