//! Certificate options as given on the command line.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{SslError, SslResult};

/// CA password handed to the setup when existing certificates are used.
/// The setup still generates a CA, which is discarded afterwards.
pub const PLACEHOLDER_CA_PASSWORD: &str = "dummy";

/// Subject fields for a self-signed certificate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Subject {
    pub country: String,
    pub state: String,
    pub city: String,
    pub org: String,
    pub ou: String,
    pub email: String,
}

#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SslSpec {
    /// Root CA certificate of an existing chain.
    pub root_ca: Option<PathBuf>,
    /// Intermediate CAs, leaf side first.
    pub intermediate_cas: Vec<PathBuf>,
    pub server_cert: Option<PathBuf>,
    pub server_key: Option<PathBuf>,
    /// Extra names, besides the FQDN, the certificate should cover.
    pub cnames: Vec<String>,
    pub subject: Subject,
    /// Password of the generated CA.
    pub password: String,
}

impl std::fmt::Debug for SslSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SslSpec")
            .field("root_ca", &self.root_ca)
            .field("intermediate_cas", &self.intermediate_cas)
            .field("server_cert", &self.server_cert)
            .field("server_key", &self.server_key)
            .field("cnames", &self.cnames)
            .field("subject", &self.subject)
            .finish_non_exhaustive()
    }
}

impl SslSpec {
    /// True iff the root CA, the server certificate and its key are all set.
    pub fn use_existing(&self) -> bool {
        self.root_ca.is_some() && self.server_cert.is_some() && self.server_key.is_some()
    }

    /// Reject half-given existing chains, and self-signed requests
    /// without a CA password.
    pub fn check(&self) -> SslResult<()> {
        let given = [
            ("root CA", self.root_ca.is_some()),
            ("server certificate", self.server_cert.is_some()),
            ("server key", self.server_key.is_some()),
        ];
        let any = given.iter().any(|(_, set)| *set) || !self.intermediate_cas.is_empty();
        if any && !self.use_existing() {
            let missing = given
                .iter()
                .filter(|(_, set)| !set)
                .map(|(name, _)| *name)
                .collect();
            return Err(SslError::Incomplete { missing });
        }
        if !any && self.password.is_empty() {
            return Err(SslError::MissingPassword);
        }
        Ok(())
    }

    /// `fqdn` followed by the extra names, without blanks or duplicates.
    pub fn cnames_for(&self, fqdn: &str) -> Vec<String> {
        let mut names: Vec<String> = Vec::with_capacity(self.cnames.len() + 1);
        for name in std::iter::once(fqdn).chain(self.cnames.iter().map(String::as_str)) {
            let name = name.trim();
            if !name.is_empty() && !names.iter().any(|known| known == name) {
                names.push(name.to_string());
            }
        }
        names
    }
}
