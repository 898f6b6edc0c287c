//! Shared types used across mgradm crates.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::version::DbVersion;

/// Logical component of a server deployment.
///
/// Backends map components to their own addressable units (a systemd
/// service and container, or a Kubernetes deployment); callers never see
/// those names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Component {
    /// The main server, a singleton.
    Server,
    /// Optional Hub XML-RPC API side-service.
    HubXmlrpc,
    /// Optional confidential-computing attestation service.
    Attestation,
}

impl Component {
    pub fn name(&self) -> &'static str {
        match self {
            Component::Server => "server",
            Component::HubXmlrpc => "hub-xmlrpc",
            Component::Attestation => "attestation",
        }
    }

    /// Highest replica count the component supports.
    pub fn max_replicas(&self) -> u32 {
        match self {
            Component::Server | Component::HubXmlrpc => 1,
            Component::Attestation => u32::MAX,
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("unknown component: {0}")]
pub struct UnknownComponent(pub String);

impl FromStr for Component {
    type Err = UnknownComponent;

    /// Accepts both the short names and the systemd service names.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "server" | "uyuni-server" => Ok(Component::Server),
            "hub-xmlrpc" | "uyuni-hub-xmlrpc" => Ok(Component::HubXmlrpc),
            "attestation" | "uyuni-server-attestation" => Ok(Component::Attestation),
            other => Err(UnknownComponent(other.to_string())),
        }
    }
}

/// State of a live deployment, captured once before any mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentSnapshot {
    /// Fully-qualified reference of the running server workload.
    pub current_image: String,
    /// Image the operation is moving to.
    pub target_image: String,
    pub fqdn: String,
    /// On-disk major version of the embedded database.
    pub current_db_version: DbVersion,
    /// Database version bundled in the target image.
    pub target_db_version: DbVersion,
    pub hub_component_present: bool,
    /// Replica count of the server when the snapshot was taken.
    pub server_replicas: u32,
    /// Release string reported by the running server, if any.
    pub current_release: Option<String>,
    /// Release string reported by the target image, if any.
    pub target_release: Option<String>,
}

/// Build an owned argv from string slices.
pub fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|part| part.to_string()).collect()
}
