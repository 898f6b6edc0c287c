//! The backend capability interface.

use std::fmt;
use std::path::PathBuf;

use mgradm_core::{Component, PullPolicy};
use serde::Serialize;
use thiserror::Error;

use crate::runner::{format_command, CommandOutput, RunError};
use crate::wait::WaitPolicy;

/// Persistent volumes the server keeps its data in. Helpers that touch the
/// database mount them under the same paths. Podman names the volumes and
/// the Helm chart names the claims identically.
pub const DATA_VOLUMES: &[(&str, &str)] = &[
    ("var-pgsql", "/var/lib/pgsql"),
    ("etc-rhn", "/etc/rhn"),
    ("var-spacewalk", "/var/spacewalk"),
    ("var-cache", "/var/cache"),
];

/// Name under which the server's TLS material is stored.
pub const TLS_SECRET_NAME: &str = "uyuni-cert";

pub type AdapterResult<T> = Result<T, AdapterError>;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Run(#[from] RunError),

    #[error("'{command}' exited with status {status}: {output}")]
    CommandFailed {
        command: String,
        status: i32,
        output: String,
    },

    #[error("{0} is not deployed")]
    NotFound(Component),

    #[error("{component} did not become ready after {attempts} attempts")]
    Timeout { component: Component, attempts: u32 },

    #[error("{component} does not support {replicas} replicas")]
    UnsupportedReplicas { component: Component, replicas: u32 },

    #[error("unexpected output from '{command}': {output:?}")]
    UnexpectedOutput { command: String, output: String },

    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("no usable backend: {0}")]
    NoBackend(String),
}

impl AdapterError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, AdapterError::Timeout { .. })
    }

    pub(crate) fn failed(program: &str, args: &[String], output: &CommandOutput) -> Self {
        AdapterError::CommandFailed {
            command: format_command(program, args),
            status: output.status,
            output: output.combined(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Podman,
    Kubernetes,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Podman => f.write_str("podman"),
            BackendKind::Kubernetes => f.write_str("kubernetes"),
        }
    }
}

/// Host directory shared with a helper unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostMount {
    pub host_path: PathBuf,
    pub container_path: String,
}

/// How a helper sees the server's [`DATA_VOLUMES`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum VolumeAccess {
    #[default]
    None,
    ReadOnly,
    ReadWrite,
}

impl VolumeAccess {
    pub fn mounts(&self) -> bool {
        *self != VolumeAccess::None
    }
}

/// A transient, run-to-completion unit started from an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperJob {
    /// Unit name, unique per step.
    pub name: String,
    pub image: String,
    pub pull_policy: PullPolicy,
    /// Pin the helper to this node, when the backend has nodes.
    pub node: Option<String>,
    pub mount: Option<HostMount>,
    pub volumes: VolumeAccess,
    pub argv: Vec<String>,
}

/// Hub XML-RPC API settings for a release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubRelease {
    pub image: String,
    pub replicas: u32,
}

/// Desired state applied in one call: image and replica count together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    pub server_image: String,
    pub server_replicas: u32,
    pub pull_policy: PullPolicy,
    pub fqdn: String,
    pub hub: Option<HubRelease>,
    /// Extra chart values, applied after the computed ones.
    pub values: Vec<(String, String)>,
}

/// TLS material the server presents, plus the CA it trusts.
#[derive(Clone, PartialEq, Eq)]
pub struct TlsSecret {
    pub name: String,
    /// Server certificate followed by any intermediates.
    pub cert_chain_pem: String,
    pub key_pem: String,
    pub root_ca_pem: String,
    /// SHA-256 of the PEM-encoded server certificate, hex encoded.
    pub fingerprint: String,
}

impl fmt::Debug for TlsSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsSecret")
            .field("name", &self.name)
            .field("fingerprint", &self.fingerprint)
            .finish_non_exhaustive()
    }
}

/// What a deployment backend can do.
///
/// Every call either succeeds or returns a typed error; implementations
/// never retry on their own, except the bounded poll in
/// [`wait_for_workload`](BackendAdapter::wait_for_workload).
pub trait BackendAdapter {
    fn kind(&self) -> BackendKind;

    /// Set the replica count. Scaling to the current count does nothing.
    fn scale(&self, component: Component, replicas: u32) -> AdapterResult<()>;

    /// Current replica count; `0` when the component is not deployed.
    fn replicas(&self, component: Component) -> AdapterResult<u32>;

    /// Run a command inside the component's live unit. A non-zero exit is
    /// not an error here; inspect the returned output.
    fn run_in_container(&self, component: Component, argv: &[String])
        -> AdapterResult<CommandOutput>;

    /// Run a transient helper to completion.
    fn run_helper(&self, job: &HelperJob) -> AdapterResult<CommandOutput>;

    /// Block until the component is ready or the policy is exhausted.
    fn wait_for_workload(&self, component: Component, policy: &WaitPolicy) -> AdapterResult<()>;

    /// Node (or host) the component currently runs on.
    fn node(&self, component: Component) -> AdapterResult<String>;

    /// Image the component is deployed with, running or stopped. `None`
    /// when it is not deployed at all.
    fn running_image(&self, component: Component) -> AdapterResult<Option<String>>;

    /// Apply image and replica counts in a single operation.
    fn apply_release(&self, release: &Release) -> AdapterResult<()>;

    /// Store TLS material where the server will pick it up on start.
    fn put_secret(&self, secret: &TlsSecret) -> AdapterResult<()>;
}

pub(crate) fn check_replicas(component: Component, replicas: u32) -> AdapterResult<()> {
    if replicas > component.max_replicas() {
        return Err(AdapterError::UnsupportedReplicas {
            component,
            replicas,
        });
    }
    Ok(())
}
