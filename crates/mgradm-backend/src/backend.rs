//! Backend selection.
//!
//! The backend is chosen once per invocation, either explicitly or by
//! probing the host, and then used only through [`BackendAdapter`].

use std::str::FromStr;

use mgradm_core::{argv, Component, MgradmConfig};
use tracing::{debug, info};

use crate::adapter::{
    AdapterError, AdapterResult, BackendAdapter, BackendKind, HelperJob, Release, TlsSecret,
};
use crate::kubernetes::{KubernetesBackend, KubernetesSettings};
use crate::podman::{PodmanBackend, PodmanSettings};
use crate::runner::{CommandOutput, CommandRunner, SystemRunner};
use crate::wait::WaitPolicy;

impl FromStr for BackendKind {
    type Err = AdapterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "podman" => Ok(BackendKind::Podman),
            "kubectl" | "kubernetes" | "k8s" => Ok(BackendKind::Kubernetes),
            other => Err(AdapterError::NoBackend(format!("unknown backend '{other}'"))),
        }
    }
}

/// Decide which backend manages this host.
///
/// Podman wins when it is installed. Kubernetes is only picked when
/// `kubectl` can actually reach a cluster.
pub fn probe_backend<R: CommandRunner>(runner: &R) -> AdapterResult<BackendKind> {
    match runner.run("podman", &argv(&["--version"])) {
        Ok(output) if output.success() => {
            debug!(version = output.text(), "podman available");
            return Ok(BackendKind::Podman);
        }
        Ok(_) | Err(_) => debug!("podman not available"),
    }

    match runner.run("kubectl", &argv(&["cluster-info", "--request-timeout=5s"])) {
        Ok(output) if output.success() => {
            debug!("kubernetes cluster reachable");
            Ok(BackendKind::Kubernetes)
        }
        _ => Err(AdapterError::NoBackend(
            "neither podman nor a reachable kubernetes cluster was found".to_string(),
        )),
    }
}

/// The backend of this invocation.
pub enum Backend {
    Podman(PodmanBackend<SystemRunner>),
    Kubernetes(KubernetesBackend<SystemRunner>),
}

impl Backend {
    pub fn new(kind: BackendKind, config: &MgradmConfig) -> Self {
        info!(backend = %kind, "backend selected");
        match kind {
            BackendKind::Podman => Backend::Podman(PodmanBackend::new(
                SystemRunner,
                PodmanSettings::from(&config.podman),
            )),
            BackendKind::Kubernetes => Backend::Kubernetes(KubernetesBackend::new(
                SystemRunner,
                KubernetesSettings::from(&config.kubernetes),
            )),
        }
    }

    /// Use the explicit kind, or probe the host.
    pub fn select(explicit: Option<BackendKind>, config: &MgradmConfig) -> AdapterResult<Self> {
        let kind = match explicit {
            Some(kind) => kind,
            None => probe_backend(&SystemRunner)?,
        };
        Ok(Self::new(kind, config))
    }
}

macro_rules! delegate {
    ($self:ident, $backend:ident => $call:expr) => {
        match $self {
            Backend::Podman($backend) => $call,
            Backend::Kubernetes($backend) => $call,
        }
    };
}

impl BackendAdapter for Backend {
    fn kind(&self) -> BackendKind {
        delegate!(self, b => b.kind())
    }

    fn scale(&self, component: Component, replicas: u32) -> AdapterResult<()> {
        delegate!(self, b => b.scale(component, replicas))
    }

    fn replicas(&self, component: Component) -> AdapterResult<u32> {
        delegate!(self, b => b.replicas(component))
    }

    fn run_in_container(
        &self,
        component: Component,
        argv: &[String],
    ) -> AdapterResult<CommandOutput> {
        delegate!(self, b => b.run_in_container(component, argv))
    }

    fn run_helper(&self, job: &HelperJob) -> AdapterResult<CommandOutput> {
        delegate!(self, b => b.run_helper(job))
    }

    fn wait_for_workload(&self, component: Component, policy: &WaitPolicy) -> AdapterResult<()> {
        delegate!(self, b => b.wait_for_workload(component, policy))
    }

    fn node(&self, component: Component) -> AdapterResult<String> {
        delegate!(self, b => b.node(component))
    }

    fn running_image(&self, component: Component) -> AdapterResult<Option<String>> {
        delegate!(self, b => b.running_image(component))
    }

    fn apply_release(&self, release: &Release) -> AdapterResult<()> {
        delegate!(self, b => b.apply_release(release))
    }

    fn put_secret(&self, secret: &TlsSecret) -> AdapterResult<()> {
        delegate!(self, b => b.put_secret(secret))
    }
}
