//! Day-to-day operations: scaling side-services, status and inspection.

use mgradm_backend::{BackendAdapter, BackendKind};
use mgradm_core::{argv, resolve_or_deployed, Component, DeploymentSnapshot, ImageSpec, PullPolicy};
use serde::Serialize;
use tracing::info;

use crate::error::{ErrorKind, ValidationError};
use crate::inspect::Inspector;

/// Scale a side-service. The server itself is only ever scaled by the
/// upgrade coordinator.
pub fn scale_service<B>(backend: &B, service: &str, replicas: u32) -> Result<(), ErrorKind>
where
    B: BackendAdapter + ?Sized,
{
    let component = match service.parse::<Component>() {
        Ok(Component::Server) | Err(_) => {
            return Err(ValidationError::NotScalable(service.to_string()).into());
        }
        Ok(component) => component,
    };
    let max = component.max_replicas();
    if replicas > max {
        return Err(ValidationError::TooManyReplicas {
            component,
            requested: replicas,
            max,
        }
        .into());
    }
    info!(component = %component, replicas, "scaling");
    backend.scale(component, replicas)?;
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComponentStatus {
    pub component: Component,
    pub replicas: u32,
    pub image: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub backend: BackendKind,
    pub components: Vec<ComponentStatus>,
    /// Output of the server's own service check, when it is running.
    pub services: Option<String>,
}

impl StatusReport {
    pub fn server_running(&self) -> bool {
        self.components
            .iter()
            .any(|status| status.component == Component::Server && status.replicas > 0)
    }
}

/// Report what runs where. Never mutates anything.
pub fn status<B>(backend: &B) -> Result<StatusReport, ErrorKind>
where
    B: BackendAdapter + ?Sized,
{
    let mut components = Vec::new();
    for component in [Component::Server, Component::HubXmlrpc, Component::Attestation] {
        let replicas = backend.replicas(component)?;
        let image = backend.running_image(component)?;
        if component != Component::Server && replicas == 0 && image.is_none() {
            continue;
        }
        components.push(ComponentStatus {
            component,
            replicas,
            image,
        });
    }

    let mut report = StatusReport {
        backend: backend.kind(),
        components,
        services: None,
    };
    if report.server_running() {
        let output =
            backend.run_in_container(Component::Server, &argv(&["spacewalk-service", "status"]))?;
        report.services = Some(output.combined());
    }
    Ok(report)
}

/// Resolve the target image, falling back to the deployed one, and
/// inspect the deployment against it.
pub fn inspect_deployment<B>(
    backend: &B,
    registry: &str,
    tag: &str,
    image: &ImageSpec,
    pull_policy: PullPolicy,
) -> Result<DeploymentSnapshot, ErrorKind>
where
    B: BackendAdapter + ?Sized,
{
    let inspector = Inspector::new(backend, pull_policy);
    let target = resolve_or_deployed(registry, tag, image, &inspector)?;
    Ok(inspector.inspect(&target)?)
}
