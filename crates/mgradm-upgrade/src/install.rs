//! First-time server installation.

use std::fmt;

use mgradm_backend::{BackendAdapter, CommandRunner, HubRelease, Release, WaitPolicy};
use mgradm_core::{argv, compute_image, Component, ImageSpec, PullPolicy};
use mgradm_ssl::{deploy_certificate, CertificateSource, SslSpec};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{ErrorKind, InstallError, ValidationError};
use crate::plan::HUB_IMAGE_NAME;

/// Server setup entry point inside the server image.
pub const SETUP_SCRIPT: &str = "/usr/lib/susemanager/bin/mgr-setup";

/// Default server image name.
pub const SERVER_IMAGE_NAME: &str = "server";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum InstallStep {
    Preflight,
    ResolveImages,
    Certificates,
    Release,
    WaitForServer,
    Setup,
}

impl fmt::Display for InstallStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InstallStep::Preflight => "preflight",
            InstallStep::ResolveImages => "resolve images",
            InstallStep::Certificates => "certificates",
            InstallStep::Release => "release",
            InstallStep::WaitForServer => "wait for server",
            InstallStep::Setup => "setup",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Default)]
pub struct InstallRequest {
    /// Server image; an empty name means [`SERVER_IMAGE_NAME`].
    pub image: ImageSpec,
    pub hub_image: ImageSpec,
    /// 0 leaves the hub out.
    pub hub_replicas: u32,
    pub registry: String,
    pub tag: String,
    pub pull_policy: PullPolicy,
    pub ssl: SslSpec,
    pub wait: WaitPolicy,
    pub values: Vec<(String, String)>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InstallOutcome {
    pub fqdn: String,
    pub server_image: String,
    pub hub_image: Option<String>,
    /// Fingerprint of the deployed certificate, when one was given.
    pub certificate_fingerprint: Option<String>,
}

/// The FQDN to install with: `explicit` when given, else `hostname -f`.
pub fn resolve_fqdn<R>(runner: &R, explicit: Option<&str>) -> Result<String, ValidationError>
where
    R: CommandRunner + ?Sized,
{
    if let Some(fqdn) = explicit.map(str::trim).filter(|fqdn| !fqdn.is_empty()) {
        return Ok(fqdn.to_string());
    }
    let output = runner
        .run("hostname", &argv(&["-f"]))
        .map_err(|_| ValidationError::MissingFqdn)?;
    let fqdn = output.text();
    if !output.success() || fqdn.is_empty() {
        return Err(ValidationError::MissingFqdn);
    }
    debug!(fqdn, "computed FQDN");
    Ok(fqdn.to_string())
}

/// Install a new server answering on `fqdn`.
///
/// Certificates are deployed before any workload is created, so a bad
/// certificate leaves nothing behind.
pub fn install<B>(backend: &B, request: &InstallRequest, fqdn: &str) -> Result<InstallOutcome, InstallError>
where
    B: BackendAdapter + ?Sized,
{
    let at = |step: InstallStep| move |kind: ErrorKind| InstallError { step, kind };

    preflight(backend, request).map_err(at(InstallStep::Preflight))?;

    let (server_image, hub_image) =
        resolve_images(request).map_err(at(InstallStep::ResolveImages))?;
    info!(backend = %backend.kind(), fqdn, image = %server_image, "installing server");

    let cert = deploy_certificate(backend, &request.ssl, fqdn)
        .map_err(|err| at(InstallStep::Certificates)(err.into()))?;

    let mut values = cert.helm_values();
    values.extend(request.values.iter().cloned());
    let release = Release {
        server_image: server_image.clone(),
        server_replicas: 1,
        pull_policy: request.pull_policy,
        fqdn: fqdn.to_string(),
        hub: hub_image.clone().map(|image| HubRelease {
            image,
            replicas: request.hub_replicas,
        }),
        values,
    };
    backend
        .apply_release(&release)
        .map_err(|err| at(InstallStep::Release)(err.into()))?;

    info!("waiting for the server to start");
    backend
        .wait_for_workload(Component::Server, &request.wait)
        .map_err(|err| at(InstallStep::WaitForServer)(err.into()))?;

    let mut command = vec!["env".to_string()];
    command.extend(
        cert.setup_env()
            .into_iter()
            .map(|(key, value)| format!("{key}={value}")),
    );
    command.extend(argv(&[SETUP_SCRIPT, "-s", "-n"]));
    info!("running server setup");
    let output = backend
        .run_in_container(Component::Server, &command)
        .map_err(|err| at(InstallStep::Setup)(err.into()))?;
    if !output.success() {
        return Err(at(InstallStep::Setup)(ErrorKind::Script {
            script: "server setup",
            status: output.status,
            output: output.combined(),
        }));
    }

    let certificate_fingerprint = match cert.source {
        CertificateSource::Existing { fingerprint } => Some(fingerprint),
        CertificateSource::SelfSigned => None,
    };
    info!(fqdn, "server installed");
    Ok(InstallOutcome {
        fqdn: fqdn.to_string(),
        server_image,
        hub_image,
        certificate_fingerprint,
    })
}

fn preflight<B: BackendAdapter + ?Sized>(backend: &B, request: &InstallRequest) -> Result<(), ErrorKind> {
    let max = Component::HubXmlrpc.max_replicas();
    if request.hub_replicas > max {
        return Err(ValidationError::TooManyReplicas {
            component: Component::HubXmlrpc,
            requested: request.hub_replicas,
            max,
        }
        .into());
    }
    if let Some(image) = backend.running_image(Component::Server)? {
        return Err(ValidationError::AlreadyInstalled(image).into());
    }
    Ok(())
}

fn resolve_images(request: &InstallRequest) -> Result<(String, Option<String>), ErrorKind> {
    let mut server = request.image.clone();
    if server.is_empty() {
        server.name = SERVER_IMAGE_NAME.to_string();
    }
    let server = compute_image(&request.registry, &request.tag, &server)?;

    let hub = if request.hub_replicas > 0 {
        let mut hub = request.hub_image.clone();
        if hub.is_empty() {
            hub.name = HUB_IMAGE_NAME.to_string();
        }
        Some(compute_image(&request.registry, &request.tag, &hub)?)
    } else {
        None
    };
    Ok((server, hub))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mgradm_backend::testing::ScriptedRunner;
    use mgradm_backend::CommandOutput;

    #[test]
    fn explicit_fqdn_wins() {
        let runner = ScriptedRunner::new();
        assert_eq!(
            resolve_fqdn(&runner, Some("uyuni.example.com")).unwrap(),
            "uyuni.example.com"
        );
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn fqdn_falls_back_to_hostname() {
        let runner = ScriptedRunner::new();
        runner.respond("hostname -f", CommandOutput::ok("server.example.org\n"));
        assert_eq!(resolve_fqdn(&runner, None).unwrap(), "server.example.org");
    }

    #[test]
    fn failing_hostname_is_a_validation_error() {
        let runner = ScriptedRunner::new();
        runner.respond("hostname -f", CommandOutput::failed(1, "hostname: Name or service not known"));
        assert!(matches!(
            resolve_fqdn(&runner, Some("  ")),
            Err(ValidationError::MissingFqdn)
        ));
    }

    #[test]
    fn default_images_follow_registry_and_tag() {
        let request = InstallRequest {
            registry: "registry.opensuse.org/uyuni".to_string(),
            tag: "2024.07".to_string(),
            hub_replicas: 1,
            ..Default::default()
        };
        let (server, hub) = resolve_images(&request).unwrap();
        assert_eq!(server, "registry.opensuse.org/uyuni/server:2024.07");
        assert_eq!(
            hub.as_deref(),
            Some("registry.opensuse.org/uyuni/server-hub-xmlrpc-api:2024.07")
        );
    }
}
