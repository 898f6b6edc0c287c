//! Side-service scaling, status and inspection.

use mgradm_backend::testing::{Call, RecordingBackend};
use mgradm_backend::{BackendKind, CommandOutput};
use mgradm_core::{Component, DbVersion, ImageSpec, PullPolicy};
use mgradm_upgrade::{
    inspect_deployment, scale_service, status, ErrorKind, InspectionError, ValidationError,
};

const SERVER: &str = "registry.opensuse.org/uyuni/server:2024.05";

#[test]
fn side_services_scale() {
    let backend = RecordingBackend::new(BackendKind::Podman);
    scale_service(&backend, "uyuni-server-attestation", 3).unwrap();
    scale_service(&backend, "uyuni-hub-xmlrpc", 1).unwrap();

    assert_eq!(backend.replicas_of(Component::Attestation), 3);
    assert_eq!(backend.replicas_of(Component::HubXmlrpc), 1);
}

#[test]
fn server_and_unknown_services_are_not_scalable() {
    let backend = RecordingBackend::new(BackendKind::Podman);
    for service in ["uyuni-server", "server", "uyuni-proxy"] {
        let err = scale_service(&backend, service, 1).unwrap_err();
        assert!(
            matches!(err, ErrorKind::Validation(ValidationError::NotScalable(ref name)) if name == service)
        );
    }
    assert!(backend.calls().is_empty());
}

#[test]
fn hub_is_limited_to_one_replica() {
    let backend = RecordingBackend::new(BackendKind::Kubernetes);
    let err = scale_service(&backend, "hub-xmlrpc", 2).unwrap_err();
    assert!(matches!(
        err,
        ErrorKind::Validation(ValidationError::TooManyReplicas { max: 1, .. })
    ));
    assert!(backend.calls().is_empty());
}

#[test]
fn status_reports_running_components() {
    let backend = RecordingBackend::new(BackendKind::Podman)
        .with_component(Component::Server, SERVER, 1)
        .with_container_output("spacewalk-service", CommandOutput::ok("tomcat.service active\n"));
    let report = status(&backend).unwrap();

    assert_eq!(report.backend, BackendKind::Podman);
    assert!(report.server_running());
    assert_eq!(report.components.len(), 1);
    assert_eq!(report.components[0].image.as_deref(), Some(SERVER));
    assert_eq!(report.services.as_deref(), Some("tomcat.service active"));
    assert!(backend.mutations().is_empty());
}

#[test]
fn status_of_stopped_server_skips_service_check() {
    let backend = RecordingBackend::new(BackendKind::Kubernetes)
        .with_component(Component::Server, SERVER, 0)
        .with_component(Component::HubXmlrpc, "hub:1", 0);
    let report = status(&backend).unwrap();

    assert!(!report.server_running());
    assert_eq!(report.components.len(), 2);
    assert_eq!(report.services, None);
    assert!(!backend
        .calls()
        .iter()
        .any(|call| matches!(call, Call::RunInContainer { .. })));
}

#[test]
fn inspect_defaults_to_the_deployed_image() {
    let backend = RecordingBackend::new(BackendKind::Podman)
        .with_component(Component::Server, SERVER, 1)
        .with_container_output("PG_VERSION", CommandOutput::ok("16\n"))
        .with_container_output("hostname -f", CommandOutput::ok("uyuni.example.com\n"))
        .with_helper_output("mgradm-inspect-target", CommandOutput::ok("/usr/lib/postgresql16\n"));
    let snapshot = inspect_deployment(
        &backend,
        "registry.opensuse.org/uyuni",
        "latest",
        &ImageSpec::default(),
        PullPolicy::default(),
    )
    .unwrap();

    assert_eq!(snapshot.target_image, SERVER);
    assert_eq!(snapshot.current_db_version, DbVersion::new(16));
    assert!(!snapshot.hub_component_present);
    assert!(backend.mutations().is_empty());
}

#[test]
fn stopped_server_is_inspected_read_only() {
    let backend = RecordingBackend::new(BackendKind::Kubernetes)
        .with_component(Component::Server, SERVER, 0)
        .with_helper_output("mgradm-inspect-data", CommandOutput::ok("14\nuyuni.example.com\n"))
        .with_helper_output("mgradm-inspect-target", CommandOutput::ok("/usr/lib/postgresql16\n"));
    let snapshot = inspect_deployment(
        &backend,
        "registry.opensuse.org/uyuni",
        "2024.07",
        &ImageSpec::named("server"),
        PullPolicy::default(),
    )
    .unwrap();

    assert_eq!(snapshot.server_replicas, 0);
    assert_eq!(snapshot.current_db_version, DbVersion::new(14));
    assert_eq!(snapshot.fqdn, "uyuni.example.com");
    assert_eq!(snapshot.target_image, "registry.opensuse.org/uyuni/server:2024.07");
    let data = &backend.helpers()[0];
    assert_eq!(data.image, SERVER);
    assert!(data.mount.is_none());
    assert!(backend.mutations().is_empty());
}

#[test]
fn several_server_replicas_are_ambiguous() {
    let backend = RecordingBackend::new(BackendKind::Kubernetes)
        .with_component(Component::Server, SERVER, 2);
    let err = inspect_deployment(
        &backend,
        "registry.opensuse.org/uyuni",
        "2024.07",
        &ImageSpec::named("server"),
        PullPolicy::default(),
    )
    .unwrap_err();

    assert!(matches!(
        err,
        ErrorKind::Inspection(InspectionError::Ambiguous(_))
    ));
}

#[test]
fn unreadable_database_version_is_reported() {
    let backend = RecordingBackend::new(BackendKind::Podman)
        .with_component(Component::Server, SERVER, 1)
        .with_container_output("PG_VERSION", CommandOutput::ok("garbage\n"));
    let err = inspect_deployment(
        &backend,
        "registry.opensuse.org/uyuni",
        "2024.07",
        &ImageSpec::named("server"),
        PullPolicy::default(),
    )
    .unwrap_err();

    assert!(matches!(
        err,
        ErrorKind::Inspection(InspectionError::BadVersion { .. })
    ));
}
