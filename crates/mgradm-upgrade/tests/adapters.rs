//! Upgrades of a stopped server through the real adapters, with every
//! external command answered by a scripted runner.

use std::fs;

use mgradm_backend::kubernetes::KubernetesSettings;
use mgradm_backend::podman::PodmanSettings;
use mgradm_backend::testing::ScriptedRunner;
use mgradm_backend::{CommandOutput, KubernetesBackend, PodmanBackend, WaitPolicy};
use mgradm_core::{DbVersion, ImageSpec};
use mgradm_upgrade::{
    install, Coordinator, ErrorKind, InstallRequest, InstallStep, UpgradeRequest, UpgradeState,
    ValidationError,
};

const CURRENT: &str = "registry.opensuse.org/uyuni/server:2024.05";
const TARGET: &str = "registry.opensuse.org/uyuni/server:2024.07";

fn request(image: ImageSpec) -> UpgradeRequest {
    UpgradeRequest {
        image,
        registry: "registry.opensuse.org/uyuni".to_string(),
        tag: "2024.07".to_string(),
        wait: WaitPolicy::immediate(2),
        ..Default::default()
    }
}

fn server_unit(image: &str) -> String {
    format!(
        "# /etc/systemd/system/uyuni-server.service\n\
         [Service]\n\
         ExecStartPre=/bin/rm -f %t/uyuni-server.pid %t/uyuni-server.ctr-id\n\
         ExecStart=/usr/bin/podman run --name uyuni-server --hostname uyuni.example.com {image}\n\
         ExecStopPost=/usr/bin/podman rm -f --ignore --cidfile=%t/uyuni-server.ctr-id\n"
    )
}

fn stopped_podman(systemd_dir: &std::path::Path, db: &str) -> PodmanBackend<ScriptedRunner> {
    let runner = ScriptedRunner::new();
    runner.respond("is-active -q uyuni-server", CommandOutput::failed(3, ""));
    runner.respond("systemctl cat uyuni-server.service", CommandOutput::ok(&server_unit(CURRENT)));
    runner.respond(
        "systemctl cat uyuni-hub-xmlrpc",
        CommandOutput::failed(1, "No files found for uyuni-hub-xmlrpc@.service."),
    );
    runner.respond(
        "mgradm-inspect-data",
        CommandOutput::ok(&format!("{db}\nuyuni.example.com\n")),
    );
    runner.respond("mgradm-inspect-target", CommandOutput::ok("/usr/lib/postgresql16\n"));
    PodmanBackend::new(
        runner,
        PodmanSettings {
            systemd_dir: systemd_dir.to_path_buf(),
            ..PodmanSettings::default()
        },
    )
}

#[test]
fn stopped_podman_server_is_upgraded_and_started() {
    let dir = tempfile::tempdir().unwrap();
    let podman = stopped_podman(dir.path(), "14");

    let outcome = Coordinator::new(&podman)
        .upgrade(&request(ImageSpec::named("server")))
        .unwrap();

    assert_eq!(outcome.snapshot.current_image, CURRENT);
    assert_eq!(outcome.snapshot.server_replicas, 0);
    assert_eq!(outcome.snapshot.current_db_version, DbVersion::new(14));
    assert_eq!(outcome.snapshot.fqdn, "uyuni.example.com");
    assert_eq!(outcome.restored_replicas, 1);
    assert_eq!(outcome.trace.last(), Some(&UpgradeState::Done));

    let runner = podman.runner();
    assert_eq!(runner.calls_matching("--name uyuni-db-upgrade").len(), 1);
    assert!(runner.calls_matching("--name uyuni-db-upgrade")[0].contains("server-migration-14-16"));
    assert!(runner.calls().contains(&"systemctl enable --now uyuni-server".to_string()));
    assert!(runner.calls_matching("systemctl stop").is_empty());
    let unit = fs::read_to_string(dir.path().join("uyuni-server.service")).unwrap();
    assert!(unit.contains(TARGET));
}

#[test]
fn quiesced_podman_server_is_recovered_by_a_rerun() {
    let dir = tempfile::tempdir().unwrap();
    // The previous run finished migrating before it was interrupted.
    let podman = stopped_podman(dir.path(), "16");

    let outcome = Coordinator::new(&podman)
        .upgrade(&request(ImageSpec::default()))
        .unwrap();

    assert_eq!(outcome.snapshot.target_image, CURRENT);
    assert!(!outcome.plan.requires_db_migration);
    assert!(!outcome.trace.contains(&UpgradeState::Migrating));
    assert_eq!(outcome.restored_replicas, 1);
    let runner = podman.runner();
    assert!(runner.calls_matching("uyuni-db-upgrade").is_empty());
    assert!(runner.calls().contains(&"systemctl enable --now uyuni-server".to_string()));
}

#[test]
fn stopped_kubernetes_server_is_upgraded_with_one_replica() {
    let runner = ScriptedRunner::new();
    runner.respond("deployment/uyuni -o jsonpath={.spec.replicas}", CommandOutput::ok("0"));
    runner.respond(
        "deployment/uyuni -o jsonpath={.spec.template.spec.containers[0].image}",
        CommandOutput::ok(CURRENT),
    );
    runner.respond("deployment/uyuni -o jsonpath={.status.readyReplicas}", CommandOutput::ok("1"));
    runner.respond(
        "deployment/uyuni-hub-xmlrpc",
        CommandOutput::failed(
            1,
            "Error from server (NotFound): deployments.apps \"uyuni-hub-xmlrpc\" not found",
        ),
    );
    runner.respond("mgradm-inspect-data", CommandOutput::ok("14\nuyuni.example.com\n"));
    runner.respond("mgradm-inspect-target", CommandOutput::ok("/usr/lib/postgresql16\n"));
    let k8s = KubernetesBackend::new(runner, KubernetesSettings::default());

    let outcome = Coordinator::new(&k8s)
        .upgrade(&request(ImageSpec::named("server")))
        .unwrap();

    assert_eq!(outcome.snapshot.server_replicas, 0);
    assert_eq!(outcome.snapshot.current_db_version, DbVersion::new(14));
    assert!(!outcome.snapshot.hub_component_present);
    assert_eq!(outcome.restored_replicas, 1);
    assert_eq!(outcome.warning, None);

    let runner = k8s.runner();
    assert!(runner.calls_matching("kubectl -n default scale").is_empty());
    assert!(runner.calls_matching("get pod -l").is_empty());
    let helm = runner.calls_matching("helm upgrade");
    assert_eq!(helm.len(), 1);
    assert!(helm[0].contains(&format!("--set images.server={TARGET}")));
    assert!(helm[0].contains("--set replicas=1"));
    assert!(helm[0].contains("--set hub.api.replicas=0"));
}

#[test]
fn install_refuses_a_stopped_podman_server() {
    let dir = tempfile::tempdir().unwrap();
    let podman = stopped_podman(dir.path(), "16");
    let request = InstallRequest {
        registry: "registry.opensuse.org/uyuni".to_string(),
        tag: "2024.07".to_string(),
        ..Default::default()
    };

    let err = install(&podman, &request, "uyuni.example.com").unwrap_err();

    assert_eq!(err.step, InstallStep::Preflight);
    assert!(matches!(
        err.kind,
        ErrorKind::Validation(ValidationError::AlreadyInstalled(ref image)) if image == CURRENT
    ));
    assert!(!dir.path().join("uyuni-server.service").exists());
    assert!(podman.runner().calls_matching("systemctl enable").is_empty());
}
