//! Single-host backend: podman containers managed as systemd services.
//!
//! The server is a plain `uyuni-server.service`. Side-services with replica
//! counts are template units (`uyuni-hub-xmlrpc@.service`) and each replica
//! is one enabled instance.

use std::fs;
use std::path::{Path, PathBuf};

use mgradm_core::config::PodmanConfig;
use mgradm_core::{argv, Component};
use tracing::{debug, info};

use crate::adapter::{
    check_replicas, AdapterError, AdapterResult, BackendAdapter, BackendKind, HelperJob, Release,
    TlsSecret, VolumeAccess, DATA_VOLUMES, TLS_SECRET_NAME,
};
use crate::runner::{CommandOutput, CommandRunner};
use crate::wait::{poll_until, WaitPolicy};

const SERVER_SERVICE: &str = "uyuni-server";
const HUB_SERVICE: &str = "uyuni-hub-xmlrpc";
const ATTESTATION_SERVICE: &str = "uyuni-server-attestation";

const SERVER_PORTS: &[&str] = &[
    "80:80",
    "443:443",
    "4505:4505",
    "4506:4506",
    "25151:25151",
    "69:69/udp",
];
const HUB_PORT: &str = "2830:2830";

/// Where the server container finds its TLS material.
const TLS_TARGETS: &[(&str, &str)] = &[
    ("crt", "/etc/pki/tls/certs/spacewalk.crt"),
    ("key", "/etc/pki/tls/private/spacewalk.key"),
    ("ca", "/etc/pki/trust/anchors/LOCAL-RHN-ORG-TRUSTED-SSL-CERT"),
];

#[derive(Debug, Clone)]
pub struct PodmanSettings {
    pub systemd_dir: PathBuf,
    /// Extra `podman run` arguments for the server container.
    pub args: Vec<String>,
    pub tz: Option<String>,
}

impl From<&PodmanConfig> for PodmanSettings {
    fn from(config: &PodmanConfig) -> Self {
        Self {
            systemd_dir: config.systemd_dir.clone(),
            args: config.args.clone(),
            tz: config.tz.clone(),
        }
    }
}

impl Default for PodmanSettings {
    fn default() -> Self {
        Self::from(&PodmanConfig::default())
    }
}

pub struct PodmanBackend<R> {
    runner: R,
    settings: PodmanSettings,
}

impl<R: CommandRunner> PodmanBackend<R> {
    pub fn new(runner: R, settings: PodmanSettings) -> Self {
        Self { runner, settings }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    fn service(component: Component) -> &'static str {
        match component {
            Component::Server => SERVER_SERVICE,
            Component::HubXmlrpc => HUB_SERVICE,
            Component::Attestation => ATTESTATION_SERVICE,
        }
    }

    /// Template units run one container per instance.
    fn is_template(component: Component) -> bool {
        component != Component::Server
    }

    fn container(component: Component) -> String {
        if Self::is_template(component) {
            format!("{}-0", Self::service(component))
        } else {
            Self::service(component).to_string()
        }
    }

    fn unit_name(component: Component) -> String {
        if Self::is_template(component) {
            format!("{}@.service", Self::service(component))
        } else {
            format!("{}.service", Self::service(component))
        }
    }

    fn instance(component: Component, index: u32) -> String {
        format!("{}@{index}", Self::service(component))
    }

    fn query(&self, program: &str, args: Vec<String>) -> AdapterResult<CommandOutput> {
        Ok(self.runner.run(program, &args)?)
    }

    fn checked(&self, program: &str, args: Vec<String>) -> AdapterResult<CommandOutput> {
        let output = self.runner.run(program, &args)?;
        if !output.success() {
            return Err(AdapterError::failed(program, &args, &output));
        }
        Ok(output)
    }

    fn systemctl(&self, args: &[&str]) -> AdapterResult<CommandOutput> {
        self.checked("systemctl", argv(args))
    }

    fn write_unit(&self, file_name: &str, content: &str) -> AdapterResult<()> {
        let path = self.settings.systemd_dir.join(file_name);
        fs::write(&path, content).map_err(|source| AdapterError::Io {
            path: path.clone(),
            source,
        })?;
        debug!(path = %path.display(), "systemd unit written");
        Ok(())
    }

    fn secret_exists(&self, name: &str) -> AdapterResult<bool> {
        let output = self.query("podman", argv(&["secret", "exists", name]))?;
        Ok(output.success())
    }

    fn server_unit(&self, release: &Release, with_tls: bool) -> String {
        let mut run = vec![
            "--conmon-pidfile %t/uyuni-server.pid".to_string(),
            "--cidfile=%t/uyuni-server.ctr-id".to_string(),
            "--cgroups=no-conmon".to_string(),
            "--sdnotify=conmon".to_string(),
            "-d --replace".to_string(),
            format!("--name {SERVER_SERVICE}"),
            format!("--hostname {}", release.fqdn),
            format!("--pull={}", release.pull_policy.as_podman()),
        ];
        run.extend(SERVER_PORTS.iter().map(|port| format!("-p {port}")));
        run.extend(
            DATA_VOLUMES
                .iter()
                .map(|(volume, path)| format!("-v {volume}:{path}")),
        );
        if with_tls {
            run.extend(TLS_TARGETS.iter().map(|(suffix, target)| {
                format!("--secret {TLS_SECRET_NAME}-{suffix},type=mount,target={target}")
            }));
        }
        if let Some(tz) = &self.settings.tz {
            run.push(format!("-e TZ={tz}"));
        }
        run.extend(self.settings.args.iter().cloned());
        run.push(release.server_image.clone());

        format!(
            "# Generated by mgradm, do not edit.
[Unit]
Description=Uyuni server image container
Wants=network.target
After=network-online.target

[Service]
Environment=PODMAN_SYSTEMD_UNIT=%n
Restart=on-failure
ExecStartPre=/bin/rm -f %t/uyuni-server.pid %t/uyuni-server.ctr-id
ExecStart=/usr/bin/podman run {run}
ExecStop=/usr/bin/podman stop --ignore --cidfile=%t/uyuni-server.ctr-id
ExecStopPost=/usr/bin/podman rm -f --ignore --cidfile=%t/uyuni-server.ctr-id
PIDFile=%t/uyuni-server.pid
TimeoutStopSec=180
TimeoutStartSec=900
Type=forking

[Install]
WantedBy=multi-user.target default.target
",
            run = run.join(" ")
        )
    }

    fn hub_unit(release: &Release, image: &str) -> String {
        format!(
            "# Generated by mgradm, do not edit.
[Unit]
Description=Uyuni Hub XML-RPC API container %i
Wants=network.target
After=network-online.target uyuni-server.service

[Service]
Environment=PODMAN_SYSTEMD_UNIT=%n
Restart=on-failure
ExecStartPre=/bin/rm -f %t/uyuni-hub-xmlrpc-%i.pid %t/uyuni-hub-xmlrpc-%i.ctr-id
ExecStart=/usr/bin/podman run --conmon-pidfile %t/uyuni-hub-xmlrpc-%i.pid --cidfile=%t/uyuni-hub-xmlrpc-%i.ctr-id --cgroups=no-conmon --sdnotify=conmon -d --replace --name {HUB_SERVICE}-%i --pull={pull} -p {HUB_PORT} -e HUB_API_URL=http://{fqdn}/rhn/manager/api -e HUB_CONNECT_USING_SSL=false {image}
ExecStop=/usr/bin/podman stop --ignore --cidfile=%t/uyuni-hub-xmlrpc-%i.ctr-id
ExecStopPost=/usr/bin/podman rm -f --ignore --cidfile=%t/uyuni-hub-xmlrpc-%i.ctr-id
PIDFile=%t/uyuni-hub-xmlrpc-%i.pid
TimeoutStopSec=60
Type=forking

[Install]
WantedBy=multi-user.target default.target
",
            pull = release.pull_policy.as_podman(),
            fqdn = release.fqdn,
        )
    }
}

impl<R: CommandRunner> BackendAdapter for PodmanBackend<R> {
    fn kind(&self) -> BackendKind {
        BackendKind::Podman
    }

    fn scale(&self, component: Component, replicas: u32) -> AdapterResult<()> {
        check_replicas(component, replicas)?;
        let current = self.replicas(component)?;
        if current == replicas {
            debug!(%component, replicas, "already at requested replica count");
            return Ok(());
        }

        info!(%component, from = current, to = replicas, "scaling");
        if !Self::is_template(component) {
            let verb = if replicas == 0 { "stop" } else { "start" };
            self.systemctl(&[verb, SERVER_SERVICE])?;
            return Ok(());
        }

        if replicas > current {
            for index in current..replicas {
                self.systemctl(&["enable", "--now", Self::instance(component, index).as_str()])?;
            }
        } else {
            for index in (replicas..current).rev() {
                self.systemctl(&["disable", "--now", Self::instance(component, index).as_str()])?;
            }
        }
        Ok(())
    }

    fn replicas(&self, component: Component) -> AdapterResult<u32> {
        if !Self::is_template(component) {
            let output = self.query("systemctl", argv(&["is-active", "-q", SERVER_SERVICE]))?;
            return Ok(u32::from(output.success()));
        }

        let pattern = format!("{}@*", Self::service(component));
        let output = self.systemctl(&[
            "list-units",
            "--type=service",
            "--state=active",
            "--plain",
            "--no-legend",
            pattern.as_str(),
        ])?;
        let prefix = format!("{}@", Self::service(component));
        let count = output
            .stdout
            .lines()
            .filter(|line| line.trim_start().starts_with(&prefix))
            .count();
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    fn run_in_container(
        &self,
        component: Component,
        argv: &[String],
    ) -> AdapterResult<CommandOutput> {
        let mut args = vec!["exec".to_string(), Self::container(component)];
        args.extend(argv.iter().cloned());
        self.query("podman", args)
    }

    fn run_helper(&self, job: &HelperJob) -> AdapterResult<CommandOutput> {
        if let Some(node) = &job.node {
            debug!(node, "ignoring node pinning on a single host");
        }
        let mut args = vec![
            "run".to_string(),
            "--rm".to_string(),
            "--name".to_string(),
            job.name.clone(),
            format!("--pull={}", job.pull_policy.as_podman()),
        ];
        if let Some(mount) = &job.mount {
            args.push("-v".to_string());
            args.push(format!(
                "{}:{}",
                mount.host_path.display(),
                mount.container_path
            ));
        }
        let options = match job.volumes {
            VolumeAccess::None => None,
            VolumeAccess::ReadOnly => Some(":ro"),
            VolumeAccess::ReadWrite => Some(""),
        };
        if let Some(options) = options {
            for (volume, path) in DATA_VOLUMES {
                args.push("-v".to_string());
                args.push(format!("{volume}:{path}{options}"));
            }
        }
        args.push(job.image.clone());
        args.extend(job.argv.iter().cloned());

        info!(helper = %job.name, image = %job.image, "running helper container");
        self.query("podman", args)
    }

    fn wait_for_workload(&self, component: Component, policy: &WaitPolicy) -> AdapterResult<()> {
        poll_until(component, policy, || {
            let output = if Self::is_template(component) {
                self.query(
                    "systemctl",
                    argv(&["is-active", "-q", Self::instance(component, 0).as_str()]),
                )?
            } else {
                self.query(
                    "podman",
                    argv(&[
                        "exec",
                        SERVER_SERVICE,
                        "systemctl",
                        "is-active",
                        "-q",
                        "multi-user.target",
                    ]),
                )?
            };
            Ok(output.success())
        })
    }

    fn node(&self, _component: Component) -> AdapterResult<String> {
        let output = self.checked("hostname", Vec::new())?;
        match output.text() {
            "" => Err(AdapterError::UnexpectedOutput {
                command: "hostname".to_string(),
                output: output.stdout.clone(),
            }),
            host => Ok(host.to_string()),
        }
    }

    fn running_image(&self, component: Component) -> AdapterResult<Option<String>> {
        let filter = format!("name=^{}$", Self::container(component));
        let output = self.checked(
            "podman",
            argv(&["ps", "--filter", filter.as_str(), "--format", "{{.Image}}"]),
        )?;
        if let Some(image) = output.text().lines().next() {
            return Ok(Some(image.to_string()));
        }
        // A stopped unit removes its container, so the unit is the only record.
        let unit = Self::unit_name(component);
        let output = self.query("systemctl", argv(&["cat", unit.as_str()]))?;
        if !output.success() {
            return Ok(None);
        }
        let image = exec_start_image(&output.stdout);
        debug!(%component, image = ?image, "image read from the deployed unit");
        Ok(image)
    }

    fn apply_release(&self, release: &Release) -> AdapterResult<()> {
        check_replicas(Component::Server, release.server_replicas)?;
        if !release.values.is_empty() {
            debug!(
                count = release.values.len(),
                "chart values have no podman equivalent"
            );
        }

        let with_tls = self.secret_exists(&format!("{TLS_SECRET_NAME}-crt"))?;
        self.write_unit(
            &format!("{SERVER_SERVICE}.service"),
            &self.server_unit(release, with_tls),
        )?;
        if let Some(hub) = &release.hub {
            self.write_unit(
                &format!("{HUB_SERVICE}@.service"),
                &Self::hub_unit(release, &hub.image),
            )?;
        }
        self.systemctl(&["daemon-reload"])?;

        let running = self.replicas(Component::Server)?;
        match (running, release.server_replicas) {
            (0, 0) => {}
            (_, 0) => {
                self.systemctl(&["stop", SERVER_SERVICE])?;
            }
            (0, _) => {
                self.systemctl(&["enable", "--now", SERVER_SERVICE])?;
            }
            (_, _) => {
                self.systemctl(&["restart", SERVER_SERVICE])?;
            }
        }

        let hub_replicas = release.hub.as_ref().map_or(0, |hub| hub.replicas);
        self.scale(Component::HubXmlrpc, hub_replicas)?;
        info!(image = %release.server_image, replicas = release.server_replicas, "release applied");
        Ok(())
    }

    fn put_secret(&self, secret: &TlsSecret) -> AdapterResult<()> {
        let dir = tempfile::tempdir().map_err(|source| AdapterError::Io {
            path: std::env::temp_dir(),
            source,
        })?;
        let parts = [
            ("crt", &secret.cert_chain_pem),
            ("key", &secret.key_pem),
            ("ca", &secret.root_ca_pem),
        ];
        for (suffix, pem) in parts {
            let path = dir.path().join(suffix);
            write_private(&path, pem)?;
            let name = format!("{}-{suffix}", secret.name);
            self.checked(
                "podman",
                vec![
                    "secret".to_string(),
                    "create".to_string(),
                    "--replace".to_string(),
                    name,
                    path.display().to_string(),
                ],
            )?;
        }
        info!(secret = %secret.name, fingerprint = %secret.fingerprint, "TLS secrets stored");
        Ok(())
    }
}

/// Image of the `podman run` in a unit's `ExecStart`, the last argument of
/// the command. `${VAR}` references are resolved from `Environment=` lines.
fn exec_start_image(unit: &str) -> Option<String> {
    let command = unit
        .lines()
        .map(str::trim)
        .filter_map(|line| line.strip_prefix("ExecStart="))
        .find(|command| command.contains("podman run"))?;
    let last = command.split_whitespace().last()?;
    let Some(var) = last
        .strip_prefix("${")
        .and_then(|rest| rest.strip_suffix('}'))
    else {
        return Some(last.to_string());
    };
    unit.lines()
        .map(str::trim)
        .filter_map(|line| line.strip_prefix("Environment="))
        .flat_map(str::split_whitespace)
        .find_map(|pair| pair.strip_prefix(var)?.strip_prefix('='))
        .map(|value| value.trim_matches('"').to_string())
}

fn write_private(path: &Path, content: &str) -> AdapterResult<()> {
    fs::write(path, content).map_err(|source| AdapterError::Io {
        path: path.to_path_buf(),
        source,
    })
}
