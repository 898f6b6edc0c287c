//! Deployment inspection.
//!
//! Version truth comes from the live artifacts: the database version from
//! the data directory, the target version from the binaries in the target
//! image. Labels and configuration are never trusted for it.

use mgradm_backend::{BackendAdapter, CommandOutput, HelperJob, VolumeAccess};
use mgradm_core::{argv, Component, DbVersion, DeployedImage, DeploymentSnapshot, PullPolicy};
use tracing::{debug, info};

use crate::error::InspectionError;

pub const PG_VERSION_FILE: &str = "/var/lib/pgsql/data/PG_VERSION";
const RELEASE_FILE: &str = "/etc/uyuni-release";

/// Reads the deployment through a backend. Never mutates anything.
pub struct Inspector<'a, B: ?Sized> {
    backend: &'a B,
    pull_policy: PullPolicy,
}

impl<'a, B: BackendAdapter + ?Sized> Inspector<'a, B> {
    pub fn new(backend: &'a B, pull_policy: PullPolicy) -> Self {
        Self {
            backend,
            pull_policy,
        }
    }

    /// Capture the snapshot an operation towards `target_image` works from.
    pub fn inspect(&self, target_image: &str) -> Result<DeploymentSnapshot, InspectionError> {
        let server_replicas = self.backend.replicas(Component::Server)?;
        if server_replicas > 1 {
            return Err(InspectionError::Ambiguous(format!(
                "the server runs {server_replicas} replicas, expected 0 or 1"
            )));
        }
        let current_image = self
            .backend
            .running_image(Component::Server)?
            .ok_or(InspectionError::NotFound)?;

        let (current_db_version, fqdn, current_release) = if server_replicas == 1 {
            self.live_facts()?
        } else {
            debug!("server is stopped, reading its volumes from a helper");
            self.stopped_facts(&current_image)?
        };
        let (target_db_version, target_release) = self.target_facts(target_image)?;
        let hub_component_present = self
            .backend
            .running_image(Component::HubXmlrpc)?
            .is_some();

        let snapshot = DeploymentSnapshot {
            current_image,
            target_image: target_image.to_string(),
            fqdn,
            current_db_version,
            target_db_version,
            hub_component_present,
            server_replicas,
            current_release,
            target_release,
        };
        info!(
            current_image = %snapshot.current_image,
            target_image = %snapshot.target_image,
            current_db = %snapshot.current_db_version,
            target_db = %snapshot.target_db_version,
            hub = snapshot.hub_component_present,
            replicas = snapshot.server_replicas,
            "deployment inspected"
        );
        Ok(snapshot)
    }

    fn exec(&self, parts: &[&str]) -> Result<CommandOutput, InspectionError> {
        let command = argv(parts);
        let output = self.backend.run_in_container(Component::Server, &command)?;
        Ok(output)
    }

    fn live_facts(&self) -> Result<(DbVersion, String, Option<String>), InspectionError> {
        let output = self.exec(&["cat", PG_VERSION_FILE])?;
        let version = parse_db_version(&checked("cat PG_VERSION", output)?)?;

        let output = self.exec(&["hostname", "-f"])?;
        let fqdn = checked("hostname -f", output)?;
        if fqdn.is_empty() {
            return Err(InspectionError::MissingFqdn);
        }

        let release = self.exec(&["cat", RELEASE_FILE])?;
        let release = release
            .success()
            .then(|| release.text().to_string())
            .filter(|text| !text.is_empty());
        Ok((version, fqdn, release))
    }

    fn stopped_facts(
        &self,
        current_image: &str,
    ) -> Result<(DbVersion, String, Option<String>), InspectionError> {
        let script = format!(
            "cat {PG_VERSION_FILE} && sed -n 's/^java.hostname *= *//p' /etc/rhn/rhn.conf"
        );
        let job = HelperJob {
            name: "mgradm-inspect-data".to_string(),
            image: current_image.to_string(),
            pull_policy: self.pull_policy,
            node: None,
            mount: None,
            volumes: VolumeAccess::ReadOnly,
            argv: argv(&["sh", "-c", script.as_str()]),
        };
        let text = checked("read data volumes", self.backend.run_helper(&job)?)?;
        let mut lines = text.lines().map(str::trim);
        let version = parse_db_version(lines.next().unwrap_or_default())?;
        let fqdn = lines
            .next()
            .filter(|fqdn| !fqdn.is_empty())
            .ok_or(InspectionError::MissingFqdn)?;
        Ok((version, fqdn.to_string(), None))
    }

    fn target_facts(
        &self,
        target_image: &str,
    ) -> Result<(DbVersion, Option<String>), InspectionError> {
        let script = format!("ls -1d /usr/lib/postgresql*; cat {RELEASE_FILE} 2>/dev/null || true");
        let job = HelperJob {
            name: "mgradm-inspect-target".to_string(),
            image: target_image.to_string(),
            pull_policy: self.pull_policy,
            node: None,
            mount: None,
            volumes: VolumeAccess::None,
            argv: argv(&["sh", "-c", script.as_str()]),
        };
        let text = checked("inspect target image", self.backend.run_helper(&job)?)?;
        let version = highest_postgresql(&text)
            .ok_or_else(|| InspectionError::NoDatabase(target_image.to_string()))?;
        let release = text
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty() && !line.starts_with('/') && !line.starts_with("ls:"))
            .map(str::to_string);
        Ok((version, release))
    }
}

impl<B: BackendAdapter + ?Sized> DeployedImage for Inspector<'_, B> {
    fn deployed_image(&self) -> Result<Option<String>, String> {
        self.backend
            .running_image(Component::Server)
            .map_err(|err| err.to_string())
    }
}

fn checked(command: &str, output: CommandOutput) -> Result<String, InspectionError> {
    if !output.success() {
        return Err(InspectionError::Probe {
            command: command.to_string(),
            status: output.status,
            output: output.combined(),
        });
    }
    Ok(output.text().to_string())
}

fn parse_db_version(text: &str) -> Result<DbVersion, InspectionError> {
    text.parse()
        .map_err(|source| InspectionError::BadVersion {
            what: "database version",
            source,
        })
}

/// Highest `postgresqlNN` entry of a directory listing.
fn highest_postgresql(listing: &str) -> Option<DbVersion> {
    listing
        .lines()
        .filter_map(|line| {
            let name = line.trim().trim_end_matches('/').rsplit('/').next()?;
            name.strip_prefix("postgresql")?.parse::<DbVersion>().ok()
        })
        .max()
}
