//! The upgrade state machine.
//!
//! Steps run strictly in sequence, each depending on the observable result
//! of the previous one. The server's capacity is owned by a
//! [`CapacityGuard`] from the moment it is quiesced, so every exit path
//! hands it back. Destructive steps are never retried.

use std::fmt;

use mgradm_backend::{BackendAdapter, HelperJob, HubRelease, Release, VolumeAccess, WaitPolicy};
use mgradm_core::{resolve_or_deployed, Component, DeploymentSnapshot, ImageSpec, PullPolicy};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::capacity::CapacityGuard;
use crate::error::{exit_code, ErrorKind, UpgradeError};
use crate::inspect::Inspector;
use crate::plan::{PlanInputs, UpgradePlan};
use crate::scratch::{self, ScratchDir};

/// States of an upgrade, in visiting order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UpgradeState {
    Init,
    Inspected,
    PlanValidated,
    Quiesced,
    /// Only visited when the database major changes.
    Migrating,
    SchemaFinalizing,
    PostUpgradeHooks,
    Restoring,
    Verified,
    Done,
    Failed,
}

impl UpgradeState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, UpgradeState::Done | UpgradeState::Failed)
    }
}

impl fmt::Display for UpgradeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// What to upgrade to.
#[derive(Debug, Clone, Default)]
pub struct UpgradeRequest {
    /// Target server image; empty means the deployed one.
    pub image: ImageSpec,
    /// Migration image; empty means the default for the version pair.
    pub db_upgrade_image: ImageSpec,
    pub hub_image: ImageSpec,
    pub registry: String,
    pub tag: String,
    pub pull_policy: PullPolicy,
    pub wait: WaitPolicy,
    /// Extra chart values for the release.
    pub values: Vec<(String, String)>,
}

/// A finished upgrade.
#[derive(Debug, Clone, Serialize)]
pub struct UpgradeOutcome {
    pub snapshot: DeploymentSnapshot,
    pub plan: UpgradePlan,
    pub restored_replicas: u32,
    /// Set when the server did not report ready in time.
    pub warning: Option<String>,
    pub trace: Vec<UpgradeState>,
}

impl UpgradeOutcome {
    pub fn exit_code(&self) -> u8 {
        if self.warning.is_some() {
            exit_code::TIMEOUT
        } else {
            exit_code::SUCCESS
        }
    }
}

pub struct Coordinator<'a, B: BackendAdapter + ?Sized> {
    backend: &'a B,
    state: UpgradeState,
    trace: Vec<UpgradeState>,
}

impl<'a, B: BackendAdapter + ?Sized> Coordinator<'a, B> {
    pub fn new(backend: &'a B) -> Self {
        Self {
            backend,
            state: UpgradeState::Init,
            trace: vec![UpgradeState::Init],
        }
    }

    pub fn state(&self) -> UpgradeState {
        self.state
    }

    /// Resolve the target image, inspect the deployment and upgrade it.
    pub fn upgrade(mut self, request: &UpgradeRequest) -> Result<UpgradeOutcome, UpgradeError> {
        let inspector = Inspector::new(self.backend, request.pull_policy);
        let target = match resolve_or_deployed(
            &request.registry,
            &request.tag,
            &request.image,
            &inspector,
        ) {
            Ok(target) => target,
            Err(err) => return Err(self.abort(err.into())),
        };
        info!(backend = %self.backend.kind(), image = %target, "upgrading server");

        let snapshot = match inspector.inspect(&target) {
            Ok(snapshot) => snapshot,
            Err(err) => return Err(self.abort(err.into())),
        };
        self.execute(snapshot, request)
    }

    /// Run the upgrade from an already captured snapshot.
    pub fn execute(
        mut self,
        snapshot: DeploymentSnapshot,
        request: &UpgradeRequest,
    ) -> Result<UpgradeOutcome, UpgradeError> {
        self.enter(UpgradeState::Inspected);

        let inputs = PlanInputs {
            registry: &request.registry,
            tag: &request.tag,
            db_upgrade_image: &request.db_upgrade_image,
            hub_image: &request.hub_image,
        };
        let plan = match UpgradePlan::derive(&snapshot, &inputs) {
            Ok(plan) => plan,
            Err(err) => return Err(self.abort(err.into())),
        };
        self.enter(UpgradeState::PlanValidated);

        // Helpers sharing the data volumes must land where the server ran.
        let node = if snapshot.server_replicas > 0 {
            match self.backend.node(Component::Server) {
                Ok(node) => Some(node),
                Err(err) => return Err(self.abort(err.into())),
            }
        } else {
            None
        };

        let mut guard = CapacityGuard::capture(
            self.backend,
            Component::Server,
            snapshot.server_replicas,
        );
        self.enter(UpgradeState::Quiesced);
        let result = guard
            .quiesce()
            .map_err(ErrorKind::from)
            .and_then(|()| self.run_steps(&snapshot, &plan, request, node, &mut guard));

        let restored_replicas = match result {
            Ok(replicas) => {
                guard.disarm();
                replicas
            }
            Err(kind) => return Err(self.fail(kind, guard)),
        };

        let warning = match self
            .backend
            .wait_for_workload(Component::Server, &request.wait)
        {
            Ok(()) => None,
            Err(err) if err.is_timeout() => {
                warn!(error = %err, "server not ready yet, the upgrade itself completed");
                Some(err.to_string())
            }
            Err(err) => {
                let state = self.state;
                self.enter(UpgradeState::Failed);
                return Err(UpgradeError {
                    state,
                    kind: err.into(),
                    restored_replicas: Some(restored_replicas),
                    trace: self.trace,
                });
            }
        };
        self.enter(UpgradeState::Verified);
        self.enter(UpgradeState::Done);
        info!(image = %plan.server_image, replicas = restored_replicas, "upgrade done");

        Ok(UpgradeOutcome {
            snapshot,
            plan,
            restored_replicas,
            warning,
            trace: self.trace,
        })
    }

    /// Everything between quiescing and restoring. Returns the server's
    /// replica count after the release.
    fn run_steps(
        &mut self,
        snapshot: &DeploymentSnapshot,
        plan: &UpgradePlan,
        request: &UpgradeRequest,
        node: Option<String>,
        guard: &mut CapacityGuard<'_, B>,
    ) -> Result<u32, ErrorKind> {
        let scratch = ScratchDir::new().map_err(ErrorKind::Scratch)?;
        let helper = |name: &str, image: &str, script: &str| HelperJob {
            name: name.to_string(),
            image: image.to_string(),
            pull_policy: request.pull_policy,
            node: node.clone(),
            mount: Some(scratch.mount()),
            volumes: VolumeAccess::ReadWrite,
            argv: vec![script.to_string()],
        };

        if let Some(image) = plan.db_upgrade_image.as_deref() {
            self.enter(UpgradeState::Migrating);
            info!(
                from = %plan.current_db_version,
                to = %plan.target_db_version,
                image,
                "migrating database"
            );
            let script = scratch
                .write_script(
                    "pgsql-migration.sh",
                    &scratch::migration_script(plan.current_db_version, plan.target_db_version),
                )
                .map_err(ErrorKind::Scratch)?;
            let output = self
                .backend
                .run_helper(&helper("uyuni-db-upgrade", image, &script))?;
            if !output.success() {
                return Err(ErrorKind::Migration {
                    status: output.status,
                    output: output.combined(),
                });
            }
        }

        self.enter(UpgradeState::SchemaFinalizing);
        let script = scratch
            .write_script(
                "pgsql-finalize.sh",
                &scratch::finalize_script(plan.requires_schema_finalize),
            )
            .map_err(ErrorKind::Scratch)?;
        let output = self
            .backend
            .run_helper(&helper("uyuni-db-finalize", &plan.server_image, &script))?;
        if !output.success() {
            return Err(ErrorKind::Script {
                script: "schema finalize",
                status: output.status,
                output: output.combined(),
            });
        }

        self.enter(UpgradeState::PostUpgradeHooks);
        let script = scratch
            .write_script("post-upgrade.sh", &scratch::post_upgrade_script())
            .map_err(ErrorKind::Scratch)?;
        let output = self
            .backend
            .run_helper(&helper("uyuni-post-upgrade", &plan.server_image, &script))?;
        if !output.success() {
            return Err(ErrorKind::Script {
                script: "post-upgrade hook",
                status: output.status,
                output: output.combined(),
            });
        }

        self.enter(UpgradeState::Restoring);
        let replicas = guard.success_target();
        let release = Release {
            server_image: plan.server_image.clone(),
            server_replicas: replicas,
            pull_policy: request.pull_policy,
            fqdn: snapshot.fqdn.clone(),
            hub: plan.hub_image.clone().map(|image| HubRelease { image, replicas: 1 }),
            values: request.values.clone(),
        };
        guard.mark_swapped();
        self.backend.apply_release(&release)?;
        Ok(replicas)
    }

    fn enter(&mut self, state: UpgradeState) {
        debug!(from = %self.state, to = %state, "upgrade state");
        self.state = state;
        self.trace.push(state);
    }

    /// Fail before anything was changed.
    fn abort(mut self, kind: ErrorKind) -> UpgradeError {
        let state = self.state;
        error!(state = %state, error = %kind, "upgrade aborted, nothing was changed");
        self.enter(UpgradeState::Failed);
        UpgradeError {
            state,
            kind,
            restored_replicas: None,
            trace: self.trace,
        }
    }

    /// Fail after quiescing: restore capacity first.
    fn fail(mut self, kind: ErrorKind, guard: CapacityGuard<'_, B>) -> UpgradeError {
        let state = self.state;
        error!(state = %state, error = %kind, "upgrade failed");
        self.enter(UpgradeState::Failed);
        match guard.restore() {
            Ok(replicas) => UpgradeError {
                state,
                kind,
                restored_replicas: Some(replicas),
                trace: self.trace,
            },
            Err(restore) => {
                error!(error = %restore, "capacity restore failed");
                UpgradeError {
                    state,
                    kind: ErrorKind::FatalInconsistentState {
                        cause: Box::new(kind),
                        restore,
                    },
                    restored_replicas: None,
                    trace: self.trace,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(UpgradeState::Done.is_terminal());
        assert!(UpgradeState::Failed.is_terminal());
        assert!(!UpgradeState::Restoring.is_terminal());
        assert_eq!(UpgradeState::SchemaFinalizing.to_string(), "SchemaFinalizing");
    }
}
