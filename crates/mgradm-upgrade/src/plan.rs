//! Upgrade planning: what the snapshot says has to happen.

use mgradm_core::{compute_image, DbVersion, DeploymentSnapshot, ImageSpec};
use serde::Serialize;
use tracing::debug;

use crate::error::ValidationError;

/// Default image running the PostgreSQL migration, suffixed with
/// `-<current>-<target>`.
pub const DB_UPGRADE_IMAGE_PREFIX: &str = "server-migration";
/// Default Hub XML-RPC API image name.
pub const HUB_IMAGE_NAME: &str = "server-hub-xmlrpc-api";

/// Image options the plan resolves against.
#[derive(Debug, Clone, Copy)]
pub struct PlanInputs<'a> {
    pub registry: &'a str,
    pub tag: &'a str,
    pub db_upgrade_image: &'a ImageSpec,
    pub hub_image: &'a ImageSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpgradePlan {
    pub current_db_version: DbVersion,
    pub target_db_version: DbVersion,
    /// The target image bundles a newer database major.
    pub requires_db_migration: bool,
    /// Told to the finalize step, which runs either way.
    pub requires_schema_finalize: bool,
    pub server_image: String,
    /// Only resolved when a migration is required.
    pub db_upgrade_image: Option<String>,
    /// Only resolved when the hub is deployed.
    pub hub_image: Option<String>,
}

impl UpgradePlan {
    /// Derive the plan, rejecting database downgrades.
    pub fn derive(
        snapshot: &DeploymentSnapshot,
        inputs: &PlanInputs<'_>,
    ) -> Result<Self, ValidationError> {
        let current = snapshot.current_db_version;
        let target = snapshot.target_db_version;
        if target < current {
            return Err(ValidationError::Downgrade { current, target });
        }

        let requires_db_migration = target > current;
        let db_upgrade_image = if requires_db_migration {
            let mut spec = inputs.db_upgrade_image.clone();
            if spec.is_empty() {
                spec.name = format!(
                    "{DB_UPGRADE_IMAGE_PREFIX}-{}-{}",
                    current.major, target.major
                );
            }
            Some(compute_image(inputs.registry, inputs.tag, &spec)?)
        } else {
            None
        };

        let hub_image = if snapshot.hub_component_present {
            let mut spec = inputs.hub_image.clone();
            if spec.is_empty() {
                spec.name = HUB_IMAGE_NAME.to_string();
            }
            Some(compute_image(inputs.registry, inputs.tag, &spec)?)
        } else {
            None
        };

        let plan = Self {
            current_db_version: current,
            target_db_version: target,
            requires_db_migration,
            requires_schema_finalize: target != current,
            server_image: snapshot.target_image.clone(),
            db_upgrade_image,
            hub_image,
        };
        debug!(?plan, "upgrade planned");
        Ok(plan)
    }
}
