//! mgradm-upgrade — lifecycle operations on a server deployment.
//!
//! Everything here talks to the deployment through a
//! [`mgradm_backend::BackendAdapter`] and never asks which backend it is.
//!
//! # Components
//!
//! - **`inspect`** — reads the live deployment into a `DeploymentSnapshot`
//! - **`plan`** — decides whether a database migration is needed
//! - **`capacity`** — scoped quiesce/restore of the server's replicas
//! - **`scratch`** — script templates and the directory helpers mount
//! - **`coordinator`** — the upgrade state machine
//! - **`install`** — first-time installation
//! - **`ops`** — scaling side-services, status, inspection

pub mod capacity;
pub mod coordinator;
pub mod error;
pub mod inspect;
pub mod install;
pub mod ops;
pub mod plan;
pub mod scratch;

pub use capacity::CapacityGuard;
pub use coordinator::{Coordinator, UpgradeOutcome, UpgradeRequest, UpgradeState};
pub use error::{exit_code, ErrorKind, InspectionError, InstallError, UpgradeError, ValidationError};
pub use inspect::Inspector;
pub use install::{install, resolve_fqdn, InstallOutcome, InstallRequest, InstallStep};
pub use ops::{inspect_deployment, scale_service, status, ComponentStatus, StatusReport};
pub use plan::{PlanInputs, UpgradePlan};
