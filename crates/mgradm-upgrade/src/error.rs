//! Error types for lifecycle operations.

use mgradm_backend::AdapterError;
use mgradm_core::{Component, DbVersion, ResolutionError, VersionError};
use mgradm_ssl::SslError;
use thiserror::Error;

use crate::coordinator::UpgradeState;
use crate::install::InstallStep;

/// Exit codes reported by the `mgradm` binary.
pub mod exit_code {
    pub const SUCCESS: u8 = 0;
    pub const OTHER: u8 = 1;
    pub const VALIDATION: u8 = 2;
    pub const INSPECTION: u8 = 3;
    pub const MIGRATION: u8 = 4;
    pub const TIMEOUT: u8 = 5;
    pub const ADAPTER: u8 = 6;
    pub const INCONSISTENT: u8 = 7;
}

/// The live deployment could not be described.
#[derive(Debug, Error)]
pub enum InspectionError {
    #[error("no server deployment found")]
    NotFound,

    #[error("ambiguous deployment: {0}")]
    Ambiguous(String),

    #[error("cannot read {what}: {source}")]
    BadVersion {
        what: &'static str,
        source: VersionError,
    },

    #[error("no PostgreSQL installation found in image {0}")]
    NoDatabase(String),

    #[error("the server reported no FQDN")]
    MissingFqdn,

    #[error("'{command}' failed with status {status}: {output}")]
    Probe {
        command: String,
        status: i32,
        output: String,
    },

    #[error(transparent)]
    Adapter(#[from] AdapterError),
}

/// The requested operation is not allowed; nothing was changed.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("downgrading PostgreSQL from {current} to {target} is not supported")]
    Downgrade { current: DbVersion, target: DbVersion },

    #[error(transparent)]
    Image(#[from] ResolutionError),

    #[error("{0} cannot be scaled, only the attestation and hub-xmlrpc services can")]
    NotScalable(String),

    #[error("{component} supports at most {max} replicas, {requested} requested")]
    TooManyReplicas {
        component: Component,
        requested: u32,
        max: u32,
    },

    #[error("a server is already deployed with {0}; use upgrade instead")]
    AlreadyInstalled(String),

    #[error("no FQDN given and none could be computed")]
    MissingFqdn,
}

/// What went wrong, independent of where.
#[derive(Debug, Error)]
pub enum ErrorKind {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Inspection(#[from] InspectionError),

    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error(transparent)]
    Ssl(#[from] SslError),

    /// The data migration exited non-zero. Never retried.
    #[error("database migration failed with status {status}:\n{output}")]
    Migration { status: i32, output: String },

    #[error("{script} failed with status {status}:\n{output}")]
    Script {
        script: &'static str,
        status: i32,
        output: String,
    },

    #[error("failed to prepare scratch directory: {0}")]
    Scratch(#[source] std::io::Error),

    /// Capacity could not be restored after an earlier failure.
    #[error("{cause}; restoring capacity also failed: {restore}. Manual intervention is required")]
    FatalInconsistentState {
        cause: Box<ErrorKind>,
        restore: AdapterError,
    },
}

impl From<ResolutionError> for ErrorKind {
    fn from(err: ResolutionError) -> Self {
        ErrorKind::Validation(ValidationError::Image(err))
    }
}

impl ErrorKind {
    pub fn exit_code(&self) -> u8 {
        match self {
            ErrorKind::Validation(_) => exit_code::VALIDATION,
            ErrorKind::Inspection(_) => exit_code::INSPECTION,
            ErrorKind::Migration { .. } => exit_code::MIGRATION,
            ErrorKind::Adapter(err) if err.is_timeout() => exit_code::TIMEOUT,
            ErrorKind::Adapter(_) | ErrorKind::Script { .. } | ErrorKind::Scratch(_) => {
                exit_code::ADAPTER
            }
            ErrorKind::Ssl(SslError::Backend(_)) => exit_code::ADAPTER,
            ErrorKind::Ssl(_) => exit_code::VALIDATION,
            ErrorKind::FatalInconsistentState { .. } => exit_code::INCONSISTENT,
        }
    }

    pub fn is_fatal_inconsistent(&self) -> bool {
        matches!(self, ErrorKind::FatalInconsistentState { .. })
    }
}

/// An upgrade failure, tagged with the state it happened in.
#[derive(Debug, Error)]
#[error("upgrade failed in state {state}: {kind}")]
pub struct UpgradeError {
    pub state: UpgradeState,
    #[source]
    pub kind: ErrorKind,
    /// Replica count the server was restored to, when a restore ran.
    pub restored_replicas: Option<u32>,
    /// States visited before the failure, `Failed` last.
    pub trace: Vec<UpgradeState>,
}

impl UpgradeError {
    pub fn exit_code(&self) -> u8 {
        self.kind.exit_code()
    }
}

/// An install failure, tagged with the step it happened in.
#[derive(Debug, Error)]
#[error("install failed at step {step}: {kind}")]
pub struct InstallError {
    pub step: InstallStep,
    #[source]
    pub kind: ErrorKind,
}

impl InstallError {
    pub fn exit_code(&self) -> u8 {
        self.kind.exit_code()
    }
}
