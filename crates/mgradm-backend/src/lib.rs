//! mgradm-backend — deployment backends behind one capability interface.
//!
//! A server deployment lives either in systemd-managed podman containers on
//! one host or in a Helm release on a Kubernetes cluster. Both are driven
//! through [`BackendAdapter`]; callers never compare backend names.
//!
//! # Components
//!
//! - **`runner`** — process execution seam (`CommandRunner`)
//! - **`adapter`** — the capability trait and its request types
//! - **`wait`** — bounded readiness polling
//! - **`podman`** / **`kubernetes`** — the two implementations
//! - **`backend`** — one-time backend selection

pub mod adapter;
pub mod backend;
pub mod kubernetes;
pub mod podman;
pub mod runner;
pub mod wait;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use adapter::{
    AdapterError, AdapterResult, BackendAdapter, BackendKind, HelperJob, HostMount, HubRelease,
    Release, TlsSecret, VolumeAccess, DATA_VOLUMES, TLS_SECRET_NAME,
};
pub use backend::{probe_backend, Backend};
pub use kubernetes::KubernetesBackend;
pub use podman::PodmanBackend;
pub use runner::{CommandOutput, CommandRunner, RunError, SystemRunner};
pub use wait::{poll_until, WaitPolicy};
