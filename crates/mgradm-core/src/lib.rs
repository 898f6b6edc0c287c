//! mgradm-core — shared types for server lifecycle management.
//!
//! # Components
//!
//! - **`config`** — `mgradm.toml` parsing and defaults
//! - **`image`** — image reference resolution
//! - **`types`** — components and the deployment snapshot
//! - **`version`** — ordered database versions

pub mod config;
pub mod image;
pub mod types;
pub mod version;

pub use config::{ConfigError, MgradmConfig};
pub use image::{
    compute_image, resolve_or_deployed, DeployedImage, ImageSpec, PullPolicy, ResolutionError,
    DEFAULT_TAG,
};
pub use types::*;
pub use version::{DbVersion, VersionError};
