//! mgradm.toml configuration parser.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::image::{PullPolicy, DEFAULT_TAG};

/// Location checked when neither `--config` nor `$MGRADM_CONFIG` is set.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/uyuni/mgradm.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MgradmConfig {
    pub image: ImageConfig,
    pub kubernetes: KubernetesConfig,
    pub podman: PodmanConfig,
    pub wait: WaitConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    pub registry: String,
    pub tag: String,
    pub pull_policy: String,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            registry: "registry.opensuse.org/uyuni".to_string(),
            tag: DEFAULT_TAG.to_string(),
            pull_policy: PullPolicy::default().as_kubernetes().to_string(),
        }
    }
}

impl ImageConfig {
    pub fn pull_policy(&self) -> PullPolicy {
        PullPolicy::normalize(&self.pull_policy)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KubernetesConfig {
    pub namespace: String,
    pub chart: String,
    /// Chart version; empty means the latest.
    pub version: String,
    /// Extra Helm values file; empty means none.
    pub values: String,
    pub kubeconfig: Option<String>,
    /// Ingress controller the chart should target.
    pub ingress: String,
}

impl Default for KubernetesConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            chart: "oci://registry.opensuse.org/uyuni/server-helm".to_string(),
            version: String::new(),
            values: String::new(),
            kubeconfig: None,
            ingress: "traefik".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PodmanConfig {
    /// Extra arguments passed to `podman run` for the server container.
    pub args: Vec<String>,
    /// Directory the systemd units are written to.
    pub systemd_dir: PathBuf,
    /// Time zone passed to the server container.
    pub tz: Option<String>,
}

impl Default for PodmanConfig {
    fn default() -> Self {
        Self {
            args: Vec::new(),
            systemd_dir: PathBuf::from("/etc/systemd/system"),
            tz: None,
        }
    }
}

/// Readiness polling bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaitConfig {
    pub attempts: u32,
    pub interval_secs: u64,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            attempts: 60,
            interval_secs: 1,
        }
    }
}

impl WaitConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl MgradmConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&content).map_err(|err| match err {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })?;
        debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: MgradmConfig = toml::from_str(input).map_err(|source| ConfigError::Parse {
            path: PathBuf::new(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load the explicit path, or the default location when it exists,
    /// or fall back to built-in defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        match explicit {
            Some(path) => Self::from_file(path),
            None => {
                let default = Path::new(DEFAULT_CONFIG_PATH);
                if default.is_file() {
                    Self::from_file(default)
                } else {
                    debug!("no configuration file, using defaults");
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.wait.attempts == 0 {
            return Err(ConfigError::Invalid(
                "wait.attempts must be at least 1".to_string(),
            ));
        }
        if self.kubernetes.namespace.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "kubernetes.namespace must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
