pub mod inspect;
pub mod install;
pub mod scale;
pub mod status;
pub mod upgrade;

use std::path::PathBuf;

use clap::{Args, ValueEnum};
use mgradm_backend::WaitPolicy;
use mgradm_core::{ImageSpec, MgradmConfig, PullPolicy};
use mgradm_upgrade::install::SERVER_IMAGE_NAME;

/// Server image selection. Unset values come from the configuration file.
#[derive(Args, Debug, Clone, Default)]
pub struct ImageArgs {
    /// Server image name, optionally with registry host and tag
    #[arg(long)]
    pub image: Option<String>,
    /// Image tag
    #[arg(long)]
    pub tag: Option<String>,
    /// Registry prefix for images without a registry host
    #[arg(long)]
    pub registry: Option<String>,
    /// Always, Never or IfNotPresent
    #[arg(long)]
    pub pull_policy: Option<String>,
}

impl ImageArgs {
    pub fn registry(&self, config: &MgradmConfig) -> String {
        self.registry
            .clone()
            .unwrap_or_else(|| config.image.registry.clone())
    }

    pub fn tag(&self, config: &MgradmConfig) -> String {
        self.tag.clone().unwrap_or_else(|| config.image.tag.clone())
    }

    pub fn pull_policy(&self, config: &MgradmConfig) -> PullPolicy {
        self.pull_policy
            .as_deref()
            .map(PullPolicy::normalize)
            .unwrap_or_else(|| config.image.pull_policy())
    }

    /// The server image. Empty when neither `--image` nor `--tag` was
    /// given, so the deployed image is used.
    pub fn spec(&self, config: &MgradmConfig) -> ImageSpec {
        let name = match (&self.image, &self.tag) {
            (Some(name), _) => Some(name.as_str()),
            (None, Some(_)) => Some(SERVER_IMAGE_NAME),
            (None, None) => None,
        };
        image_spec(name, self.tag.as_deref(), self.pull_policy(config))
    }
}

/// Extra chart values and readiness bounds shared by install and upgrade.
#[derive(Args, Debug, Clone, Default)]
pub struct ReleaseArgs {
    /// Extra chart value as key=value; repeatable
    #[arg(long = "helm-value", value_parser = parse_key_value)]
    pub values: Vec<(String, String)>,
    /// Readiness attempts, overriding the configuration
    #[arg(long)]
    pub wait_attempts: Option<u32>,
}

impl ReleaseArgs {
    pub fn wait(&self, config: &MgradmConfig) -> WaitPolicy {
        let mut policy = WaitPolicy::from(&config.wait);
        if let Some(attempts) = self.wait_attempts {
            policy.attempts = attempts.max(1);
        }
        policy
    }
}

#[derive(Args, Debug, Clone, Default)]
pub struct SslArgs {
    /// Root CA of an existing certificate chain
    #[arg(long = "ssl-ca-root")]
    pub root_ca: Option<PathBuf>,
    /// Intermediate CA of the chain; repeatable, leaf side first
    #[arg(long = "ssl-ca-intermediate")]
    pub intermediate_cas: Vec<PathBuf>,
    /// Server certificate of an existing chain
    #[arg(long = "ssl-server-cert")]
    pub server_cert: Option<PathBuf>,
    /// Server private key of an existing chain
    #[arg(long = "ssl-server-key")]
    pub server_key: Option<PathBuf>,
    /// Extra name for the generated certificate; repeatable
    #[arg(long = "ssl-cname")]
    pub cnames: Vec<String>,
    #[arg(long = "ssl-country", default_value = "DE")]
    pub country: String,
    #[arg(long = "ssl-state", default_value = "Bayern")]
    pub state: String,
    #[arg(long = "ssl-city", default_value = "Nuernberg")]
    pub city: String,
    #[arg(long = "ssl-org", default_value = "SUSE")]
    pub org: String,
    #[arg(long = "ssl-ou", default_value = "SUSE")]
    pub ou: String,
    #[arg(long = "ssl-email", default_value = "ca-admin@example.com")]
    pub email: String,
    /// Password of the generated CA
    #[arg(long = "ssl-password", env = "MGRADM_SSL_PASSWORD", hide_env_values = true, default_value = "")]
    pub password: String,
}

#[derive(Args, Debug, Clone)]
pub struct InstallArgs {
    /// FQDN of the new server
    pub fqdn: Option<String>,
    #[command(flatten)]
    pub image: ImageArgs,
    /// Hub XML-RPC API replicas, 0 or 1
    #[arg(long, default_value_t = 0)]
    pub hub_replicas: u32,
    /// Hub XML-RPC API image
    #[arg(long)]
    pub hub_image: Option<String>,
    #[command(flatten)]
    pub ssl: SslArgs,
    #[command(flatten)]
    pub release: ReleaseArgs,
}

#[derive(Args, Debug, Clone)]
pub struct UpgradeArgs {
    #[command(flatten)]
    pub image: ImageArgs,
    /// Database migration image, derived from the versions when omitted
    #[arg(long)]
    pub migration_image: Option<String>,
    #[arg(long)]
    pub migration_tag: Option<String>,
    /// Hub XML-RPC API image
    #[arg(long)]
    pub hub_image: Option<String>,
    #[command(flatten)]
    pub release: ReleaseArgs,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

pub fn image_spec(name: Option<&str>, tag: Option<&str>, pull_policy: PullPolicy) -> ImageSpec {
    ImageSpec {
        registry: None,
        name: name.unwrap_or_default().to_string(),
        tag: tag.map(str::to_string),
        pull_policy,
    }
}

fn parse_key_value(input: &str) -> Result<(String, String), String> {
    match input.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected key=value, got '{input}'")),
    }
}
