//! Container image reference resolution.
//!
//! Turns user-supplied registry / name / tag fragments into a single
//! fully-qualified reference. All resolution is pure string composition,
//! except [`resolve_or_deployed`] which may ask a [`DeployedImage`] source
//! for the image that is currently running.

use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Tag used when neither the name nor the flags carry one.
pub const DEFAULT_TAG: &str = "latest";

/// `[host[:port]/]path[:tag]`, where the tag must not contain `/` or `:`.
const REFERENCE_PATTERN: &str = r"^((?:[^:/\s]+(?::[0-9]+)?/)?[^:\s]+)(?::([^:/\s]+))?$";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("no image name given")]
    MissingName,
    #[error("no tag given for image {0}")]
    MissingTag(String),
    #[error("image {name} already carries tag {embedded}, conflicting with requested tag {requested}")]
    ConflictingTag {
        name: String,
        embedded: String,
        requested: String,
    },
    #[error("invalid image reference: {0}")]
    InvalidReference(String),
    #[error("no image given and no deployed image found")]
    NothingDeployed,
    #[error("failed to query the deployed image: {0}")]
    Lookup(String),
}

/// Image pull policy, normalised to the Kubernetes spelling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PullPolicy {
    Always,
    Never,
    #[default]
    IfNotPresent,
}

impl PullPolicy {
    /// Case-insensitive parse; unknown values fall back to `IfNotPresent`.
    pub fn normalize(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "always" => Self::Always,
            "never" => Self::Never,
            _ => Self::IfNotPresent,
        }
    }

    pub fn as_kubernetes(&self) -> &'static str {
        match self {
            Self::Always => "Always",
            Self::Never => "Never",
            Self::IfNotPresent => "IfNotPresent",
        }
    }

    /// Value for `podman run --pull=`.
    pub fn as_podman(&self) -> &'static str {
        match self {
            Self::Always => "always",
            Self::Never => "never",
            Self::IfNotPresent => "missing",
        }
    }
}

impl fmt::Display for PullPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_kubernetes())
    }
}

/// Image fragments as given on the command line or in the config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSpec {
    /// Registry override, e.g. `registry.opensuse.org/uyuni`.
    pub registry: Option<String>,
    /// Image name, possibly with a registry host and/or a tag.
    pub name: String,
    pub tag: Option<String>,
    #[serde(default)]
    pub pull_policy: PullPolicy,
}

impl ImageSpec {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn with_tag(mut self, tag: &str) -> Self {
        self.tag = Some(tag.to_string());
        self
    }

    pub fn with_registry(mut self, registry: &str) -> Self {
        self.registry = Some(registry.to_string());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.name.trim().is_empty()
    }
}

/// Source of the image reference a deployment is currently running.
pub trait DeployedImage {
    fn deployed_image(&self) -> Result<Option<String>, String>;
}

/// Compose a fully-qualified image reference.
///
/// `ImageSpec::registry` wins over `registry`; a name that already starts
/// with a registry host is left alone. A tag embedded in the name is kept,
/// otherwise the spec tag or `default_tag` is appended.
pub fn compute_image(
    registry: &str,
    default_tag: &str,
    spec: &ImageSpec,
) -> Result<String, ResolutionError> {
    let name = spec.name.trim();
    if name.is_empty() {
        return Err(ResolutionError::MissingName);
    }

    let registry = spec
        .registry
        .as_deref()
        .unwrap_or(registry)
        .trim()
        .trim_end_matches('/');
    let full_name = if registry.is_empty()
        || name.starts_with(&format!("{registry}/"))
        || has_registry_host(name)
    {
        name.to_string()
    } else {
        format!("{registry}/{}", name.trim_start_matches('/'))
    };

    let reference_re = Regex::new(REFERENCE_PATTERN)
        .map_err(|err| ResolutionError::InvalidReference(err.to_string()))?;
    let captures = reference_re
        .captures(&full_name)
        .ok_or_else(|| ResolutionError::InvalidReference(full_name.clone()))?;
    let requested = spec
        .tag
        .as_deref()
        .map(str::trim)
        .filter(|tag| !tag.is_empty());

    if let Some(embedded) = captures.get(2) {
        let embedded = embedded.as_str();
        if let Some(requested) = requested
            && requested != embedded
        {
            return Err(ResolutionError::ConflictingTag {
                name: full_name.clone(),
                embedded: embedded.to_string(),
                requested: requested.to_string(),
            });
        }
        debug!(image = %full_name, "using tag embedded in image name");
        return Ok(full_name);
    }

    let tag = requested.unwrap_or(default_tag.trim());
    if tag.is_empty() {
        return Err(ResolutionError::MissingTag(full_name));
    }
    if tag.contains(['/', ':']) || tag.chars().any(char::is_whitespace) {
        return Err(ResolutionError::InvalidReference(format!("{full_name}:{tag}")));
    }
    Ok(format!("{full_name}:{tag}"))
}

/// Like [`compute_image`], but falls back to the deployed image when the
/// spec names no image at all.
pub fn resolve_or_deployed(
    registry: &str,
    default_tag: &str,
    spec: &ImageSpec,
    deployed: &dyn DeployedImage,
) -> Result<String, ResolutionError> {
    if !spec.is_empty() {
        return compute_image(registry, default_tag, spec);
    }
    debug!("no image given, using the deployed one");
    match deployed.deployed_image().map_err(ResolutionError::Lookup)? {
        Some(image) => Ok(image),
        None => Err(ResolutionError::NothingDeployed),
    }
}

fn has_registry_host(name: &str) -> bool {
    match name.split_once('/') {
        Some((first, _)) => first.contains(['.', ':']) || first == "localhost",
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Running(Option<&'static str>);

    impl DeployedImage for Running {
        fn deployed_image(&self) -> Result<Option<String>, String> {
            Ok(self.0.map(str::to_string))
        }
    }

    const REGISTRY: &str = "registry.opensuse.org/uyuni";

    #[test]
    fn prepends_registry_and_default_tag() {
        let image = compute_image(REGISTRY, DEFAULT_TAG, &ImageSpec::named("server")).unwrap();
        assert_eq!(image, "registry.opensuse.org/uyuni/server:latest");
    }

    #[test]
    fn explicit_tag_wins_over_default() {
        let spec = ImageSpec::named("server").with_tag("2024.07");
        let image = compute_image(REGISTRY, DEFAULT_TAG, &spec).unwrap();
        assert_eq!(image, "registry.opensuse.org/uyuni/server:2024.07");
    }

    #[test]
    fn keeps_name_with_registry_host() {
        let spec = ImageSpec::named("localhost:5000/custom/server");
        let image = compute_image(REGISTRY, "1.0", &spec).unwrap();
        assert_eq!(image, "localhost:5000/custom/server:1.0");

        let spec = ImageSpec::named("registry.suse.com/suse/manager/server:5.0");
        let image = compute_image(REGISTRY, DEFAULT_TAG, &spec).unwrap();
        assert_eq!(image, "registry.suse.com/suse/manager/server:5.0");
    }

    #[test]
    fn does_not_double_the_registry() {
        let spec = ImageSpec::named("registry.opensuse.org/uyuni/server");
        let image = compute_image(REGISTRY, DEFAULT_TAG, &spec).unwrap();
        assert_eq!(image, "registry.opensuse.org/uyuni/server:latest");
    }

    #[test]
    fn registry_prefix_must_end_at_a_path_segment() {
        let image = compute_image("serv", DEFAULT_TAG, &ImageSpec::named("server")).unwrap();
        assert_eq!(image, "serv/server:latest");
    }

    #[test]
    fn spec_registry_overrides_argument() {
        let spec = ImageSpec::named("server").with_registry("example.com/mirror/");
        let image = compute_image(REGISTRY, DEFAULT_TAG, &spec).unwrap();
        assert_eq!(image, "example.com/mirror/server:latest");
    }

    #[test]
    fn embedded_tag_is_kept_and_conflicts_are_rejected() {
        let spec = ImageSpec::named("server:5.0");
        assert_eq!(
            compute_image(REGISTRY, DEFAULT_TAG, &spec).unwrap(),
            "registry.opensuse.org/uyuni/server:5.0"
        );

        let same = ImageSpec::named("server:5.0").with_tag("5.0");
        assert!(compute_image(REGISTRY, DEFAULT_TAG, &same).is_ok());

        let conflict = ImageSpec::named("server:5.0").with_tag("5.1");
        assert!(matches!(
            compute_image(REGISTRY, DEFAULT_TAG, &conflict),
            Err(ResolutionError::ConflictingTag { .. })
        ));
    }

    #[test]
    fn tag_without_name_is_an_error() {
        let spec = ImageSpec::default().with_tag("5.0");
        assert_eq!(
            compute_image(REGISTRY, DEFAULT_TAG, &spec),
            Err(ResolutionError::MissingName)
        );
    }

    #[test]
    fn missing_tag_everywhere_is_an_error() {
        let spec = ImageSpec::named("server");
        assert!(matches!(
            compute_image(REGISTRY, "", &spec),
            Err(ResolutionError::MissingTag(_))
        ));
    }

    #[test]
    fn invalid_references_are_rejected() {
        let spec = ImageSpec::named("bad name");
        assert!(matches!(
            compute_image("", DEFAULT_TAG, &spec),
            Err(ResolutionError::InvalidReference(_))
        ));
        let spec = ImageSpec::named("server").with_tag("a/b");
        assert!(matches!(
            compute_image(REGISTRY, DEFAULT_TAG, &spec),
            Err(ResolutionError::InvalidReference(_))
        ));
    }

    #[test]
    fn falls_back_to_deployed_image() {
        let running = Running(Some("registry.opensuse.org/uyuni/server:2024.05"));
        let image =
            resolve_or_deployed(REGISTRY, DEFAULT_TAG, &ImageSpec::default(), &running).unwrap();
        assert_eq!(image, "registry.opensuse.org/uyuni/server:2024.05");

        let nothing = Running(None);
        assert_eq!(
            resolve_or_deployed(REGISTRY, DEFAULT_TAG, &ImageSpec::default(), &nothing),
            Err(ResolutionError::NothingDeployed)
        );
    }

    #[test]
    fn explicit_image_skips_the_deployed_lookup() {
        struct Panics;
        impl DeployedImage for Panics {
            fn deployed_image(&self) -> Result<Option<String>, String> {
                panic!("must not be queried");
            }
        }
        let image =
            resolve_or_deployed(REGISTRY, DEFAULT_TAG, &ImageSpec::named("server"), &Panics)
                .unwrap();
        assert_eq!(image, "registry.opensuse.org/uyuni/server:latest");
    }

    #[test]
    fn pull_policy_normalizes() {
        assert_eq!(PullPolicy::normalize("always"), PullPolicy::Always);
        assert_eq!(PullPolicy::normalize("NEVER"), PullPolicy::Never);
        assert_eq!(PullPolicy::normalize("IfNotPresent"), PullPolicy::IfNotPresent);
        assert_eq!(PullPolicy::normalize("whatever"), PullPolicy::IfNotPresent);
        assert_eq!(PullPolicy::IfNotPresent.as_podman(), "missing");
    }
}
