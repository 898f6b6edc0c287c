//! Script templates and the scratch directory they are rendered into.
//!
//! The directory is shared with helpers through a host mount and removed
//! when the [`ScratchDir`] is dropped, whatever the outcome.

use std::fs;
use std::path::{Path, PathBuf};

use mgradm_backend::HostMount;
use mgradm_core::DbVersion;
use tempfile::TempDir;
use tracing::debug;

/// Where helpers see the scratch directory.
pub const SCRATCH_MOUNT: &str = "/var/lib/uyuni-tools";

const MIGRATION_TEMPLATE: &str = include_str!("../scripts/pgsql-migration.sh");
const FINALIZE_TEMPLATE: &str = include_str!("../scripts/pgsql-finalize.sh");
const POST_UPGRADE_SCRIPT: &str = include_str!("../scripts/post-upgrade.sh");

/// Replace every `{{KEY}}` placeholder.
pub fn render(template: &str, values: &[(&str, &str)]) -> String {
    values
        .iter()
        .fold(template.to_string(), |text, (key, value)| {
            text.replace(&format!("{{{{{key}}}}}"), value)
        })
}

pub fn migration_script(current: DbVersion, target: DbVersion) -> String {
    let old = current.major.to_string();
    let new = target.major.to_string();
    render(
        MIGRATION_TEMPLATE,
        &[("OLD_VERSION", old.as_str()), ("NEW_VERSION", new.as_str())],
    )
}

pub fn finalize_script(version_changed: bool) -> String {
    render(
        FINALIZE_TEMPLATE,
        &[("VERSION_CHANGED", if version_changed { "true" } else { "false" })],
    )
}

pub fn post_upgrade_script() -> String {
    POST_UPGRADE_SCRIPT.to_string()
}

pub struct ScratchDir {
    dir: TempDir,
}

impl ScratchDir {
    pub fn new() -> std::io::Result<Self> {
        let dir = tempfile::Builder::new().prefix("mgradm-").tempdir()?;
        debug!(path = %dir.path().display(), "scratch directory created");
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write an executable script; returns its path inside helpers.
    pub fn write_script(&self, name: &str, content: &str) -> std::io::Result<String> {
        let path = self.dir.path().join(name);
        fs::write(&path, content)?;
        make_executable(&path)?;
        Ok(format!("{SCRATCH_MOUNT}/{name}"))
    }

    pub fn mount(&self) -> HostMount {
        HostMount {
            host_path: PathBuf::from(self.dir.path()),
            container_path: SCRATCH_MOUNT.to_string(),
        }
    }
}

#[cfg(unix)]
fn make_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
