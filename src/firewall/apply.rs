//! Applying compiled rules: diff against the file on disk, replace, reload

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::Path;
use std::process::Command;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use super::FirewallError;

/// Runs the backend's reload command
pub trait Reloader {
    fn reload(&self, command: &str) -> Result<(), FirewallError>;
}

/// Runs the reload command through `sh -c`
pub struct ShellReloader;

impl ShellReloader {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ShellReloader {
    fn default() -> Self {
        Self::new()
    }
}

impl Reloader for ShellReloader {
    fn reload(&self, command: &str) -> Result<(), FirewallError> {
        debug!("Running reload command: {}", command);
        let output = Command::new("sh")
            .args(["-c", command])
            .output()
            .map_err(|e| FirewallError::ReloadError {
                command: command.to_string(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
            combined.push_str(&String::from_utf8_lossy(&output.stderr));
            return Err(FirewallError::ReloadFailed {
                command: command.to_string(),
                status: output.status.to_string(),
                output: combined.trim().to_string(),
            });
        }

        Ok(())
    }
}

/// What a sync run did to the rules file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// File already held these exact bytes; nothing written or reloaded
    Unchanged,
    /// File rewritten and the firewall reloaded
    Applied,
}

/// Write `rules` to `rules_file` and reload, unless the file already holds
/// exactly these bytes. A missing file counts as changed.
pub fn apply_rules<R: Reloader>(
    rules_file: &Path,
    rules: &str,
    reload_command: &str,
    reloader: &R,
) -> Result<SyncOutcome, FirewallError> {
    let current = match fs::read(rules_file) {
        Ok(bytes) => Some(bytes),
        Err(e) if e.kind() == ErrorKind::NotFound => None,
        Err(source) => {
            return Err(FirewallError::ReadError {
                path: rules_file.display().to_string(),
                source,
            });
        }
    };

    if current.as_deref() == Some(rules.as_bytes()) {
        info!("Firewall rules unchanged: {}", rules_file.display());
        return Ok(SyncOutcome::Unchanged);
    }

    write_atomically(rules_file, rules, current.is_some()).map_err(|source| {
        FirewallError::WriteError {
            path: rules_file.display().to_string(),
            source,
        }
    })?;
    info!("Wrote firewall rules: {}", rules_file.display());

    reloader.reload(reload_command)?;
    Ok(SyncOutcome::Applied)
}

/// Write through a temp file in the same directory and rename it over
/// `path`, so the reload command never reads a half-written file. The
/// temp file is removed if anything fails before the rename.
fn write_atomically(path: &Path, contents: &str, replacing: bool) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(contents.as_bytes())?;

    // NamedTempFile is created owner-only; keep what the old file had.
    let permissions = if replacing {
        Some(fs::metadata(path)?.permissions())
    } else {
        default_permissions()
    };
    if let Some(permissions) = permissions {
        tmp.as_file().set_permissions(permissions)?;
    }

    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(unix)]
fn default_permissions() -> Option<fs::Permissions> {
    use std::os::unix::fs::PermissionsExt;
    Some(fs::Permissions::from_mode(0o644))
}

#[cfg(not(unix))]
fn default_permissions() -> Option<fs::Permissions> {
    None
}
