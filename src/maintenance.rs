//! One-time fixups run before any service starts.
//!
//! Every step is idempotent and independent: a failure is logged under the
//! `setup` target and the remaining steps still run.

use nix::errno::Errno;
use nix::sys::stat::{fchmodat, FchmodatFlags, Mode};
use std::io::ErrorKind;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::config::SupervisorConfig;
use crate::error::Result;

/// What a maintenance pass changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    /// Legacy state file was renamed to the current name
    pub migrated_state: bool,
    /// A stale lock file was deleted
    pub removed_lock: bool,
    /// State directory permissions were set to owner-only
    pub tightened_permissions: bool,
}

/// Run all fixups in order.
pub fn run_maintenance(config: &SupervisorConfig) -> MaintenanceReport {
    let mut report = MaintenanceReport::default();

    match migrate_legacy_state(&config.legacy_state_path(), &config.state_path()) {
        Ok(migrated) => report.migrated_state = migrated,
        Err(e) => warn!(target: "setup", error = %e, "Failed to migrate legacy state file"),
    }

    match remove_stale_lock(&config.lock_path()) {
        Ok(removed) => report.removed_lock = removed,
        Err(e) => warn!(target: "setup", error = %e, "Failed to remove stale lock file"),
    }

    match tighten_permissions(&config.state_dir) {
        Ok(tightened) => report.tightened_permissions = tightened,
        Err(e) => warn!(target: "setup", error = %e, "Failed to tighten state directory permissions"),
    }

    report
}

/// Rename `legacy` to `current` when only the legacy file exists.
///
/// Never overwrites an existing current-format file.
pub fn migrate_legacy_state(legacy: &Path, current: &Path) -> Result<bool> {
    if !legacy.exists() {
        return Ok(false);
    }

    if current.exists() {
        debug!(
            target: "setup",
            legacy = %legacy.display(),
            current = %current.display(),
            "Both legacy and current state files exist, leaving legacy file in place"
        );
        return Ok(false);
    }

    std::fs::rename(legacy, current)?;
    info!(
        target: "setup",
        from = %legacy.display(),
        to = %current.display(),
        "Migrated legacy state file"
    );
    Ok(true)
}

/// Delete a lock file left behind by an ungraceful shutdown.
pub fn remove_stale_lock(lock: &Path) -> Result<bool> {
    match std::fs::remove_file(lock) {
        Ok(()) => {
            info!(target: "setup", path = %lock.display(), "Removed stale lock file");
            Ok(true)
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Restrict the state directory to its owner.
///
/// Some bind-mounted filesystems refuse chmod outright; that is not an
/// error worth more than a debug line.
pub fn tighten_permissions(dir: &Path) -> Result<bool> {
    if !dir.is_dir() {
        return Ok(false);
    }

    let mode = std::fs::metadata(dir)?.permissions().mode();
    if mode & 0o777 == 0o700 {
        return Ok(false);
    }

    match fchmodat(None, dir, Mode::S_IRWXU, FchmodatFlags::FollowSymlink) {
        Ok(()) => {
            debug!(target: "setup", path = %dir.display(), "State directory set to 0700");
            Ok(true)
        }
        Err(Errno::EPERM) | Err(Errno::EACCES) | Err(Errno::EROFS) => {
            debug!(
                target: "setup",
                path = %dir.display(),
                "Filesystem refused chmod on state directory, continuing"
            );
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_migrate_only_legacy() {
        let temp = TempDir::new().unwrap();
        let legacy = temp.path().join("old.json");
        let current = temp.path().join("new.json");
        std::fs::write(&legacy, "{}").unwrap();

        assert!(migrate_legacy_state(&legacy, &current).unwrap());
        assert!(!legacy.exists());
        assert_eq!(std::fs::read_to_string(&current).unwrap(), "{}");
    }

    #[test]
    fn test_migrate_never_overwrites() {
        let temp = TempDir::new().unwrap();
        let legacy = temp.path().join("old.json");
        let current = temp.path().join("new.json");
        std::fs::write(&legacy, "old").unwrap();
        std::fs::write(&current, "new").unwrap();

        assert!(!migrate_legacy_state(&legacy, &current).unwrap());
        assert_eq!(std::fs::read_to_string(&current).unwrap(), "new");
        assert!(legacy.exists());
    }

    #[test]
    fn test_migrate_without_legacy() {
        let temp = TempDir::new().unwrap();
        let legacy = temp.path().join("old.json");
        let current = temp.path().join("new.json");

        assert!(!migrate_legacy_state(&legacy, &current).unwrap());
        assert!(!current.exists());
    }

    #[test]
    fn test_remove_lock() {
        let temp = TempDir::new().unwrap();
        let lock = temp.path().join("gateway.lock");
        std::fs::write(&lock, "1234").unwrap();

        assert!(remove_stale_lock(&lock).unwrap());
        assert!(!lock.exists());
        assert!(!remove_stale_lock(&lock).unwrap());
    }

    #[test]
    fn test_tighten_permissions() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("state");
        std::fs::create_dir(&dir).unwrap();
        std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o755)).unwrap();

        assert!(tighten_permissions(&dir).unwrap());
        let mode = std::fs::metadata(&dir).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);

        assert!(!tighten_permissions(&dir).unwrap());
    }

    #[test]
    fn test_tighten_missing_dir() {
        let temp = TempDir::new().unwrap();
        assert!(!tighten_permissions(&temp.path().join("missing")).unwrap());
    }
}
