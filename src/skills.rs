//! Links skills bundled with the image into the gateway's skills directory.

use std::io::ErrorKind;
use std::os::unix::fs::symlink;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::error::Result;

/// Symlink every entry of `source` into `target` under the same name.
///
/// Existing entries in `target` are left alone. A failure on one entry is
/// logged and the rest are still linked. Returns the number of new links.
pub fn link_skills(source: &Path, target: &Path) -> usize {
    match try_link_skills(source, target) {
        Ok(linked) => linked,
        Err(e) => {
            warn!(
                target: "setup",
                source = %source.display(),
                error = %e,
                "Skill linking skipped"
            );
            0
        }
    }
}

fn try_link_skills(source: &Path, target: &Path) -> Result<usize> {
    let entries = match std::fs::read_dir(source) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(target: "setup", source = %source.display(), "No bundled skills");
            return Ok(0);
        }
        Err(e) => return Err(e.into()),
    };

    std::fs::create_dir_all(target)?;

    let mut linked = 0;
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(target: "setup", error = %e, "Failed to read skills entry");
                continue;
            }
        };

        let link = target.join(entry.file_name());
        if link.symlink_metadata().is_ok() {
            continue;
        }

        match symlink(entry.path(), &link) {
            Ok(()) => linked += 1,
            Err(e) => warn!(
                target: "setup",
                skill = %entry.path().display(),
                error = %e,
                "Failed to link skill"
            ),
        }
    }

    if linked > 0 {
        info!(target: "setup", count = linked, target_dir = %target.display(), "Linked bundled skills");
    }

    Ok(linked)
}
