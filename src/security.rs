//! Allow-list check for privileged pre-commands.
//!
//! Pre-commands come from the services file and run as root, so they are
//! matched against a single accepted shape instead of screened for bad
//! patterns: a recursive `chmod a+rw` of a path below the service user's
//! home, optionally followed by `2>/dev/null` and/or `|| true`.

use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

use crate::config::ServiceIdentity;

/// Compiled pre-command allow-list for one home directory.
#[derive(Debug, Clone)]
pub struct PreCommandPolicy {
    pattern: Regex,
}

impl PreCommandPolicy {
    /// Build the policy for the given home directory.
    pub fn for_home(home: &Path) -> Self {
        let home = home.to_string_lossy();
        let home = regex::escape(home.trim_end_matches('/'));
        let pattern = Regex::new(&format!(
            r"^chmod -R a\+rw {home}/(?P<rel>[A-Za-z0-9._/-]+)(?: 2>/dev/null)?(?: \|\| true)?$"
        ))
        .expect("Invalid pre-command regex");

        Self { pattern }
    }

    /// Check whether `cmd` may be executed as root.
    pub fn is_safe(&self, cmd: &str) -> bool {
        let Some(captures) = self.pattern.captures(cmd) else {
            return false;
        };

        // The character class admits dots and slashes, so empty, `.` and `..`
        // segments could still widen the chmod to the home directory or above.
        captures
            .name("rel")
            .map(|rel| {
                rel.as_str()
                    .split('/')
                    .all(|segment| !segment.is_empty() && segment != "." && segment != "..")
            })
            .unwrap_or(false)
    }
}

impl Default for PreCommandPolicy {
    fn default() -> Self {
        Self::for_home(&ServiceIdentity::node().home)
    }
}

/// Check a pre-command against the policy for the fixed service home.
pub fn is_pre_command_safe(cmd: &str) -> bool {
    static POLICY: OnceLock<PreCommandPolicy> = OnceLock::new();
    POLICY.get_or_init(PreCommandPolicy::default).is_safe(cmd)
}
