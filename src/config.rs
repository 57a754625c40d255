//! Supervisor configuration.
//!
//! Paths and timings the supervisor needs at boot. Everything has a default
//! matching the container layout; the binary overrides paths from flags or
//! environment variables.

use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// Environment variable holding the global startup delay in seconds.
pub const STARTUP_DELAY_ENV: &str = "SUPERVISOR_STARTUP_DELAY";

/// Default location of the services descriptor file.
pub const DEFAULT_SERVICES_FILE: &str = "/home/node/.gateway/services.json";

/// Default gateway state directory.
pub const DEFAULT_STATE_DIR: &str = "/home/node/.gateway";

/// Default command line of the primary service.
pub const DEFAULT_GATEWAY_COMMAND: &str = "node /app/dist/index.js gateway";

/// Directory holding skills bundled with the image.
pub const DEFAULT_SKILLS_SOURCE: &str = "/app/skills";

/// Directory the gateway loads skills from.
pub const DEFAULT_SKILLS_TARGET: &str = "/home/node/.gateway/skills";

/// How often an unmet condition is re-checked.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Restart delay of the primary service.
pub const GATEWAY_RESTART_DELAY_SECS: u64 = 2;

/// Name the primary service is logged under.
pub const GATEWAY_SERVICE_NAME: &str = "gateway";

/// State file name used by older releases.
pub const LEGACY_STATE_FILE: &str = "config.json";

/// Current state file name.
pub const STATE_FILE: &str = "gateway.json";

/// Advisory lock file held by a running gateway.
pub const LOCK_FILE: &str = "gateway.lock";

/// Unprivileged identity every service runs under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceIdentity {
    /// Numeric user id
    pub uid: u32,
    /// Numeric group id
    pub gid: u32,
    /// Home directory exported as `HOME`
    pub home: PathBuf,
}

impl ServiceIdentity {
    /// The `node` user baked into the container image.
    pub fn node() -> Self {
        Self {
            uid: 1000,
            gid: 1000,
            home: PathBuf::from("/home/node"),
        }
    }
}

impl Default for ServiceIdentity {
    fn default() -> Self {
        Self::node()
    }
}

/// Boot-time configuration of the supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// JSON array of auxiliary service descriptors
    pub services_file: PathBuf,
    /// Gateway state directory
    pub state_dir: PathBuf,
    /// Shell command line of the primary service
    pub gateway_command: String,
    /// Bundled skills directory
    pub skills_source: PathBuf,
    /// Skills directory the gateway reads
    pub skills_target: PathBuf,
    /// Global delay applied once before any service is registered
    pub startup_delay: Duration,
    /// Condition poll interval
    pub poll_interval: Duration,
    /// Identity services are started under
    pub identity: ServiceIdentity,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            services_file: PathBuf::from(DEFAULT_SERVICES_FILE),
            state_dir: PathBuf::from(DEFAULT_STATE_DIR),
            gateway_command: DEFAULT_GATEWAY_COMMAND.to_string(),
            skills_source: PathBuf::from(DEFAULT_SKILLS_SOURCE),
            skills_target: PathBuf::from(DEFAULT_SKILLS_TARGET),
            startup_delay: Duration::ZERO,
            poll_interval: DEFAULT_POLL_INTERVAL,
            identity: ServiceIdentity::node(),
        }
    }
}

impl SupervisorConfig {
    /// Path of the legacy state file inside the state directory.
    pub fn legacy_state_path(&self) -> PathBuf {
        self.state_dir.join(LEGACY_STATE_FILE)
    }

    /// Path of the current state file inside the state directory.
    pub fn state_path(&self) -> PathBuf {
        self.state_dir.join(STATE_FILE)
    }

    /// Path of the advisory lock file inside the state directory.
    pub fn lock_path(&self) -> PathBuf {
        self.state_dir.join(LOCK_FILE)
    }
}

/// Parse a startup delay given in whole seconds.
///
/// Absent, empty, negative or non-numeric values all yield zero.
pub fn parse_startup_delay(raw: Option<&str>) -> Duration {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Duration::ZERO;
    };

    match raw.parse::<i64>() {
        Ok(secs) if secs > 0 => Duration::from_secs(secs as u64),
        Ok(_) => Duration::ZERO,
        Err(_) => {
            warn!(
                target: "supervisor",
                value = %raw,
                "{} is not a number of seconds, ignoring",
                STARTUP_DELAY_ENV
            );
            Duration::ZERO
        }
    }
}
