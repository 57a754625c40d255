//! Service descriptors and the services file they are loaded from.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::condition::Condition;
use crate::config::{GATEWAY_RESTART_DELAY_SECS, GATEWAY_SERVICE_NAME};
use crate::error::{Error, Result};

/// Describes one supervised service.
///
/// Immutable once loaded; the supervisor has to be restarted to pick up a
/// changed services file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDescriptor {
    /// Name used to correlate log lines
    pub name: String,
    /// Shell command line
    pub command: String,
    /// Startup precondition, e.g. `file:/data/model.bin`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// Command run as root before every start attempt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_command: Option<String>,
    /// Delay before restarting after a non-clean exit
    #[serde(default = "default_restart_delay_seconds")]
    pub restart_delay_seconds: u64,
    /// Delay before the first start attempt
    #[serde(default)]
    pub start_delay_seconds: u64,
}

fn default_restart_delay_seconds() -> u64 {
    5
}

impl ServiceDescriptor {
    /// Create a descriptor with default delays and no condition.
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            condition: None,
            pre_command: None,
            restart_delay_seconds: default_restart_delay_seconds(),
            start_delay_seconds: 0,
        }
    }

    /// The always-present primary gateway service.
    pub fn gateway(command: impl Into<String>) -> Self {
        Self::new(GATEWAY_SERVICE_NAME, command).restart_delay_seconds(GATEWAY_RESTART_DELAY_SECS)
    }

    /// Set the startup condition
    pub fn condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    /// Set the privileged pre-command
    pub fn pre_command(mut self, cmd: impl Into<String>) -> Self {
        self.pre_command = Some(cmd.into());
        self
    }

    /// Set the restart delay
    pub fn restart_delay_seconds(mut self, secs: u64) -> Self {
        self.restart_delay_seconds = secs;
        self
    }

    /// Set the first-start delay
    pub fn start_delay_seconds(mut self, secs: u64) -> Self {
        self.start_delay_seconds = secs;
        self
    }

    /// Parsed startup condition.
    pub fn parsed_condition(&self) -> Condition {
        Condition::parse(self.condition.as_deref())
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_secs(self.restart_delay_seconds)
    }

    pub fn start_delay(&self) -> Duration {
        Duration::from_secs(self.start_delay_seconds)
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("empty name".to_string());
        }
        if self.command.trim().is_empty() {
            return Err("empty command".to_string());
        }
        Ok(())
    }
}

/// Load the declared services from `path`.
///
/// A missing file means no auxiliary services. An unreadable or malformed
/// file is logged and also yields no services; individual entries that fail
/// to decode are skipped while the rest load.
pub fn load_descriptors(path: &Path) -> Vec<ServiceDescriptor> {
    if !path.exists() {
        debug!(target: "supervisor", path = %path.display(), "No services file, no auxiliary services");
        return Vec::new();
    }

    match read_descriptors(path) {
        Ok(descriptors) => {
            warn_on_duplicates(&descriptors);
            info!(
                target: "supervisor",
                path = %path.display(),
                count = descriptors.len(),
                "Loaded service descriptors"
            );
            descriptors
        }
        Err(e) => {
            warn!(
                target: "supervisor",
                path = %path.display(),
                error = %e,
                "Ignoring services file, no auxiliary services will be started"
            );
            Vec::new()
        }
    }
}

/// Read and decode the services file.
///
/// Fails only if the file cannot be read or its top level is not a JSON
/// array.
pub fn read_descriptors(path: &Path) -> Result<Vec<ServiceDescriptor>> {
    let content = std::fs::read_to_string(path)?;
    let value: serde_json::Value = serde_json::from_str(&content)?;

    let serde_json::Value::Array(entries) = value else {
        return Err(Error::InvalidDescriptorFile {
            path: path.to_path_buf(),
            reason: "expected a JSON array of services".to_string(),
        });
    };

    let mut descriptors = Vec::with_capacity(entries.len());
    for (index, entry) in entries.into_iter().enumerate() {
        let decoded = serde_json::from_value::<ServiceDescriptor>(entry)
            .map_err(|e| e.to_string())
            .and_then(|desc| desc.validate().map(|_| desc));

        match decoded {
            Ok(desc) => descriptors.push(desc),
            Err(reason) => {
                warn!(
                    target: "supervisor",
                    path = %path.display(),
                    index = index,
                    reason = %reason,
                    "Skipping invalid service entry"
                );
            }
        }
    }

    Ok(descriptors)
}

fn warn_on_duplicates(descriptors: &[ServiceDescriptor]) {
    let mut seen = HashSet::new();
    for desc in descriptors {
        if !seen.insert(desc.name.as_str()) {
            warn!(
                target: "supervisor",
                service = %desc.name,
                "Duplicate service name, log lines for these services will be ambiguous"
            );
        }
    }
}
