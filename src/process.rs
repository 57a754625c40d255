//! Spawning service and pre-command processes through the shell.

use nix::sys::signal::Signal;
use nix::unistd::geteuid;
use std::fmt;
use std::os::unix::process::ExitStatusExt;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::debug;

use crate::config::ServiceIdentity;
use crate::error::{Error, Result};

/// Shell used to interpret service command lines.
pub const SHELL: &str = "/bin/sh";

/// How a process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitOutcome {
    /// Exit code (if exited normally)
    pub code: Option<i32>,
    /// Signal (if killed by signal)
    pub signal: Option<i32>,
}

impl ExitOutcome {
    /// Exit code 0. Anything else, including a signal, is not clean.
    pub fn is_clean(&self) -> bool {
        self.code == Some(0)
    }

    /// Outcome recorded when the process could not be spawned at all.
    pub fn spawn_failure() -> Self {
        Self {
            code: None,
            signal: None,
        }
    }
}

impl From<std::process::ExitStatus> for ExitOutcome {
    fn from(status: std::process::ExitStatus) -> Self {
        Self {
            code: status.code(),
            signal: status.signal(),
        }
    }
}

impl fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {}", code),
            (None, Some(sig)) => match Signal::try_from(sig) {
                Ok(signal) => write!(f, "signal {}", signal.as_str()),
                Err(_) => write!(f, "signal {}", sig),
            },
            (None, None) => write!(f, "spawn failure"),
        }
    }
}

/// Identity to drop to when spawning services.
///
/// Only root can switch users, so when the supervisor runs unprivileged the
/// services simply inherit its identity.
pub fn effective_identity(identity: ServiceIdentity) -> Option<ServiceIdentity> {
    if geteuid().is_root() {
        Some(identity)
    } else {
        debug!(
            target: "supervisor",
            uid = identity.uid,
            "Not running as root, services keep the supervisor's identity"
        );
        None
    }
}

/// Build a shell invocation of `cmd` with inherited output streams.
fn shell_command(cmd: &str) -> Command {
    let mut command = Command::new(SHELL);
    command
        .arg("-c")
        .arg(cmd)
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());
    command
}

/// Spawn a service command line, dropped to `identity` when given.
pub fn spawn_service(name: &str, cmd: &str, identity: Option<&ServiceIdentity>) -> Result<Child> {
    let mut command = shell_command(cmd);

    if let Some(identity) = identity {
        command
            .uid(identity.uid)
            .gid(identity.gid)
            .env("HOME", &identity.home);
    }

    command.spawn().map_err(|e| Error::ProcessSpawnFailed {
        name: name.to_string(),
        reason: e.to_string(),
    })
}

/// Run a command line with the supervisor's own privileges and wait for it.
pub async fn run_privileged(name: &str, cmd: &str) -> Result<ExitOutcome> {
    let status = shell_command(cmd)
        .status()
        .await
        .map_err(|e| Error::ProcessSpawnFailed {
            name: name.to_string(),
            reason: e.to_string(),
        })?;

    Ok(status.into())
}

/// Wait for a spawned child and translate its status.
pub async fn wait_child(child: &mut Child) -> Result<ExitOutcome> {
    let status = child.wait().await?;
    Ok(status.into())
}
