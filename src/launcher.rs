//! Per-service start/monitor/restart state machine.
//!
//! Each registered descriptor gets its own [`RunningServiceInstance`] driven
//! by a dedicated tokio task. Instances share nothing: each owns its
//! descriptor, its attempt counter and at most one child process.
//!
//! ```text
//! PendingStartDelay -> WaitingOnCondition <-+
//!                            |              |
//!                        PreCommand         |
//!                            |              |
//!                         Running           |
//!                       /        \          |
//!              ExitedClean   ExitedNonZero -+  (after restartDelaySeconds)
//! ```
//!
//! Restart delay is constant. A service that dies instantly is throttled
//! only by its own `restartDelaySeconds`.

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Child;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::condition::Condition;
use crate::config::{ServiceIdentity, DEFAULT_POLL_INTERVAL};
use crate::descriptor::ServiceDescriptor;
use crate::process::{self, ExitOutcome};
use crate::security::PreCommandPolicy;

/// An unmet condition is logged on the first poll and then every this many polls.
pub const CONDITION_LOG_EVERY: u64 = 10;

/// Lifecycle state of a service instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchState {
    /// Waiting out `startDelaySeconds` before the first attempt
    PendingStartDelay,
    /// Polling the startup condition
    WaitingOnCondition,
    /// Running the privileged pre-command
    PreCommand,
    /// Child process is alive
    Running,
    /// Exited with code 0, supervision has ended
    ExitedClean,
    /// Exited otherwise, waiting to restart
    ExitedNonZero,
}

impl fmt::Display for LaunchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LaunchState::PendingStartDelay => write!(f, "pending-start-delay"),
            LaunchState::WaitingOnCondition => write!(f, "waiting-on-condition"),
            LaunchState::PreCommand => write!(f, "pre-command"),
            LaunchState::Running => write!(f, "running"),
            LaunchState::ExitedClean => write!(f, "exited-clean"),
            LaunchState::ExitedNonZero => write!(f, "exited-nonzero"),
        }
    }
}

/// Something that happened to a supervised service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceEventKind {
    /// First attempt is being delayed
    StartDelay(Duration),
    /// Condition was checked and is not met; `polls` counts checks this round
    ConditionPending { polls: u64 },
    /// Pre-command ran to completion
    PreCommandRan(ExitOutcome),
    /// Pre-command did not match the allow-list and was not run
    PreCommandRejected,
    /// Service process started
    Spawned { attempt: u32, pid: Option<u32> },
    /// Service process could not be started
    SpawnFailed { attempt: u32 },
    /// Service process ended
    Exited { attempt: u32, outcome: ExitOutcome },
    /// Supervision of this service has ended for good
    Finished,
}

/// Lifecycle event published by a service instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEvent {
    /// Service name
    pub service: String,
    /// What happened
    pub kind: ServiceEventKind,
}

/// Settings shared by every service instance.
#[derive(Debug, Clone)]
pub struct LaunchContext {
    /// Identity services drop to, `None` to keep the supervisor's
    pub identity: Option<ServiceIdentity>,
    /// Condition poll interval
    pub poll_interval: Duration,
    /// Allow-list for privileged pre-commands
    pub policy: PreCommandPolicy,
    /// Optional sink for lifecycle events
    pub events: Option<UnboundedSender<ServiceEvent>>,
}

impl LaunchContext {
    /// Create a context for the given identity.
    ///
    /// The pre-command policy is bound to the identity's home directory.
    pub fn new(identity: ServiceIdentity) -> Self {
        let policy = PreCommandPolicy::for_home(&identity.home);
        Self {
            identity: process::effective_identity(identity),
            poll_interval: DEFAULT_POLL_INTERVAL,
            policy,
            events: None,
        }
    }

    /// Set the condition poll interval
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the pre-command policy
    pub fn policy(mut self, policy: PreCommandPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the event sink
    pub fn events(mut self, events: UnboundedSender<ServiceEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Never drop privileges, even as root
    pub fn without_identity(mut self) -> Self {
        self.identity = None;
        self
    }
}

impl Default for LaunchContext {
    fn default() -> Self {
        Self::new(ServiceIdentity::node())
    }
}

/// Runtime state of one supervised service.
pub struct RunningServiceInstance {
    descriptor: Arc<ServiceDescriptor>,
    condition: Condition,
    context: LaunchContext,
    state: LaunchState,
    /// Start attempts so far, for log correlation only
    attempt: u32,
    last_exit: Option<ExitOutcome>,
    child: Option<Child>,
    started_at: Option<DateTime<Utc>>,
}

impl RunningServiceInstance {
    /// Create an instance that has not started yet.
    pub fn new(descriptor: Arc<ServiceDescriptor>, context: LaunchContext) -> Self {
        let condition = descriptor.parsed_condition();
        Self {
            descriptor,
            condition,
            context,
            state: LaunchState::PendingStartDelay,
            attempt: 0,
            last_exit: None,
            child: None,
            started_at: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn state(&self) -> LaunchState {
        self.state
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn last_exit(&self) -> Option<ExitOutcome> {
        self.last_exit
    }

    /// Process ID of the running child, if any.
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(|child| child.id())
    }

    /// Drive the service until it exits cleanly.
    ///
    /// Never returns for a service that keeps failing.
    pub async fn run(mut self) {
        let start_delay = self.descriptor.start_delay();
        if !start_delay.is_zero() {
            self.transition(LaunchState::PendingStartDelay);
            info!(
                target: "supervisor",
                service = %self.name(),
                delay_secs = start_delay.as_secs(),
                "Delaying first start"
            );
            self.emit(ServiceEventKind::StartDelay(start_delay));
            tokio::time::sleep(start_delay).await;
        }

        loop {
            self.wait_for_condition().await;
            self.run_pre_command().await;

            let outcome = self.run_attempt().await;
            self.last_exit = Some(outcome);

            if outcome.is_clean() {
                self.transition(LaunchState::ExitedClean);
                info!(
                    target: "supervisor",
                    service = %self.name(),
                    attempt = self.attempt,
                    "Service exited cleanly, not restarting"
                );
                self.emit(ServiceEventKind::Finished);
                return;
            }

            self.transition(LaunchState::ExitedNonZero);
            let delay = self.descriptor.restart_delay();
            warn!(
                target: "supervisor",
                service = %self.name(),
                attempt = self.attempt,
                code = ?outcome.code,
                signal = ?outcome.signal,
                "Service exited with {}, restarting in {}s",
                outcome,
                delay.as_secs()
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Poll the condition until it holds.
    async fn wait_for_condition(&mut self) {
        self.transition(LaunchState::WaitingOnCondition);

        let mut polls: u64 = 0;
        while !self.condition.is_ready() {
            if polls % CONDITION_LOG_EVERY == 0 {
                if self.condition.is_unrecognized() {
                    error!(
                        target: "supervisor",
                        service = %self.name(),
                        condition = %self.condition,
                        "Unrecognized condition, service will never start"
                    );
                } else {
                    info!(
                        target: "supervisor",
                        service = %self.name(),
                        condition = %self.condition,
                        "Waiting for condition, rechecking every {}s",
                        self.context.poll_interval.as_secs()
                    );
                }
            }
            polls += 1;
            self.emit(ServiceEventKind::ConditionPending { polls });
            tokio::time::sleep(self.context.poll_interval).await;
        }

        if polls > 0 {
            info!(
                target: "supervisor",
                service = %self.name(),
                condition = %self.condition,
                "Condition met"
            );
        }
    }

    /// Run the pre-command if it passes the allow-list.
    ///
    /// Its exit status does not gate the start attempt.
    async fn run_pre_command(&mut self) {
        let Some(cmd) = self.descriptor.pre_command.clone() else {
            return;
        };

        self.transition(LaunchState::PreCommand);

        if !self.context.policy.is_safe(&cmd) {
            error!(
                target: "setup",
                service = %self.name(),
                pre_command = %cmd,
                "SECURITY: refusing to run pre-command as root, it does not match the allow-list; starting service without it"
            );
            self.emit(ServiceEventKind::PreCommandRejected);
            return;
        }

        info!(target: "setup", service = %self.name(), pre_command = %cmd, "Running pre-command as root");
        let outcome = match process::run_privileged(self.name(), &cmd).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(target: "setup", service = %self.name(), error = %e, "Pre-command could not be run");
                ExitOutcome::spawn_failure()
            }
        };

        if !outcome.is_clean() {
            warn!(
                target: "setup",
                service = %self.name(),
                "Pre-command ended with {}, starting service anyway",
                outcome
            );
        }
        self.emit(ServiceEventKind::PreCommandRan(outcome));
    }

    /// Spawn the service once and wait for it to exit.
    async fn run_attempt(&mut self) -> ExitOutcome {
        self.attempt += 1;
        let attempt = self.attempt;

        let child = process::spawn_service(
            self.name(),
            &self.descriptor.command,
            self.context.identity.as_ref(),
        );
        let child = match child {
            Ok(child) => child,
            Err(e) => {
                error!(target: "supervisor", service = %self.name(), attempt = attempt, error = %e, "Failed to start service");
                self.emit(ServiceEventKind::SpawnFailed { attempt });
                return ExitOutcome::spawn_failure();
            }
        };

        let pid = child.id();
        self.child = Some(child);
        self.started_at = Some(Utc::now());
        self.transition(LaunchState::Running);
        info!(target: "supervisor", service = %self.name(), attempt = attempt, pid = ?pid, "Service started");
        self.emit(ServiceEventKind::Spawned { attempt, pid });

        let waited = match self.child.as_mut() {
            Some(child) => process::wait_child(child).await,
            None => Ok(ExitOutcome::spawn_failure()),
        };
        self.child = None;

        let outcome = waited.unwrap_or_else(|e| {
            error!(target: "supervisor", service = %self.name(), error = %e, "Lost track of service process");
            ExitOutcome::spawn_failure()
        });

        let ran_secs = self
            .started_at
            .take()
            .map(|start| Utc::now().signed_duration_since(start).num_seconds().max(0))
            .unwrap_or(0);
        debug!(
            target: "supervisor",
            service = %self.name(),
            attempt = attempt,
            ran_secs = ran_secs,
            "Service process ended"
        );
        self.emit(ServiceEventKind::Exited { attempt, outcome });

        outcome
    }

    fn transition(&mut self, state: LaunchState) {
        debug!(target: "supervisor", service = %self.name(), from = %self.state, to = %state, "State change");
        self.state = state;
    }

    fn emit(&self, kind: ServiceEventKind) {
        if let Some(events) = &self.context.events {
            // A dropped receiver only means nobody is listening.
            let _ = events.send(ServiceEvent {
                service: self.descriptor.name.clone(),
                kind,
            });
        }
    }
}

/// Starts one independent task per service.
#[derive(Debug, Clone)]
pub struct ServiceLauncher {
    context: LaunchContext,
}

impl ServiceLauncher {
    pub fn new(context: LaunchContext) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &LaunchContext {
        &self.context
    }

    /// Begin supervising `descriptor` on its own task.
    pub fn launch(&self, descriptor: ServiceDescriptor) -> JoinHandle<()> {
        let instance = RunningServiceInstance::new(Arc::new(descriptor), self.context.clone());
        tokio::spawn(instance.run())
    }
}
