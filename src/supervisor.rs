//! Boot sequence and process-wide signal handling.

use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::SupervisorConfig;
use crate::descriptor::{load_descriptors, ServiceDescriptor};
use crate::error::{Error, Result};
use crate::launcher::{LaunchContext, ServiceLauncher};
use crate::maintenance::run_maintenance;
use crate::skills::link_skills;

/// A service the supervisor has registered.
pub struct SupervisedService {
    /// Service name
    pub name: String,
    handle: JoinHandle<()>,
}

impl SupervisedService {
    /// Whether the service's state machine is still running.
    pub fn is_active(&self) -> bool {
        !self.handle.is_finished()
    }
}

/// Owns every service state machine for the life of the process.
pub struct Supervisor {
    launcher: ServiceLauncher,
    services: Vec<SupervisedService>,
}

impl Supervisor {
    /// Create a supervisor with no services registered.
    pub fn new(context: LaunchContext) -> Self {
        Self {
            launcher: ServiceLauncher::new(context),
            services: Vec::new(),
        }
    }

    /// Run the boot sequence and register every service.
    ///
    /// Maintenance and skill linking first, then the global startup delay,
    /// then the gateway, then each declared service.
    pub async fn boot(config: &SupervisorConfig, context: LaunchContext) -> Self {
        info!(target: "supervisor", "Supervisor starting");

        let report = run_maintenance(config);
        info!(
            target: "setup",
            migrated_state = report.migrated_state,
            removed_lock = report.removed_lock,
            tightened_permissions = report.tightened_permissions,
            "Maintenance complete"
        );
        link_skills(&config.skills_source, &config.skills_target);

        if !config.startup_delay.is_zero() {
            info!(
                target: "supervisor",
                delay_secs = config.startup_delay.as_secs(),
                "Waiting before starting services"
            );
            tokio::time::sleep(config.startup_delay).await;
        }

        let mut supervisor = Self::new(context);
        supervisor.register(ServiceDescriptor::gateway(&config.gateway_command));
        for descriptor in load_descriptors(&config.services_file) {
            supervisor.register(descriptor);
        }

        info!(
            target: "supervisor",
            count = supervisor.services.len(),
            "All services registered"
        );
        supervisor
    }

    /// Begin supervising a service.
    pub fn register(&mut self, descriptor: ServiceDescriptor) {
        info!(
            target: "supervisor",
            service = %descriptor.name,
            command = %descriptor.command,
            condition = ?descriptor.condition,
            "Registering service"
        );
        let name = descriptor.name.clone();
        let handle = self.launcher.launch(descriptor);
        self.services.push(SupervisedService { name, handle });
    }

    /// Registered services in registration order.
    pub fn services(&self) -> &[SupervisedService] {
        &self.services
    }

    /// Names of the registered services in registration order.
    pub fn service_names(&self) -> Vec<&str> {
        self.services.iter().map(|s| s.name.as_str()).collect()
    }

    /// Number of services still under supervision.
    pub fn active_count(&self) -> usize {
        self.services.iter().filter(|s| s.is_active()).count()
    }

    /// Install SIGTERM/SIGINT handlers and wait for one to arrive.
    ///
    /// Children are not signalled; the caller exits and leaves the process
    /// tree to the container runtime.
    pub async fn run(self) -> Result<()> {
        let mut sigterm = signal(SignalKind::terminate())
            .map_err(|e| Error::SignalError(format!("SIGTERM handler: {}", e)))?;
        let mut sigint = signal(SignalKind::interrupt())
            .map_err(|e| Error::SignalError(format!("SIGINT handler: {}", e)))?;

        info!(target: "supervisor", "Supervisor ready");

        let received = tokio::select! {
            _ = sigterm.recv() => "SIGTERM",
            _ = sigint.recv() => "SIGINT",
        };

        info!(
            target: "supervisor",
            signal = received,
            active = self.active_count(),
            "Received termination signal, exiting"
        );
        Ok(())
    }
}
