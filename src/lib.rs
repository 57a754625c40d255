//! Gateway supervisor - in-container service supervisor.
//!
//! Runs as process 1 of the gateway container and keeps a fixed primary
//! service (the gateway) plus any services declared in a JSON services file
//! alive. It handles:
//!
//! - One-time boot fixups of the gateway state directory
//! - Per-service start delays and file-existence startup conditions
//! - Allow-listed privileged pre-commands
//! - Privilege dropping to the unprivileged service user
//! - Restart with a constant delay after any non-clean exit
//! - SIGTERM/SIGINT handling
//!
//! # Architecture
//!
//! - **Supervisor**: boot sequence, owns every service task
//! - **ServiceLauncher**: one independent state machine per service
//! - **Condition / PreCommandPolicy**: start gating and pre-command checks
//! - **load_descriptors / run_maintenance**: fault-tolerant boot inputs
//!
//! # Example
//!
//! ```no_run
//! use gateway_supervisor::{LaunchContext, Supervisor, SupervisorConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = SupervisorConfig::default();
//!     let context = LaunchContext::new(config.identity.clone());
//!     let supervisor = Supervisor::boot(&config, context).await;
//!     supervisor.run().await?;
//!     Ok(())
//! }
//! ```

pub mod condition;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod launcher;
pub mod maintenance;
pub mod process;
pub mod security;
pub mod skills;
pub mod supervisor;

// Re-export main types
pub use condition::{is_ready, Condition};
pub use config::{ServiceIdentity, SupervisorConfig};
pub use descriptor::{load_descriptors, ServiceDescriptor};
pub use error::{Error, Result};
pub use launcher::{
    LaunchContext, LaunchState, RunningServiceInstance, ServiceEvent, ServiceEventKind,
    ServiceLauncher,
};
pub use maintenance::{run_maintenance, MaintenanceReport};
pub use process::ExitOutcome;
pub use security::{is_pre_command_safe, PreCommandPolicy};
pub use skills::link_skills;
pub use supervisor::{SupervisedService, Supervisor};
