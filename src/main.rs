//! Gateway supervisor binary.
//!
//! Container entrypoint: runs boot maintenance, then supervises the gateway
//! and the declared auxiliary services until SIGTERM or SIGINT.

use clap::Parser;
use gateway_supervisor::config::{
    parse_startup_delay, DEFAULT_GATEWAY_COMMAND, DEFAULT_SERVICES_FILE, DEFAULT_SKILLS_SOURCE,
    DEFAULT_SKILLS_TARGET, DEFAULT_STATE_DIR, STARTUP_DELAY_ENV,
};
use gateway_supervisor::{LaunchContext, Supervisor, SupervisorConfig};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "supervisor",
    about = "In-container supervisor for the gateway and its auxiliary services",
    version
)]
struct Cli {
    /// JSON file declaring auxiliary services
    #[arg(long, env = "SUPERVISOR_SERVICES_FILE", default_value = DEFAULT_SERVICES_FILE)]
    services_file: PathBuf,

    /// Gateway state directory
    #[arg(long, env = "SUPERVISOR_STATE_DIR", default_value = DEFAULT_STATE_DIR)]
    state_dir: PathBuf,

    /// Shell command line of the gateway
    #[arg(long, env = "SUPERVISOR_GATEWAY_COMMAND", default_value = DEFAULT_GATEWAY_COMMAND)]
    gateway_command: String,

    /// Skills bundled with the image
    #[arg(long, env = "SUPERVISOR_SKILLS_SOURCE", default_value = DEFAULT_SKILLS_SOURCE)]
    skills_source: PathBuf,

    /// Skills directory read by the gateway
    #[arg(long, env = "SUPERVISOR_SKILLS_TARGET", default_value = DEFAULT_SKILLS_TARGET)]
    skills_target: PathBuf,
}

impl Cli {
    fn into_config(self) -> SupervisorConfig {
        let startup_delay = std::env::var(STARTUP_DELAY_ENV).ok();

        SupervisorConfig {
            services_file: self.services_file,
            state_dir: self.state_dir,
            gateway_command: self.gateway_command,
            skills_source: self.skills_source,
            skills_target: self.skills_target,
            startup_delay: parse_startup_delay(startup_delay.as_deref()),
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let config = Cli::parse().into_config();
    let context = LaunchContext::new(config.identity.clone()).poll_interval(config.poll_interval);

    let supervisor = Supervisor::boot(&config, context).await;
    supervisor.run().await?;

    // Leave the children to the container runtime.
    std::process::exit(0);
}
