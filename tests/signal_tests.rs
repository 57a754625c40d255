//! Termination signal handling.
//!
//! Kept in its own test binary: the test signals its own process.

use gateway_supervisor::*;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio::time::timeout;

#[tokio::test]
async fn test_run_returns_on_sigterm() {
    // Keeps the default disposition from killing the test process if the
    // signal lands before the supervisor has installed its own handler.
    let _guard = signal(SignalKind::terminate()).unwrap();

    let mut supervisor = Supervisor::new(LaunchContext::default().without_identity());
    supervisor.register(ServiceDescriptor::new("sleeper", "sleep 30"));
    assert_eq!(supervisor.active_count(), 1);

    let run = tokio::spawn(supervisor.run());

    let result = timeout(Duration::from_secs(10), async {
        loop {
            kill(Pid::this(), Signal::SIGTERM).unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
            if run.is_finished() {
                break;
            }
        }
    })
    .await;
    assert!(result.is_ok(), "supervisor did not return after SIGTERM");

    run.await.unwrap().unwrap();
}
