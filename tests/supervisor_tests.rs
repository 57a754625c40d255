//! Boot sequence tests against a throwaway state directory.

use gateway_supervisor::*;
use std::path::Path;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tokio::time::timeout;

fn config_in(root: &Path) -> SupervisorConfig {
    SupervisorConfig {
        services_file: root.join("services.json"),
        state_dir: root.join("state"),
        gateway_command: "true".to_string(),
        skills_source: root.join("bundled-skills"),
        skills_target: root.join("state").join("skills"),
        poll_interval: Duration::from_millis(50),
        ..Default::default()
    }
}

fn context() -> (LaunchContext, UnboundedReceiver<ServiceEvent>) {
    let (tx, rx) = unbounded_channel();
    let context = LaunchContext::default()
        .without_identity()
        .poll_interval(Duration::from_millis(50))
        .events(tx);
    (context, rx)
}

/// Wait for `kind` to be reported for `service`, ignoring everything else.
async fn wait_for(
    rx: &mut UnboundedReceiver<ServiceEvent>,
    service: &str,
    matches: impl Fn(&ServiceEventKind) -> bool,
) {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let event = timeout(deadline.saturating_duration_since(Instant::now()), rx.recv())
            .await
            .expect("timed out waiting for service event")
            .expect("event channel closed");
        if event.service == service && matches(&event.kind) {
            return;
        }
    }
}

mod boot_tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_services_file_runs_gateway_only() {
        let temp = TempDir::new().unwrap();
        let config = config_in(temp.path());
        let (context, _rx) = context();

        let supervisor = Supervisor::boot(&config, context).await;
        assert_eq!(supervisor.service_names(), vec!["gateway"]);
    }

    #[tokio::test]
    async fn test_malformed_services_file_runs_gateway_only() {
        let temp = TempDir::new().unwrap();
        let config = config_in(temp.path());
        std::fs::write(&config.services_file, "{ not json").unwrap();
        let (context, _rx) = context();

        let supervisor = Supervisor::boot(&config, context).await;
        assert_eq!(supervisor.service_names(), vec!["gateway"]);
    }

    #[tokio::test]
    async fn test_declared_services_registered_after_gateway() {
        let temp = TempDir::new().unwrap();
        let config = config_in(temp.path());
        std::fs::write(
            &config.services_file,
            r#"[
                {"name": "indexer", "command": "sleep 30", "restartDelaySeconds": 1},
                {"name": "broken"},
                {"name": "proxy", "command": "sleep 30", "startDelaySeconds": 5}
            ]"#,
        )
        .unwrap();
        let (context, _rx) = context();

        let supervisor = Supervisor::boot(&config, context).await;
        assert_eq!(supervisor.service_names(), vec!["gateway", "indexer", "proxy"]);
    }

    #[tokio::test]
    async fn test_gateway_clean_exit_is_final() {
        let temp = TempDir::new().unwrap();
        let config = config_in(temp.path());
        let (context, mut rx) = context();

        let supervisor = Supervisor::boot(&config, context).await;
        wait_for(&mut rx, "gateway", |kind| *kind == ServiceEventKind::Finished).await;

        let deadline = Instant::now() + Duration::from_secs(5);
        while supervisor.active_count() > 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(supervisor.active_count(), 0);
    }

    #[tokio::test]
    async fn test_services_are_independent() {
        let temp = TempDir::new().unwrap();
        let mut config = config_in(temp.path());
        config.gateway_command = "exit 1".to_string();
        let marker = temp.path().join("ready");
        std::fs::write(
            &config.services_file,
            format!(
                r#"[{{"name": "gated", "command": "true", "condition": "file:{}"}}]"#,
                marker.display()
            ),
        )
        .unwrap();
        let (context, mut rx) = context();

        let _supervisor = Supervisor::boot(&config, context).await;

        // The gateway keeps failing while the gated service is still waiting.
        wait_for(&mut rx, "gated", |kind| {
            matches!(kind, ServiceEventKind::ConditionPending { .. })
        })
        .await;
        wait_for(&mut rx, "gateway", |kind| {
            matches!(kind, ServiceEventKind::Exited { attempt: 1, .. })
        })
        .await;

        std::fs::write(&marker, b"").unwrap();
        wait_for(&mut rx, "gated", |kind| *kind == ServiceEventKind::Finished).await;
    }

    #[tokio::test]
    async fn test_startup_delay_precedes_registration() {
        let temp = TempDir::new().unwrap();
        let mut config = config_in(temp.path());
        config.startup_delay = Duration::from_secs(1);
        let (context, _rx) = context();

        let started = Instant::now();
        let supervisor = Supervisor::boot(&config, context).await;
        assert!(started.elapsed() >= Duration::from_secs(1));
        assert_eq!(supervisor.services().len(), 1);
    }

    #[tokio::test]
    async fn test_boot_runs_maintenance() {
        let temp = TempDir::new().unwrap();
        let config = config_in(temp.path());
        std::fs::create_dir(&config.state_dir).unwrap();
        std::fs::write(config.legacy_state_path(), "{\"legacy\":true}").unwrap();
        std::fs::write(config.lock_path(), "4242").unwrap();

        let (context, _rx) = context();
        let _supervisor = Supervisor::boot(&config, context).await;

        assert!(!config.legacy_state_path().exists());
        assert_eq!(
            std::fs::read_to_string(config.state_path()).unwrap(),
            "{\"legacy\":true}"
        );
        assert!(!config.lock_path().exists());
    }

    #[tokio::test]
    async fn test_boot_links_bundled_skills() {
        let temp = TempDir::new().unwrap();
        let config = config_in(temp.path());
        std::fs::create_dir_all(config.skills_source.join("weather")).unwrap();

        let (context, _rx) = context();
        let _supervisor = Supervisor::boot(&config, context).await;

        let link = config.skills_target.join("weather");
        assert!(link.symlink_metadata().unwrap().file_type().is_symlink());
    }
}

mod maintenance_tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn test_second_pass_changes_nothing() {
        let temp = TempDir::new().unwrap();
        let config = config_in(temp.path());
        std::fs::create_dir(&config.state_dir).unwrap();
        std::fs::set_permissions(&config.state_dir, std::fs::Permissions::from_mode(0o755))
            .unwrap();
        std::fs::write(config.legacy_state_path(), "{}").unwrap();
        std::fs::write(config.lock_path(), "").unwrap();

        let first = run_maintenance(&config);
        assert_eq!(
            first,
            MaintenanceReport {
                migrated_state: true,
                removed_lock: true,
                tightened_permissions: true,
            }
        );

        assert_eq!(run_maintenance(&config), MaintenanceReport::default());
    }

    #[test]
    fn test_missing_state_dir_is_tolerated() {
        let temp = TempDir::new().unwrap();
        let config = config_in(temp.path());

        assert_eq!(run_maintenance(&config), MaintenanceReport::default());
    }
}
