//! Provider manager cold-start, single-flight, and idle-shutdown behavior
//! against a real mock MCP subprocess.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use mcp_hangar::config::LifecycleConfig;
use mcp_hangar::gateway::EventBus;
use mcp_hangar::provider::{Launch, ProviderId, ProviderManager};

fn write_mock_mcp_script(dir: &Path, name: &str) -> PathBuf {
    let script_path = dir.join(name);
    fs::write(
        &script_path,
        r#"#!/bin/sh
while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed -n 's/.*"id"[ ]*:[ ]*\([^,}]*\).*/\1/p')
  case "$line" in
    *\"initialize\"*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"mock","version":"0.1.0"}}}\n' "$id"
      ;;
    *\"notifications/initialized\"*) ;;
    *\"tools/list\"*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"echo","description":"echo","inputSchema":{"type":"object","properties":{}}}]}}\n' "$id"
      ;;
    *\"tools/call\"*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"pong"}]}}\n' "$id"
      ;;
    *)
      printf '{"jsonrpc":"2.0","id":%s,"result":{}}\n' "$id"
      ;;
  esac
done
"#,
    )
    .expect("write mock script");

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(&script_path).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&script_path, perms).unwrap();
    }

    script_path
}

fn test_manager(script: &Path, idle_ttl_s: u64) -> std::sync::Arc<ProviderManager> {
    let launch = Launch::Subprocess {
        command: vec!["sh".to_string(), script.display().to_string()],
        env: HashMap::new(),
    };
    let lifecycle = LifecycleConfig {
        idle_ttl_s,
        health_check_interval_s: 30,
        max_consecutive_failures: 3,
        tools: None,
    };
    ProviderManager::new(
        ProviderId::try_from("mock".to_string()).unwrap(),
        launch,
        lifecycle,
        EventBus::new(),
    )
}

#[tokio::test]
async fn cold_start_then_invoke_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_mock_mcp_script(dir.path(), "mock.sh");
    let manager = test_manager(&script, 300);

    let result = manager
        .invoke("echo", serde_json::json!({}), Duration::from_secs(5))
        .await
        .expect("invoke should succeed after cold start");

    assert!(!result.is_error);
}

#[tokio::test]
async fn concurrent_cold_starts_single_flight() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_mock_mcp_script(dir.path(), "mock.sh");
    let manager = test_manager(&script, 300);

    let racers: Vec<_> = (0..8)
        .map(|_| {
            let manager = manager.clone();
            tokio::spawn(async move { manager.ensure_ready().await })
        })
        .collect();

    for racer in racers {
        racer.await.unwrap().expect("every racer observes readiness");
    }

    // Exactly one subprocess should have been launched; we can't observe the
    // PID directly, but a second ensure_ready after readiness must be a no-op
    // that doesn't spawn again (state stays Ready).
    manager.ensure_ready().await.unwrap();
    assert_eq!(manager.state(), mcp_hangar::provider::ProviderState::Ready);
}

#[tokio::test]
async fn idle_provider_is_shut_down_and_restartable() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_mock_mcp_script(dir.path(), "mock.sh");
    let manager = test_manager(&script, 0);

    manager
        .invoke("echo", serde_json::json!({}), Duration::from_secs(5))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(manager.is_idle());

    manager.shutdown().await;
    assert_eq!(manager.state(), mcp_hangar::provider::ProviderState::Cold);

    // A later dispatch cold-starts it again rather than reusing a dead
    // single-flight future.
    let result = manager
        .invoke("echo", serde_json::json!({}), Duration::from_secs(5))
        .await
        .expect("provider restarts after idle shutdown");
    assert!(!result.is_error);
}

#[tokio::test]
async fn unreachable_command_marks_provider_dead() {
    let launch = Launch::Subprocess {
        command: vec!["/nonexistent/mcp-provider-binary".to_string()],
        env: HashMap::new(),
    };
    let lifecycle = LifecycleConfig {
        idle_ttl_s: 300,
        health_check_interval_s: 30,
        max_consecutive_failures: 3,
        tools: None,
    };
    let manager = ProviderManager::new(
        ProviderId::try_from("broken".to_string()).unwrap(),
        launch,
        lifecycle,
        EventBus::new(),
    );

    let err = manager.ensure_ready().await.unwrap_err();
    assert_eq!(err.kind(), Some(mcp_hangar::error::ErrorKind::ProviderColdStartFailed));
    assert_eq!(manager.state(), mcp_hangar::provider::ProviderState::Dead);
}
