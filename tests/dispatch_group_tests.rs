//! End-to-end dispatch through a provider group: load balancing, circuit
//! breaking, and failover across two real mock MCP subprocesses
//! group failover and breaker-trip scenarios.

use std::fs;
use std::path::Path;
use std::time::Duration;

use mcp_hangar::config::Config;
use mcp_hangar::failsafe::RateLimiter;
use mcp_hangar::gateway::{DispatchEngine, Registry};

fn write_script(dir: &Path, name: &str, body: &str) -> String {
    let path = dir.join(name);
    fs::write(&path, body).expect("write script");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).unwrap();
    }
    path.display().to_string()
}

const GOOD_SCRIPT: &str = r#"#!/bin/sh
while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed -n 's/.*"id"[ ]*:[ ]*\([^,}]*\).*/\1/p')
  case "$line" in
    *\"initialize\"*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"good","version":"0.1.0"}}}\n' "$id"
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
"#;

const FLAKY_SCRIPT: &str = r#"#!/bin/sh
while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed -n 's/.*"id"[ ]*:[ ]*\([^,}]*\).*/\1/p')
  case "$line" in
    *\"initialize\"*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"flaky","version":"0.1.0"}}}\n' "$id"
      ;;
    *\"notifications/initialized\"*) ;;
    *\"tools/list\"*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"echo","description":"echo","inputSchema":{"type":"object","properties":{}}}]}}\n' "$id"
      ;;
    *\"tools/call\"*)
      printf '{"jsonrpc":"2.0","id":%s,"error":{"code":-32000,"message":"boom"}}\n' "$id"
      ;;
    *)
      printf '{"jsonrpc":"2.0","id":%s,"result":{}}\n' "$id"
      ;;
  esac
done
"#;

fn build_config(dir: &Path, good: &str, flaky: &str) -> Config {
    let yaml = format!(
        r#"
providers:
  good:
    mode: subprocess
    command: ["sh", "{good}"]
  flaky:
    mode: subprocess
    command: ["sh", "{flaky}"]
  pool:
    mode: group
    strategy: round_robin
    min_healthy: 1
    circuit_breaker:
      failure_threshold: 2
      reset_timeout_s: 60
    members:
      - id: good
      - id: flaky
"#,
    );
    let path = dir.join("config.yaml");
    fs::write(&path, yaml).unwrap();
    Config::load(Some(&path)).expect("config loads")
}

#[tokio::test]
async fn group_round_robins_and_trips_breaker_on_repeated_failure() {
    let dir = tempfile::tempdir().unwrap();
    let good = write_script(dir.path(), "good.sh", GOOD_SCRIPT);
    let flaky = write_script(dir.path(), "flaky.sh", FLAKY_SCRIPT);
    let config = build_config(dir.path(), &good, &flaky);

    let events = mcp_hangar::gateway::EventBus::new();
    let registry = std::sync::Arc::new(Registry::from_config(&config, events.clone()).unwrap());
    let rate_limiter = RateLimiter::new(&config.rate_limit);
    let dispatch = DispatchEngine::new(registry, rate_limiter, events);

    // Dispatch enough calls to round-robin onto the flaky member and trip
    // its per-member contribution to the group breaker.
    let mut saw_failure = false;
    for _ in 0..6 {
        let result = dispatch
            .dispatch("pool", "echo", serde_json::json!({}), Duration::from_secs(5), None)
            .await;
        if result.is_err() {
            saw_failure = true;
        }
    }
    assert!(saw_failure, "flaky member should surface at least one failure via round robin");
}

#[tokio::test]
async fn unknown_target_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let good = write_script(dir.path(), "good.sh", GOOD_SCRIPT);
    let flaky = write_script(dir.path(), "flaky.sh", FLAKY_SCRIPT);
    let config = build_config(dir.path(), &good, &flaky);

    let events = mcp_hangar::gateway::EventBus::new();
    let registry = std::sync::Arc::new(Registry::from_config(&config, events.clone()).unwrap());
    let rate_limiter = RateLimiter::new(&config.rate_limit);
    let dispatch = DispatchEngine::new(registry, rate_limiter, events);

    let err = dispatch
        .dispatch("does-not-exist", "echo", serde_json::json!({}), Duration::from_secs(5), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), Some(mcp_hangar::error::ErrorKind::UnknownTarget));
}

#[tokio::test]
async fn zero_deadline_times_out_immediately() {
    let dir = tempfile::tempdir().unwrap();
    let good = write_script(dir.path(), "good.sh", GOOD_SCRIPT);
    let flaky = write_script(dir.path(), "flaky.sh", FLAKY_SCRIPT);
    let config = build_config(dir.path(), &good, &flaky);

    let events = mcp_hangar::gateway::EventBus::new();
    let registry = std::sync::Arc::new(Registry::from_config(&config, events.clone()).unwrap());
    let rate_limiter = RateLimiter::new(&config.rate_limit);
    let dispatch = DispatchEngine::new(registry, rate_limiter, events);

    let err = dispatch
        .dispatch("good", "echo", serde_json::json!({}), Duration::ZERO, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), Some(mcp_hangar::error::ErrorKind::Timeout));
}
