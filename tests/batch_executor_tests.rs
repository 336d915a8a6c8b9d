//! Batch fan-out: ordering, fail-fast cancellation.

use std::fs;
use std::path::Path;
use std::time::Duration;

use mcp_hangar::config::Config;
use mcp_hangar::failsafe::RateLimiter;
use mcp_hangar::gateway::{BatchCall, BatchExecutor, BatchOptions, DispatchEngine, EventBus, Registry};

fn write_script(dir: &Path, name: &str, body: &str) -> String {
    let path = dir.join(name);
    fs::write(&path, body).unwrap();
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

const FAILING_SCRIPT: &str = r#"#!/bin/sh
while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed -n 's/.*"id"[ ]*:[ ]*\([^,}]*\).*/\1/p')
  case "$line" in
    *\"initialize\"*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"bad","version":"0.1.0"}}}\n' "$id"
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

fn build_executor(dir: &Path) -> BatchExecutor {
    let good = write_script(dir, "good.sh", GOOD_SCRIPT);
    let bad = write_script(dir, "bad.sh", FAILING_SCRIPT);
    let yaml = format!(
        r#"
providers:
  good:
    mode: subprocess
    command: ["sh", "{good}"]
  bad:
    mode: subprocess
    command: ["sh", "{bad}"]
"#,
    );
    let path = dir.join("config.yaml");
    fs::write(&path, yaml).unwrap();
    let config = Config::load(Some(&path)).unwrap();

    let events = EventBus::new();
    let registry = std::sync::Arc::new(Registry::from_config(&config, events.clone()).unwrap());
    let rate_limiter = RateLimiter::new(&config.rate_limit);
    let dispatch = std::sync::Arc::new(DispatchEngine::new(registry, rate_limiter, events));
    BatchExecutor::new(dispatch)
}

#[tokio::test]
async fn results_preserve_input_order_regardless_of_completion() {
    let dir = tempfile::tempdir().unwrap();
    let executor = build_executor(dir.path());

    let calls = vec![
        BatchCall { target: "bad".to_string(), tool: "echo".to_string(), arguments: serde_json::json!({}), timeout: None },
        BatchCall { target: "good".to_string(), tool: "echo".to_string(), arguments: serde_json::json!({}), timeout: None },
        BatchCall { target: "good".to_string(), tool: "echo".to_string(), arguments: serde_json::json!({}), timeout: None },
    ];

    let results = executor.batch_call(calls, BatchOptions::default()).await;

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].index, 0);
    assert_eq!(results[1].index, 1);
    assert_eq!(results[2].index, 2);
    assert!(!results[0].is_ok());
    assert!(results[1].is_ok());
    assert!(results[2].is_ok());
}

#[tokio::test]
async fn fail_fast_cancels_remaining_calls() {
    let dir = tempfile::tempdir().unwrap();
    let executor = build_executor(dir.path());

    let calls = vec![
        BatchCall { target: "bad".to_string(), tool: "echo".to_string(), arguments: serde_json::json!({}), timeout: None },
        BatchCall { target: "good".to_string(), tool: "echo".to_string(), arguments: serde_json::json!({}), timeout: None },
    ];

    let options = BatchOptions { max_parallel: Some(1), deadline: Duration::from_secs(10), fail_fast: true };
    let results = executor.batch_call(calls, options).await;

    assert_eq!(results.len(), 2);
    assert!(!results[0].is_ok());
    // With max_parallel=1 the second call starts only after the first
    // fails, so fail_fast must have cancelled it before it ran.
    assert_eq!(results[1].error_kind.as_deref(), Some("cancelled"));
}
