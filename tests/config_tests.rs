//! Config loading and validation against real YAML files.

use std::fs;

use mcp_hangar::config::Config;

#[test]
fn rejects_nested_groups() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    fs::write(
        &path,
        r#"
providers:
  leaf:
    mode: subprocess
    command: ["true"]
  inner:
    mode: group
    strategy: round_robin
    members:
      - id: leaf
  outer:
    mode: group
    strategy: round_robin
    members:
      - id: inner
"#,
    )
    .unwrap();

    let err = Config::load(Some(&path)).unwrap_err();
    assert!(err.to_string().contains("groups never nest"));
}

#[test]
fn rejects_dangling_group_member() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    fs::write(
        &path,
        r#"
providers:
  pool:
    mode: group
    strategy: round_robin
    members:
      - id: ghost
"#,
    )
    .unwrap();

    let err = Config::load(Some(&path)).unwrap_err();
    assert!(err.to_string().contains("not defined"));
}

#[test]
fn rejects_min_healthy_above_member_count() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    fs::write(
        &path,
        r#"
providers:
  a:
    mode: subprocess
    command: ["true"]
  pool:
    mode: group
    strategy: round_robin
    min_healthy: 5
    members:
      - id: a
"#,
    )
    .unwrap();

    let err = Config::load(Some(&path)).unwrap_err();
    assert!(err.to_string().contains("min_healthy"));
}

#[test]
fn rejects_malformed_provider_id() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    fs::write(
        &path,
        r#"
providers:
  "bad id with spaces":
    mode: subprocess
    command: ["true"]
"#,
    )
    .unwrap();

    let err = Config::load(Some(&path)).unwrap_err();
    assert!(err.to_string().contains("invalid provider id"));
}

#[test]
fn loads_a_well_formed_config_with_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    fs::write(
        &path,
        r#"
providers:
  a:
    mode: subprocess
    command: ["true"]
"#,
    )
    .unwrap();

    let config = Config::load(Some(&path)).expect("well-formed config should load");
    assert_eq!(config.providers.len(), 1);
    assert_eq!(config.server.port, 7777);
    assert_eq!(config.rate_limit.rps, 0);
}

#[test]
fn expands_env_var_placeholders_in_provider_fields() {
    // SAFETY: test-only process-wide env mutation, no concurrent readers in
    // this single-threaded #[test] (not #[tokio::test]) function.
    unsafe {
        std::env::set_var("MCP_HANGAR_TEST_TOKEN", "secret-value");
    }

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    fs::write(
        &path,
        r#"
providers:
  a:
    mode: subprocess
    command: ["true"]
    env:
      TOKEN: "${MCP_HANGAR_TEST_TOKEN}"
      FALLBACK: "${MCP_HANGAR_TEST_UNSET:-default}"
"#,
    )
    .unwrap();

    let config = Config::load(Some(&path)).expect("config with env placeholders should load");
    let mcp_hangar::config::ProviderSpec::Subprocess { env, .. } = &config.providers["a"] else {
        panic!("expected a subprocess provider");
    };
    assert_eq!(env["TOKEN"], "secret-value");
    assert_eq!(env["FALLBACK"], "default");

    unsafe {
        std::env::remove_var("MCP_HANGAR_TEST_TOKEN");
    }
}
