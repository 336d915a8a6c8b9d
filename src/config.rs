//! Configuration schema and loading.
//!
//! Loaded with [`figment`]: a YAML file merged with environment variables
//! under the `MCP_HANGAR_` prefix (double-underscore separated for nesting).
//! Config search order when no explicit path is given: explicit path →
//! `MCP_HANGAR_CONFIG` env var → user config directory → current-directory
//! default.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Yaml};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Top-level configuration, deserialized from YAML + environment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server settings (only used when the HTTP transport is selected).
    #[serde(default)]
    pub server: ServerConfig,
    /// Providers and groups, keyed by id.
    #[serde(default)]
    pub providers: HashMap<String, ProviderSpec>,
    /// Global health-check toggle/interval (providers may not override).
    #[serde(default)]
    pub health_check: HealthCheckTopConfig,
    /// Global rate limit.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

/// HTTP server bind settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind host.
    pub host: String,
    /// Bind port.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7777,
        }
    }
}

/// Global health-check toggle/interval, from the `health_check:` block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckTopConfig {
    /// Whether the Health Worker runs at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Probe interval in seconds.
    #[serde(default = "default_health_interval")]
    pub interval_s: u64,
}

impl Default for HealthCheckTopConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_s: default_health_interval(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_health_interval() -> u64 {
    30
}

/// Global token-bucket rate limit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Requests per second. `0` disables rate limiting.
    #[serde(default)]
    pub rps: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { rps: 0 }
    }
}

/// One provider or group entry, discriminated by `mode`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ProviderSpec {
    /// Child-process provider.
    Subprocess {
        /// argv, first element is the program.
        command: Vec<String>,
        /// Environment variables passed to the child.
        #[serde(default)]
        env: HashMap<String, String>,
        /// Shared lifecycle/health settings.
        #[serde(flatten)]
        lifecycle: LifecycleConfig,
    },
    /// Container-runtime-backed provider.
    Container {
        /// Image reference.
        image: String,
        /// `host:container:mode` volume specs.
        #[serde(default)]
        volumes: Vec<String>,
        /// Resource limits.
        #[serde(default)]
        resources: ContainerResources,
        /// Network mode.
        #[serde(default)]
        network: NetworkMode,
        /// Whether the root filesystem is mounted read-only.
        #[serde(default = "default_true")]
        read_only: bool,
        /// Shared lifecycle/health settings.
        #[serde(flatten)]
        lifecycle: LifecycleConfig,
    },
    /// Remote HTTP(S) provider.
    Remote {
        /// Endpoint URL.
        endpoint: String,
        /// Connect/read timeouts.
        #[serde(default)]
        http: HttpTimeouts,
        /// Shared lifecycle/health settings.
        #[serde(flatten)]
        lifecycle: LifecycleConfig,
    },
    /// Logical group of other providers.
    Group {
        /// Selection strategy.
        strategy: Strategy,
        /// Minimum number of ready/degraded members required to dispatch.
        #[serde(default)]
        min_healthy: usize,
        /// Per-group circuit breaker parameters.
        #[serde(default)]
        circuit_breaker: CircuitBreakerConfig,
        /// Member providers.
        members: Vec<GroupMember>,
    },
}

/// Settings shared by subprocess/container/remote providers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Idle shutdown threshold, in seconds.
    #[serde(default = "default_idle_ttl")]
    pub idle_ttl_s: u64,
    /// Health-probe interval for this provider, in seconds.
    #[serde(default = "default_health_interval")]
    pub health_check_interval_s: u64,
    /// Consecutive-failure threshold before degrading.
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,
    /// Optional declared tool list, used as a fallback before first
    /// discovery (backend discovery remains authoritative once available).
    #[serde(default)]
    pub tools: Option<Vec<serde_json::Value>>,
}

fn default_idle_ttl() -> u64 {
    300
}
fn default_max_consecutive_failures() -> u32 {
    3
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            idle_ttl_s: default_idle_ttl(),
            health_check_interval_s: default_health_interval(),
            max_consecutive_failures: default_max_consecutive_failures(),
            tools: None,
        }
    }
}

/// Container resource limits.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerResources {
    /// Memory limit, e.g. `"256m"`.
    pub memory: Option<String>,
    /// CPU limit, e.g. `"0.5"`.
    pub cpu: Option<String>,
}

/// Container network mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkMode {
    /// No network access (default, most restrictive).
    #[default]
    None,
    /// Bridged network.
    Bridge,
    /// Host network namespace.
    Host,
}

/// Remote transport timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpTimeouts {
    /// Connect timeout, seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: f64,
    /// Read timeout, seconds.
    #[serde(default = "default_read_timeout")]
    pub read_timeout: f64,
}

fn default_connect_timeout() -> f64 {
    5.0
}
fn default_read_timeout() -> f64 {
    30.0
}

impl Default for HttpTimeouts {
    fn default() -> Self {
        Self {
            connect_timeout: default_connect_timeout(),
            read_timeout: default_read_timeout(),
        }
    }
}

impl HttpTimeouts {
    /// Connect timeout as a [`Duration`].
    #[must_use]
    pub fn connect(&self) -> Duration {
        Duration::from_secs_f64(self.connect_timeout.max(0.0))
    }

    /// Read timeout as a [`Duration`].
    #[must_use]
    pub fn read(&self) -> Duration {
        Duration::from_secs_f64(self.read_timeout.max(0.0))
    }
}

/// Load-balancing strategy tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Round-robin over the healthy set.
    RoundRobin,
    /// Smooth weighted round-robin.
    WeightedRoundRobin,
    /// Uniform random over the healthy set.
    Random,
    /// Lowest priority number wins; ties broken round-robin.
    Priority,
    /// Smallest in-flight count wins; ties by order.
    LeastConnections,
}

/// One group member reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupMember {
    /// Id of the referenced provider.
    pub id: String,
    /// Weight, used by `weighted_round_robin`.
    #[serde(default = "default_weight")]
    pub weight: u32,
    /// Priority, used by `priority` (lower wins).
    #[serde(default)]
    pub priority: i32,
}

fn default_weight() -> u32 {
    1
}

/// Per-group circuit breaker parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the breaker opens.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Seconds after opening before a half-open probe is admitted.
    #[serde(default = "default_reset_timeout")]
    pub reset_timeout_s: f64,
}

fn default_failure_threshold() -> u32 {
    5
}
fn default_reset_timeout() -> f64 {
    30.0
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            reset_timeout_s: default_reset_timeout(),
        }
    }
}

impl CircuitBreakerConfig {
    /// Reset timeout as a [`Duration`].
    #[must_use]
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.reset_timeout_s.max(0.0))
    }
}

impl Config {
    /// Resolve the config path, then load it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if no config file is found at any candidate
    /// path, or if the found file fails to parse, or if the loaded config
    /// violates a structural invariant (duplicate ids, nested groups,
    /// dangling member references).
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = Self::resolve_path(explicit)?;

        let figment = Figment::new()
            .merge(Yaml::file(&path))
            .merge(Env::prefixed("MCP_HANGAR_").split("__"));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(format!("failed to load {}: {e}", path.display())))?;

        expand_env_vars(&mut config);
        config.validate()?;
        Ok(config)
    }

    /// Resolve the config path: explicit argument, then `MCP_HANGAR_CONFIG`,
    /// then `<user-config-dir>/mcp-hangar/config.yaml`, then
    /// `./mcp-hangar.yaml` in the current directory.
    fn resolve_path(explicit: Option<&Path>) -> Result<PathBuf> {
        if let Some(p) = explicit {
            return Ok(p.to_path_buf());
        }
        if let Ok(p) = std::env::var("MCP_HANGAR_CONFIG") {
            return Ok(PathBuf::from(p));
        }
        if let Some(dir) = dirs::config_dir() {
            let candidate = dir.join("mcp-hangar").join("config.yaml");
            if candidate.exists() {
                return Ok(candidate);
            }
        }
        let candidate = PathBuf::from("mcp-hangar.yaml");
        if candidate.exists() {
            return Ok(candidate);
        }
        Err(Error::Config(
            "no configuration file found (searched explicit path, MCP_HANGAR_CONFIG, \
             user config dir, and ./mcp-hangar.yaml)"
                .to_string(),
        ))
    }

    /// Enforce the data-model invariants: provider/group ids
    /// are well-formed, groups never nest other groups, and `min_healthy`
    /// never exceeds member count.
    fn validate(&self) -> Result<()> {
        for (id, spec) in &self.providers {
            if id.is_empty()
                || id.len() > 64
                || !id.chars().all(|c| c.is_ascii_alphanumeric() || "_.-".contains(c))
            {
                return Err(Error::Config(format!("invalid provider id: {id:?}")));
            }
            if let ProviderSpec::Group { min_healthy, members, .. } = spec {
                if *min_healthy > members.len() {
                    return Err(Error::Config(format!(
                        "group '{id}': min_healthy ({min_healthy}) exceeds member count ({})",
                        members.len()
                    )));
                }
                for member in members {
                    match self.providers.get(&member.id) {
                        None => {
                            return Err(Error::Config(format!(
                                "group '{id}': member '{}' is not defined",
                                member.id
                            )));
                        }
                        Some(ProviderSpec::Group { .. }) => {
                            return Err(Error::Config(format!(
                                "group '{id}': member '{}' is itself a group; groups never nest",
                                member.id
                            )));
                        }
                        Some(_) => {}
                    }
                }
            }
        }
        Ok(())
    }

    /// Iterate over non-group providers only.
    pub fn leaf_providers(&self) -> impl Iterator<Item = (&String, &ProviderSpec)> {
        self.providers
            .iter()
            .filter(|(_, s)| !matches!(s, ProviderSpec::Group { .. }))
    }

    /// Iterate over groups only.
    pub fn groups(&self) -> impl Iterator<Item = (&String, &ProviderSpec)> {
        self.providers
            .iter()
            .filter(|(_, s)| matches!(s, ProviderSpec::Group { .. }))
    }
}

/// Expand `${VAR}` / `${VAR:-default}` references against the process
/// environment, in provider command/env/endpoint strings.
fn expand_env_vars(config: &mut Config) {
    for spec in config.providers.values_mut() {
        match spec {
            ProviderSpec::Subprocess { command, env, .. } => {
                for part in command.iter_mut() {
                    *part = expand_string(part);
                }
                for v in env.values_mut() {
                    *v = expand_string(v);
                }
            }
            ProviderSpec::Container { image, .. } => {
                *image = expand_string(image);
            }
            ProviderSpec::Remote { endpoint, .. } => {
                *endpoint = expand_string(endpoint);
            }
            ProviderSpec::Group { .. } => {}
        }
    }
}

/// Expand `${VAR}` and `${VAR:-default}` in a single string.
fn expand_string(input: &str) -> String {
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(:-([^}]*))?\}").expect("static regex");
    re.replace_all(input, |caps: &regex::Captures<'_>| {
        let var = &caps[1];
        match std::env::var(var) {
            Ok(val) => val,
            Err(_) => caps.get(3).map_or(String::new(), |m| m.as_str().to_string()),
        }
    })
    .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(unsafe_code)]
    fn expand_string_substitutes_existing_var() {
        // SAFETY (test-only): single-threaded test process section, no
        // concurrent readers of this specific key.
        unsafe {
            std::env::set_var("MCP_HANGAR_TEST_VAR", "hello");
        }
        assert_eq!(expand_string("${MCP_HANGAR_TEST_VAR}"), "hello");
        unsafe {
            std::env::remove_var("MCP_HANGAR_TEST_VAR");
        }
    }

    #[test]
    fn expand_string_falls_back_to_default() {
        assert_eq!(expand_string("${MCP_HANGAR_MISSING:-fallback}"), "fallback");
    }

    #[test]
    fn expand_string_missing_without_default_is_empty() {
        assert_eq!(expand_string("${MCP_HANGAR_DEFINITELY_MISSING}"), "");
    }

    #[test]
    fn validate_rejects_min_healthy_above_member_count() {
        let mut providers = HashMap::new();
        providers.insert(
            "p1".to_string(),
            ProviderSpec::Subprocess {
                command: vec!["true".to_string()],
                env: HashMap::new(),
                lifecycle: LifecycleConfig::default(),
            },
        );
        providers.insert(
            "g".to_string(),
            ProviderSpec::Group {
                strategy: Strategy::RoundRobin,
                min_healthy: 2,
                circuit_breaker: CircuitBreakerConfig::default(),
                members: vec![GroupMember {
                    id: "p1".to_string(),
                    weight: 1,
                    priority: 0,
                }],
            },
        );
        let config = Config {
            providers,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_nested_groups() {
        let mut providers = HashMap::new();
        providers.insert(
            "inner".to_string(),
            ProviderSpec::Group {
                strategy: Strategy::RoundRobin,
                min_healthy: 0,
                circuit_breaker: CircuitBreakerConfig::default(),
                members: vec![],
            },
        );
        providers.insert(
            "outer".to_string(),
            ProviderSpec::Group {
                strategy: Strategy::RoundRobin,
                min_healthy: 0,
                circuit_breaker: CircuitBreakerConfig::default(),
                members: vec![GroupMember {
                    id: "inner".to_string(),
                    weight: 1,
                    priority: 0,
                }],
            },
        );
        let config = Config {
            providers,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
