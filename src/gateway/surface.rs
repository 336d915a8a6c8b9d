//! Gateway Surface: the MCP-facing tool catalog. Tool catalog built as a
//! `Vec<Tool>` literal, dispatch by name in `handle_tools_call`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Value, json};

use crate::protocol::{
    ClientCapabilities, Content, Info, InitializeParams, InitializeResult, ServerCapabilities,
    Tool, ToolsCapability, ToolsCallParams, ToolsCallResult, PROTOCOL_VERSION,
};
use crate::{Error, Result};

use super::batch::{BatchCall, BatchExecutor, BatchOptions};
use super::dispatch::DispatchEngine;
use super::registry::Target;

/// Implements the eleven MCP tools the gateway exposes to clients, on top of
/// a [`DispatchEngine`] and [`BatchExecutor`].
pub struct GatewaySurface {
    dispatch: Arc<DispatchEngine>,
    batch: Arc<BatchExecutor>,
    started_at: Instant,
}

impl GatewaySurface {
    /// Build a surface over `dispatch`, sharing its registry with `batch`.
    #[must_use]
    pub fn new(dispatch: Arc<DispatchEngine>, batch: Arc<BatchExecutor>) -> Self {
        Self {
            dispatch,
            batch,
            started_at: Instant::now(),
        }
    }

    /// Uptime since construction, for `/health/*` and `registry_metrics`.
    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Handle `initialize`.
    #[must_use]
    pub fn handle_initialize(&self, _params: &InitializeParams) -> InitializeResult {
        InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability { list_changed: false }),
            },
            server_info: Info {
                name: "mcp-hangar".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                title: Some("MCP Hangar".to_string()),
            },
            instructions: Some(
                "MCP Hangar multiplexes tool calls across provider subprocesses, \
                 containers, and remote endpoints. Use registry_list to discover \
                 providers and groups, then registry_invoke or hangar_call to dispatch."
                    .to_string(),
            ),
        }
    }

    /// The default client capabilities Hangar sends on outbound handshakes
    /// with its own providers.
    #[must_use]
    pub fn client_capabilities() -> ClientCapabilities {
        ClientCapabilities::default()
    }

    /// Handle `tools/list`: the fixed catalog of gateway-level tools.
    #[must_use]
    pub fn handle_tools_list(&self) -> Vec<Tool> {
        vec![
            tool(
                "registry_list",
                "List providers and groups",
                "Returns every configured provider and group with its current state.",
                json!({"type": "object", "properties": {}}),
            ),
            tool(
                "registry_tools",
                "List a provider's tools",
                "Returns the cached tool catalog for one provider.",
                json!({
                    "type": "object",
                    "properties": {"provider": {"type": "string"}},
                    "required": ["provider"]
                }),
            ),
            tool(
                "registry_invoke",
                "Invoke a tool on a provider or group",
                "Dispatches a tool call, starting the provider if cold.",
                invoke_schema(),
            ),
            tool(
                "hangar_call",
                "Invoke a tool (alias)",
                "Convenience alias for registry_invoke.",
                invoke_schema(),
            ),
            tool(
                "hangar_batch",
                "Run a batch of tool calls",
                "Fans out N calls concurrently, preserving input order in the results.",
                json!({
                    "type": "object",
                    "properties": {
                        "calls": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "target": {"type": "string"},
                                    "tool": {"type": "string"},
                                    "arguments": {"type": "object"},
                                    "timeout": {"type": "number"}
                                },
                                "required": ["target", "tool"]
                            }
                        },
                        "options": {
                            "type": "object",
                            "properties": {
                                "max_parallel": {"type": "integer"},
                                "deadline": {"type": "number"},
                                "fail_fast": {"type": "boolean"}
                            }
                        }
                    },
                    "required": ["calls"]
                }),
            ),
            tool(
                "registry_start",
                "Start a provider",
                "Forces a cold provider to start eagerly.",
                provider_schema(),
            ),
            tool(
                "registry_stop",
                "Stop a provider",
                "Shuts down a provider's transport and returns it to cold.",
                provider_schema(),
            ),
            tool(
                "registry_health",
                "Overall health summary",
                "Reports dispatchability for every provider and group.",
                json!({"type": "object", "properties": {}}),
            ),
            tool(
                "registry_metrics",
                "Gateway metrics snapshot",
                "Reports provider counts, in-flight calls, and circuit breaker stats.",
                json!({"type": "object", "properties": {}}),
            ),
            tool(
                "registry_discover",
                "List providers and groups (alias)",
                "Alias for registry_list.",
                json!({"type": "object", "properties": {}}),
            ),
            tool(
                "registry_details",
                "Detailed provider or group diagnostics",
                "Reports full lifecycle state, recent stderr, and failure counters.",
                provider_schema(),
            ),
        ]
    }

    /// Handle `tools/call`: dispatch by name to one of the eleven tools.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownTool`] for any unrecognized name, or whatever
    /// the underlying dispatch/registry operation returns.
    pub async fn handle_tools_call(&self, params: ToolsCallParams) -> Result<ToolsCallResult> {
        match params.name.as_str() {
            "registry_list" | "registry_discover" => self.registry_list(),
            "registry_tools" => self.registry_tools(&params.arguments),
            "registry_invoke" | "hangar_call" => self.registry_invoke(params.arguments).await,
            "hangar_batch" => self.hangar_batch(params.arguments).await,
            "registry_start" => self.registry_start(&params.arguments).await,
            "registry_stop" => self.registry_stop(&params.arguments).await,
            "registry_health" => self.registry_health(),
            "registry_metrics" => self.registry_metrics(),
            "registry_details" => self.registry_details(&params.arguments),
            other => Err(Error::UnknownTool {
                provider: "gateway".to_string(),
                tool: other.to_string(),
            }),
        }
    }

    fn registry_list(&self) -> Result<ToolsCallResult> {
        let registry = self.dispatch.registry();
        let mut entries: Vec<Value> = registry
            .providers()
            .map(|(id, manager)| {
                json!({
                    "id": id.as_str(),
                    "kind": "provider",
                    "state": manager.state().as_str(),
                    "mode": manager.mode(),
                    "tools_count": manager.cached_tools().len(),
                })
            })
            .collect();
        entries.extend(registry.groups().map(|(id, group)| {
            json!({
                "id": id.as_str(),
                "kind": "group",
                "dispatchable": group.is_dispatchable(registry),
                "members": group.members().len(),
            })
        }));
        ok_json(json!({"entries": entries}))
    }

    fn registry_tools(&self, args: &Value) -> Result<ToolsCallResult> {
        let provider_id = require_str(args, "provider")?;
        let registry = self.dispatch.registry();
        let Target::Provider(manager) = registry.resolve(provider_id)? else {
            return Err(Error::InvalidArgument(format!(
                "'{provider_id}' is a group; registry_tools expects a provider"
            )));
        };
        ok_json(json!({"tools": manager.cached_tools()}))
    }

    async fn registry_invoke(&self, args: Value) -> Result<ToolsCallResult> {
        let provider = require_str(&args, "provider").or_else(|_| require_str(&args, "target"))?;
        let tool = require_str(&args, "tool")?;
        let arguments = args.get("arguments").cloned().unwrap_or(Value::Null);
        let deadline = args
            .get("timeout")
            .and_then(Value::as_f64)
            .map_or(super::dispatch::DEFAULT_DEADLINE, Duration::from_secs_f64);
        self.dispatch
            .dispatch(provider, tool, arguments, deadline, None)
            .await
    }

    async fn hangar_batch(&self, args: Value) -> Result<ToolsCallResult> {
        let raw_calls = args
            .get("calls")
            .and_then(Value::as_array)
            .ok_or_else(|| Error::InvalidArgument("'calls' must be an array".to_string()))?;

        let mut calls = Vec::with_capacity(raw_calls.len());
        for entry in raw_calls {
            let target = require_str(entry, "target")?.to_string();
            let tool = require_str(entry, "tool")?.to_string();
            let arguments = entry.get("arguments").cloned().unwrap_or(Value::Null);
            let timeout = entry.get("timeout").and_then(Value::as_f64).map(Duration::from_secs_f64);
            calls.push(BatchCall { target, tool, arguments, timeout });
        }

        let options = args.get("options").map_or_else(BatchOptions::default, |o| BatchOptions {
            max_parallel: o.get("max_parallel").and_then(Value::as_u64).map(|n| n as usize),
            deadline: o
                .get("deadline")
                .and_then(Value::as_f64)
                .map_or(Duration::from_secs(60), Duration::from_secs_f64),
            fail_fast: o.get("fail_fast").and_then(Value::as_bool).unwrap_or(false),
        });

        let results = self.batch.batch_call(calls, options).await;
        let payload: Vec<Value> = results
            .iter()
            .map(|r| {
                if let Some(value) = &r.value {
                    json!({"ok": true, "value": value})
                } else {
                    json!({
                        "ok": false,
                        "error_kind": r.error_kind,
                        "message": r.message,
                    })
                }
            })
            .collect();
        ok_json(json!({"results": payload}))
    }

    async fn registry_start(&self, args: &Value) -> Result<ToolsCallResult> {
        let provider_id = require_str(args, "provider")?;
        let Target::Provider(manager) = self.dispatch.registry().resolve(provider_id)? else {
            return Err(Error::InvalidArgument(format!(
                "'{provider_id}' is a group; registry_start expects a provider"
            )));
        };
        manager.ensure_ready().await?;
        ok_json(json!({"id": provider_id, "state": manager.state().as_str()}))
    }

    async fn registry_stop(&self, args: &Value) -> Result<ToolsCallResult> {
        let provider_id = require_str(args, "provider")?;
        let Target::Provider(manager) = self.dispatch.registry().resolve(provider_id)? else {
            return Err(Error::InvalidArgument(format!(
                "'{provider_id}' is a group; registry_stop expects a provider"
            )));
        };
        manager.shutdown().await;
        ok_json(json!({"id": provider_id, "state": manager.state().as_str()}))
    }

    fn registry_health(&self) -> Result<ToolsCallResult> {
        ok_json(self.health_snapshot())
    }

    /// `registry_health`'s payload, reused by the HTTP `/health/*` probes.
    #[must_use]
    pub fn health_snapshot(&self) -> Value {
        let registry = self.dispatch.registry();
        let providers: Vec<Value> = registry
            .providers()
            .map(|(id, manager)| {
                json!({
                    "id": id.as_str(),
                    "state": manager.state().as_str(),
                    "dispatchable": manager.state().is_dispatchable(),
                })
            })
            .collect();
        let groups: Vec<Value> = registry
            .groups()
            .map(|(id, group)| {
                json!({
                    "id": id.as_str(),
                    "dispatchable": group.is_dispatchable(registry),
                    "healthy_count": group.healthy_count(registry),
                    "circuit": group.breaker_stats().state.as_str(),
                })
            })
            .collect();
        let healthy = providers.iter().all(|p| p["dispatchable"] == json!(true))
            && groups.iter().all(|g| g["dispatchable"] == json!(true));
        json!({
            "status": if healthy { "healthy" } else { "degraded" },
            "providers": providers,
            "groups": groups,
        })
    }

    fn registry_metrics(&self) -> Result<ToolsCallResult> {
        ok_json(self.metrics_snapshot())
    }

    /// `registry_metrics`'s payload, reused by the HTTP `/metrics` endpoint.
    #[must_use]
    pub fn metrics_snapshot(&self) -> Value {
        let registry = self.dispatch.registry();
        let in_flight_total: usize = registry.providers().map(|(_, m)| m.in_flight()).sum();
        let states: Vec<Value> = registry
            .providers()
            .map(|(id, m)| json!({"id": id.as_str(), "state": m.state().as_str(), "in_flight": m.in_flight()}))
            .collect();
        let groups: Vec<Value> = registry
            .groups()
            .map(|(id, g)| {
                let stats = g.breaker_stats();
                json!({
                    "id": id.as_str(),
                    "circuit_state": stats.state.as_str(),
                    "trips_count": stats.trips_count,
                })
            })
            .collect();
        json!({
            "uptime_seconds": self.uptime().as_secs(),
            "provider_count": registry.provider_count(),
            "in_flight_total": in_flight_total,
            "providers": states,
            "groups": groups,
        })
    }

    fn registry_details(&self, args: &Value) -> Result<ToolsCallResult> {
        let id = require_str(args, "provider")?;
        match self.dispatch.registry().resolve(id)? {
            Target::Provider(manager) => ok_json(json!({
                "id": id,
                "kind": "provider",
                "mode": manager.mode(),
                "state": manager.state().as_str(),
                "tools": manager.cached_tools(),
                "last_used_ms_ago": manager.last_used().map(|t| t.elapsed().as_millis() as u64),
                "last_error": manager.last_error(),
                "consecutive_failures": manager.consecutive_failures(),
                "in_flight": manager.in_flight(),
                "idle_ttl_s": manager.idle_ttl().as_secs(),
                "stderr_tail": manager.stderr_tail(),
            })),
            Target::Group(group) => {
                let registry = self.dispatch.registry();
                let stats = group.breaker_stats();
                ok_json(json!({
                    "id": id,
                    "kind": "group",
                    "dispatchable": group.is_dispatchable(registry),
                    "healthy_count": group.healthy_count(registry),
                    "members": group.members().iter().map(|m| m.id.as_str()).collect::<Vec<_>>(),
                    "circuit_state": stats.state.as_str(),
                    "trips_count": stats.trips_count,
                    "retry_after_ms": stats.retry_after_ms,
                }))
            }
        }
    }
}

fn tool(name: &str, title: &str, description: &str, input_schema: Value) -> Tool {
    Tool {
        name: name.to_string(),
        title: Some(title.to_string()),
        description: Some(description.to_string()),
        input_schema,
        output_schema: None,
    }
}

fn invoke_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "provider": {"type": "string"},
            "target": {"type": "string"},
            "tool": {"type": "string"},
            "arguments": {"type": "object"},
            "timeout": {"type": "number"}
        },
        "required": ["tool"]
    })
}

fn provider_schema() -> Value {
    json!({
        "type": "object",
        "properties": {"provider": {"type": "string"}},
        "required": ["provider"]
    })
}

fn require_str<'a>(args: &'a Value, key: &str) -> Result<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::InvalidArgument(format!("'{key}' is required and must be a string")))
}

fn ok_json(value: Value) -> Result<ToolsCallResult> {
    Ok(ToolsCallResult {
        content: vec![Content::Text { text: value.to_string() }],
        is_error: false,
    })
}
