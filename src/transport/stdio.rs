//! Subprocess transport: newline-delimited JSON-RPC over a child's stdio.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, oneshot};
use tracing::{debug, error};

use super::{NotificationHandler, StderrRingBuffer, Transport};
use crate::protocol::{JsonRpcMessage, JsonRpcRequest, JsonRpcResponse, PROTOCOL_VERSION, RequestId};
use crate::{Error, Result};

const STDERR_RING_CAPACITY: usize = 200;

/// Subprocess transport for a provider launched directly as a child process.
pub struct StdioTransport {
    child: Mutex<Option<Child>>,
    pending: dashmap::DashMap<String, oneshot::Sender<JsonRpcResponse>>,
    request_id: AtomicU64,
    connected: AtomicBool,
    program: String,
    args: Vec<String>,
    env: HashMap<String, String>,
    cwd: Option<String>,
    writer: Mutex<Option<tokio::process::ChildStdin>>,
    /// Captured stderr, for `registry_details` diagnostics.
    pub stderr: Arc<StderrRingBuffer>,
    /// Handler for server-initiated notifications, registered by the owning
    /// [`crate::provider::ProviderSession`].
    notification_handler: parking_lot::RwLock<Option<NotificationHandler>>,
}

impl StdioTransport {
    /// Build a transport for `argv[0] argv[1..]`, not yet spawned.
    #[must_use]
    pub fn new(argv: &[String], env: HashMap<String, String>, cwd: Option<String>) -> Arc<Self> {
        let (program, args) = argv
            .split_first()
            .map(|(p, a)| (p.clone(), a.to_vec()))
            .unwrap_or_default();
        Arc::new(Self {
            child: Mutex::new(None),
            pending: dashmap::DashMap::new(),
            request_id: AtomicU64::new(1),
            connected: AtomicBool::new(false),
            program,
            args,
            env,
            cwd,
            writer: Mutex::new(None),
            stderr: Arc::new(StderrRingBuffer::new(STDERR_RING_CAPACITY)),
            notification_handler: parking_lot::RwLock::new(None),
        })
    }

    /// Build a transport around an already-constructed [`Command`], used by
    /// [`super::ContainerTransport`] to share this module's framing code
    /// instead of duplicating it.
    pub(super) async fn spawn_from_command(self: &Arc<Self>, mut cmd: Command) -> Result<()> {
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::TransportError(format!("failed to spawn: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::TransportError("failed to get stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::TransportError("failed to get stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::TransportError("failed to get stderr".to_string()))?;

        *self.writer.lock().await = Some(stdin);
        *self.child.lock().await = Some(child);

        let transport = Arc::clone(self);
        tokio::spawn(async move {
            let mut reader = BufReader::new(stdout).lines();
            loop {
                match reader.next_line().await {
                    Ok(Some(line)) => {
                        if let Err(e) = transport.handle_response(&line) {
                            error!(error = %e, line = %line, "failed to handle response");
                        }
                    }
                    Ok(None) => {
                        debug!("stdout EOF, provider process likely exited");
                        break;
                    }
                    Err(e) => {
                        error!(error = %e, "error reading provider stdout");
                        break;
                    }
                }
            }
            transport.connected.store(false, Ordering::Relaxed);
        });

        let ring = Arc::clone(&self.stderr);
        tokio::spawn(async move {
            let mut reader = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = reader.next_line().await {
                ring.push(line);
            }
        });

        self.initialize().await
    }

    /// Spawn the configured subprocess and run the MCP handshake.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransportError`] if spawning fails, or
    /// [`Error::ProviderColdStartFailed`]-worthy handshake errors surfaced as
    /// [`Error::TransportError`] for the caller to translate.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if self.program.is_empty() {
            return Err(Error::Config("empty command".to_string()));
        }
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        for (k, v) in &self.env {
            cmd.env(k, v);
        }
        if let Some(ref cwd) = self.cwd {
            cmd.current_dir(cwd);
        }
        self.spawn_from_command(cmd).await
    }

    async fn initialize(&self) -> Result<()> {
        let response = self
            .request(
                "initialize",
                Some(serde_json::json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": "mcp-hangar",
                        "version": env!("CARGO_PKG_VERSION")
                    }
                })),
            )
            .await?;

        if response.error.is_some() {
            return Err(Error::TransportError("initialize failed".to_string()));
        }

        tokio::task::yield_now().await;
        self.notify("notifications/initialized", None).await?;
        tokio::task::yield_now().await;

        self.connected.store(true, Ordering::Relaxed);
        debug!(program = %self.program, "stdio transport initialized");
        Ok(())
    }

    fn handle_response(&self, line: &str) -> Result<()> {
        let message: JsonRpcMessage = serde_json::from_str(line)?;
        match message {
            JsonRpcMessage::Response(response) => {
                if let Some(ref id) = response.id {
                    let key = id.to_string();
                    if let Some((_, sender)) = self.pending.remove(&key) {
                        let _ = sender.send(response);
                    } else {
                        debug!(id = %key, "dropping response with no matching pending request");
                    }
                }
            }
            JsonRpcMessage::Notification(notification) => {
                debug!(method = %notification.method, "received server-initiated notification");
                let handler = self.notification_handler.read().clone();
                if let Some(handler) = handler {
                    handler(notification);
                }
            }
            JsonRpcMessage::Request(request) => {
                debug!(method = %request.method, "ignoring unexpected server-initiated request");
            }
        }
        Ok(())
    }

    async fn write_message(&self, message: &str) -> Result<()> {
        let mut writer = self.writer.lock().await;
        if let Some(ref mut stdin) = *writer {
            stdin
                .write_all(message.as_bytes())
                .await
                .map_err(|e| Error::TransportError(e.to_string()))?;
            stdin
                .write_all(b"\n")
                .await
                .map_err(|e| Error::TransportError(e.to_string()))?;
            stdin
                .flush()
                .await
                .map_err(|e| Error::TransportError(e.to_string()))?;
            drop(writer);
            tokio::task::yield_now().await;
            Ok(())
        } else {
            Err(Error::TransportError("not connected".to_string()))
        }
    }

    #[allow(clippy::cast_possible_wrap)]
    fn next_id(&self) -> RequestId {
        RequestId::Number(self.request_id.fetch_add(1, Ordering::Relaxed) as i64)
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn request(&self, method: &str, params: Option<Value>) -> Result<JsonRpcResponse> {
        let id = self.next_id();
        let request = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: id.clone(),
            method: method.to_string(),
            params,
        };

        let (tx, rx) = oneshot::channel();
        self.pending.insert(id.to_string(), tx);

        let message = serde_json::to_string(&request)?;
        self.write_message(&message).await?;

        match tokio::time::timeout(std::time::Duration::from_secs(30), rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(Error::TransportError("response channel closed".to_string())),
            Err(_) => {
                self.pending.remove(&id.to_string());
                Err(Error::Timeout)
            }
        }
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        let notification = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params
        });
        let message = serde_json::to_string(&notification)?;
        self.write_message(&message).await
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    async fn close(&self) -> Result<()> {
        self.connected.store(false, Ordering::Relaxed);
        *self.writer.lock().await = None;
        if let Some(ref mut child) = *self.child.lock().await {
            let _ = child.kill().await;
        }
        Ok(())
    }

    fn stderr_tail(&self) -> Vec<String> {
        self.stderr.snapshot()
    }

    fn set_notification_handler(&self, handler: NotificationHandler) {
        *self.notification_handler.write() = Some(handler);
    }
}
