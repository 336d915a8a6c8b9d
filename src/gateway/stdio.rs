//! Client-facing stdio transport: newline-delimited JSON-RPC 2.0 on the
//! gateway's own stdin/stdout — the default front door.
//!
//! Grounded on the same framing [`crate::transport::StdioTransport`] uses
//! for backend subprocesses, mirrored here for the other direction: this
//! gateway is the *server* side of the handshake instead of the client.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, error, warn};

use crate::Result;
use crate::protocol::{InitializeParams, JsonRpcMessage, JsonRpcRequest, JsonRpcResponse, ToolsCallParams};

use super::surface::GatewaySurface;

/// Read lines from stdin, dispatch each JSON-RPC request through `surface`,
/// and write responses to stdout, until EOF or `shutdown` fires.
///
/// # Errors
///
/// Returns an error only if writing to stdout fails; malformed input from
/// the client is answered with a JSON-RPC parse-error response instead of
/// terminating the loop.
pub async fn run(surface: Arc<GatewaySurface>, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
    let stdin = tokio::io::stdin();
    let stdout = Arc::new(Mutex::new(tokio::io::stdout()));
    let mut lines = BufReader::new(stdin).lines();

    loop {
        let line = tokio::select! {
            biased;
            _ = shutdown.recv() => {
                debug!("stdio transport shutting down");
                return Ok(());
            }
            line = lines.next_line() => line,
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!("stdin closed, stdio transport exiting");
                return Ok(());
            }
            Err(e) => {
                error!(error = %e, "error reading stdin");
                return Ok(());
            }
        };

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let surface = Arc::clone(&surface);
        let stdout = Arc::clone(&stdout);
        tokio::spawn(async move {
            if let Some(response) = handle_line(&surface, trimmed).await {
                write_response(&stdout, &response).await;
            }
        });
    }
}

/// Handle one line of input, returning the response to write (`None` for
/// notifications, which expect no reply).
async fn handle_line(surface: &GatewaySurface, line: &str) -> Option<JsonRpcResponse> {
    let message: JsonRpcMessage = match serde_json::from_str(line) {
        Ok(m) => m,
        Err(e) => {
            return Some(JsonRpcResponse::error(
                None,
                crate::error::rpc_codes::PARSE_ERROR,
                format!("parse error: {e}"),
            ));
        }
    };

    let JsonRpcMessage::Request(request) = message else {
        return None;
    };

    Some(handle_request(surface, request).await)
}

async fn handle_request(surface: &GatewaySurface, request: JsonRpcRequest) -> JsonRpcResponse {
    let id = request.id.clone();
    match dispatch_method(surface, &request).await {
        Ok(result) => JsonRpcResponse::success(id, result),
        Err(e) => JsonRpcResponse::error(Some(id), e.to_rpc_code(), e.to_string()),
    }
}

async fn dispatch_method(
    surface: &GatewaySurface,
    request: &JsonRpcRequest,
) -> crate::Result<serde_json::Value> {
    match request.method.as_str() {
        "initialize" => {
            let params: InitializeParams = parse_params(request)?;
            Ok(serde_json::to_value(surface.handle_initialize(&params))?)
        }
        "notifications/initialized" | "ping" => Ok(serde_json::json!({})),
        "tools/list" => Ok(serde_json::json!({"tools": surface.handle_tools_list()})),
        "tools/call" => {
            let params: ToolsCallParams = parse_params(request)?;
            let result = surface.handle_tools_call(params).await?;
            Ok(serde_json::to_value(result)?)
        }
        other => Err(crate::Error::UnknownTool {
            provider: "gateway".to_string(),
            tool: other.to_string(),
        }),
    }
}

fn parse_params<T: serde::de::DeserializeOwned>(request: &JsonRpcRequest) -> crate::Result<T> {
    serde_json::from_value(request.params.clone().unwrap_or_default())
        .map_err(|e| crate::Error::InvalidArgument(format!("bad params for {}: {e}", request.method)))
}

async fn write_response(stdout: &Mutex<tokio::io::Stdout>, response: &JsonRpcResponse) {
    let Ok(payload) = serde_json::to_string(response) else {
        error!("failed to serialize JSON-RPC response");
        return;
    };
    let mut stdout = stdout.lock().await;
    if let Err(e) = stdout.write_all(payload.as_bytes()).await {
        warn!(error = %e, "failed to write stdio response");
        return;
    }
    if let Err(e) = stdout.write_all(b"\n").await {
        warn!(error = %e, "failed to write stdio response newline");
        return;
    }
    let _ = stdout.flush().await;
}
