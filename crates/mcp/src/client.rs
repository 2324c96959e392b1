use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, error, info, warn};

use crate::{McpTool, ToolTransport};
use webpilot_core::{Error, Result};

/// How long a terminated server gets to exit on its own before being killed.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

// ─── JSON-RPC types ──────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct JsonRpcRequest {
    jsonrpc: &'static str,
    id: u64,
    method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[allow(dead_code)]
    jsonrpc: String,
    id: Option<u64>,
    result: Option<Value>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<std::result::Result<Value, String>>>>>;

/// Owns the MCP server child process and its stdio streams.
///
/// Responses are matched to requests by JSON-RPC id through a pending map,
/// never by stream order. Exactly one `McpServer` exists per program run;
/// `shutdown` runs on every exit path, with `kill_on_drop` as a backstop.
#[derive(Debug)]
pub struct McpServer {
    server_name: String,
    /// `None` once shutdown has closed the pipe.
    stdin: Arc<Mutex<Option<ChildStdin>>>,
    next_id: AtomicU64,
    pending: PendingMap,
    child: Arc<Mutex<Child>>,
    request_timeout: Duration,
}

impl McpServer {
    /// Launch the server and perform the MCP initialization handshake.
    /// Fails atomically: an unhealthy server never yields a handle.
    pub async fn start(
        server_name: &str,
        command: &str,
        args: &[String],
        request_timeout: Duration,
    ) -> Result<Self> {
        let mut child = Command::new(command)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::Launch(format!(
                    "MCP[{}]: failed to spawn '{}': {}",
                    server_name, command, e
                ))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Launch(format!("MCP[{}]: no stdin", server_name)))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Launch(format!("MCP[{}]: no stdout", server_name)))?;

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));

        // Background task: read newline-delimited JSON-RPC responses from
        // stdout and complete the matching pending request by id.
        tokio::spawn(Self::reader_task(
            stdout,
            pending.clone(),
            server_name.to_string(),
        ));

        let server = Self {
            server_name: server_name.to_string(),
            stdin: Arc::new(Mutex::new(Some(stdin))),
            next_id: AtomicU64::new(1),
            pending,
            child: Arc::new(Mutex::new(child)),
            request_timeout,
        };

        server.initialize().await.map_err(|e| match e {
            Error::Launch(_) => e,
            other => Error::Launch(format!("initialize handshake failed: {}", other)),
        })?;

        Ok(server)
    }

    pub fn name(&self) -> &str {
        &self.server_name
    }

    /// Send one JSON-RPC request and wait for the correlated response.
    async fn call(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let req = JsonRpcRequest {
            jsonrpc: "2.0",
            id,
            method: method.to_string(),
            params,
        };

        let (tx, rx) = oneshot::channel();
        {
            let mut map = self.pending.lock().await;
            map.insert(id, tx);
        }

        let line = serde_json::to_string(&req)?;
        debug!(server = %self.server_name, id, method, "MCP → request");

        if let Err(e) = self.write_line(&line).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        let reply = match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(reply) => reply,
            Err(_) => {
                self.pending.lock().await.remove(&id);
                return Err(Error::Protocol(format!(
                    "MCP[{}]: no response to '{}' within {:?}",
                    self.server_name, method, self.request_timeout
                )));
            }
        };

        match reply {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(rpc_error)) => Err(Error::Invocation(format!(
                "MCP[{}]: {}",
                self.server_name, rpc_error
            ))),
            // Sender dropped: the reader task drained the pending map
            // because the server's stdout closed.
            Err(_) => Err(Error::ProcessExited(format!(
                "MCP[{}]: server closed while waiting for '{}'",
                self.server_name, method
            ))),
        }
    }

    async fn write_line(&self, line: &str) -> Result<()> {
        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or_else(|| {
            Error::ProcessExited(format!("MCP[{}]: stdin already closed", self.server_name))
        })?;
        let write = async {
            stdin.write_all(line.as_bytes()).await?;
            stdin.write_all(b"\n").await?;
            stdin.flush().await
        };
        write.await.map_err(|e| {
            Error::ProcessExited(format!("MCP[{}]: write error: {}", self.server_name, e))
        })
    }

    /// MCP initialize + initialized notification.
    async fn initialize(&self) -> Result<()> {
        let params = serde_json::json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {},
            "clientInfo": {
                "name": "webpilot",
                "version": env!("CARGO_PKG_VERSION")
            }
        });
        let result = self.call("initialize", Some(params)).await?;
        debug!(server = %self.server_name, ?result, "MCP initialized");

        // Fire-and-forget notification, no id.
        let notif = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "notifications/initialized"
        });
        self.write_line(&notif.to_string()).await?;

        Ok(())
    }

    /// Close stdin (the stdio-transport termination signal), give the server
    /// a grace period to exit, then kill it. Idempotent.
    pub async fn shutdown(&self) {
        self.stdin.lock().await.take();

        let mut child = self.child.lock().await;
        match tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await {
            Ok(Ok(status)) => {
                info!(server = %self.server_name, %status, "MCP server exited");
            }
            Ok(Err(e)) => {
                warn!(server = %self.server_name, error = %e, "MCP server wait failed");
            }
            Err(_) => {
                warn!(server = %self.server_name, "MCP server did not exit in time, killing");
                if let Err(e) = child.kill().await {
                    warn!(server = %self.server_name, error = %e, "Failed to kill MCP server");
                }
            }
        }
    }

    /// Background reader: dispatches incoming responses to waiting callers.
    async fn reader_task(stdout: ChildStdout, pending: PendingMap, server_name: String) {
        let reader = BufReader::new(stdout);
        let mut lines = reader.lines();

        loop {
            match lines.next_line().await {
                Ok(Some(line)) if !line.trim().is_empty() => {
                    debug!(server = %server_name, "MCP ← {}", preview(&line, 200));
                    match serde_json::from_str::<JsonRpcResponse>(&line) {
                        Ok(resp) => {
                            if let Some(id) = resp.id {
                                let mut map = pending.lock().await;
                                if let Some(tx) = map.remove(&id) {
                                    let _ = tx.send(response_payload(resp));
                                }
                            }
                            // Server-initiated notifications carry no id and
                            // are ignored.
                        }
                        Err(e) => {
                            warn!(server = %server_name, "MCP: failed to parse response: {}", e);
                        }
                    }
                }
                Ok(Some(_)) => {} // blank line
                Ok(None) => {
                    error!(server = %server_name, "MCP: stdout closed");
                    let mut map = pending.lock().await;
                    for (_, tx) in map.drain() {
                        let _ = tx.send(Err("server stdout closed".to_string()));
                    }
                    break;
                }
                Err(e) => {
                    error!(server = %server_name, "MCP: read error: {}", e);
                    break;
                }
            }
        }
    }
}

/// Truncate at a char boundary at or below `max_bytes`.
fn preview(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

fn response_payload(resp: JsonRpcResponse) -> std::result::Result<Value, String> {
    if let Some(err) = resp.error {
        Err(format!("JSON-RPC error {}: {}", err.code, err.message))
    } else {
        Ok(resp.result.unwrap_or(Value::Null))
    }
}

/// Unwrap an MCP `tools/call` result: `{content: [...], isError: bool}`.
/// Text content blocks are joined into a single string value.
fn extract_tool_result(result: Value) -> Result<Value> {
    if let Some(true) = result.get("isError").and_then(|v| v.as_bool()) {
        let msg = result
            .get("content")
            .and_then(|c| c.as_array())
            .and_then(|arr| arr.first())
            .and_then(|item| item.get("text"))
            .and_then(|t| t.as_str())
            .unwrap_or("MCP tool returned an error");
        return Err(Error::Invocation(msg.to_string()));
    }

    let content = result.get("content").cloned().unwrap_or(Value::Null);
    if let Some(arr) = content.as_array() {
        let text: String = arr
            .iter()
            .filter_map(|item| {
                if item.get("type").and_then(|t| t.as_str()) == Some("text") {
                    item.get("text").and_then(|t| t.as_str()).map(|s| s.to_string())
                } else {
                    None
                }
            })
            .collect::<Vec<_>>()
            .join("\n");
        if !text.is_empty() {
            return Ok(Value::String(text));
        }
    }
    Ok(content)
}

#[async_trait]
impl ToolTransport for McpServer {
    async fn list_tools(&self) -> Result<Vec<McpTool>> {
        let result = self.call("tools/list", None).await?;
        let raw = result
            .get("tools")
            .cloned()
            .ok_or_else(|| {
                Error::Protocol(format!(
                    "MCP[{}]: discovery response has no 'tools' field",
                    self.server_name
                ))
            })?;
        let tools: Vec<McpTool> = serde_json::from_value(raw).map_err(|e| {
            Error::Protocol(format!("MCP[{}]: malformed tool list: {}", self.server_name, e))
        })?;
        debug!(server = %self.server_name, count = tools.len(), "MCP tools discovered");
        Ok(tools)
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value> {
        let params = serde_json::json!({
            "name": name,
            "arguments": arguments
        });
        let result = self.call("tools/call", Some(params)).await?;
        extract_tool_result(result)
    }
}
