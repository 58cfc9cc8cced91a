//! MCP transports.
//!
//! Stdio servers speak newline-delimited JSON over a child process; a
//! background task reads stdout and routes responses to waiting callers by
//! request id. Streamable-HTTP servers answer each POST with either a JSON
//! body or an SSE stream carrying the response.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{Mutex, RwLock, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::McpError;
use super::protocol::{JsonRpcMessage, JsonRpcNotification, JsonRpcRequest};

/// One request/response channel to an MCP server.
#[async_trait]
pub trait RpcChannel: Send + Sync {
    /// Send a request and wait for the matching response's `result`.
    async fn call(&self, request: JsonRpcRequest, timeout: Option<Duration>) -> Result<Value, McpError>;

    async fn notify(&self, notification: JsonRpcNotification) -> Result<(), McpError>;

    async fn is_alive(&self) -> bool;
}

type Pending = Arc<RwLock<HashMap<i64, oneshot::Sender<Result<Value, McpError>>>>>;

/// Child-process transport.
pub struct StdioChannel {
    stdin: Mutex<ChildStdin>,
    child: Mutex<Child>,
    pending: Pending,
    shutdown: CancellationToken,
    label: String,
}

impl StdioChannel {
    pub async fn spawn(
        label: &str,
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> Result<Self, McpError> {
        info!(server = %label, command = %command, ?args, "Spawning MCP server");

        let mut cmd = Command::new(command);
        cmd.args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| McpError::Spawn {
            command: command.to_string(),
            reason: if e.kind() == std::io::ErrorKind::NotFound {
                "command not found in PATH".to_string()
            } else {
                e.to_string()
            },
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::Io("child has no stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::Io("child has no stdout".into()))?;

        let pending: Pending = Arc::new(RwLock::new(HashMap::new()));
        let shutdown = CancellationToken::new();

        let reader_pending = Arc::clone(&pending);
        let reader_shutdown = shutdown.clone();
        let reader_label = label.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                tokio::select! {
                    _ = reader_shutdown.cancelled() => break,
                    line = lines.next_line() => match line {
                        Ok(Some(line)) => {
                            let line = line.trim();
                            if !line.starts_with('{') {
                                // Servers sometimes log to stdout
                                debug!(server = %reader_label, "Skipping non-JSON line");
                                continue;
                            }
                            route_message(line, &reader_pending).await;
                        }
                        Ok(None) | Err(_) => {
                            warn!(server = %reader_label, "MCP server closed stdout");
                            for (_, tx) in reader_pending.write().await.drain() {
                                let _ = tx.send(Err(McpError::ConnectionClosed));
                            }
                            break;
                        }
                    }
                }
            }
        });

        Ok(Self {
            stdin: Mutex::new(stdin),
            child: Mutex::new(child),
            pending,
            shutdown,
            label: label.to_string(),
        })
    }

    async fn write_line(&self, json: &str) -> Result<(), McpError> {
        let mut stdin = self.stdin.lock().await;
        stdin.write_all(json.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl RpcChannel for StdioChannel {
    async fn call(&self, request: JsonRpcRequest, timeout: Option<Duration>) -> Result<Value, McpError> {
        let id = request.id;
        let method = request.method.clone();
        let json = serde_json::to_string(&request)?;

        let (tx, rx) = oneshot::channel();
        self.pending.write().await.insert(id, tx);

        debug!(server = %self.label, id, method = %method, "MCP request");
        if let Err(e) = self.write_line(&json).await {
            self.pending.write().await.remove(&id);
            return Err(e);
        }

        let received = match timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(received) => received,
                Err(_) => {
                    self.pending.write().await.remove(&id);
                    return Err(McpError::Timeout {
                        method,
                        secs: limit.as_secs(),
                    });
                }
            },
            None => rx.await,
        };

        received.map_err(|_| McpError::ConnectionClosed)?
    }

    async fn notify(&self, notification: JsonRpcNotification) -> Result<(), McpError> {
        let json = serde_json::to_string(&notification)?;
        self.write_line(&json).await
    }

    async fn is_alive(&self) -> bool {
        matches!(self.child.lock().await.try_wait(), Ok(None))
    }
}

impl Drop for StdioChannel {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn route_message(line: &str, pending: &Pending) {
    let message: JsonRpcMessage = match serde_json::from_str(line) {
        Ok(m) => m,
        Err(e) => {
            debug!(error = %e, "Unparseable MCP message");
            return;
        }
    };

    match message.id {
        Some(id) => {
            if let Some(tx) = pending.write().await.remove(&id) {
                let _ = tx.send(into_result(message));
            }
        }
        None => {
            if let Some(method) = message.method {
                debug!(method = %method, "MCP notification ignored");
            }
        }
    }
}

fn into_result(message: JsonRpcMessage) -> Result<Value, McpError> {
    match message.error {
        Some(error) => Err(McpError::Rpc {
            code: error.code,
            message: error.message,
        }),
        None => Ok(message.result.unwrap_or(Value::Null)),
    }
}

/// Streamable-HTTP transport.
pub struct HttpChannel {
    url: String,
    token: Option<String>,
    client: reqwest::Client,
    session_id: RwLock<Option<String>>,
}

impl HttpChannel {
    pub fn new(url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            url: url.into(),
            token,
            client: reqwest::Client::new(),
            session_id: RwLock::new(None),
        }
    }

    async fn post(&self, body: String, timeout: Option<Duration>) -> Result<reqwest::Response, McpError> {
        let mut req = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json, text/event-stream")
            .body(body);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        if let Some(session) = self.session_id.read().await.as_deref() {
            req = req.header("Mcp-Session-Id", session);
        }
        if let Some(limit) = timeout {
            req = req.timeout(limit);
        }

        let response = req.send().await.map_err(|e| McpError::Http(e.to_string()))?;
        if !response.status().is_success() {
            return Err(McpError::Http(format!("HTTP {}", response.status())));
        }

        if let Some(session) = response
            .headers()
            .get("mcp-session-id")
            .and_then(|v| v.to_str().ok())
        {
            *self.session_id.write().await = Some(session.to_string());
        }
        Ok(response)
    }
}

#[async_trait]
impl RpcChannel for HttpChannel {
    async fn call(&self, request: JsonRpcRequest, timeout: Option<Duration>) -> Result<Value, McpError> {
        let id = request.id;
        let body = serde_json::to_string(&request)?;
        let response = self.post(body, timeout).await?;

        let is_sse = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));
        let text = response.text().await.map_err(|e| McpError::Http(e.to_string()))?;

        let message = if is_sse {
            find_sse_response(&text, id)
                .ok_or_else(|| McpError::Protocol(format!("no response for request {id} in event stream")))?
        } else {
            serde_json::from_str::<JsonRpcMessage>(&text)?
        };
        into_result(message)
    }

    async fn notify(&self, notification: JsonRpcNotification) -> Result<(), McpError> {
        let body = serde_json::to_string(&notification)?;
        self.post(body, Some(Duration::from_secs(10))).await.map(|_| ())
    }

    async fn is_alive(&self) -> bool {
        true
    }
}

/// Find the JSON-RPC response with `id` among the `data:` lines of an SSE body.
pub(crate) fn find_sse_response(body: &str, id: i64) -> Option<JsonRpcMessage> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .filter_map(|data| serde_json::from_str::<JsonRpcMessage>(data.trim()).ok())
        .find(|m| m.id == Some(id))
}
