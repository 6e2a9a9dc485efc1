//! Transport-level JSON-RPC plumbing for a single MCP server: either a
//! spawned stdio subprocess or an HTTP endpoint, both framed the same way.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, Mutex};

use super::McpError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const STDIO_READ_BUFFER: usize = 10 * 1024 * 1024;

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value, Value>>>>>;

pub enum Transport {
    Stdio(StdioTransport),
    Http(HttpTransport),
}

impl Transport {
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, McpError> {
        match self {
            Transport::Stdio(t) => t.request(method, params).await,
            Transport::Http(t) => t.request(method, params).await,
        }
    }

    pub async fn notify(&self, method: &str, params: Value) -> Result<(), McpError> {
        match self {
            Transport::Stdio(t) => t.notify(method, params).await,
            Transport::Http(t) => t.notify(method, params).await,
        }
    }

    pub async fn shutdown(self) {
        if let Transport::Stdio(t) = self {
            t.shutdown().await;
        }
    }
}

/// One spawned MCP server process, talking newline-delimited JSON-RPC over
/// its stdin/stdout.
pub struct StdioTransport {
    child: Mutex<Child>,
    stdin: Mutex<tokio::process::ChildStdin>,
    pending: PendingMap,
    next_id: AtomicU64,
    reader_task: tokio::task::JoinHandle<()>,
}

impl StdioTransport {
    pub async fn spawn(command: &str, args: &[String], env: &HashMap<String, String>) -> Result<Self, McpError> {
        let mut cmd = Command::new(command);
        cmd.args(args).envs(env).stdin(Stdio::piped()).stdout(Stdio::piped()).stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| McpError::Transport(format!("failed to launch '{command}': {e}")))?;

        let stdin = child.stdin.take().ok_or_else(|| McpError::Transport("child has no stdin".into()))?;
        let stdout = child.stdout.take().ok_or_else(|| McpError::Transport("child has no stdout".into()))?;

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let reader_pending = pending.clone();
        let reader_task = tokio::spawn(async move {
            let mut reader = BufReader::with_capacity(STDIO_READ_BUFFER, stdout);
            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }
                let Ok(message) = serde_json::from_str::<Value>(&line) else { continue };
                let Some(id) = message.get("id").and_then(Value::as_u64) else { continue };
                let mut pending = reader_pending.lock().await;
                if let Some(sender) = pending.remove(&id) {
                    let result = if let Some(error) = message.get("error") {
                        Err(error.clone())
                    } else {
                        Ok(message.get("result").cloned().unwrap_or(Value::Null))
                    };
                    let _ = sender.send(result);
                }
            }
        });

        Ok(Self { child: Mutex::new(child), stdin: Mutex::new(stdin), pending, next_id: AtomicU64::new(0), reader_task })
    }

    async fn write_line(&self, value: &Value) -> Result<(), McpError> {
        let mut line = serde_json::to_string(value)?;
        line.push('\n');
        let mut stdin = self.stdin.lock().await;
        stdin.write_all(line.as_bytes()).await.map_err(|e| McpError::Transport(format!("write failed: {e}")))?;
        stdin.flush().await.map_err(|e| McpError::Transport(format!("flush failed: {e}")))
    }

    pub async fn request(&self, method: &str, params: Value) -> Result<Value, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        self.write_line(&json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params})).await?;

        match tokio::time::timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(Ok(result))) => Ok(result),
            Ok(Ok(Err(error))) => Err(McpError::Rpc(error.to_string())),
            Ok(Err(_)) => Err(McpError::Transport("response channel closed".into())),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(McpError::Timeout(method.to_string()))
            }
        }
    }

    pub async fn notify(&self, method: &str, params: Value) -> Result<(), McpError> {
        self.write_line(&json!({"jsonrpc": "2.0", "method": method, "params": params})).await
    }

    pub async fn shutdown(self) {
        self.reader_task.abort();
        drop(self.stdin);
        let mut child = self.child.lock().await;
        if tokio::time::timeout(Duration::from_secs(5), child.wait()).await.is_err() {
            let _ = child.start_kill();
        }
    }
}

/// An MCP server reached over HTTP, with `Mcp-Session-Id` echoed back once
/// the server assigns one and SSE responses unwrapped to their final event.
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    headers: HashMap<String, String>,
    session_id: Mutex<Option<String>>,
    next_id: AtomicU64,
}

impl HttpTransport {
    pub fn new(url: String, headers: HashMap<String, String>) -> Self {
        Self { client: reqwest::Client::new(), url, headers, session_id: Mutex::new(None), next_id: AtomicU64::new(0) }
    }

    async fn post(&self, body: Value) -> Result<reqwest::Response, McpError> {
        let mut req = self
            .client
            .post(&self.url)
            .header("content-type", "application/json")
            .header("accept", "application/json, text/event-stream");
        for (k, v) in &self.headers {
            req = req.header(k.as_str(), v.as_str());
        }
        if let Some(session_id) = self.session_id.lock().await.clone() {
            req = req.header("Mcp-Session-Id", session_id);
        }

        let response = tokio::time::timeout(REQUEST_TIMEOUT, req.json(&body).send())
            .await
            .map_err(|_| McpError::Timeout("http request".to_string()))?
            .map_err(|e| McpError::Transport(e.to_string()))?;

        if let Some(session_id) = response.headers().get("mcp-session-id").and_then(|v| v.to_str().ok()) {
            *self.session_id.lock().await = Some(session_id.to_string());
        }

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(McpError::Transport(format!("HTTP {status}: {text}")));
        }
        Ok(response)
    }

    pub async fn request(&self, method: &str, params: Value) -> Result<Value, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params});

        let response = self.post(body).await?;
        let is_sse = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("text/event-stream"));
        let text = response.text().await.map_err(|e| McpError::Transport(e.to_string()))?;

        let message = if is_sse { parse_sse(&text)? } else { serde_json::from_str(&text)? };

        if let Some(error) = message.get("error") {
            return Err(McpError::Rpc(error.to_string()));
        }
        Ok(message.get("result").cloned().unwrap_or(Value::Null))
    }

    pub async fn notify(&self, method: &str, params: Value) -> Result<(), McpError> {
        let body = json!({"jsonrpc": "2.0", "method": method, "params": params});
        self.post(body).await.map(|_| ())
    }
}

/// Returns the JSON object from the last `data:` line in an SSE body.
fn parse_sse(text: &str) -> Result<Value, McpError> {
    for line in text.lines().rev() {
        let line = line.trim();
        if let Some(data) = line.strip_prefix("data:") {
            if let Ok(value) = serde_json::from_str::<Value>(data.trim()) {
                return Ok(value);
            }
        }
    }
    Err(McpError::Transport("no valid JSON data line in SSE response".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_last_sse_data_line() {
        let body = "event: message\ndata: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}\n\n";
        let parsed = parse_sse(body).unwrap();
        assert_eq!(parsed["id"], 1);
    }

    #[test]
    fn rejects_sse_body_with_no_data_line() {
        assert!(parse_sse("event: ping\n\n").is_err());
    }
}
