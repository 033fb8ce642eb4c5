//! JSON-RPC over stdio transport.
//!
//! Line-delimited JSON (one message per line) over a child process's
//! stdin/stdout, or over any async byte streams. A background reader task
//! routes replies to their waiting requests by id, so concurrent requests are
//! safe. When the read side ends, every waiting request fails and
//! [`Transport::closed`] resolves.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;

use super::errors::McpError;
use super::transport::{extract_result, next_request_id, Transport};
use super::types::{
    error_codes, IncomingMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
};

/// Characters of stderr kept for diagnostics.
const STDERR_TAIL_CHARS: usize = 2000;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
type PendingMap = Arc<StdMutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;
type SharedWriter = Arc<Mutex<Option<BoxedWriter>>>;

// ─── Transport ───────────────────────────────────────────────────────────────

/// Bi-directional JSON-RPC transport over stdio-like streams.
pub struct StdioTransport {
    server_name: String,
    /// `None` once closed; dropping the writer signals EOF to the server.
    writer: SharedWriter,
    pending: PendingMap,
    lost_tx: Arc<watch::Sender<Option<String>>>,
    lost_rx: watch::Receiver<Option<String>>,
    child: Mutex<Option<Child>>,
    stderr_tail: Arc<StdMutex<String>>,
    tasks: Vec<JoinHandle<()>>,
}

impl StdioTransport {
    /// Build a transport over arbitrary streams (`reader` is the server's
    /// output, `writer` its input). Must be called inside a tokio runtime.
    pub fn from_streams<R, W>(server_name: &str, reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self::build(server_name, reader, Box::new(writer), None, None)
    }

    fn build<R>(
        server_name: &str,
        reader: R,
        writer: BoxedWriter,
        child: Option<Child>,
        stderr: Option<ChildStderr>,
    ) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let writer: SharedWriter = Arc::new(Mutex::new(Some(writer)));
        let pending: PendingMap = Arc::new(StdMutex::new(HashMap::new()));
        let (lost_tx, lost_rx) = watch::channel(None);
        let lost_tx = Arc::new(lost_tx);
        let stderr_tail = Arc::new(StdMutex::new(String::new()));

        let mut tasks = vec![tokio::spawn(read_loop(
            server_name.to_string(),
            BufReader::new(reader),
            writer.clone(),
            pending.clone(),
            lost_tx.clone(),
        ))];
        if let Some(stderr) = stderr {
            tasks.push(tokio::spawn(capture_stderr(
                server_name.to_string(),
                stderr,
                stderr_tail.clone(),
            )));
        }

        Self {
            server_name: server_name.to_string(),
            writer,
            pending,
            lost_tx,
            lost_rx,
            child: Mutex::new(child),
            stderr_tail,
            tasks,
        }
    }

    fn lost_reason(&self) -> Option<String> {
        self.lost_rx.borrow().clone()
    }

    fn closed_error(&self, reason: String) -> McpError {
        McpError::ConnectionClosed {
            server: self.server_name.clone(),
            reason,
        }
    }

    async fn write_message<T: Serialize>(&self, message: &T) -> Result<(), McpError> {
        let mut line = serde_json::to_string(message).map_err(|e| McpError::TransportError {
            server: self.server_name.clone(),
            reason: format!("failed to serialize message: {e}"),
        })?;
        line.push('\n');

        let mut guard = self.writer.lock().await;
        let writer = guard
            .as_mut()
            .ok_or_else(|| self.closed_error("stdin already closed".into()))?;
        write_line(writer, &line)
            .await
            .map_err(|e| McpError::TransportError {
                server: self.server_name.clone(),
                reason: format!("failed to write to stdin: {e}"),
            })
    }

    /// Publish the lost reason (first one wins) and fail all waiters.
    fn mark_lost(&self, reason: &str) {
        set_lost(&self.lost_tx, &self.pending, reason);
    }
}

#[async_trait]
impl Transport for StdioTransport {
    fn server_name(&self) -> &str {
        &self.server_name
    }

    async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, McpError> {
        let id = next_request_id();
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(id, tx);
        let _guard = PendingGuard {
            pending: self.pending.clone(),
            id,
        };

        // Checked after registering so a concurrent drain cannot miss us.
        if let Some(reason) = self.lost_reason() {
            return Err(self.closed_error(reason));
        }

        self.write_message(&JsonRpcRequest::new(id, method, params))
            .await?;

        match rx.await {
            Ok(response) => extract_result(response),
            Err(_) => Err(self.closed_error(
                self.lost_reason()
                    .unwrap_or_else(|| "response channel dropped".into()),
            )),
        }
    }

    async fn notify(&self, method: &str, params: Option<serde_json::Value>) -> Result<(), McpError> {
        if let Some(reason) = self.lost_reason() {
            return Err(self.closed_error(reason));
        }
        self.write_message(&JsonRpcNotification::new(method, params))
            .await
    }

    async fn close(&self) -> Result<(), McpError> {
        // Closing stdin is the stdio shutdown signal.
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }

        let exited = {
            let mut child = self.child.lock().await;
            match child.as_mut() {
                Some(process) => Some(process.wait().await.map_err(|e| {
                    McpError::TransportError {
                        server: self.server_name.clone(),
                        reason: format!("failed to wait for exit: {e}"),
                    }
                })?),
                None => None,
            }
        };

        match exited {
            Some(status) => {
                tracing::debug!(server = %self.server_name, %status, "server process exited");
                self.mark_lost("closed");
            }
            // No process to wait for: done once the server closes its side.
            None => {
                self.closed().await;
            }
        }
        Ok(())
    }

    async fn terminate(&self) {
        self.writer.lock().await.take();
        if let Some(process) = self.child.lock().await.as_mut() {
            if let Err(e) = process.kill().await {
                tracing::warn!(server = %self.server_name, error = %e, "failed to kill server process");
            }
        }
        for task in &self.tasks {
            task.abort();
        }
        self.mark_lost("terminated");
    }

    async fn closed(&self) -> String {
        let mut rx = self.lost_rx.clone();
        let reason = match rx.wait_for(Option::is_some).await {
            Ok(reason) => reason.clone().unwrap_or_default(),
            Err(_) => "transport dropped".to_string(),
        };
        reason
    }

    fn diagnostics(&self) -> Option<String> {
        let tail = self
            .stderr_tail
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        (!tail.is_empty()).then(|| tail.clone())
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl std::fmt::Debug for StdioTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdioTransport")
            .field("server_name", &self.server_name)
            .field("lost", &self.lost_reason())
            .finish()
    }
}

// ─── Spawning ────────────────────────────────────────────────────────────────

/// Spawn a server process and wrap its stdio in a transport.
pub fn spawn_stdio(
    server_name: &str,
    command: &str,
    args: &[String],
    env: &HashMap<String, String>,
    working_dir: Option<&Path>,
) -> Result<StdioTransport, McpError> {
    let mut cmd = Command::new(command);
    cmd.args(args);
    cmd.envs(env);
    if let Some(dir) = working_dir {
        cmd.current_dir(dir);
    }

    // Windows: prevent console window from appearing for child processes
    #[cfg(target_os = "windows")]
    {
        use std::os::windows::process::CommandExt;
        const CREATE_NO_WINDOW: u32 = 0x08000000;
        cmd.creation_flags(CREATE_NO_WINDOW);
    }

    cmd.stdin(std::process::Stdio::piped());
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());
    cmd.kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|e| McpError::SpawnFailed {
        name: server_name.to_string(),
        reason: format!("{command}: {e}"),
    })?;

    let stdin = child.stdin.take().ok_or(McpError::SpawnFailed {
        name: server_name.to_string(),
        reason: "failed to capture stdin".into(),
    })?;
    let stdout = child.stdout.take().ok_or(McpError::SpawnFailed {
        name: server_name.to_string(),
        reason: "failed to capture stdout".into(),
    })?;
    let stderr = child.stderr.take();

    tracing::debug!(server = server_name, command, pid = ?child.id(), "server process spawned");

    Ok(StdioTransport::build(
        server_name,
        stdout,
        Box::new(stdin),
        Some(child),
        stderr,
    ))
}

// ─── Background Tasks ────────────────────────────────────────────────────────

/// Removes an abandoned request from the pending map.
struct PendingGuard {
    pending: PendingMap,
    id: u64,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        lock(&self.pending).remove(&self.id);
    }
}

fn lock<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn set_lost(lost_tx: &watch::Sender<Option<String>>, pending: &PendingMap, reason: &str) {
    lost_tx.send_if_modified(|lost| {
        if lost.is_none() {
            *lost = Some(reason.to_string());
            true
        } else {
            false
        }
    });
    // Dropping the senders wakes every waiting request.
    lock(pending).clear();
}

async fn write_line(writer: &mut BoxedWriter, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}

async fn read_loop<R>(
    server_name: String,
    mut reader: BufReader<R>,
    writer: SharedWriter,
    pending: PendingMap,
    lost_tx: Arc<watch::Sender<Option<String>>>,
) where
    R: AsyncRead + Send + Unpin,
{
    let mut line = String::new();
    let reason = loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break "server stdout closed (process may have exited)".to_string(),
            Ok(_) => {}
            Err(e) => break format!("failed to read from stdout: {e}"),
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let message = match serde_json::from_str::<IncomingMessage>(trimmed) {
            Ok(message) => message,
            Err(_) => {
                // Not JSON-RPC; servers sometimes log to stdout.
                tracing::trace!(server = %server_name, line = %trimmed, "ignoring non-JSON-RPC line");
                continue;
            }
        };

        match (message.method, message.id) {
            (Some(method), Some(id)) => {
                let reply = answer_server_request(&method, id);
                if let Some(writer) = writer.lock().await.as_mut() {
                    let mut text = reply.to_string();
                    text.push('\n');
                    if let Err(e) = write_line(writer, &text).await {
                        tracing::debug!(server = %server_name, error = %e, "failed to answer server request");
                    }
                }
            }
            (Some(method), None) => {
                tracing::debug!(server = %server_name, method = %method, "server notification");
            }
            (None, Some(id)) => {
                let Some(id) = id.as_u64() else {
                    tracing::debug!(server = %server_name, id = %id, "reply with foreign id ignored");
                    continue;
                };
                let response = JsonRpcResponse {
                    jsonrpc: "2.0".to_string(),
                    id: Some(id),
                    result: message.result,
                    error: message.error,
                };
                match lock(&pending).remove(&id) {
                    Some(tx) => {
                        let _ = tx.send(response);
                    }
                    None => {
                        tracing::debug!(server = %server_name, id, "reply for abandoned request");
                    }
                }
            }
            (None, None) => {
                if let Some(error) = message.error {
                    tracing::warn!(server = %server_name, code = error.code, message = %error.message, "server error without id");
                }
            }
        }
    };

    tracing::debug!(server = %server_name, reason = %reason, "stdio reader finished");
    set_lost(&lost_tx, &pending, &reason);
}

/// Reply to a request initiated by the server. Only `ping` is supported.
fn answer_server_request(method: &str, id: serde_json::Value) -> serde_json::Value {
    if method == "ping" {
        serde_json::json!({ "jsonrpc": "2.0", "id": id, "result": {} })
    } else {
        serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {
                "code": error_codes::METHOD_NOT_FOUND,
                "message": format!("method not supported by client: {method}"),
            }
        })
    }
}

async fn capture_stderr(server_name: String, stderr: ChildStderr, tail: Arc<StdMutex<String>>) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!(server = %server_name, stderr = %line, "server stderr");
        let mut buf = lock(&tail);
        buf.push_str(&line);
        buf.push('\n');
        let excess = buf.chars().count().saturating_sub(STDERR_TAIL_CHARS);
        if excess > 0 {
            let cut = buf
                .char_indices()
                .nth(excess)
                .map_or(buf.len(), |(idx, _)| idx);
            buf.drain(..cut);
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_ping_is_answered() {
        let reply = answer_server_request("ping", serde_json::json!(7));
        assert_eq!(reply["id"], 7);
        assert!(reply["result"].is_object());
        assert!(reply.get("error").is_none());
    }

    #[test]
    fn test_unknown_server_request_gets_method_not_found() {
        let reply = answer_server_request("sampling/createMessage", serde_json::json!("abc"));
        assert_eq!(reply["id"], "abc");
        assert_eq!(reply["error"]["code"], error_codes::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_spawn_missing_binary_fails() {
        let err = spawn_stdio(
            "ghost",
            "definitely-not-a-real-mcp-server-binary",
            &[],
            &HashMap::new(),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, McpError::SpawnFailed { ref name, .. } if name == "ghost"));
    }
}
