//! MCP streamable-HTTP transport.
//!
//! Each JSON-RPC message is POSTed to the server URL. The reply body is
//! either plain JSON or an SSE stream carrying the response as `data:` lines.
//! The server may assign a session with the `Mcp-Session-Id` header; it is
//! echoed on every later request and ended with a DELETE on close.

use std::sync::{Mutex as StdMutex, PoisonError};

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client as HttpClient, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use tokio::sync::watch;

use super::errors::McpError;
use super::transport::{extract_result, next_request_id, Transport};
use super::types::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

const SESSION_HEADER: &str = "Mcp-Session-Id";
const ACCEPT: &str = "application/json, text/event-stream";

/// Transport for a remote MCP endpoint.
pub struct HttpTransport {
    server_name: String,
    url: String,
    http: HttpClient,
    session_id: StdMutex<Option<String>>,
    lost_tx: watch::Sender<Option<String>>,
}

impl HttpTransport {
    pub fn new(server_name: &str, url: &str, http: HttpClient) -> Self {
        let (lost_tx, _) = watch::channel(None);
        Self {
            server_name: server_name.to_string(),
            url: url.to_string(),
            http,
            session_id: StdMutex::new(None),
            lost_tx,
        }
    }

    fn session(&self) -> Option<String> {
        self.session_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn lost_reason(&self) -> Option<String> {
        self.lost_tx.borrow().clone()
    }

    fn mark_lost(&self, reason: &str) {
        self.lost_tx.send_if_modified(|lost| {
            if lost.is_none() {
                *lost = Some(reason.to_string());
                true
            } else {
                false
            }
        });
    }

    fn closed_error(&self, reason: String) -> McpError {
        McpError::ConnectionClosed {
            server: self.server_name.clone(),
            reason,
        }
    }

    fn with_session(&self, builder: RequestBuilder) -> RequestBuilder {
        match self.session() {
            Some(id) => builder.header(SESSION_HEADER, id),
            None => builder,
        }
    }

    fn read_error(&self, e: reqwest::Error) -> McpError {
        McpError::TransportError {
            server: self.server_name.clone(),
            reason: format!("failed to read response body: {e}"),
        }
    }

    /// Read events until the reply for `id` arrives. The server may keep the
    /// stream open afterwards; it is dropped once the reply is found.
    async fn read_sse_reply(
        &self,
        response: Response,
        id: u64,
    ) -> Result<Option<JsonRpcResponse>, McpError> {
        let mut byte_stream = response.bytes_stream();
        let mut events = SseEvents::default();

        while let Some(chunk) = byte_stream.next().await {
            let bytes = chunk.map_err(|e| self.read_error(e))?;
            events.push(&bytes);
            while let Some(event) = events.next_event() {
                if let Some(reply) = find_sse_response(&event, id) {
                    return Ok(Some(reply));
                }
            }
        }
        Ok(events.finish().and_then(|rest| find_sse_response(&rest, id)))
    }

    /// POST one message and check the status. Tracks the session header.
    async fn post<T: Serialize>(&self, message: &T) -> Result<Response, McpError> {
        if let Some(reason) = self.lost_reason() {
            return Err(self.closed_error(reason));
        }

        let had_session = self.session().is_some();
        let builder = self
            .http
            .post(&self.url)
            .header("Accept", ACCEPT)
            .json(message);

        let response = self
            .with_session(builder)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    let reason = format!("cannot reach {}: {e}", self.url);
                    self.mark_lost(&reason);
                    self.closed_error(reason)
                } else {
                    McpError::TransportError {
                        server: self.server_name.clone(),
                        reason: format!("request to {}: {e}", self.url),
                    }
                }
            })?;

        if response.status() == StatusCode::NOT_FOUND && had_session {
            let reason = "session expired".to_string();
            self.mark_lost(&reason);
            return Err(self.closed_error(reason));
        }

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            return Err(McpError::TransportError {
                server: self.server_name.clone(),
                reason: format!("HTTP {status}: {body}"),
            });
        }

        if let Some(id) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            *self
                .session_id
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(id.to_string());
        }

        Ok(response)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn server_name(&self) -> &str {
        &self.server_name
    }

    async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, McpError> {
        let id = next_request_id();
        let response = self.post(&JsonRpcRequest::new(id, method, params)).await?;

        let is_sse = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));

        let reply = if is_sse {
            self.read_sse_reply(response, id).await?
        } else {
            let body = response.text().await.map_err(|e| self.read_error(e))?;
            serde_json::from_str::<JsonRpcResponse>(&body).ok()
        };

        match reply {
            Some(reply) => extract_result(reply),
            None => Err(McpError::TransportError {
                server: self.server_name.clone(),
                reason: format!("no JSON-RPC response for request {id} in reply body"),
            }),
        }
    }

    async fn notify(&self, method: &str, params: Option<serde_json::Value>) -> Result<(), McpError> {
        self.post(&JsonRpcNotification::new(method, params)).await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), McpError> {
        if let Some(id) = self.session() {
            let result = self
                .http
                .delete(&self.url)
                .header(SESSION_HEADER, id)
                .send()
                .await;
            // 405 means the server does not support explicit session end.
            match result {
                Ok(r) if r.status().is_success() || r.status() == StatusCode::METHOD_NOT_ALLOWED => {}
                Ok(r) => {
                    tracing::debug!(server = %self.server_name, status = %r.status(), "session delete rejected");
                }
                Err(e) => {
                    tracing::debug!(server = %self.server_name, error = %e, "session delete failed");
                }
            }
        }
        self.mark_lost("closed");
        Ok(())
    }

    async fn terminate(&self) {
        self.mark_lost("terminated");
    }

    async fn closed(&self) -> String {
        let mut rx = self.lost_tx.subscribe();
        let reason = match rx.wait_for(Option::is_some).await {
            Ok(reason) => reason.clone().unwrap_or_default(),
            Err(_) => "transport dropped".to_string(),
        };
        reason
    }
}

// ─── SSE ─────────────────────────────────────────────────────────────────────

/// Splits a byte stream into SSE events at blank lines. Bytes are kept until
/// an event is complete so multi-byte characters may straddle chunks.
#[derive(Debug, Default)]
struct SseEvents {
    buffer: Vec<u8>,
}

impl SseEvents {
    fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend(bytes.iter().copied().filter(|b| *b != b'\r'));
    }

    /// Next complete event, if the buffer holds one.
    fn next_event(&mut self) -> Option<String> {
        let end = self.buffer.windows(2).position(|w| w == b"\n\n")?;
        let event: Vec<u8> = self.buffer.drain(..end + 2).collect();
        Some(String::from_utf8_lossy(&event[..end]).into_owned())
    }

    /// Trailing event left when the stream ends without a blank line.
    fn finish(&mut self) -> Option<String> {
        let rest = String::from_utf8_lossy(&std::mem::take(&mut self.buffer)).into_owned();
        (!rest.trim().is_empty()).then_some(rest)
    }
}

/// Split an SSE body into the payloads of its events (`data:` lines joined).
fn sse_payloads(body: &str) -> Vec<String> {
    let mut payloads = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in body.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            if !current.is_empty() {
                payloads.push(current.join("\n"));
                current.clear();
            }
        } else if let Some(data) = line.strip_prefix("data:") {
            current.push(data.strip_prefix(' ').unwrap_or(data));
        }
    }
    if !current.is_empty() {
        payloads.push(current.join("\n"));
    }
    payloads
}

/// First response in an SSE body whose id matches `id`.
fn find_sse_response(body: &str, id: u64) -> Option<JsonRpcResponse> {
    sse_payloads(body)
        .iter()
        .filter_map(|payload| serde_json::from_str::<JsonRpcResponse>(payload).ok())
        .find(|reply| reply.id == Some(id))
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    /// Read one HTTP request and return its JSON body.
    async fn read_request(socket: &mut TcpStream) -> serde_json::Value {
        let mut request = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = socket.read(&mut buf).await.unwrap();
            assert!(n > 0, "client hung up mid-request");
            request.extend_from_slice(&buf[..n]);

            let text = String::from_utf8_lossy(&request).into_owned();
            let Some(head_end) = text.find("\r\n\r\n") else {
                continue;
            };
            let length = text[..head_end]
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())?
                })
                .unwrap_or(0);
            let body = &request[head_end + 4..];
            if body.len() >= length {
                return serde_json::from_slice(&body[..length]).unwrap();
            }
        }
    }

    #[test]
    fn test_sse_events_split_across_chunks() {
        let mut events = SseEvents::default();
        events.push(b"data: {\"a\":");
        assert!(events.next_event().is_none());
        events.push(b"\"\xc3");
        events.push(b"\xa9\"}\r\n\r\ndata: tail");
        assert_eq!(events.next_event().as_deref(), Some("data: {\"a\":\"\u{e9}\"}"));
        assert!(events.next_event().is_none());
        assert_eq!(events.finish().as_deref(), Some("data: tail"));
        assert!(events.finish().is_none());
    }

    #[tokio::test]
    async fn test_sse_reply_returns_while_stream_stays_open() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/mcp", listener.local_addr().unwrap());
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let message = read_request(&mut socket).await;
            let reply = serde_json::json!({
                "jsonrpc": "2.0",
                "id": message["id"],
                "result": { "ok": true },
            });
            let event = format!("data: {reply}\n\n");
            let head = "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\ntransfer-encoding: chunked\r\n\r\n";
            socket.write_all(head.as_bytes()).await.unwrap();
            socket
                .write_all(format!("{:x}\r\n{event}\r\n", event.len()).as_bytes())
                .await
                .unwrap();
            socket.flush().await.unwrap();
            // Never finish the chunked body.
            std::future::pending::<()>().await;
        });

        let http = HttpClient::builder().no_proxy().build().unwrap();
        let transport = HttpTransport::new("remote", &url, http);
        let result = tokio::time::timeout(Duration::from_secs(3), transport.request("ping", None))
            .await
            .expect("reply should not wait for the stream to end")
            .unwrap();
        assert_eq!(result["ok"], true);
        server.abort();
    }

    #[test]
    fn test_sse_payloads_join_multiline_data() {
        let body = "event: message\ndata: {\"a\":\ndata: 1}\n\n: comment\ndata: second\n";
        assert_eq!(sse_payloads(body), vec!["{\"a\":\n1}", "second"]);
    }

    #[test]
    fn test_sse_response_is_matched_by_id() {
        let body = concat!(
            "data: {\"jsonrpc\":\"2.0\",\"method\":\"notifications/progress\"}\n\n",
            "data: {\"jsonrpc\":\"2.0\",\"id\":4,\"result\":{\"other\":true}}\n\n",
            "data: {\"jsonrpc\":\"2.0\",\"id\":5,\"result\":{\"ok\":true}}\r\n\r\n",
        );
        let reply = find_sse_response(body, 5).unwrap();
        assert_eq!(reply.result.unwrap()["ok"], true);
        assert!(find_sse_response(body, 6).is_none());
    }

    #[tokio::test]
    async fn test_unreachable_server_marks_transport_lost() {
        // Port 9 (discard) on localhost is closed on test machines.
        let transport = HttpTransport::new("remote", "http://127.0.0.1:9/mcp", HttpClient::new());
        let err = transport.request("initialize", None).await.unwrap_err();
        assert!(err.is_connection_lost(), "got {err:?}");
        assert!(!transport.closed().await.is_empty());
    }

    #[tokio::test]
    async fn test_terminate_resolves_closed() {
        let transport = HttpTransport::new("remote", "http://127.0.0.1:9/mcp", HttpClient::new());
        transport.terminate().await;
        assert_eq!(transport.closed().await, "terminated");
        assert!(transport.notify("x", None).await.unwrap_err().is_connection_lost());
    }
}
