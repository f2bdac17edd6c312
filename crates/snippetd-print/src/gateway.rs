// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Minimal HTTP/1.1 submission gateway.
//
// One request per connection, answered with `Connection: close`.  Only the
// framing the daemon needs is parsed: request line, `Content-Length`, body.
//
// # Routes
//
//   POST /print[?raw=1][&img=1]   submit a snippet
//   POST /reprint/<digest>        queue an archived snippet again
//   GET  /metrics                 JSON counter snapshot
//
// A query flag counts as set when it is present with a non-empty value.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use snippetd_core::error::{Result, SnippetdError};
use snippetd_core::types::{
    ServerStatus, SizeClass, SnippetId, SnippetRequest, check_body_len,
};

use crate::pipeline::PrintPipeline;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Request line plus headers may not exceed this.
const MAX_HEAD_BYTES: usize = 8 * 1024;

/// Upper bound on reading a request from a slow client.
const READ_TIMEOUT: Duration = Duration::from_secs(30);

const ROUTE_PRINT: &str = "/print";
const ROUTE_REPRINT_PREFIX: &str = "/reprint/";
const ROUTE_METRICS: &str = "/metrics";

// ---------------------------------------------------------------------------
// Request parsing
// ---------------------------------------------------------------------------

/// The parts of an HTTP request head the router looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RequestHead {
    method: String,
    path: String,
    query: String,
    content_length: Option<usize>,
}

impl RequestHead {
    fn flag(&self, name: &str) -> bool {
        query_flag(&self.query, name)
    }
}

/// Parse everything before the blank line that ends the headers.
fn parse_head(head: &[u8]) -> Result<RequestHead> {
    let text = std::str::from_utf8(head)
        .map_err(|_| SnippetdError::InvalidRequest("request head is not UTF-8".into()))?;
    let mut lines = text.split("\r\n");

    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    let (method, target) = match (parts.next(), parts.next(), parts.next()) {
        (Some(method), Some(target), Some(version)) if version.starts_with("HTTP/1.") => {
            (method, target)
        }
        _ => {
            return Err(SnippetdError::InvalidRequest(format!(
                "malformed request line {request_line:?}"
            )));
        }
    };
    let (path, query) = target.split_once('?').unwrap_or((target, ""));

    let mut content_length = None;
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        if name.trim().eq_ignore_ascii_case("content-length") {
            let value = value.trim();
            content_length = Some(value.parse::<usize>().map_err(|_| {
                SnippetdError::InvalidRequest(format!("bad Content-Length {value:?}"))
            })?);
        }
    }

    Ok(RequestHead {
        method: method.to_owned(),
        path: path.to_owned(),
        query: query.to_owned(),
        content_length,
    })
}

/// `true` when `name` appears in `query` with a non-empty value.
fn query_flag(query: &str, name: &str) -> bool {
    query
        .split('&')
        .filter_map(|pair| match pair.split_once('=') {
            Some((k, v)) => Some((k, v)),
            None if !pair.is_empty() => Some((pair, "")),
            None => None,
        })
        .any(|(k, v)| k == name && !v.is_empty())
}

/// Find the first occurrence of `needle` in `haystack`.
fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Response {
    status: u16,
    content_type: &'static str,
    body: Vec<u8>,
}

impl Response {
    fn text(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: "text/plain; charset=utf-8",
            body: body.into().into_bytes(),
        }
    }

    fn json(body: Vec<u8>) -> Self {
        Self {
            status: 200,
            content_type: "application/json",
            body,
        }
    }

    fn queued(id: impl std::fmt::Display) -> Self {
        Self::text(200, format!("Queued as snippet {id}\n"))
    }

    fn from_error(err: &SnippetdError) -> Self {
        Self::text(status_for(err), format!("{err}\n"))
    }
}

/// HTTP status code for an error surfaced to a submitter.
fn status_for(err: &SnippetdError) -> u16 {
    match err {
        e if e.is_validation() => 400,
        SnippetdError::NotFound(_) => 404,
        SnippetdError::QueueFull
        | SnippetdError::QueueClosed
        | SnippetdError::EnqueueTimeout(_)
        | SnippetdError::Unavailable => 503,
        _ => 500,
    }
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        503 => "Service Unavailable",
        _ => "Internal Server Error",
    }
}

async fn send_response(stream: &mut TcpStream, response: &Response) -> Result<()> {
    let head = format!(
        "HTTP/1.1 {} {}\r\n\
         Content-Type: {}\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n",
        response.status,
        reason_phrase(response.status),
        response.content_type,
        response.body.len()
    );

    stream
        .write_all(head.as_bytes())
        .await
        .map_err(|e| SnippetdError::Gateway(format!("write response head: {e}")))?;
    stream
        .write_all(&response.body)
        .await
        .map_err(|e| SnippetdError::Gateway(format!("write response body: {e}")))?;
    stream
        .flush()
        .await
        .map_err(|e| SnippetdError::Gateway(format!("flush: {e}")))?;

    Ok(())
}

// ---------------------------------------------------------------------------
// HttpGateway
// ---------------------------------------------------------------------------

/// HTTP front end for a [`PrintPipeline`].
///
/// Created `Stopped`; [`start`](Self::start) binds the listener and spawns the
/// accept loop, [`stop`](Self::stop) ends it.  Connections already being
/// served finish on their own tasks.
pub struct HttpGateway {
    /// `host:port` to bind.
    addr: String,
    status: ServerStatus,
    shutdown_signal: Arc<Notify>,
    task_handle: Option<JoinHandle<()>>,
    active_connections: Arc<AtomicU32>,
    local_addr: Option<SocketAddr>,
}

impl HttpGateway {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            status: ServerStatus::Stopped,
            shutdown_signal: Arc::new(Notify::new()),
            task_handle: None,
            active_connections: Arc::new(AtomicU32::new(0)),
            local_addr: None,
        }
    }

    pub fn status(&self) -> ServerStatus {
        self.status
    }

    /// Bound address once running (resolves port 0).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn active_connections(&self) -> u32 {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Bind and start accepting submissions for `pipeline`.
    pub async fn start(&mut self, pipeline: PrintPipeline) -> Result<SocketAddr> {
        if let (ServerStatus::Running, Some(addr)) = (self.status, self.local_addr) {
            debug!(%addr, "gateway already running");
            return Ok(addr);
        }

        self.status = ServerStatus::Starting;

        let listener = match TcpListener::bind(&self.addr).await {
            Ok(l) => l,
            Err(e) => {
                self.status = ServerStatus::Error;
                return Err(SnippetdError::Gateway(format!("bind {}: {e}", self.addr)));
            }
        };
        let local_addr = listener
            .local_addr()
            .map_err(|e| SnippetdError::Gateway(format!("local address: {e}")))?;

        info!(addr = %local_addr, "HTTP gateway listening");

        let shutdown = Arc::clone(&self.shutdown_signal);
        let connections = Arc::clone(&self.active_connections);
        let handle = tokio::spawn(async move {
            Self::accept_loop(listener, shutdown, connections, pipeline).await;
        });

        self.task_handle = Some(handle);
        self.local_addr = Some(local_addr);
        self.status = ServerStatus::Running;
        Ok(local_addr)
    }

    /// Stop accepting connections and wait for the accept loop to exit.
    pub async fn stop(&mut self) -> Result<()> {
        if self.status != ServerStatus::Running {
            return Ok(());
        }

        info!(addr = ?self.local_addr, "stopping HTTP gateway");
        self.shutdown_signal.notify_one();

        if let Some(handle) = self.task_handle.take() {
            handle
                .await
                .map_err(|e| SnippetdError::Gateway(format!("task join: {e}")))?;
        }

        self.status = ServerStatus::Stopped;
        info!("HTTP gateway stopped");
        Ok(())
    }

    async fn accept_loop(
        listener: TcpListener,
        shutdown: Arc<Notify>,
        connections: Arc<AtomicU32>,
        pipeline: PrintPipeline,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.notified() => {
                    debug!("accept loop received shutdown signal");
                    break;
                }

                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, peer_addr)) => {
                            debug!(peer = %peer_addr, "incoming connection");
                            let pipeline = pipeline.clone();
                            let connections = Arc::clone(&connections);
                            tokio::spawn(async move {
                                connections.fetch_add(1, Ordering::Relaxed);
                                if let Err(e) = Self::handle_connection(stream, peer_addr, pipeline).await {
                                    warn!(peer = %peer_addr, error = %e, "connection handler error");
                                }
                                connections.fetch_sub(1, Ordering::Relaxed);
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "failed to accept connection");
                        }
                    }
                }
            }
        }
    }

    async fn handle_connection(
        mut stream: TcpStream,
        peer_addr: SocketAddr,
        pipeline: PrintPipeline,
    ) -> Result<()> {
        let mut buf = Vec::with_capacity(1024);

        let head_end = match tokio::time::timeout(READ_TIMEOUT, read_head(&mut stream, &mut buf)).await {
            Ok(Ok(Some(end))) => end,
            Ok(Ok(None)) => {
                debug!(peer = %peer_addr, "connection closed before request");
                return Ok(());
            }
            Ok(Err(e)) => {
                pipeline.metrics().inc_requests();
                pipeline.metrics().inc_rejected();
                send_response(&mut stream, &Response::from_error(&e)).await?;
                return Ok(());
            }
            Err(_) => {
                debug!(peer = %peer_addr, "timed out waiting for request head");
                return Ok(());
            }
        };

        pipeline.metrics().inc_requests();
        let source = peer_addr.ip().to_string();

        let response = match parse_head(&buf[..head_end]) {
            Ok(head) => {
                let buffered = buf.split_off(head_end + 4);
                route(&head, buffered, &mut stream, &source, &pipeline).await
            }
            Err(e) => Response::from_error(&e),
        };

        if response.status == 200 {
            debug!(peer = %peer_addr, "request served");
        } else {
            pipeline.metrics().inc_rejected();
            info!(
                peer = %peer_addr,
                status = response.status,
                reason = %String::from_utf8_lossy(&response.body).trim_end(),
                "request rejected"
            );
        }

        send_response(&mut stream, &response).await?;
        let _ = stream.shutdown().await;
        Ok(())
    }
}

/// Read until the end of the header block.  `Ok(None)` when the peer closes
/// before sending anything useful.
async fn read_head(stream: &mut TcpStream, buf: &mut Vec<u8>) -> Result<Option<usize>> {
    let mut chunk = [0u8; 1024];
    loop {
        if let Some(end) = find_subsequence(buf, b"\r\n\r\n") {
            return Ok(Some(end));
        }
        if buf.len() > MAX_HEAD_BYTES {
            return Err(SnippetdError::InvalidRequest("request head too large".into()));
        }
        let n = stream
            .read(&mut chunk)
            .await
            .map_err(|e| SnippetdError::Gateway(format!("read request: {e}")))?;
        if n == 0 {
            return Ok(None);
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

/// Read exactly `len` body bytes, starting with what was buffered alongside
/// the head.
async fn read_body(stream: &mut TcpStream, mut body: Vec<u8>, len: usize) -> Result<Vec<u8>> {
    body.truncate(len);
    let have = body.len();
    if have < len {
        body.resize(len, 0);
        tokio::time::timeout(READ_TIMEOUT, stream.read_exact(&mut body[have..]))
            .await
            .map_err(|_| SnippetdError::Gateway("timed out reading request body".into()))?
            .map_err(|e| SnippetdError::Gateway(format!("read request body: {e}")))?;
    }
    Ok(body)
}

async fn route(
    head: &RequestHead,
    buffered: Vec<u8>,
    stream: &mut TcpStream,
    source: &str,
    pipeline: &PrintPipeline,
) -> Response {
    let method = head.method.as_str();
    let path = head.path.as_str();

    if path == ROUTE_PRINT {
        if method != "POST" {
            return Response::text(405, "use POST\n");
        }
        return match handle_print(head, buffered, stream, source, pipeline).await {
            Ok(id) => Response::queued(id),
            Err(e) => Response::from_error(&e),
        };
    }

    if let Some(digest) = path.strip_prefix(ROUTE_REPRINT_PREFIX) {
        if method != "POST" {
            return Response::text(405, "use POST\n");
        }
        return match pipeline.reprint(digest, source).await {
            Ok(id) => Response::queued(id),
            Err(e) => Response::from_error(&e),
        };
    }

    if path == ROUTE_METRICS {
        if method != "GET" {
            return Response::text(405, "use GET\n");
        }
        return match serde_json::to_vec(&pipeline.metrics().snapshot()) {
            Ok(body) => Response::json(body),
            Err(e) => Response::from_error(&e.into()),
        };
    }

    Response::text(404, format!("no route for {path}\n"))
}

async fn handle_print(
    head: &RequestHead,
    buffered: Vec<u8>,
    stream: &mut TcpStream,
    source: &str,
    pipeline: &PrintPipeline,
) -> Result<SnippetId> {
    let len = head
        .content_length
        .ok_or_else(|| SnippetdError::InvalidRequest("missing Content-Length".into()))?;
    // Global ceiling before reading anything; the class ceiling comes after.
    check_body_len(len, SizeClass::Image)?;

    let body = read_body(stream, buffered, len).await?;

    let class = if head.flag("img") {
        SizeClass::Image
    } else {
        SizeClass::Text
    };
    let request = SnippetRequest::new(source, body, head.flag("raw"), class)?;
    pipeline.submit(request).await
}
