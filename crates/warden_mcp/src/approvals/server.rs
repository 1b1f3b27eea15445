//! Approval Server - Loopback HTTP + SSE UI
//!
//! Serves the human side of the approval plane: a single-page UI, REST
//! endpoints for pending requests and decisions, and a server-sent-events
//! stream pushing `requestCreated` / `requestDecided` as the Core emits
//! them. Synchronous (`tiny_http`, one thread per request) to match the
//! rest of the process — no async runtime.
//!
//! # Security
//!
//! Binds to loopback only, on an OS-assigned port. Every non-health
//! request must present the per-start 256-bit bearer token: via
//! `Authorization: Bearer`, `?token=`, or the session cookie the UI page
//! sets on first load (so the token does not ride along in every URL).

use super::ui;
use crate::core::{CoreHandle, Event, EventBus};
use crate::queue::store::JobStore;
use crate::approvals::{ApprovalRequestId, Decision};
use serde::Deserialize;
use serde_json::{json, Value};
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tiny_http::{Header, Method, Request, Response, Server};
use tracing::{debug, info, warn};
use warden_protocol::defaults;

/// Approval server failures.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to start approval server: {message}")]
    Start { message: String },

    #[error("approval server reported no reachable address")]
    NoUrl,
}

impl ServerError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Start { .. } => "SERVER_START_ERROR",
            Self::NoUrl => "SERVER_NO_URL",
        }
    }
}

/// Fan-out of rendered SSE frames to connected clients.
///
/// Stale clients are removed lazily: the first failed send drops them.
#[derive(Clone, Default)]
struct SseBroadcaster {
    clients: Arc<Mutex<Vec<Sender<Vec<u8>>>>>,
}

impl SseBroadcaster {
    fn attach(&self) -> Receiver<Vec<u8>> {
        let (tx, rx) = mpsc::channel();
        self.clients.lock().expect("sse client lock poisoned").push(tx);
        rx
    }

    fn broadcast(&self, event: &str, data: &Value) {
        let frame = sse_frame(event, data);
        let mut clients = self.clients.lock().expect("sse client lock poisoned");
        clients.retain(|tx| tx.send(frame.clone()).is_ok());
    }

    fn client_count(&self) -> usize {
        self.clients.lock().expect("sse client lock poisoned").len()
    }

    fn disconnect_all(&self) {
        self.clients.lock().expect("sse client lock poisoned").clear();
    }
}

/// Valid SSE: event line, data line, blank line.
fn sse_frame(event: &str, data: &Value) -> Vec<u8> {
    format!("event: {}\ndata: {}\n\n", event, data).into_bytes()
}

/// The running approval server.
pub struct ApprovalServer {
    port: u16,
    token: String,
    shutdown: Arc<AtomicBool>,
    broadcaster: SseBroadcaster,
    accept_thread: Option<JoinHandle<()>>,
    pump_thread: Option<JoinHandle<()>>,
}

impl ApprovalServer {
    /// Start the server on an ephemeral loopback port.
    pub fn start(
        core: CoreHandle,
        events: &EventBus,
        launch_browser: bool,
    ) -> Result<Self, ServerError> {
        let server = Server::http("127.0.0.1:0").map_err(|e| ServerError::Start {
            message: e.to_string(),
        })?;
        let port = server
            .server_addr()
            .to_ip()
            .map(|addr| addr.port())
            .ok_or(ServerError::NoUrl)?;

        let token = JobStore::mint_token();
        let shutdown = Arc::new(AtomicBool::new(false));
        let broadcaster = SseBroadcaster::default();

        // Event pump: Core events become SSE frames.
        let pump_thread = {
            let broadcaster = broadcaster.clone();
            let shutdown = Arc::clone(&shutdown);
            let rx = events.subscribe();
            thread::Builder::new()
                .name("warden-approval-sse".to_string())
                .spawn(move || pump_events(rx, broadcaster, shutdown))
                .map_err(|e| ServerError::Start {
                    message: e.to_string(),
                })?
        };

        let accept_thread = {
            let shutdown = Arc::clone(&shutdown);
            let broadcaster = broadcaster.clone();
            let token = token.clone();
            let core = core.clone();
            thread::Builder::new()
                .name("warden-approval-http".to_string())
                .spawn(move || accept_loop(server, core, token, broadcaster, shutdown))
                .map_err(|e| ServerError::Start {
                    message: e.to_string(),
                })?
        };

        let approval_server = Self {
            port,
            token,
            shutdown,
            broadcaster,
            accept_thread: Some(accept_thread),
            pump_thread: Some(pump_thread),
        };

        info!(port, "approval server started");
        if launch_browser {
            launch_url_handler(&approval_server.url());
        }
        Ok(approval_server)
    }

    /// UI entry point, including the first-hit token.
    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}/?token={}", self.port, self.token)
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn token(&self) -> &str {
        self.token.as_str()
    }

    pub fn sse_clients(&self) -> usize {
        self.broadcaster.client_count()
    }

    /// Stop the server: closes the SSE connections and joins the threads.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.broadcaster.disconnect_all();
        if let Some(handle) = self.accept_thread.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.pump_thread.take() {
            let _ = handle.join();
        }
        info!("approval server stopped");
    }
}

impl Drop for ApprovalServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn pump_events(rx: Receiver<Event>, broadcaster: SseBroadcaster, shutdown: Arc<AtomicBool>) {
    let ping_interval = Duration::from_millis(defaults::SSE_PING_MS);
    let mut last_ping = Instant::now();

    while !shutdown.load(Ordering::SeqCst) {
        match rx.recv_timeout(Duration::from_millis(200)) {
            Ok(Event::RequestCreated { view }) => {
                broadcaster.broadcast("requestCreated", &json!({ "request": view }));
            }
            Ok(Event::RequestDecided { view }) => {
                broadcaster.broadcast("requestDecided", &json!({ "request": view }));
            }
            Ok(_) => {}
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        if last_ping.elapsed() >= ping_interval {
            last_ping = Instant::now();
            broadcaster.broadcast("ping", &json!({ "ts": chrono::Utc::now().timestamp_millis() }));
        }
    }
}

fn accept_loop(
    server: Server,
    core: CoreHandle,
    token: String,
    broadcaster: SseBroadcaster,
    shutdown: Arc<AtomicBool>,
) {
    while !shutdown.load(Ordering::SeqCst) {
        match server.recv_timeout(Duration::from_millis(200)) {
            Ok(Some(request)) => {
                let core = core.clone();
                let token = token.clone();
                let broadcaster = broadcaster.clone();
                let shutdown = Arc::clone(&shutdown);
                let spawned = thread::Builder::new()
                    .name("warden-approval-req".to_string())
                    .spawn(move || handle_request(request, core, token, broadcaster, shutdown));
                if let Err(e) = spawned {
                    warn!(error = %e, "failed to spawn request handler");
                }
            }
            Ok(None) => {}
            Err(e) => {
                if !shutdown.load(Ordering::SeqCst) {
                    warn!(error = %e, "approval server accept failed");
                }
                break;
            }
        }
    }
}

fn handle_request(
    request: Request,
    core: CoreHandle,
    token: String,
    broadcaster: SseBroadcaster,
    shutdown: Arc<AtomicBool>,
) {
    let url = request.url().to_string();
    let (path, query) = split_url(&url);
    let method = request.method().clone();
    debug!(%method, path, "approval server request");

    // Health is the only unauthenticated endpoint.
    if method == Method::Get && path == "/health" {
        let body = json!({ "status": "ok", "timestamp": chrono::Utc::now().timestamp_millis() });
        respond(request, json_response(200, &body));
        return;
    }

    if !authorized(&request, query, &token) {
        let body = json!({
            "error": "Unauthorized",
            "message": "Valid authentication token required"
        });
        respond(request, json_response(401, &body));
        return;
    }

    match (method, path) {
        (Method::Get, "/") => {
            // Exchange the query token for a session cookie so API calls
            // (and history entries) do not carry it in the URL.
            let mut response = html_response(200, ui::APPROVAL_PAGE);
            let cookie = format!(
                "warden_token={}; Path=/; SameSite=Strict; Max-Age=86400",
                token
            );
            if let Ok(header) = Header::from_bytes(&b"Set-Cookie"[..], cookie.as_bytes()) {
                response.add_header(header);
            }
            respond(request, response);
        }

        (Method::Get, "/api/requests/pending") => match core.pending_approvals() {
            Ok(views) => {
                let count = views.len();
                let body = json!({ "requests": views, "count": count });
                respond(request, json_response(200, &body));
            }
            Err(e) => respond_internal_error(request, &e.to_string()),
        },

        (Method::Get, "/api/stats") => match core.stats() {
            Ok(Ok(stats)) => {
                let body = json!({
                    "queue": stats.queue,
                    "bridge": {
                        "pending": stats.bridge_pending,
                        "recently_decided": stats.bridge_decided,
                    },
                    "sse_clients": broadcaster.client_count(),
                });
                respond(request, json_response(200, &body));
            }
            Ok(Err(e)) => respond_internal_error(request, &e.to_string()),
            Err(e) => respond_internal_error(request, &e.to_string()),
        },

        (Method::Get, "/api/events") => {
            serve_sse(request, core, broadcaster, shutdown);
        }

        (Method::Get, path) => {
            if let Some(id) = path.strip_prefix("/api/requests/") {
                if !id.contains('/') {
                    match core.get_approval(ApprovalRequestId::from_string(id)) {
                        Ok(Some(view)) => {
                            respond(request, json_response(200, &json!({ "request": view })))
                        }
                        Ok(None) => respond_not_found(request),
                        Err(e) => respond_internal_error(request, &e.to_string()),
                    }
                    return;
                }
            }
            respond_not_found(request);
        }

        (Method::Post, path) => {
            let decision = if let Some(id) = path
                .strip_prefix("/api/requests/")
                .and_then(|rest| rest.strip_suffix("/approve"))
            {
                Some((id.to_string(), true))
            } else {
                path.strip_prefix("/api/requests/")
                    .and_then(|rest| rest.strip_suffix("/reject"))
                    .map(|id| (id.to_string(), false))
            };

            match decision {
                Some((id, approve)) => handle_decision(request, &core, &id, approve),
                None => respond_not_found(request),
            }
        }

        _ => respond_not_found(request),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DecisionBody {
    decided_by: String,
    #[serde(default)]
    reason: Option<String>,
}

fn handle_decision(mut request: Request, core: &CoreHandle, id: &str, approve: bool) {
    let mut body = String::new();
    if request
        .as_reader()
        .take(64 * 1024)
        .read_to_string(&mut body)
        .is_err()
    {
        respond(
            request,
            json_response(400, &json!({ "error": "unreadable request body" })),
        );
        return;
    }

    let parsed: DecisionBody = match serde_json::from_str(&body) {
        Ok(parsed) => parsed,
        Err(e) => {
            respond(
                request,
                json_response(400, &json!({ "error": format!("invalid body: {}", e) })),
            );
            return;
        }
    };

    let decision = Decision {
        approve,
        decided_by: parsed.decided_by,
        reason: parsed.reason,
    };

    match core.decide(ApprovalRequestId::from_string(id), decision) {
        Ok(Ok(view)) => respond(request, json_response(200, &json!({ "request": view }))),
        Ok(Err(e)) => {
            let status = if e.code() == "APPROVAL_SYSTEM_ERROR" { 404 } else { 409 };
            respond(
                request,
                json_response(status, &json!({ "error": e.code(), "message": e.to_string() })),
            );
        }
        Err(e) => respond_internal_error(request, &e.to_string()),
    }
}

// ============================================================================
// SSE plumbing
// ============================================================================

/// Blocking reader fed by the broadcaster; what tiny_http streams out.
struct SseStream {
    rx: Receiver<Vec<u8>>,
    pending: Vec<u8>,
    offset: usize,
    shutdown: Arc<AtomicBool>,
}

impl Read for SseStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        loop {
            if self.offset < self.pending.len() {
                let n = (self.pending.len() - self.offset).min(buf.len());
                buf[..n].copy_from_slice(&self.pending[self.offset..self.offset + n]);
                self.offset += n;
                return Ok(n);
            }
            if self.shutdown.load(Ordering::SeqCst) {
                return Ok(0);
            }
            match self.rx.recv_timeout(Duration::from_millis(500)) {
                Ok(frame) => {
                    self.pending = frame;
                    self.offset = 0;
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return Ok(0),
            }
        }
    }
}

fn serve_sse(
    request: Request,
    core: CoreHandle,
    broadcaster: SseBroadcaster,
    shutdown: Arc<AtomicBool>,
) {
    // connected + snapshot first, then live frames from the broadcaster.
    let mut preamble = sse_frame("connected", &json!({ "ok": true }));
    let snapshot = core.pending_approvals().unwrap_or_default();
    let count = snapshot.len();
    preamble.extend(sse_frame(
        "initialData",
        &json!({ "requests": snapshot, "count": count }),
    ));

    let rx = broadcaster.attach();
    let stream = SseStream {
        rx,
        pending: preamble,
        offset: 0,
        shutdown,
    };

    let mut response = Response::new(
        tiny_http::StatusCode(200),
        security_headers(),
        stream,
        None,
        None,
    );
    response.add_header(header("Content-Type", "text/event-stream"));
    response.add_header(header("Cache-Control", "no-cache"));

    // Blocks for the lifetime of the client; write failure ends it and the
    // broadcaster drops the sender on its next send.
    let _ = request.respond(response);
}

// ============================================================================
// Response helpers
// ============================================================================

fn header(name: &str, value: &str) -> Header {
    Header::from_bytes(name.as_bytes(), value.as_bytes()).expect("static header is valid")
}

/// Headers set on every response.
fn security_headers() -> Vec<Header> {
    vec![
        header("X-Content-Type-Options", "nosniff"),
        header("X-Frame-Options", "DENY"),
        header("X-XSS-Protection", "1; mode=block"),
        header("Referrer-Policy", "strict-origin-when-cross-origin"),
        header(
            "Content-Security-Policy",
            "default-src 'self' 'unsafe-inline'; connect-src 'self'",
        ),
    ]
}

fn json_response(status: u16, body: &Value) -> Response<std::io::Cursor<Vec<u8>>> {
    let data = body.to_string().into_bytes();
    let mut response = Response::from_data(data).with_status_code(status);
    for h in security_headers() {
        response.add_header(h);
    }
    response.add_header(header("Content-Type", "application/json"));
    response
}

fn html_response(status: u16, body: &str) -> Response<std::io::Cursor<Vec<u8>>> {
    let mut response = Response::from_string(body).with_status_code(status);
    for h in security_headers() {
        response.add_header(h);
    }
    response.add_header(header("Content-Type", "text/html; charset=utf-8"));
    response
}

fn respond<R: Read>(request: Request, response: Response<R>) {
    if let Err(e) = request.respond(response) {
        debug!(error = %e, "client went away mid-response");
    }
}

fn respond_not_found(request: Request) {
    respond(
        request,
        json_response(404, &json!({ "error": "not found" })),
    );
}

fn respond_internal_error(request: Request, message: &str) {
    respond(
        request,
        json_response(500, &json!({ "error": "internal error", "message": message })),
    );
}

fn authorized(request: &Request, query: Option<&str>, token: &str) -> bool {
    // ?token=...
    if let Some(query) = query {
        for pair in query.split('&') {
            if let Some(value) = pair.strip_prefix("token=") {
                if constant_time_eq(value, token) {
                    return true;
                }
            }
        }
    }

    for h in request.headers() {
        let field = h.field.as_str().as_str();
        if field.eq_ignore_ascii_case("Authorization") {
            if let Some(value) = h.value.as_str().strip_prefix("Bearer ") {
                if constant_time_eq(value.trim(), token) {
                    return true;
                }
            }
        }
        if field.eq_ignore_ascii_case("Cookie") {
            for cookie in h.value.as_str().split(';') {
                if let Some(value) = cookie.trim().strip_prefix("warden_token=") {
                    if constant_time_eq(value, token) {
                        return true;
                    }
                }
            }
        }
    }

    false
}

/// Length-safe comparison that does not bail on the first mismatch.
fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes().zip(b.bytes()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn split_url(url: &str) -> (&str, Option<&str>) {
    match url.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (url, None),
    }
}

/// Fire-and-forget launch of the platform URL handler.
fn launch_url_handler(url: &str) {
    #[cfg(target_os = "macos")]
    let program = "open";
    #[cfg(target_os = "windows")]
    let program = "cmd";
    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    let program = "xdg-open";

    let mut command = std::process::Command::new(program);
    #[cfg(target_os = "windows")]
    command.args(["/C", "start", url]);
    #[cfg(not(target_os = "windows"))]
    command.arg(url);

    match command
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
    {
        Ok(child) => {
            // Detached on purpose; the handler outlives us or fails alone.
            drop(child);
        }
        Err(e) => warn!(error = %e, "could not launch browser"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sse_frames_are_valid() {
        let frame = sse_frame("requestCreated", &json!({ "a": 1 }));
        let text = String::from_utf8(frame).unwrap();
        assert!(text.starts_with("event: requestCreated\ndata: "));
        assert!(text.ends_with("\n\n"));
    }

    #[test]
    fn constant_time_eq_basics() {
        assert!(constant_time_eq("abc", "abc"));
        assert!(!constant_time_eq("abc", "abd"));
        assert!(!constant_time_eq("abc", "abcd"));
    }

    #[test]
    fn url_splitting() {
        assert_eq!(split_url("/api/stats"), ("/api/stats", None));
        assert_eq!(
            split_url("/?token=abc"),
            ("/", Some("token=abc"))
        );
    }
}
