// Threadrelay — HTTP Endpoint
//
// Raw `tokio::net::TcpListener`, no framework dependency. Routes:
//   GET  /poll?token=&cursor=  — fetch new agent replies for a session
//   POST /session              — open a session, mint the bearer token
//   POST /send                 — post a visitor message into the thread
//   GET  /health               — liveness probe (no auth, no rate limit)
//   OPTIONS *                  — CORS preflight
//
// All JSON responses carry `Cache-Control: no-store` — polling results must
// never be cached by intermediaries — plus permissive CORS for the widget's
// origin. Optional TLS via rustls when cert+key paths are set.
//
// The error taxonomy is mapped to HTTP exactly once, here, through
// `RelayError::status_code` / `public_message`; internal detail goes to the
// log only.

use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::BufReader as StdBufReader;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;

use crate::atoms::error::{RelayError, RelayResult};
use crate::atoms::types::RelayMessage;
use crate::engine::config::RelayConfig;
use crate::engine::relay::Relay;

// ── Stream abstraction ─────────────────────────────────────────────────────
// Plain TCP and TLS connections handled behind one boxed trait object.

trait RelayStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> RelayStream for T {}

/// Build a TLS acceptor from PEM cert+key files, or `None` if not configured.
fn build_tls_acceptor(config: &RelayConfig) -> RelayResult<Option<tokio_rustls::TlsAcceptor>> {
    let (Some(cert_path), Some(key_path)) = (&config.tls_cert_path, &config.tls_key_path) else {
        return Ok(None);
    };

    let cert_file = std::fs::File::open(cert_path)
        .map_err(|e| format!("Open TLS cert {cert_path}: {e}"))?;
    let certs: Vec<_> = rustls_pemfile::certs(&mut StdBufReader::new(cert_file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("Parse TLS cert: {e}"))?;

    let key_file = std::fs::File::open(key_path)
        .map_err(|e| format!("Open TLS key {key_path}: {e}"))?;
    let key = rustls_pemfile::private_key(&mut StdBufReader::new(key_file))
        .map_err(|e| format!("Parse TLS key: {e}"))?
        .ok_or_else(|| "No private key found in PEM file".to_string())?;

    let tls_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| format!("TLS config: {e}"))?;

    Ok(Some(tokio_rustls::TlsAcceptor::from(Arc::new(tls_config))))
}

// ── Rate limiter ───────────────────────────────────────────────────────────

struct RateLimiter {
    /// IP → (count, window_start)
    buckets: parking_lot::Mutex<HashMap<String, (u32, Instant)>>,
    limit: u32,
}

impl RateLimiter {
    fn new(limit: u32) -> Self {
        RateLimiter {
            buckets: parking_lot::Mutex::new(HashMap::new()),
            limit,
        }
    }

    /// Returns true if the request is allowed, false if rate-limited.
    fn check(&self, ip: &str) -> bool {
        if self.limit == 0 {
            return true; // unlimited
        }
        let mut map = self.buckets.lock();
        let now = Instant::now();
        let entry = map.entry(ip.to_string()).or_insert((0, now));
        // Reset window if >60s elapsed
        if now.duration_since(entry.1).as_secs() >= 60 {
            *entry = (0, now);
        }
        if entry.0 >= self.limit {
            false
        } else {
            entry.0 += 1;
            true
        }
    }
}

// ── Shared state ───────────────────────────────────────────────────────────

pub struct AppState {
    config: RelayConfig,
    /// `None` when required configuration is absent — relay routes answer 503.
    relay: Option<Arc<Relay>>,
    limiter: RateLimiter,
}

impl AppState {
    pub fn new(config: RelayConfig, relay: Option<Arc<Relay>>) -> AppState {
        let limiter = RateLimiter::new(config.rate_limit_per_minute);
        AppState { config, relay, limiter }
    }
}

// ── Request / response shapes ──────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct SessionRequest {
    message: String,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SendRequest {
    token: String,
    text: String,
}

#[derive(Debug, Default, Serialize)]
struct ApiResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    messages: Option<Vec<RelayMessage>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cursor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thread_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ts: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl ApiResponse {
    fn err(message: impl Into<String>) -> ApiResponse {
        ApiResponse {
            success: false,
            error: Some(message.into()),
            ..ApiResponse::default()
        }
    }
}

// ── Server core ────────────────────────────────────────────────────────────

/// Bind the configured listen address. Separate from `serve` so callers (and
/// the integration tests) can bind port 0 and read back the real address.
pub async fn bind(config: &RelayConfig) -> RelayResult<TcpListener> {
    let addr = format!("{}:{}", config.bind_address, config.port);
    TcpListener::bind(&addr)
        .await
        .map_err(|e| RelayError::Internal(format!("Bind {} failed: {}", addr, e)))
}

/// Accept loop. Runs until `stop` is set; each connection is handled on its
/// own task, so concurrent polls need no coordination.
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    stop: Arc<AtomicBool>,
) -> RelayResult<()> {
    let tls_acceptor = build_tls_acceptor(&state.config)?.map(Arc::new);

    if state.config.bind_address != "127.0.0.1"
        && state.config.bind_address != "localhost"
        && tls_acceptor.is_none()
    {
        warn!(
            "[server] Binding to {} without TLS — tokens sent in plaintext over the network",
            state.config.bind_address
        );
    }

    let scheme = if tls_acceptor.is_some() { "https" } else { "http" };
    if let Ok(addr) = listener.local_addr() {
        info!("[server] Listening on {}://{}", scheme, addr);
    }

    loop {
        if stop.load(Ordering::Relaxed) {
            break;
        }

        // Accept with timeout so we can check the stop signal
        let accept = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            listener.accept(),
        )
        .await;

        match accept {
            Ok(Ok((tcp_stream, peer))) => {
                let state = state.clone();
                let tls = tls_acceptor.clone();
                tokio::spawn(async move {
                    let stream: Box<dyn RelayStream> = if let Some(acceptor) = tls {
                        match acceptor.accept(tcp_stream).await {
                            Ok(tls_stream) => Box::new(tls_stream),
                            Err(e) => {
                                warn!("[server] TLS handshake failed from {}: {}", peer, e);
                                return;
                            }
                        }
                    } else {
                        Box::new(tcp_stream)
                    };

                    if let Err(e) = handle_connection(stream, &peer.ip().to_string(), state).await {
                        warn!("[server] Connection error from {}: {}", peer, e);
                    }
                });
            }
            Ok(Err(e)) => {
                warn!("[server] Accept error: {}", e);
            }
            Err(_) => { /* timeout — loop to check stop signal */ }
        }
    }

    info!("[server] Stopped");
    Ok(())
}

// ── Connection handler ─────────────────────────────────────────────────────

async fn handle_connection(
    mut stream: Box<dyn RelayStream>,
    peer_ip: &str,
    state: Arc<AppState>,
) -> RelayResult<()> {
    // Read the full HTTP request (up to 64KB)
    let mut buf = vec![0u8; 65536];
    let n = stream.read(&mut buf).await.map_err(|e| format!("Read error: {}", e))?;
    if n == 0 {
        return Ok(());
    }
    let raw = String::from_utf8_lossy(&buf[..n]).to_string();

    // Parse first line: "METHOD /path?query HTTP/1.x"
    let first_line = raw.lines().next().unwrap_or("");
    let mut parts = first_line.split_whitespace();
    let (Some(method), Some(target)) = (parts.next(), parts.next()) else {
        return send_json(&mut stream, 400, &ApiResponse::err("Malformed request")).await;
    };
    let path = target.split('?').next().unwrap_or(target);

    // ── CORS preflight ──────────────────────────────────────────────
    if method == "OPTIONS" {
        let resp = "HTTP/1.1 204 No Content\r\nAccess-Control-Allow-Origin: *\r\nAccess-Control-Allow-Methods: POST, GET, OPTIONS\r\nAccess-Control-Allow-Headers: Content-Type\r\nConnection: close\r\n\r\n";
        return stream
            .write_all(resp.as_bytes())
            .await
            .map_err(|e| format!("Write error: {}", e).into());
    }

    // ── Health check (no auth, no rate limit) ───────────────────────
    if method == "GET" && path == "/health" {
        return send_json(
            &mut stream,
            200,
            &ApiResponse { success: true, ..ApiResponse::default() },
        )
        .await;
    }

    // ── Rate limiting ───────────────────────────────────────────────
    if !state.limiter.check(peer_ip) {
        return send_json(
            &mut stream,
            429,
            &ApiResponse::err("Rate limit exceeded — try again later"),
        )
        .await;
    }

    // ── Relay routes ────────────────────────────────────────────────
    let result = match (method, path) {
        ("GET", "/poll") => handle_poll(&state, target).await,
        ("POST", "/session") => handle_session(&state, &raw).await,
        ("POST", "/send") => handle_send(&state, &raw).await,
        _ => {
            return send_json(
                &mut stream,
                404,
                &ApiResponse::err(format!("Not found: {} {}", method, path)),
            )
            .await;
        }
    };

    match result {
        Ok(body) => send_json(&mut stream, 200, &body).await,
        Err(e) => {
            // Full detail to the log, taxonomy-approved message to the wire.
            match e.status_code() {
                401 => info!("[server] {} rejected: invalid token", path),
                _ => error!("[server] {} failed: {}", path, e),
            }
            send_json(&mut stream, e.status_code(), &ApiResponse::err(e.public_message())).await
        }
    }
}

// ── Route handlers ─────────────────────────────────────────────────────────

fn relay_of(state: &AppState) -> RelayResult<&Arc<Relay>> {
    state
        .relay
        .as_ref()
        .ok_or_else(|| RelayError::NotConfigured("relay credentials missing".into()))
}

async fn handle_poll(state: &AppState, target: &str) -> RelayResult<ApiResponse> {
    let relay = relay_of(state)?;
    let query = parse_query(target);
    let token = query.get("token").map(String::as_str).unwrap_or("");
    let cursor = query.get("cursor").map(String::as_str).unwrap_or("");

    let outcome = relay.poll(token, cursor).await?;
    Ok(ApiResponse {
        success: true,
        messages: Some(outcome.messages),
        cursor: Some(outcome.cursor),
        ..ApiResponse::default()
    })
}

async fn handle_session(state: &AppState, raw: &str) -> RelayResult<ApiResponse> {
    let relay = relay_of(state)?;
    let req: SessionRequest = parse_body(raw)?;
    if req.message.trim().is_empty() {
        return Err(RelayError::Internal("empty opening message".into()));
    }

    let start = relay
        .start_session(req.name.as_deref(), req.message.trim())
        .await?;
    Ok(ApiResponse {
        success: true,
        token: Some(start.token),
        session_id: Some(start.session_id),
        thread_id: Some(start.thread_id),
        ..ApiResponse::default()
    })
}

async fn handle_send(state: &AppState, raw: &str) -> RelayResult<ApiResponse> {
    let relay = relay_of(state)?;
    let req: SendRequest = parse_body(raw)?;
    let ts = relay.send_message(&req.token, req.text.trim()).await?;
    Ok(ApiResponse {
        success: true,
        ts: Some(ts),
        ..ApiResponse::default()
    })
}

// ── HTTP helpers ───────────────────────────────────────────────────────────

/// Decode the query string of a request target into a map.
fn parse_query(target: &str) -> HashMap<String, String> {
    let Some(query) = target.splitn(2, '?').nth(1) else {
        return HashMap::new();
    };
    query
        .split('&')
        .filter_map(|pair| {
            let (k, v) = pair.split_once('=')?;
            Some((
                urlencoding::decode(k).ok()?.into_owned(),
                urlencoding::decode(v).ok()?.into_owned(),
            ))
        })
        .collect()
}

/// Extract and parse the JSON body (after the blank line). A missing or
/// malformed body is the caller's defect, reported with the generic 500 —
/// the widget is the only expected client and always sends valid bodies.
fn parse_body<T: serde::de::DeserializeOwned>(raw: &str) -> RelayResult<T> {
    let body = raw.split("\r\n\r\n").nth(1).unwrap_or("");
    serde_json::from_str(body)
        .map_err(|e| RelayError::Internal(format!("Invalid JSON body: {}", e)))
}

async fn send_json(
    stream: &mut Box<dyn RelayStream>,
    status: u16,
    body: &ApiResponse,
) -> RelayResult<()> {
    let json = serde_json::to_string(body)?;
    let resp = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nCache-Control: no-store\r\nAccess-Control-Allow-Origin: *\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        status_text(status),
        json.len(),
        json
    );
    stream
        .write_all(resp.as_bytes())
        .await
        .map_err(|e| format!("Write error: {}", e).into())
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        401 => "Unauthorized",
        404 => "Not Found",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────
