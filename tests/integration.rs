// Threadrelay integration tests — drive the bound HTTP server end-to-end
// over a real socket, with the thread source stubbed so no Slack traffic
// leaves the process.

use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use threadrelay::atoms::error::RelayResult;
use threadrelay::atoms::types::ThreadMessage;
use threadrelay::engine::config::RelayConfig;
use threadrelay::engine::poller::ThreadSource;
use threadrelay::engine::relay::Relay;
use threadrelay::engine::server::{self, AppState};
use threadrelay::engine::slack::SlackClient;
use threadrelay::engine::token::TokenCodec;

// ── Test scaffolding ───────────────────────────────────────────────────────

struct StaticSource {
    messages: Vec<ThreadMessage>,
}

#[async_trait]
impl ThreadSource for StaticSource {
    async fn fetch_thread_messages(
        &self,
        _channel_id: &str,
        _thread_id: &str,
        _limit: u32,
    ) -> RelayResult<Vec<ThreadMessage>> {
        Ok(self.messages.clone())
    }
}

fn test_config() -> RelayConfig {
    RelayConfig {
        port: 0, // pick a free port; read it back from the listener
        slack_bot_token: "xoxb-test".into(),
        slack_channel_id: "C123".into(),
        token_secret: "s3cr3t".into(),
        ..RelayConfig::default()
    }
}

fn relay_with(messages: Vec<ThreadMessage>, config: &RelayConfig) -> Arc<Relay> {
    let slack = Arc::new(SlackClient::new(config.slack_bot_token.clone()));
    Arc::new(Relay::with_source(
        config,
        slack,
        Arc::new(StaticSource { messages }),
    ))
}

async fn start_server(config: RelayConfig, relay: Option<Arc<Relay>>) -> SocketAddr {
    let listener = server::bind(&config).await.expect("bind 127.0.0.1:0");
    let addr = listener.local_addr().expect("local addr");
    let state = Arc::new(AppState::new(config, relay));
    let stop = Arc::new(AtomicBool::new(false));
    tokio::spawn(server::serve(listener, state, stop));
    addr
}

/// Raw HTTP exchange: returns (status, headers, parsed JSON body).
async fn request(addr: SocketAddr, raw: String) -> (u16, String, serde_json::Value) {
    let mut stream = TcpStream::connect(addr).await.expect("connect");
    stream.write_all(raw.as_bytes()).await.expect("write");
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await.expect("read");
    let response = String::from_utf8_lossy(&buf).to_string();

    let status: u16 = response
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or_else(|| panic!("no status line in: {response}"));
    let (headers, body) = response
        .split_once("\r\n\r\n")
        .unwrap_or((response.as_str(), ""));
    let json = serde_json::from_str(body).unwrap_or(serde_json::Value::Null);
    (status, headers.to_string(), json)
}

async fn get(addr: SocketAddr, path: &str) -> (u16, String, serde_json::Value) {
    request(
        addr,
        format!("GET {path} HTTP/1.1\r\nHost: test\r\nConnection: close\r\n\r\n"),
    )
    .await
}

fn agent_reply(ts: &str, text: &str) -> ThreadMessage {
    ThreadMessage {
        ts: ts.into(),
        text: text.into(),
        user: Some("U1".into()),
        subtype: None,
        is_self_echo: false,
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn health_answers_without_configuration() {
    let addr = start_server(RelayConfig { port: 0, ..RelayConfig::default() }, None).await;
    let (status, _, body) = get(addr, "/health").await;
    assert_eq!(status, 200);
    assert_eq!(body["success"], true);
}

#[tokio::test]
async fn unconfigured_poll_is_503() {
    let addr = start_server(RelayConfig { port: 0, ..RelayConfig::default() }, None).await;
    let (status, _, body) = get(addr, "/poll?token=x&cursor=").await;
    assert_eq!(status, 503);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "Chat relay is not configured");
}

#[tokio::test]
async fn poll_without_valid_token_is_401() {
    let config = test_config();
    let relay = relay_with(vec![], &config);
    let addr = start_server(config, Some(relay)).await;

    for path in ["/poll", "/poll?token=garbage&cursor="] {
        let (status, _, body) = get(addr, path).await;
        assert_eq!(status, 401);
        assert_eq!(body["error"], "Invalid token");
    }
}

#[tokio::test]
async fn poll_round_trip_with_cursor() {
    let config = test_config();
    let mut root = agent_reply("1.0", "visitor opener");
    root.user = None;
    root.is_self_echo = true;
    let batch = vec![root, agent_reply("2.2", "<@U9> Hello!")];
    let relay = relay_with(batch, &config);

    let token = TokenCodec::new("s3cr3t").sign("sess1", "C123", "1.0");
    let addr = start_server(config, Some(relay)).await;

    let (status, headers, body) = get(addr, &format!("/poll?token={token}&cursor=")).await;
    assert_eq!(status, 200);
    assert!(
        headers.contains("Cache-Control: no-store"),
        "poll responses must be uncacheable: {headers}"
    );
    assert_eq!(body["success"], true);
    assert_eq!(body["messages"].as_array().unwrap().len(), 1);
    assert_eq!(body["messages"][0]["id"], "2.2");
    assert_eq!(body["messages"][0]["text"], "Hello!");
    assert_eq!(body["cursor"], "2.2");

    // Second poll from the returned cursor: nothing new, cursor stable.
    let (status, _, body) = get(addr, &format!("/poll?token={token}&cursor=2.2")).await;
    assert_eq!(status, 200);
    assert_eq!(body["messages"].as_array().unwrap().len(), 0);
    assert_eq!(body["cursor"], "2.2");
}

#[tokio::test]
async fn token_minted_for_other_secret_is_rejected() {
    let config = test_config();
    let relay = relay_with(vec![agent_reply("2.2", "hi")], &config);
    let token = TokenCodec::new("different-secret").sign("sess1", "C123", "1.0");
    let addr = start_server(config, Some(relay)).await;

    let (status, _, body) = get(addr, &format!("/poll?token={token}&cursor=")).await;
    assert_eq!(status, 401);
    assert_eq!(body["error"], "Invalid token");
}

#[tokio::test]
async fn unknown_route_is_404() {
    let addr = start_server(RelayConfig { port: 0, ..RelayConfig::default() }, None).await;
    let (status, _, body) = get(addr, "/nope").await;
    assert_eq!(status, 404);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn options_preflight_is_204_with_cors() {
    let addr = start_server(RelayConfig { port: 0, ..RelayConfig::default() }, None).await;
    let (status, headers, _) = request(
        addr,
        "OPTIONS /poll HTTP/1.1\r\nHost: test\r\nOrigin: https://example.com\r\nConnection: close\r\n\r\n".into(),
    )
    .await;
    assert_eq!(status, 204);
    assert!(headers.contains("Access-Control-Allow-Origin: *"));
}
