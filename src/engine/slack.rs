// Threadrelay — Slack Web API Adapter
//
// The one `ThreadSource` implementation. Two capabilities are consumed:
//   conversations.replies — the bounded thread fetch behind polling
//   chat.postMessage      — session initiation + visitor sends
//
// Every call is bearer-authenticated with the configured bot token. Slack
// reports application errors as `{"ok": false, "error": "..."}` with HTTP
// 200, so the `ok` gate runs on every response body.

use async_trait::async_trait;
use log::debug;
use serde_json::{json, Value};
use std::time::Duration;

use crate::atoms::constants::{SLACK_API_BASE, VISITOR_EVENT_TYPE};
use crate::atoms::error::{RelayError, RelayResult};
use crate::atoms::types::ThreadMessage;
use crate::engine::poller::ThreadSource;

// ── Client ─────────────────────────────────────────────────────────────────

pub struct SlackClient {
    http: reqwest::Client,
    bot_token: String,
}

impl SlackClient {
    /// Build a client with fixed connect/request timeouts. A hung backend
    /// call surfaces as `Upstream` via the client timeout — polling must
    /// never hang indefinitely.
    pub fn new(bot_token: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(15))
            .build()
            .expect("reqwest client construction with static options");
        SlackClient { http, bot_token: bot_token.into() }
    }

    /// Post a message, optionally into a thread and optionally carrying
    /// message metadata. Returns the new message's ordering key (`ts`).
    pub async fn post_message(
        &self,
        channel: &str,
        thread_ts: Option<&str>,
        text: &str,
        metadata: Option<Value>,
    ) -> RelayResult<String> {
        let mut body = json!({ "channel": channel, "text": text });
        if let Some(ts) = thread_ts {
            body["thread_ts"] = json!(ts);
        }
        if let Some(meta) = metadata {
            body["metadata"] = meta;
        }

        let resp = self
            .http
            .post(format!("{}/chat.postMessage", SLACK_API_BASE))
            .header("Authorization", format!("Bearer {}", self.bot_token))
            .json(&body)
            .send()
            .await?;
        let body: Value = resp.json().await?;
        check_ok("chat.postMessage", &body)?;

        body["ts"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| RelayError::Upstream("chat.postMessage: no ts in response".into()))
    }

    /// Metadata block marking a relay-posted visitor message, so the poll
    /// filter can recognize the echo.
    pub fn visitor_metadata(session_id: &str) -> Value {
        json!({
            "event_type": VISITOR_EVENT_TYPE,
            "event_payload": { "session_id": session_id },
        })
    }
}

#[async_trait]
impl ThreadSource for SlackClient {
    async fn fetch_thread_messages(
        &self,
        channel_id: &str,
        thread_id: &str,
        limit: u32,
    ) -> RelayResult<Vec<ThreadMessage>> {
        let resp = self
            .http
            .get(format!("{}/conversations.replies", SLACK_API_BASE))
            .header("Authorization", format!("Bearer {}", self.bot_token))
            .query(&[
                ("channel", channel_id),
                ("ts", thread_id),
                ("limit", &limit.to_string()),
                // Slack returns thread replies oldest-first; inclusive keeps
                // the root in the batch so the cursor covers it too.
                ("inclusive", "true"),
            ])
            .send()
            .await?;
        let body: Value = resp.json().await?;
        check_ok("conversations.replies", &body)?;

        let messages = parse_thread_messages(&body);
        debug!(
            "[slack] conversations.replies {}@{} → {} messages",
            thread_id,
            channel_id,
            messages.len()
        );
        Ok(messages)
    }
}

// ── Response parsing ───────────────────────────────────────────────────────

fn check_ok(method: &str, body: &Value) -> RelayResult<()> {
    if body["ok"].as_bool().unwrap_or(false) {
        Ok(())
    } else {
        let err = body["error"].as_str().unwrap_or("unknown error");
        Err(RelayError::Upstream(format!("{}: {}", method, err)))
    }
}

fn parse_thread_messages(body: &Value) -> Vec<ThreadMessage> {
    let empty = vec![];
    body["messages"]
        .as_array()
        .unwrap_or(&empty)
        .iter()
        .map(parse_message)
        .collect()
}

fn parse_message(msg: &Value) -> ThreadMessage {
    ThreadMessage {
        ts: msg["ts"].as_str().unwrap_or("").to_string(),
        text: msg["text"].as_str().unwrap_or("").to_string(),
        user: msg["user"]
            .as_str()
            .filter(|u| !u.is_empty())
            .map(|u| u.to_string()),
        subtype: msg["subtype"].as_str().map(|s| s.to_string()),
        is_self_echo: msg["metadata"]["event_type"].as_str() == Some(VISITOR_EVENT_TYPE),
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────
