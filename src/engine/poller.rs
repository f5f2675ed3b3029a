// Threadrelay — Thread Poller
//
// The read path of the relay: given a presented token and the widget's last
// cursor, fetch a bounded window of the bound thread and return only the
// genuinely new agent replies. Everything else in the window is noise:
// messages the widget already consumed, relay-posted visitor echoes, backend
// system events (which covers the thread root in practice), and messages
// with no attributed human sender.
//
// Stateless: validity lives in the token, progress lives in the cursor.
// One backend attempt per poll — retry cadence belongs to the widget.

use async_trait::async_trait;
use regex::Regex;
use std::sync::Arc;
use std::sync::LazyLock;

use crate::atoms::error::{RelayError, RelayResult};
use crate::atoms::types::{PollOutcome, RelayMessage, ThreadMessage};
use crate::engine::token::TokenCodec;

// ── Provider seam ──────────────────────────────────────────────────────────

/// The single capability consumed from the messaging backend: an ordered,
/// bounded fetch of a thread's messages, root inclusive, in the backend's
/// natural ascending order. One adapter per backend provider; the poller
/// never sees provider-specific shapes.
#[async_trait]
pub trait ThreadSource: Send + Sync {
    async fn fetch_thread_messages(
        &self,
        channel_id: &str,
        thread_id: &str,
        limit: u32,
    ) -> RelayResult<Vec<ThreadMessage>>;
}

// ── Poller ─────────────────────────────────────────────────────────────────

pub struct ThreadPoller {
    codec: TokenCodec,
    source: Arc<dyn ThreadSource>,
    batch_limit: u32,
}

impl ThreadPoller {
    pub fn new(codec: TokenCodec, source: Arc<dyn ThreadSource>, batch_limit: u32) -> Self {
        ThreadPoller { codec, source, batch_limit }
    }

    /// One poll round: verify, fetch, filter, advance.
    ///
    /// The returned cursor is the ordering key of the last message of the
    /// *unfiltered* batch — the cursor advances with backend progress even
    /// when every message in the window was noise, so the widget never
    /// re-scans the same window forever. When the batch is empty the input
    /// cursor comes back unchanged.
    //
    // TODO: a burst larger than batch_limit between polls silently skips the
    // overflow; switching to conversations.replies cursor pagination would
    // close that window.
    pub async fn poll(&self, token: &str, cursor: &str) -> RelayResult<PollOutcome> {
        let session = self.codec.verify(token).ok_or(RelayError::Unauthorized)?;

        let batch = self
            .source
            .fetch_thread_messages(&session.channel_id, &session.thread_id, self.batch_limit)
            .await?;

        let messages: Vec<RelayMessage> = batch
            .iter()
            .filter(|m| is_new_agent_reply(m, cursor))
            .map(to_relay_message)
            .collect();

        let next_cursor = batch
            .last()
            .map(|m| m.ts.clone())
            .unwrap_or_else(|| cursor.to_string());

        Ok(PollOutcome { messages, cursor: next_cursor })
    }
}

// ── Noise filter ───────────────────────────────────────────────────────────

fn is_new_agent_reply(msg: &ThreadMessage, cursor: &str) -> bool {
    if !cursor.is_empty() && ts_value(&msg.ts) <= ts_value(cursor) {
        return false; // already seen
    }
    if msg.is_self_echo {
        return false; // visitor message the relay posted itself
    }
    if msg.subtype.is_some() {
        return false; // system/automated event
    }
    if msg.user.as_deref().is_none_or(str::is_empty) {
        return false; // no attributed human sender
    }
    true
}

/// Ordering keys are timestamp-like strings ("1700000000.000100") compared
/// numerically. Unparseable keys sort before everything.
fn ts_value(ts: &str) -> f64 {
    ts.parse().unwrap_or(0.0)
}

// Leading directed-mention markup, e.g. "<@U0123AB> hi" → "hi".
static MENTION_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*<@[A-Z0-9]+>\s*").expect("mention pattern compiles"));

fn to_relay_message(msg: &ThreadMessage) -> RelayMessage {
    let text = MENTION_PREFIX.replace(&msg.text, "").trim().to_string();
    RelayMessage {
        id: msg.ts.clone(),
        timestamp: msg.ts.clone(),
        text,
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

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

    struct FailingSource;

    #[async_trait]
    impl ThreadSource for FailingSource {
        async fn fetch_thread_messages(
            &self,
            _channel_id: &str,
            _thread_id: &str,
            _limit: u32,
        ) -> RelayResult<Vec<ThreadMessage>> {
            Err(RelayError::Upstream("thread_not_found".into()))
        }
    }

    fn msg(ts: &str, user: Option<&str>, text: &str) -> ThreadMessage {
        ThreadMessage {
            ts: ts.into(),
            text: text.into(),
            user: user.map(|u| u.to_string()),
            subtype: None,
            is_self_echo: false,
        }
    }

    fn poller(messages: Vec<ThreadMessage>) -> (ThreadPoller, String) {
        let codec = TokenCodec::new("s3cr3t");
        let token = codec.sign("sess1", "C123", "1.1");
        let p = ThreadPoller::new(codec, Arc::new(StaticSource { messages }), 50);
        (p, token)
    }

    #[tokio::test]
    async fn invalid_token_is_unauthorized() {
        let (p, _) = poller(vec![]);
        let err = p.poll("garbage", "").await.unwrap_err();
        assert!(matches!(err, RelayError::Unauthorized));
    }

    #[tokio::test]
    async fn upstream_failure_propagates() {
        let codec = TokenCodec::new("s3cr3t");
        let token = codec.sign("sess1", "C123", "1.1");
        let p = ThreadPoller::new(codec, Arc::new(FailingSource), 50);
        let err = p.poll(&token, "").await.unwrap_err();
        assert!(matches!(err, RelayError::Upstream(_)));
    }

    #[tokio::test]
    async fn noise_filter_keeps_only_genuine_agent_reply() {
        // Root, self-echo, system event, senderless, and one genuine reply.
        let mut root = msg("1.0", None, "visitor opener");
        root.is_self_echo = true;
        let mut echo = msg("1.5", None, "visitor follow-up");
        echo.is_self_echo = true;
        let mut broadcast = msg("2.0", Some("U1"), "also sent to channel");
        broadcast.subtype = Some("thread_broadcast".into());
        let senderless = msg("2.5", None, "workflow output");
        let genuine = msg("3.0", Some("U1"), "<@U9>   Hello there! ");

        let (p, token) = poller(vec![root, echo, broadcast, senderless, genuine]);
        let out = p.poll(&token, "").await.unwrap();

        assert_eq!(
            out.messages,
            vec![RelayMessage {
                id: "3.0".into(),
                timestamp: "3.0".into(),
                text: "Hello there!".into(),
            }]
        );
        assert_eq!(out.cursor, "3.0");
    }

    #[tokio::test]
    async fn second_poll_from_returned_cursor_is_empty() {
        let mut broadcast = msg("1.1", None, "");
        broadcast.subtype = Some("thread_broadcast".into());
        let batch = vec![broadcast, msg("2.2", Some("U1"), "<@U9> Hello!")];

        let (p, token) = poller(batch);
        let first = p.poll(&token, "").await.unwrap();
        assert_eq!(first.messages.len(), 1);
        assert_eq!(first.messages[0].id, "2.2");
        assert_eq!(first.messages[0].text, "Hello!");
        assert_eq!(first.cursor, "2.2");

        // Same backend state, advanced cursor: nothing new, stable cursor.
        let second = p.poll(&token, &first.cursor).await.unwrap();
        assert!(second.messages.is_empty());
        assert_eq!(second.cursor, "2.2");
    }

    #[tokio::test]
    async fn cursor_advances_past_all_noise_batches() {
        // Every message filtered out — the cursor must still reach the end of
        // the window so the widget never re-scans it.
        let mut a = msg("1.0", None, "");
        a.is_self_echo = true;
        let mut b = msg("2.0", Some("U1"), "");
        b.subtype = Some("channel_join".into());

        let (p, token) = poller(vec![a, b]);
        let out = p.poll(&token, "").await.unwrap();
        assert!(out.messages.is_empty());
        assert_eq!(out.cursor, "2.0");
    }

    #[tokio::test]
    async fn empty_batch_keeps_cursor() {
        let (p, token) = poller(vec![]);
        let out = p.poll(&token, "170000.0001").await.unwrap();
        assert!(out.messages.is_empty());
        assert_eq!(out.cursor, "170000.0001");
    }

    #[tokio::test]
    async fn cursor_comparison_is_numeric_not_lexicographic() {
        // "10.0" > "9.0" numerically but not as strings.
        let (p, token) = poller(vec![msg("10.0", Some("U1"), "late reply")]);
        let out = p.poll(&token, "9.0").await.unwrap();
        assert_eq!(out.messages.len(), 1);
        assert_eq!(out.cursor, "10.0");
    }

    #[tokio::test]
    async fn messages_at_cursor_are_excluded() {
        let batch = vec![
            msg("1.0", Some("U1"), "old"),
            msg("2.0", Some("U1"), "new"),
        ];
        let (p, token) = poller(batch);
        let out = p.poll(&token, "1.0").await.unwrap();
        assert_eq!(out.messages.len(), 1);
        assert_eq!(out.messages[0].text, "new");
    }

    #[test]
    fn mention_stripping_only_hits_leading_markup() {
        let m = msg("1.0", Some("U1"), "<@U123> see <@U456> later");
        assert_eq!(to_relay_message(&m).text, "see <@U456> later");
        let m = msg("1.0", Some("U1"), "no mention here");
        assert_eq!(to_relay_message(&m).text, "no mention here");
    }
}
