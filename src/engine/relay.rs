// Threadrelay — Relay Facade
//
// Wires the token codec, the Slack adapter, and the thread poller behind the
// three operations the HTTP layer exposes: start a session, send a visitor
// message, poll for agent replies. Holds no per-session state — the token
// carries the binding, the cursor carries the progress.

use log::info;
use std::sync::Arc;

use crate::atoms::error::{RelayError, RelayResult};
use crate::atoms::types::{PollOutcome, SessionStart};
use crate::engine::config::RelayConfig;
use crate::engine::poller::{ThreadPoller, ThreadSource};
use crate::engine::slack::SlackClient;
use crate::engine::token::TokenCodec;

pub struct Relay {
    codec: TokenCodec,
    slack: Arc<SlackClient>,
    poller: ThreadPoller,
    channel_id: String,
}

impl Relay {
    /// Build the relay against the real Slack backend.
    pub fn new(config: &RelayConfig) -> Relay {
        let slack = Arc::new(SlackClient::new(config.slack_bot_token.clone()));
        Relay::with_source(config, slack.clone(), slack)
    }

    /// Build with an explicit poll source — the seam for other backend
    /// adapters (and for tests that stub the thread fetch).
    pub fn with_source(
        config: &RelayConfig,
        slack: Arc<SlackClient>,
        source: Arc<dyn ThreadSource>,
    ) -> Relay {
        let codec = TokenCodec::new(config.token_secret.clone());
        let poller = ThreadPoller::new(codec.clone(), source, config.batch_limit);
        Relay {
            codec,
            slack,
            poller,
            channel_id: config.slack_channel_id.clone(),
        }
    }

    /// Open a new chat session: post the visitor's opening message to the
    /// configured channel (it becomes the thread root) and mint the token
    /// binding the session to that thread. The root carries the visitor
    /// metadata, so polling filters it like any other echo.
    pub async fn start_session(
        &self,
        visitor_name: Option<&str>,
        message: &str,
    ) -> RelayResult<SessionStart> {
        if self.channel_id.is_empty() {
            return Err(RelayError::NotConfigured(
                "slack_channel_id is required for session initiation".into(),
            ));
        }

        let session_id = uuid::Uuid::new_v4().to_string();
        let opener = match visitor_name {
            Some(name) if !name.trim().is_empty() => {
                format!(":speech_balloon: *{}*: {}", name.trim(), message)
            }
            _ => format!(":speech_balloon: {}", message),
        };

        let thread_id = self
            .slack
            .post_message(
                &self.channel_id,
                None,
                &opener,
                Some(SlackClient::visitor_metadata(&session_id)),
            )
            .await?;

        info!("[relay] session {} → thread {}", session_id, thread_id);

        let token = self.codec.sign(&session_id, &self.channel_id, &thread_id);
        Ok(SessionStart { token, session_id, thread_id })
    }

    /// Post a visitor message into the session's thread. The echo metadata is
    /// what keeps the message from coming back out of `poll`.
    pub async fn send_message(&self, token: &str, text: &str) -> RelayResult<String> {
        let session = self.codec.verify(token).ok_or(RelayError::Unauthorized)?;
        self.slack
            .post_message(
                &session.channel_id,
                Some(&session.thread_id),
                text,
                Some(SlackClient::visitor_metadata(&session.session_id)),
            )
            .await
    }

    /// Fetch new agent replies for the session; see `ThreadPoller::poll`.
    pub async fn poll(&self, token: &str, cursor: &str) -> RelayResult<PollOutcome> {
        self.poller.poll(token, cursor).await
    }
}
