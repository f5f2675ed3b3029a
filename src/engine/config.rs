// Threadrelay — Configuration
//
// One immutable struct, loaded once at startup and passed explicitly into
// constructors. Sources, in order: TOML file (if present), then environment
// overrides for the values that normally live in a secret store.
//
// A missing required value does not kill the process — the server still
// starts so health probes work, and every relay route answers the
// not-configured response instead of silently degrading.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::atoms::constants::{
    DEFAULT_BATCH_LIMIT, DEFAULT_BIND_ADDRESS, DEFAULT_PORT, DEFAULT_RATE_LIMIT_PER_MINUTE,
};
use crate::atoms::error::{RelayError, RelayResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Address to bind — "127.0.0.1" (local only) or "0.0.0.0" (public).
    #[serde(default = "default_bind")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,

    /// Bot User OAuth Token (xoxb-...) for outbound Slack calls. Required.
    #[serde(default)]
    pub slack_bot_token: String,
    /// Channel that hosts visitor threads. Required for session initiation.
    #[serde(default)]
    pub slack_channel_id: String,
    /// Shared secret keying the session-token MAC. Required.
    #[serde(default)]
    pub token_secret: String,

    /// Messages fetched per poll.
    #[serde(default = "default_batch_limit")]
    pub batch_limit: u32,
    /// Max requests per IP per minute on relay routes (0 = unlimited).
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_minute: u32,

    /// Path to TLS certificate PEM file (enables HTTPS when set with
    /// tls_key_path).
    #[serde(default)]
    pub tls_cert_path: Option<String>,
    /// Path to TLS private key PEM file.
    #[serde(default)]
    pub tls_key_path: Option<String>,
}

fn default_bind() -> String {
    DEFAULT_BIND_ADDRESS.into()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_batch_limit() -> u32 {
    DEFAULT_BATCH_LIMIT
}
fn default_rate_limit() -> u32 {
    DEFAULT_RATE_LIMIT_PER_MINUTE
}

impl Default for RelayConfig {
    fn default() -> Self {
        RelayConfig {
            bind_address: default_bind(),
            port: default_port(),
            slack_bot_token: String::new(),
            slack_channel_id: String::new(),
            token_secret: String::new(),
            batch_limit: default_batch_limit(),
            rate_limit_per_minute: default_rate_limit(),
            tls_cert_path: None,
            tls_key_path: None,
        }
    }
}

impl RelayConfig {
    /// Load from `path` (defaults apply when the file is absent), then apply
    /// environment overrides. A file that exists but does not parse is a
    /// deployment defect, reported as `NotConfigured`.
    pub fn load(path: &str) -> RelayResult<RelayConfig> {
        let mut config = if Path::new(path).exists() {
            let raw = std::fs::read_to_string(path)?;
            toml::from_str(&raw)
                .map_err(|e| RelayError::NotConfigured(format!("parse {}: {}", path, e)))?
        } else {
            RelayConfig::default()
        };

        apply_env(&mut config, "SLACK_BOT_TOKEN", |c, v| c.slack_bot_token = v);
        apply_env(&mut config, "RELAY_CHANNEL_ID", |c, v| c.slack_channel_id = v);
        apply_env(&mut config, "RELAY_TOKEN_SECRET", |c, v| c.token_secret = v);
        apply_env(&mut config, "RELAY_BIND", |c, v| c.bind_address = v);
        if let Ok(v) = std::env::var("RELAY_PORT") {
            if let Ok(port) = v.parse() {
                config.port = port;
            }
        }

        Ok(config)
    }

    /// Whether the poll/send path can operate at all.
    pub fn is_configured(&self) -> bool {
        !self.slack_bot_token.is_empty() && !self.token_secret.is_empty()
    }
}

fn apply_env(config: &mut RelayConfig, var: &str, set: impl Fn(&mut RelayConfig, String)) {
    if let Ok(v) = std::env::var(var) {
        if !v.is_empty() {
            set(config, v);
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────
