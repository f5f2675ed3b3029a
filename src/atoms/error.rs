// ── Threadrelay Atoms: Error Types ─────────────────────────────────────────
// Single canonical error enum for the relay, built with `thiserror`.
//
// Design rules:
//   • Variants are coarse-grained by domain (auth, upstream, config, I/O…).
//   • The `#[from]` attribute wires std/external error conversions automatically.
//   • The HTTP mapping lives here (`status_code` / `public_message`) so the
//     endpoint boundary cannot accidentally leak more detail than the
//     taxonomy allows — `Unauthorized` in particular must never say why.
//   • No variant carries secret material (bot token, shared secret) in its
//     message.

use thiserror::Error;

// ── Primary error enum ─────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum RelayError {
    /// Session token missing, malformed, wrong version, or signature mismatch.
    /// Deliberately carries no detail — the cause is not distinguishable by
    /// callers.
    #[error("invalid session token")]
    Unauthorized,

    /// The messaging backend is unreachable, timed out, or returned an
    /// application-level failure. Carries the backend's reported reason.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// Required configuration is absent or unusable. A deployment defect,
    /// not a transient condition.
    #[error("configuration error: {0}")]
    NotConfigured(String),

    /// Filesystem or OS-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization / deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Catch-all for errors that do not yet have a dedicated variant.
    /// Prefer adding a specific variant over using this in new code.
    #[error("{0}")]
    Internal(String),
}

// ── HTTP boundary mapping ──────────────────────────────────────────────────

impl RelayError {
    /// HTTP status for this error at the endpoint boundary.
    pub fn status_code(&self) -> u16 {
        match self {
            RelayError::Unauthorized => 401,
            RelayError::Upstream(_) => 502,
            RelayError::NotConfigured(_) => 503,
            _ => 500,
        }
    }

    /// Message safe to return to an untrusted browser. Upstream detail is
    /// surfaced (it names Slack's error code, never a credential); everything
    /// else collapses to a fixed generic string.
    pub fn public_message(&self) -> String {
        match self {
            RelayError::Unauthorized => "Invalid token".into(),
            RelayError::Upstream(detail) => format!("Upstream error: {}", detail),
            RelayError::NotConfigured(_) => "Chat relay is not configured".into(),
            _ => "Internal server error".into(),
        }
    }
}

// ── Network failures → Upstream ────────────────────────────────────────────
// reqwest errors can embed the request URL; strip it so log lines and 502
// bodies stay terse.

impl From<reqwest::Error> for RelayError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            RelayError::Upstream("request timed out".into())
        } else {
            RelayError::Upstream(e.without_url().to_string())
        }
    }
}

// ── Migration bridge: String → RelayError ──────────────────────────────────
// Allows `?` on call sites that produce `Result<T, String>` inside functions
// returning `RelayResult<T>`.

impl From<String> for RelayError {
    fn from(s: String) -> Self {
        RelayError::Internal(s)
    }
}

impl From<&str> for RelayError {
    fn from(s: &str) -> Self {
        RelayError::Internal(s.to_string())
    }
}

// ── Convenience alias ──────────────────────────────────────────────────────

/// All relay operations should return this type.
pub type RelayResult<T> = Result<T, RelayError>;

// ── Tests ──────────────────────────────────────────────────────────────────
