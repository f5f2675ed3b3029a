// ── Threadrelay Atoms: Pure Data Types ─────────────────────────────────────
// Plain struct definitions with no logic.
// Atoms layer rule: no I/O, no side effects, no imports from engine/.

use serde::{Deserialize, Serialize};

// ── Session token ──────────────────────────────────────────────────────────

/// The verified contents of a session token. Immutable once minted; binds one
/// visitor chat session to one backend thread. Possession of a token with a
/// valid signature is the only credential the poll/send endpoints accept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionToken {
    /// Token format version — always `constants::TOKEN_VERSION` for a token
    /// that passed verification.
    pub version: u8,
    /// Opaque identifier of the visitor's chat session.
    pub session_id: String,
    /// Backend channel hosting the thread.
    pub channel_id: String,
    /// Ordering key of the root message anchoring the thread.
    pub thread_id: String,
    /// Seconds since epoch at mint time. Advisory only — no expiry is
    /// enforced.
    pub issued_at: i64,
}

// ── Backend messages ───────────────────────────────────────────────────────

/// Uniform shape of one backend thread message, as produced by a
/// `ThreadSource` adapter. Provider-specific metadata is already collapsed
/// into `is_self_echo` so the poller stays provider-agnostic.
#[derive(Debug, Clone, PartialEq)]
pub struct ThreadMessage {
    /// The backend's per-thread ordering key (timestamp-like, monotonically
    /// increasing, numerically comparable).
    pub ts: String,
    pub text: String,
    /// Originating human sender, if any. Bot and system messages have none.
    pub user: Option<String>,
    /// Backend subtype marker for system/automated events.
    pub subtype: Option<String>,
    /// True when the message metadata tags it as a relay-posted visitor
    /// message.
    pub is_self_echo: bool,
}

/// An agent reply that passed the noise filter, as returned to the widget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayMessage {
    pub id: String,
    pub timestamp: String,
    pub text: String,
}

/// Result of one poll: the new agent replies plus the advanced cursor the
/// widget presents on its next call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollOutcome {
    pub messages: Vec<RelayMessage>,
    pub cursor: String,
}

/// Result of session initiation: the minted bearer token and the thread it is
/// bound to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStart {
    pub token: String,
    pub session_id: String,
    pub thread_id: String,
}
