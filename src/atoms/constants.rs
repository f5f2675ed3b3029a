// ── Threadrelay Atoms: Constants ───────────────────────────────────────────
// All named constants for the crate live here.
// Rationale: collecting constants in one place eliminates magic strings and
// keeps wire-format values auditable.

// ── Session token format ───────────────────────────────────────────────────
// The single supported token format version. Bump only with a coordinated
// widget rollout — verify() rejects every other value.
pub const TOKEN_VERSION: u8 = 1;

/// Separator between the token's header, payload, and signature segments.
pub const TOKEN_SEPARATOR: char = '.';

// ── Slack wire values ──────────────────────────────────────────────────────
pub const SLACK_API_BASE: &str = "https://slack.com/api";

// Message-metadata event type attached to every message the relay posts on a
// visitor's behalf. The poll filter drops messages carrying it, so visitor
// messages are never echoed back as "agent replies". Treat as a stable
// identifier: changing it orphans echo detection for live threads.
pub const VISITOR_EVENT_TYPE: &str = "webchat_visitor_message";

// ── Polling defaults ───────────────────────────────────────────────────────
/// Upper bound on messages fetched per poll. The cursor advances past the
/// whole fetched window, so bursts larger than this can be skipped — see the
/// note in `engine/poller.rs`.
pub const DEFAULT_BATCH_LIMIT: u32 = 50;

// ── Server defaults ────────────────────────────────────────────────────────
pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 3941;
pub const DEFAULT_RATE_LIMIT_PER_MINUTE: u32 = 120;
