// Threadrelay — Session Token Codec
//
// Mints and verifies the stateless bearer token that binds a visitor's chat
// session to one backend thread. Wire format is three URL-safe, padding-free
// base64 segments joined by '.':
//
//   b64(header JSON) . b64(payload JSON) . b64(HMAC-SHA-256 of the first two)
//
// The token is handed to an untrusted browser, so it must be
// forgery-resistant (MAC, not just encoding) and must fail closed on any
// structural anomaly. `verify` never panics and never reports *why* a token
// was rejected — the single `None` return shape is what keeps the endpoint's
// 401 from becoming an oracle.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::atoms::constants::{TOKEN_SEPARATOR, TOKEN_VERSION};
use crate::atoms::types::SessionToken;

type HmacSha256 = Hmac<Sha256>;

// ── Wire structures ────────────────────────────────────────────────────────
// Parsed with serde so a structurally malformed segment (missing field, wrong
// type) is rejected in one place. `deny_unknown_fields` is deliberately NOT
// set: extra fields don't weaken the MAC and newer minters may add them.

#[derive(Deserialize)]
struct TokenHeader {
    v: u8,
}

#[derive(Deserialize)]
struct TokenPayload {
    session_id: String,
    channel_id: String,
    thread_id: String,
    issued_at: i64,
}

// ── Codec ──────────────────────────────────────────────────────────────────

/// Signs and verifies session tokens with a server-held shared secret.
/// Construct once from configuration and pass explicitly wherever tokens are
/// handled.
#[derive(Clone)]
pub struct TokenCodec {
    secret: String,
}

impl TokenCodec {
    pub fn new(secret: impl Into<String>) -> Self {
        TokenCodec { secret: secret.into() }
    }

    /// Mint a token binding `{session_id, channel_id, thread_id}` with
    /// `issued_at` stamped at the current time. Always succeeds.
    pub fn sign(&self, session_id: &str, channel_id: &str, thread_id: &str) -> String {
        let header = json!({ "v": TOKEN_VERSION }).to_string();
        let payload = json!({
            "session_id": session_id,
            "channel_id": channel_id,
            "thread_id": thread_id,
            "issued_at": chrono::Utc::now().timestamp(),
        })
        .to_string();

        let signing_input = format!(
            "{}{}{}",
            encode_segment(header.as_bytes()),
            TOKEN_SEPARATOR,
            encode_segment(payload.as_bytes())
        );
        let signature = self.mac_over(signing_input.as_bytes());
        format!(
            "{}{}{}",
            signing_input,
            TOKEN_SEPARATOR,
            encode_segment(&signature)
        )
    }

    /// Verify a presented token. Returns the decoded `SessionToken` only when
    /// the signature matches under the current secret, the version is
    /// supported, and every binding field is non-empty. Any other condition —
    /// wrong segment count, bad base64, bad JSON, short signature — returns
    /// `None`.
    pub fn verify(&self, token: &str) -> Option<SessionToken> {
        let mut parts = token.split(TOKEN_SEPARATOR);
        let header_b64 = parts.next()?;
        let payload_b64 = parts.next()?;
        let signature_b64 = parts.next()?;
        if parts.next().is_some() {
            return None;
        }

        let signing_input = format!("{}{}{}", header_b64, TOKEN_SEPARATOR, payload_b64);
        let expected = self.mac_over(signing_input.as_bytes());
        let presented = decode_segment(signature_b64)?;
        // Constant-time comparison; a length mismatch is an immediate reject
        // (ct_eq on unequal lengths would panic in some impls, and length
        // itself is not secret).
        if presented.len() != expected.len() {
            return None;
        }
        if !bool::from(presented.as_slice().ct_eq(&expected)) {
            return None;
        }

        let header: TokenHeader = serde_json::from_slice(&decode_segment(header_b64)?).ok()?;
        if header.v != TOKEN_VERSION {
            return None;
        }
        let payload: TokenPayload = serde_json::from_slice(&decode_segment(payload_b64)?).ok()?;
        if payload.session_id.is_empty()
            || payload.channel_id.is_empty()
            || payload.thread_id.is_empty()
        {
            return None;
        }

        Some(SessionToken {
            version: header.v,
            session_id: payload.session_id,
            channel_id: payload.channel_id,
            thread_id: payload.thread_id,
            issued_at: payload.issued_at,
        })
    }

    fn mac_over(&self, input: &[u8]) -> Vec<u8> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(input);
        mac.finalize().into_bytes().to_vec()
    }
}

// ── Base64 helpers ─────────────────────────────────────────────────────────

fn encode_segment(bytes: &[u8]) -> String {
    base64::Engine::encode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, bytes)
}

fn decode_segment(segment: &str) -> Option<Vec<u8>> {
    base64::Engine::decode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, segment).ok()
}

// ── Tests ──────────────────────────────────────────────────────────────────
