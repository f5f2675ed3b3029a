// Threadrelay — anonymous-to-authenticated relay between a website chat
// widget and Slack threads. Visitors chat without any Slack credential; the
// widget holds a signed session token and polls for agent replies.

pub mod atoms;
pub mod engine;
