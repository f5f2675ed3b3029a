// Threadrelay Engine — token codec, Slack adapter, thread poller, HTTP server.

pub mod config;
pub mod poller;
pub mod relay;
pub mod server;
pub mod slack;
pub mod token;
