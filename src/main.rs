// Threadrelay — service entry point.
//
// Usage: threadrelay [config.toml]
//
// Configuration is loaded once into an immutable struct and passed explicitly
// into the engine constructors. A missing bot token or token secret does not
// abort startup — /health keeps answering and the relay routes return the
// not-configured response until the deployment is fixed.

use log::{error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use threadrelay::atoms::error::RelayResult;
use threadrelay::engine::config::RelayConfig;
use threadrelay::engine::relay::Relay;
use threadrelay::engine::server::{self, AppState};

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run().await {
        error!("[main] {}", e);
        std::process::exit(1);
    }
}

async fn run() -> RelayResult<()> {
    let config_path = std::env::args().nth(1).unwrap_or_else(|| "threadrelay.toml".into());
    let config = RelayConfig::load(&config_path)?;

    let relay = if config.is_configured() {
        Some(Arc::new(Relay::new(&config)))
    } else {
        warn!(
            "[main] slack_bot_token / token_secret not set — relay routes will answer 503 \
             until configured"
        );
        None
    };

    let listener = server::bind(&config).await?;
    let state = Arc::new(AppState::new(config, relay));

    let stop = Arc::new(AtomicBool::new(false));
    let stop_on_signal = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("[main] Shutdown signal received");
            stop_on_signal.store(true, Ordering::Relaxed);
        }
    });

    server::serve(listener, state, stop).await
}
