//! kettlectl - Cosori kettle protocol bridge
//!
//! Runs the protocol engine for one kettle. A BLE host process feeds link
//! events and notifications on stdin and performs the writes printed on
//! stdout.

mod bridge;

use bridge::Bridge;
use kettlectl_core::{Config, KettleEngine, Outbox};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::{Instant, MissedTickBehavior};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr; stdout carries the line protocol.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path = std::env::var("KETTLECTL_CONFIG").ok();
    let config = match Config::load() {
        Ok(c) => {
            if let Some(path) = &config_path {
                tracing::info!("Loaded config from {}", path);
            }
            c
        }
        Err(e) => {
            if config_path.is_some() {
                tracing::error!("Failed to load config: {}", e);
                return Err(e.into());
            }
            tracing::info!("Using default configuration");
            Config::default()
        }
    };

    if let Err(e) = config.validate() {
        tracing::error!("Configuration error: {}", e);
        return Err(e.into());
    }

    tracing::info!("Starting kettlectl bridge");
    tracing::info!("  Protocol version: {}", config.engine.protocol_version);
    tracing::info!("  Status layout: {:?}", config.engine.status_layout);
    tracing::info!(
        "  Handshake: {}",
        match (&config.engine.registration_key, config.engine.use_register) {
            (None, _) => "disabled (no registration key)",
            (Some(_), true) => "register",
            (Some(_), false) => "hello",
        }
    );
    tracing::info!("  Tick interval: {} ms", config.bridge.tick_interval_ms);

    let engine = KettleEngine::new(config.engine.clone(), Outbox::new());
    let mut bridge = Bridge::new(engine, tokio::io::stdout());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut ticker = tokio::time::interval(config.bridge.tick_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let started = Instant::now();

    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => bridge.handle_line(&line).await?,
                None => {
                    tracing::info!("Input closed");
                    break;
                }
            },
            _ = ticker.tick() => {
                let now_ms = started.elapsed().as_millis() as u64;
                bridge.tick(now_ms).await?;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received shutdown signal");
                break;
            }
        }
    }

    tracing::info!(
        "kettlectl bridge stopped (command state: {})",
        bridge.engine().command_state()
    );
    Ok(())
}
