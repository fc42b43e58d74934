//! Huddle relay server -- signaling for peer-to-peer calls.
//!
//! An axum WebSocket server that coordinates rooms and forwards offers,
//! answers, ICE candidates, transcripts and mic status between connected
//! browsers.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:3000
//! cargo run --bin huddle-relay
//!
//! # Run on custom address
//! cargo run --bin huddle-relay -- --bind 127.0.0.1:8080
//!
//! # Or via environment variable
//! HUDDLE_ADDR=127.0.0.1:8080 cargo run --bin huddle-relay
//! ```

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use huddle_relay::config::{RelayCliArgs, RelayConfig};
use huddle_relay::registry::Registry;
use huddle_relay::relay::{self, RelayState};

/// Time given to writer tasks to flush close frames before exiting.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(250);

#[tokio::main]
async fn main() {
    let cli = RelayCliArgs::parse();

    // Load config from CLI args + config file + env vars + defaults.
    let config = match RelayConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    // Initialize tracing with the resolved log level.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(
        addr = %config.bind_addr,
        presence_scope = ?config.policy.presence,
        target_scope = ?config.policy.targets,
        prune_empty_rooms = config.prune_empty_rooms,
        "starting huddle relay server"
    );

    let registry = Registry::with_pruning(config.prune_empty_rooms);
    let state = Arc::new(RelayState::with_config(
        config.policy,
        config.max_frame_size,
        registry,
    ));

    match relay::start_server_with_state(&config.bind_addr, Arc::clone(&state)).await {
        Ok((bound_addr, mut handle)) => {
            tracing::info!(addr = %bound_addr, "relay server listening");
            tokio::select! {
                result = &mut handle => {
                    if let Err(e) = result {
                        tracing::error!(error = %e, "relay server task failed");
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("shutdown requested");
                    state.close_all_connections();
                    tokio::time::sleep(SHUTDOWN_GRACE).await;
                    handle.abort();
                }
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start relay server");
            std::process::exit(1);
        }
    }
}
