//! `MentorLink` development server.
//!
//! An axum server speaking the same HTTP lookups and Socket.IO chat channel
//! as the production backend, with seeded users and in-memory history.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:7777 with the demo users
//! cargo run --bin mentorlink-server
//!
//! # Run on custom address
//! cargo run --bin mentorlink-server -- --bind 127.0.0.1:8080
//! ```

use std::sync::Arc;

use clap::Parser;
use mentorlink_server::config::{ServerCliArgs, ServerConfig};
use mentorlink_server::server::{self, ServerState};

#[tokio::main]
async fn main() {
    let cli = ServerCliArgs::parse();

    let config = match ServerConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(
        addr = %config.bind_addr,
        users = config.users.len(),
        "starting mentorlink development server"
    );

    let state = Arc::new(ServerState::from_config(&config));

    match server::start_server(&config.bind_addr, state).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "server listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "server task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start server");
            std::process::exit(1);
        }
    }
}
