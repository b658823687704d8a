//! # roomwatch - Presence Service
//!
//! Tracks which registered user is in which room, from periodic BLE and
//! WiFi scans uploaded by their devices.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    apps/roomwatch (THE BINARY)                  │
//! │                                                                 │
//! │  ┌─────────────┐    ┌─────────────┐    ┌──────────────────┐     │
//! │  │   CLI       │    │   HTTP API  │    │ Background tasks │     │
//! │  │  (clap)     │    │   (axum)    │    │ reaper, register │     │
//! │  └──────┬──────┘    └──────┬──────┘    └────────┬─────────┘     │
//! │         │                  │                    │               │
//! │         └──────────────────┼────────────────────┘               │
//! │                            ▼                                    │
//! │                   ┌─────────────────┐                           │
//! │                   │ roomwatch-core  │                           │
//! │                   │  (THE LOGIC)    │                           │
//! │                   └─────────────────┘                           │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! # Start the HTTP server with the docker endpoint profile
//! roomwatch --mode docker server
//!
//! # Admin operations
//! roomwatch user add alice
//! roomwatch room add 5 "Seminar Room"
//! roomwatch beacon add 5 f7826da6-4fa2-4e98-8024-bc5b71e0893e
//! roomwatch sessions --user 1 --since 2024-05-01
//! ```

mod cli;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

#[tokio::main]
async fn main() {
    // ROOMWATCH_LOG_FORMAT=json switches to machine-parseable output.
    let log_format = std::env::var("ROOMWATCH_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "roomwatch=info,tower_http=debug".into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    let cli = cli::Cli::parse();

    if !cli.quiet {
        print_banner();
    }

    if let Err(e) = cli::execute(cli).await {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}

fn print_banner() {
    println!(
        r#"
  roomwatch v{}
  presence from BLE and WiFi fingerprints
"#,
        env!("CARGO_PKG_VERSION")
    );
}
