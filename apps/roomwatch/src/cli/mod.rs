//! # roomwatch CLI Module
//!
//! ## Available Commands
//!
//! - `server` - Start the HTTP server, reaper and proxy registration
//! - `status` - Show database counts (default)
//! - `init` - Create the database and archive directories
//! - `user add|list` - Manage registered users
//! - `room add|list` - Manage rooms
//! - `beacon add` - Register a BLE beacon UUID for a room
//! - `wifi add` - Register a WiFi access point BSSID for a room
//! - `sessions` - Print presence history grouped by day
//! - `sweep` - Run one stale session sweep now

mod commands;

use clap::{Parser, Subcommand};
use roomwatch::config::{CliOverrides, Config, Mode};
use roomwatch_core::PresenceError;
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// roomwatch - presence tracking from BLE and WiFi fingerprints
#[derive(Parser, Debug)]
#[command(name = "roomwatch")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to the configuration file
    #[arg(short = 'c', long, global = true, default_value = "roomwatch.toml")]
    pub config: PathBuf,

    /// Endpoint profile (overrides the config file)
    #[arg(short = 'm', long, global = true, value_enum)]
    pub mode: Option<Mode>,

    /// Path to the redb database (overrides the config file)
    #[arg(short = 'D', long, global = true)]
    pub database: Option<PathBuf>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start HTTP server
    Server {
        /// Host to bind to
        #[arg(short = 'H', long)]
        host: Option<String>,

        /// Port to bind to
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Show database counts
    Status,

    /// Create the database and archive directories
    Init,

    /// Manage users
    #[command(subcommand)]
    User(UserCommand),

    /// Manage rooms
    #[command(subcommand)]
    Room(RoomCommand),

    /// Manage BLE beacons
    #[command(subcommand)]
    Beacon(FingerprintCommand),

    /// Manage WiFi access points
    #[command(subcommand)]
    Wifi(FingerprintCommand),

    /// Print presence history grouped by day
    Sessions {
        /// Only this user id
        #[arg(short, long)]
        user: Option<u64>,

        /// First day to include (YYYY-MM-DD); default one month back
        #[arg(short, long)]
        since: Option<String>,
    },

    /// Close idle sessions now
    Sweep,
}

#[derive(Subcommand, Debug)]
pub enum UserCommand {
    /// Register a user
    Add { username: String },
    /// List registered users
    List,
}

#[derive(Subcommand, Debug)]
pub enum RoomCommand {
    /// Add a room
    Add { room_id: u64, name: String },
    /// List rooms
    List,
}

#[derive(Subcommand, Debug)]
pub enum FingerprintCommand {
    /// Map an identifier (beacon UUID or access point BSSID) to a room
    Add { room_id: u64, identifier: String },
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub async fn execute(cli: Cli) -> Result<(), PresenceError> {
    let (host, port) = match &cli.command {
        Some(Commands::Server { host, port }) => (host.clone(), *port),
        _ => (None, None),
    };
    let overrides = CliOverrides {
        mode: cli.mode,
        host,
        port,
        database: cli.database.clone(),
    };
    let config = Config::load(&cli.config, &overrides)?;
    let json_mode = cli.json_mode;

    match cli.command {
        Some(Commands::Server { .. }) => cmd_server(config).await,
        Some(Commands::Init) => cmd_init(&config),
        Some(Commands::User(UserCommand::Add { username })) => {
            cmd_user_add(&config, json_mode, &username)
        }
        Some(Commands::User(UserCommand::List)) => cmd_user_list(&config, json_mode),
        Some(Commands::Room(RoomCommand::Add { room_id, name })) => {
            cmd_room_add(&config, json_mode, room_id, &name)
        }
        Some(Commands::Room(RoomCommand::List)) => cmd_room_list(&config, json_mode),
        Some(Commands::Beacon(FingerprintCommand::Add { room_id, identifier })) => {
            cmd_fingerprint_add(&config, Modality::Beacon, room_id, &identifier)
        }
        Some(Commands::Wifi(FingerprintCommand::Add { room_id, identifier })) => {
            cmd_fingerprint_add(&config, Modality::AccessPoint, room_id, &identifier)
        }
        Some(Commands::Sessions { user, since }) => {
            cmd_sessions(&config, json_mode, user, since)
        }
        Some(Commands::Sweep) => cmd_sweep(&config, json_mode),
        Some(Commands::Status) | None => cmd_status(&config, json_mode),
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "roomwatch", "sessions", "--user", "3", "--json-mode", "-m", "docker",
        ])
        .unwrap();
        assert!(cli.json_mode);
        assert_eq!(cli.mode, Some(Mode::Docker));
        match cli.command {
            Some(Commands::Sessions { user, since }) => {
                assert_eq!(user, Some(3));
                assert!(since.is_none());
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn nested_fingerprint_command() {
        let cli = Cli::try_parse_from(["roomwatch", "wifi", "add", "9", "AA:BB:CC:00:00:09"]).unwrap();
        match cli.command {
            Some(Commands::Wifi(FingerprintCommand::Add { room_id, identifier })) => {
                assert_eq!(room_id, 9);
                assert_eq!(identifier, "AA:BB:CC:00:00:09");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
