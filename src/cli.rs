//! Command-line interface for staked_games.

use clap::{Parser, Subcommand};

/// Staked Games - authoritative move sync for staked tic-tac-toe matches
#[derive(Parser, Debug)]
#[command(name = "staked_games")]
#[command(about = "Move synchronization server and client for staked matches", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Subcommand to run
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the HTTP match server
    Serve {
        /// Path to a TOML config file
        #[arg(short, long)]
        config: Option<std::path::PathBuf>,

        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Port to bind to (overrides config)
        #[arg(short, long)]
        port: Option<u16>,

        /// Seconds per turn before a skip is recorded (overrides config)
        #[arg(long)]
        turn_timeout: Option<u64>,

        /// Enable the ledger reset route
        #[arg(long)]
        debug_reset: bool,
    },

    /// List matches waiting for an opponent
    Open {
        /// Match server URL
        #[arg(long, default_value = "http://127.0.0.1:3000")]
        server_url: String,
    },

    /// Follow a match until it ends
    Watch {
        /// Match server URL
        #[arg(long, default_value = "http://127.0.0.1:3000")]
        server_url: String,

        /// Match identifier
        #[arg(short, long)]
        match_id: String,

        /// Path to a TOML config file supplying `poll_interval_ms`
        #[arg(short, long)]
        config: Option<std::path::PathBuf>,

        /// Poll interval in milliseconds (overrides config)
        #[arg(long)]
        interval_ms: Option<u64>,
    },

    /// Submit one move and print the resulting board
    Play {
        /// Match server URL
        #[arg(long, default_value = "http://127.0.0.1:3000")]
        server_url: String,

        /// Match identifier
        #[arg(short, long)]
        match_id: String,

        /// Your wallet address
        #[arg(short, long)]
        address: String,

        /// Cell index (0-8, where 0=top-left, 8=bottom-right)
        #[arg(short, long)]
        cell: i64,

        /// Join the match as the opponent before moving
        #[arg(long)]
        join: bool,
    },
}
