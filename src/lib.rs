//! Staked Games - authoritative move synchronization for staked matches
//!
//! Two participants, each on their own client, play a tic-tac-toe match
//! whose outcome releases an escrowed stake. The server keeps one
//! append-only move ledger per match and is the only authority on it.
//!
//! # Architecture
//!
//! - **Resolver**: pure replay of a slot sequence into board and outcome
//!   (the `staked_tictactoe` crate)
//! - **Ledger**: validation and append of moves and skips
//! - **Gateway**: serialized submissions and incremental polling
//! - **Coordinator**: seating, turn timers, and fire-once settlement
//! - **Server / Client**: HTTP routes and the reconciling client view
//!
//! # Example
//!
//! ```no_run
//! use staked_games::{MatchCoordinator, MatchStore, RecordingPayout, SyncConfig, SyncGateway};
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = SyncConfig::default();
//! let coordinator = MatchCoordinator::new(
//!     Arc::new(MatchStore::new()),
//!     Arc::new(RecordingPayout::new()),
//!     &config,
//! );
//! coordinator.create_match("game-1", "0xAlice").await?;
//! coordinator.join_match("game-1", "0xBob").await?;
//!
//! let gateway = SyncGateway::new(coordinator);
//! gateway.submit("game-1", 4, "0xalice", None).await?;
//! let poll = gateway.poll("game-1", 0).await?;
//! assert_eq!(poll.count, 1);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

// Private module declarations
mod cli;
mod client;
mod config;
mod coordinator;
mod error;
mod gateway;
mod ledger;
mod payout;
mod server;
mod store;
mod timer;

// Crate-level exports - Command line
pub use cli::{Cli, Command};

// Crate-level exports - Configuration
pub use config::{ConfigError, SyncConfig};

// Crate-level exports - Errors
pub use error::{ClientError, MatchError, MoveRejection, PayoutError};

// Crate-level exports - Ledger
pub use ledger::{LedgerEntry, MoveLedger, Seats, normalize_address};

// Crate-level exports - Match state
pub use store::{MatchHandle, MatchId, MatchState, MatchStore, MatchSummary};

// Crate-level exports - Coordination
pub use coordinator::MatchCoordinator;
pub use gateway::{PollResponse, SubmitReceipt, SyncGateway};
pub use timer::TurnTimer;

// Crate-level exports - Payout
pub use payout::{LogPayout, PayoutSink, RecordingPayout, TerminalNotice, WebhookPayout};

// Crate-level exports - HTTP
pub use client::{LocalView, MatchClient, fetch_open_matches, play_move, sync_once, watch};
pub use server::{
    AppState, CreateMatchRequest, ErrorBody, JoinMatchRequest, PollQuery, SubmitMoveRequest,
    SubmitMoveResponse, payout_from_config, router, serve,
};

// Crate-level exports - Game types
pub use staked_tictactoe::{
    Board, MAX_SLOTS, Mark, Outcome, Position, Resolution, ResolveError, Slot, Square, resolve,
};
