//! Staked Games - Unified CLI
//!
//! Match server plus a minimal client for watching and playing.

#![warn(missing_docs)]

use anyhow::{Result, bail};
use clap::Parser;
use staked_games::{
    Cli, ClientError, Command, LocalView, Mark, MatchClient, Position, SyncConfig,
    fetch_open_matches, normalize_address, play_move, serve, sync_once, watch,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, instrument};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,staked_games=debug")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            config,
            host,
            port,
            turn_timeout,
            debug_reset,
        } => run_server(config, host, port, turn_timeout, debug_reset).await,
        Command::Open { server_url } => run_open(server_url).await,
        Command::Watch {
            server_url,
            match_id,
            config,
            interval_ms,
        } => run_watch(server_url, match_id, config, interval_ms).await,
        Command::Play {
            server_url,
            match_id,
            address,
            cell,
            join,
        } => run_play(server_url, match_id, address, cell, join).await,
    }
}

/// Run the HTTP match server
#[instrument(skip_all)]
async fn run_server(
    path: Option<PathBuf>,
    host: Option<String>,
    port: Option<u16>,
    turn_timeout: Option<u64>,
    debug_reset: bool,
) -> Result<()> {
    let mut config = load_config(path)?.with_bind(host, port);
    if let Some(secs) = turn_timeout {
        config = config.with_turn_timeout(Duration::from_secs(secs));
    }
    if debug_reset {
        config = config.with_debug_reset(true);
    }
    config.validate()?;

    info!(?config, "Starting Staked Games match server");
    serve(config).await
}

/// Config file (or defaults) with environment overrides applied
fn load_config(path: Option<PathBuf>) -> Result<SyncConfig> {
    let config = match path {
        Some(path) => SyncConfig::from_file(path)?,
        None => SyncConfig::default(),
    };
    Ok(config.with_env()?)
}

/// List matches waiting for an opponent
#[instrument]
async fn run_open(server_url: String) -> Result<()> {
    let open = fetch_open_matches(&server_url).await?;
    if open.is_empty() {
        println!("No open matches");
    }
    for summary in open {
        println!("{}  challenger {}  created {}", summary.match_id, summary.player_a, summary.created_at);
    }
    Ok(())
}

/// Follow a match until it ends
#[instrument]
async fn run_watch(
    server_url: String,
    match_id: String,
    config: Option<PathBuf>,
    interval_ms: Option<u64>,
) -> Result<()> {
    let interval = match interval_ms {
        Some(ms) => Duration::from_millis(ms),
        None => load_config(config)?.poll_interval(),
    };
    info!(interval_ms = interval.as_millis() as u64, "Watching match");
    let client = MatchClient::new(server_url, match_id, "");
    // A spectator never moves, so the mark only affects `is_my_turn`.
    let mut view = LocalView::new(Mark::X);
    let outcome = watch(&client, &mut view, interval).await?;
    println!("Final: {:?}", outcome);
    Ok(())
}

/// Submit one move and print the board
#[instrument]
async fn run_play(
    server_url: String,
    match_id: String,
    address: String,
    cell: i64,
    join: bool,
) -> Result<()> {
    let client = MatchClient::new(server_url, match_id, address.clone());
    let summary = if join {
        client.join().await?
    } else {
        client.summary().await?
    };

    let me = normalize_address(&address);
    let my_mark = if summary.player_a == me {
        Mark::X
    } else if summary.player_b.as_deref() == Some(me.as_str()) {
        Mark::O
    } else {
        bail!("{} is not seated in match {}", address, summary.match_id);
    };

    let mut view = LocalView::new(my_mark);
    sync_once(&client, &mut view).await?;

    let Some(pos) = Position::from_index(cell) else {
        bail!("cell {} is out of range (0-8)", cell);
    };
    match play_move(&client, &mut view, pos).await {
        Ok(len) => info!(ledger_length = len, "Move recorded"),
        Err(ClientError::Rejected(rejection)) => println!("Move rejected: {}", rejection),
        Err(e) => return Err(e.into()),
    }
    println!("{}", view.board().display());
    println!("Status: {:?}", view.outcome());
    Ok(())
}
