//! HTTP interface for match creation, move submission and polling.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument};

use staked_tictactoe::Mark;

use crate::config::SyncConfig;
use crate::coordinator::MatchCoordinator;
use crate::error::{MatchError, MoveRejection};
use crate::gateway::SyncGateway;
use crate::payout::{LogPayout, PayoutSink, WebhookPayout};
use crate::store::{MatchStore, MatchSummary};

/// Request for creating a match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateMatchRequest {
    /// Match identifier (typically the escrow game id).
    pub match_id: String,
    /// Challenger address, plays X.
    pub challenger: String,
}

/// Request for joining a match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinMatchRequest {
    /// Opponent address, plays O.
    pub address: String,
}

/// Request for submitting a move.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitMoveRequest {
    /// Cell index (0-8, where 0=top-left, 8=bottom-right).
    ///
    /// Any JSON number is accepted here so that fractional or oversized
    /// values are answered with "out of range" rather than a body error.
    pub cell_index: serde_json::Number,
    /// Submitting address.
    pub address: String,
    /// Mark the client believes it plays. Advisory only.
    #[serde(default)]
    pub player: Option<Mark>,
}

/// Response to a move submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitMoveResponse {
    /// Whether the move was appended.
    pub accepted: bool,
    /// Rejection reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Ledger length after the append.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ledger_length: Option<usize>,
}

/// Query for polling moves.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PollQuery {
    /// Entries the client already applied.
    #[serde(default)]
    pub known_length: usize,
}

/// Error body for non-move failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Error message.
    pub error: String,
}

/// Shared state behind every route.
#[derive(Debug, Clone)]
pub struct AppState {
    gateway: SyncGateway,
    debug_reset: bool,
}

impl AppState {
    /// Bundles a gateway with route options.
    pub fn new(gateway: SyncGateway, debug_reset: bool) -> Self {
        Self {
            gateway,
            debug_reset,
        }
    }
}

fn rejection_status(rejection: MoveRejection) -> StatusCode {
    match rejection {
        MoveRejection::InvalidPosition => StatusCode::BAD_REQUEST,
        MoveRejection::UnknownPlayer => StatusCode::FORBIDDEN,
        MoveRejection::MatchNotFound => StatusCode::NOT_FOUND,
        MoveRejection::PositionTaken
        | MoveRejection::WrongTurn
        | MoveRejection::GameAlreadyOver
        | MoveRejection::MatchNotReady => StatusCode::CONFLICT,
    }
}

impl IntoResponse for MoveRejection {
    fn into_response(self) -> Response {
        let body = SubmitMoveResponse {
            accepted: false,
            reason: Some(self.reason()),
            ledger_length: None,
        };
        (rejection_status(self), Json(body)).into_response()
    }
}

impl IntoResponse for MatchError {
    fn into_response(self) -> Response {
        let status = match &self {
            MatchError::MatchNotFound(_) => StatusCode::NOT_FOUND,
            MatchError::MatchExists(_) | MatchError::MatchFull(_) => StatusCode::CONFLICT,
            MatchError::SelfPlay | MatchError::EmptyAddress => StatusCode::BAD_REQUEST,
        };
        let body = ErrorBody {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Builds the router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/matches", get(open_matches).post(create_match))
        .route("/api/matches/{id}", get(get_match).delete(abandon_match))
        .route("/api/matches/{id}/join", post(join_match))
        .route(
            "/api/matches/{id}/moves",
            get(poll_moves).post(submit_move).delete(reset_moves),
        )
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

#[instrument(skip(state), level = "debug")]
async fn open_matches(State(state): State<AppState>) -> Json<Vec<MatchSummary>> {
    Json(state.gateway.coordinator().open_matches().await)
}

#[instrument(skip(state, req), fields(match_id = %req.match_id))]
async fn create_match(
    State(state): State<AppState>,
    Json(req): Json<CreateMatchRequest>,
) -> Result<impl IntoResponse, MatchError> {
    let summary = state
        .gateway
        .coordinator()
        .create_match(&req.match_id, &req.challenger)
        .await?;
    Ok((StatusCode::CREATED, Json(summary)))
}

#[instrument(skip(state, req))]
async fn join_match(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<JoinMatchRequest>,
) -> Result<impl IntoResponse, MatchError> {
    let summary = state
        .gateway
        .coordinator()
        .join_match(&id, &req.address)
        .await?;
    Ok(Json(summary))
}

#[instrument(skip(state), level = "debug")]
async fn get_match(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, MatchError> {
    let summary = state.gateway.coordinator().snapshot(&id).await?;
    Ok(Json(summary))
}

#[instrument(skip(state))]
async fn abandon_match(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, MatchError> {
    state.gateway.coordinator().abandon(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state, req), fields(cell_index = %req.cell_index, address = %req.address))]
async fn submit_move(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<SubmitMoveRequest>,
) -> Result<impl IntoResponse, MoveRejection> {
    let cell_index = req.cell_index.as_i64().ok_or_else(|| {
        debug!("Cell index is not an integer in range");
        MoveRejection::InvalidPosition
    })?;
    let receipt = state
        .gateway
        .submit(&id, cell_index, &req.address, req.player)
        .await?;
    Ok(Json(SubmitMoveResponse {
        accepted: true,
        reason: None,
        ledger_length: Some(receipt.ledger_length),
    }))
}

#[instrument(skip(state), level = "debug")]
async fn poll_moves(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<PollQuery>,
) -> Result<impl IntoResponse, MoveRejection> {
    let response = state.gateway.poll(&id, query.known_length).await?;
    Ok(Json(response))
}

#[instrument(skip(state))]
async fn reset_moves(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, MoveRejection> {
    if !state.debug_reset {
        debug!("Reset requested with debug_reset disabled");
        return Ok(StatusCode::NOT_FOUND);
    }
    state.gateway.reset(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Chooses the payout sink from configuration.
pub fn payout_from_config(config: &SyncConfig) -> Arc<dyn PayoutSink> {
    match config.payout_webhook() {
        Some(url) => {
            info!(url = %url, "Payout notices go to webhook");
            Arc::new(WebhookPayout::new(url.clone()))
        }
        None => {
            info!("No payout webhook configured, notices are logged");
            Arc::new(LogPayout)
        }
    }
}

/// Runs the HTTP server until Ctrl+C.
#[instrument(skip_all, fields(host = %config.host(), port = *config.port()))]
pub async fn serve(config: SyncConfig) -> anyhow::Result<()> {
    let store = Arc::new(MatchStore::new());
    let coordinator = MatchCoordinator::new(store, payout_from_config(&config), &config);
    let reaper = coordinator.spawn_reaper(config.reaper_interval());
    let gateway = SyncGateway::new(coordinator.clone());
    let app = router(AppState::new(gateway, *config.debug_reset()));

    let listener = tokio::net::TcpListener::bind((config.host().as_str(), *config.port())).await?;
    info!("Server ready at http://{}:{}/", config.host(), config.port());

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            }
            info!("Shutdown signal received");
        })
        .await?;

    coordinator.shutdown();
    reaper.await?;
    info!("Server stopped");
    Ok(())
}
