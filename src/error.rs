//! Error types for match synchronization.

use derive_more::{Display, Error};
use tracing::instrument;

/// Why a proposed move was not appended.
///
/// Every variant is recoverable: the submitting client re-polls and either
/// retries or gives up the move. None of them touch match state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Error, strum::EnumIter)]
pub enum MoveRejection {
    /// Cell index outside 0-8.
    #[display("out of range")]
    InvalidPosition,
    /// Cell already occupied by an earlier move.
    #[display("cell taken")]
    PositionTaken,
    /// The other participant owns the current turn slot.
    #[display("not your turn")]
    WrongTurn,
    /// Address is not bound to this match.
    #[display("unknown player")]
    UnknownPlayer,
    /// Match already ended in a win or draw.
    #[display("game over")]
    GameAlreadyOver,
    /// No match with this identifier.
    #[display("match not found")]
    MatchNotFound,
    /// Opponent has not joined yet.
    #[display("waiting for opponent")]
    MatchNotReady,
}

impl MoveRejection {
    /// Client-visible reason string.
    pub fn reason(&self) -> String {
        self.to_string()
    }
}

/// Errors binding participants to a match.
#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
pub enum MatchError {
    /// No match with this identifier.
    #[display("match {} not found", _0)]
    MatchNotFound(#[error(not(source))] String),
    /// A match with this identifier already exists.
    #[display("match {} already exists", _0)]
    MatchExists(#[error(not(source))] String),
    /// Both seats are taken by other addresses.
    #[display("match {} already has two players", _0)]
    MatchFull(#[error(not(source))] String),
    /// Challenger tried to join their own match.
    #[display("address cannot play against itself")]
    SelfPlay,
    /// Address string was empty.
    #[display("address must not be empty")]
    EmptyAddress,
}

/// Failure reporting a terminal result to the payout collaborator.
#[derive(Debug, Clone, Display, Error)]
#[display("Payout error: {}", message)]
pub struct PayoutError {
    /// Error message.
    pub message: String,
}

impl PayoutError {
    /// Creates a new payout error.
    #[instrument(skip(message))]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for PayoutError {
    fn from(err: reqwest::Error) -> Self {
        Self::new(format!("HTTP error: {}", err))
    }
}

/// Client-side failure talking to the gateway.
#[derive(Debug, Display, Error)]
pub enum ClientError {
    /// The gateway rejected the request.
    #[display("rejected: {}", _0)]
    Rejected(MoveRejection),
    /// Transport or decoding failure.
    #[display("HTTP error: {}", _0)]
    Http(reqwest::Error),
    /// Unexpected response status.
    #[display("unexpected status {}", _0)]
    Status(#[error(not(source))] u16),
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        ClientError::Http(err)
    }
}
