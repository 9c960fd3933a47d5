//! Synchronization gateway: the boundary both clients push moves through
//! and poll the authoritative ledger from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use staked_tictactoe::{Mark, Outcome, Position};
use tracing::{debug, info, instrument, warn};

use crate::coordinator::MatchCoordinator;
use crate::error::MoveRejection;
use crate::ledger::LedgerEntry;
use crate::store::MatchHandle;

/// Result of an accepted submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitReceipt {
    /// Ledger length after the append.
    pub ledger_length: usize,
    /// Mark the move was recorded with.
    pub mark: Mark,
    /// Outcome after the append.
    pub outcome: Outcome,
}

/// Ledger state returned to a polling client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollResponse {
    /// Entries after the client's known length.
    pub moves: Vec<LedgerEntry>,
    /// Full ledger length.
    pub count: usize,
    /// Ledger reset counter. A change means `known_length` no longer
    /// describes the client's entries.
    pub epoch: u64,
    /// Outcome of the full ledger.
    pub outcome: Outcome,
    /// Mark to move, unless the game is over.
    pub next_mark: Option<Mark>,
    /// Current turn deadline. Display only; expiry is decided server-side.
    pub deadline: Option<DateTime<Utc>>,
}

/// Serializes submissions into per-match ledgers and serves reads.
#[derive(Debug, Clone)]
pub struct SyncGateway {
    coordinator: MatchCoordinator,
}

impl SyncGateway {
    /// Creates a gateway in front of `coordinator`.
    pub fn new(coordinator: MatchCoordinator) -> Self {
        Self { coordinator }
    }

    /// The coordinator behind this gateway.
    pub fn coordinator(&self) -> &MatchCoordinator {
        &self.coordinator
    }

    /// Proposes a move at `cell_index` for `address`.
    ///
    /// `hint` is the mark the client believes it plays. It is logged and
    /// otherwise ignored; the recorded mark comes from the turn slot.
    #[instrument(skip(self))]
    pub async fn submit(
        &self,
        match_id: &str,
        cell_index: i64,
        address: &str,
        hint: Option<Mark>,
    ) -> Result<SubmitReceipt, MoveRejection> {
        let pos = Position::from_index(cell_index).ok_or_else(|| {
            debug!("Cell index out of range");
            MoveRejection::InvalidPosition
        })?;
        let handle = self.handle(match_id).await?;

        let receipt = {
            let mut state = handle.lock().await;
            let expected = state.ledger().resolution().next_mark();
            let ledger_length = state.propose(pos, address).inspect_err(|rejection| {
                warn!(
                    %rejection,
                    ?expected,
                    hint = describe_hint(hint, expected),
                    "Move rejected"
                );
            })?;
            let resolution = state.ledger().resolution();
            SubmitReceipt {
                ledger_length,
                mark: expected,
                outcome: resolution.outcome(),
            }
        };

        info!(
            ledger_length = receipt.ledger_length,
            mark = ?receipt.mark,
            outcome = ?receipt.outcome,
            "Move accepted"
        );
        if receipt.outcome.is_terminal() {
            self.coordinator.settle(match_id).await;
        }
        Ok(receipt)
    }

    /// Returns the entries after `known_length` plus the current totals.
    ///
    /// Never blocks longer than one append. A `MatchNotFound` here means the
    /// match expired or never existed; clients should stop polling.
    #[instrument(skip(self), level = "debug")]
    pub async fn poll(
        &self,
        match_id: &str,
        known_length: usize,
    ) -> Result<PollResponse, MoveRejection> {
        let handle = self.handle(match_id).await?;
        let state = handle.lock().await;
        let resolution = state.ledger().resolution();
        let response = PollResponse {
            moves: state.tail(known_length),
            count: state.ledger().len(),
            epoch: state.ledger().epoch(),
            outcome: resolution.outcome(),
            next_mark: (!resolution.is_terminal()).then(|| resolution.next_mark()),
            deadline: *state.deadline_at(),
        };
        debug!(count = response.count, returned = response.moves.len(), "Poll served");
        Ok(response)
    }

    /// Clears a match's ledger. Debug and test use only.
    #[instrument(skip(self))]
    pub async fn reset(&self, match_id: &str) -> Result<(), MoveRejection> {
        let handle = self.handle(match_id).await?;
        let mut state = handle.lock().await;
        state.reset();
        self.coordinator.ensure_timer(&mut state, &handle);
        info!("Match ledger reset");
        Ok(())
    }

    async fn handle(&self, match_id: &str) -> Result<MatchHandle, MoveRejection> {
        self.coordinator
            .store()
            .get(match_id)
            .await
            .ok_or(MoveRejection::MatchNotFound)
    }
}

fn describe_hint(hint: Option<Mark>, expected: Mark) -> &'static str {
    match hint {
        None => "none",
        Some(mark) if mark == expected => "matches turn",
        Some(_) => "claims other mark",
    }
}
