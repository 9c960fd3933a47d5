//! Per-match turn timer.
//!
//! One task per active match sleeps until the current turn deadline. On
//! wake it re-takes the match lock and asks the state to expire the turn it
//! saw. If a move landed in the meantime the ledger length or the deadline
//! has changed, the expiry is a no-op, and the loop picks up the new
//! deadline. The task exits when its token is cancelled or the match stops
//! being active.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span};

use crate::coordinator::MatchCoordinator;
use crate::store::{MatchHandle, MatchId};

/// Handle to a running turn timer.
#[derive(Debug)]
pub struct TurnTimer {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl TurnTimer {
    /// Spawns the timer loop for a match.
    pub fn spawn(
        coordinator: MatchCoordinator,
        handle: MatchHandle,
        match_id: MatchId,
        cancel: CancellationToken,
    ) -> Self {
        let span = info_span!("turn_timer", match_id = %match_id);
        let task = tokio::spawn(
            run(coordinator, handle, match_id, cancel.clone()).instrument(span),
        );
        Self { cancel, task }
    }

    /// Stops the timer.
    pub fn disarm(&self) {
        self.cancel.cancel();
    }

    /// Whether the timer is still counting down.
    pub fn is_armed(&self) -> bool {
        !self.cancel.is_cancelled() && !self.task.is_finished()
    }
}

async fn run(
    coordinator: MatchCoordinator,
    handle: MatchHandle,
    match_id: MatchId,
    cancel: CancellationToken,
) {
    debug!("Turn timer started");
    loop {
        let (deadline, expected_len) = {
            let state = handle.lock().await;
            match (*state.deadline(), state.is_active()) {
                (Some(deadline), true) => (deadline, state.ledger().len()),
                _ => {
                    debug!("Match inactive, turn timer exiting");
                    cancel.cancel();
                    return;
                }
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Turn timer cancelled");
                return;
            }
            _ = tokio::time::sleep_until(deadline) => {}
        }

        let skipped = {
            let mut state = handle.lock().await;
            if cancel.is_cancelled() {
                return;
            }
            state.expire_turn(expected_len)
        };

        if let Some(len) = skipped {
            info!(ledger_length = len, "Turn expired, skip appended");
            coordinator.settle(&match_id).await;
        }
    }
}
