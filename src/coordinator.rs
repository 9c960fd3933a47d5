//! Match coordinator: seats participants, runs turn timers, and reports
//! terminal results to the payout collaborator exactly once.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, instrument, warn};

use staked_tictactoe::Mark;

use crate::config::SyncConfig;
use crate::error::MatchError;
use crate::ledger::normalize_address;
use crate::payout::{PayoutSink, TerminalNotice};
use crate::store::{MatchHandle, MatchState, MatchStore, MatchSummary};
use crate::timer::TurnTimer;

/// Binds participants to matches and settles finished ones.
///
/// Cheap to clone; clones share the store, the payout sink and the
/// shutdown token.
#[derive(Debug, Clone)]
pub struct MatchCoordinator {
    store: Arc<MatchStore>,
    payout: Arc<dyn PayoutSink>,
    turn_timeout: Duration,
    eviction_grace: Duration,
    shutdown: CancellationToken,
}

impl MatchCoordinator {
    /// Creates a coordinator over `store`.
    #[instrument(skip_all)]
    pub fn new(store: Arc<MatchStore>, payout: Arc<dyn PayoutSink>, config: &SyncConfig) -> Self {
        info!(
            turn_timeout_secs = config.turn_timeout().as_secs(),
            eviction_grace_secs = config.eviction_grace().as_secs(),
            "Creating match coordinator"
        );
        Self {
            store,
            payout,
            turn_timeout: config.turn_timeout(),
            eviction_grace: config.eviction_grace(),
            shutdown: CancellationToken::new(),
        }
    }

    /// The underlying match store.
    pub fn store(&self) -> &Arc<MatchStore> {
        &self.store
    }

    /// Creates a match with the challenger in the X seat.
    #[instrument(skip(self))]
    pub async fn create_match(
        &self,
        match_id: &str,
        challenger: &str,
    ) -> Result<MatchSummary, MatchError> {
        if challenger.trim().is_empty() {
            return Err(MatchError::EmptyAddress);
        }
        let state = MatchState::new(match_id.to_string(), challenger, self.turn_timeout);
        let handle = self.store.create(state).await?;
        let summary = handle.lock().await.summary();
        info!(challenger = %summary.player_a, "Match created");
        Ok(summary)
    }

    /// Seats the opponent in the O seat and arms the turn timer.
    #[instrument(skip(self))]
    pub async fn join_match(
        &self,
        match_id: &str,
        opponent: &str,
    ) -> Result<MatchSummary, MatchError> {
        if opponent.trim().is_empty() {
            return Err(MatchError::EmptyAddress);
        }
        let handle = self.handle(match_id).await?;
        let mut state = handle.lock().await;
        state.bind_opponent(opponent)?;
        if state.is_active() && !state.timer_armed() {
            self.arm(&mut state, &handle);
        }
        Ok(state.summary())
    }

    /// Mark assigned to `address`, `None` if it holds no seat.
    #[instrument(skip(self))]
    pub async fn mark_for(&self, match_id: &str, address: &str) -> Result<Option<Mark>, MatchError> {
        let handle = self.handle(match_id).await?;
        let state = handle.lock().await;
        Ok(state.seats().mark_of(address))
    }

    /// Presentation snapshot of a match.
    pub async fn snapshot(&self, match_id: &str) -> Result<MatchSummary, MatchError> {
        let handle = self.handle(match_id).await?;
        let summary = handle.lock().await.summary();
        Ok(summary)
    }

    /// Matches still waiting for an opponent, oldest first.
    #[instrument(skip(self), level = "debug")]
    pub async fn open_matches(&self) -> Vec<MatchSummary> {
        let mut open = Vec::new();
        for match_id in self.store.ids().await {
            let Some(handle) = self.store.get(&match_id).await else {
                continue;
            };
            let state = handle.lock().await;
            if !state.seats().is_full() {
                open.push(state.summary());
            }
        }
        open.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.match_id.cmp(&b.match_id))
        });
        debug!(count = open.len(), "Open matches listed");
        open
    }

    /// Reports a terminal result downstream if it has not been reported.
    ///
    /// Returns `true` when this call sent the notice. Safe to call after
    /// every accepted entry; only the first call on a terminal ledger
    /// notifies.
    #[instrument(skip(self))]
    pub async fn settle(&self, match_id: &str) -> bool {
        let Some(handle) = self.store.get(match_id).await else {
            return false;
        };
        let notice = {
            let mut state = handle.lock().await;
            if !state.is_terminal() || !state.mark_reported() {
                return false;
            }
            state.disarm_timer();
            let winner = state
                .ledger()
                .resolution()
                .winner()
                .and_then(|mark| state.seats().address_of(mark))
                .map(normalize_address);
            TerminalNotice::new(match_id.to_string(), winner)
        };

        info!(winner = ?notice.winner, "Reporting terminal result");
        if let Err(e) = self.payout.notify(notice).await {
            warn!(error = %e, "Payout notification failed");
        }
        true
    }

    /// Tears a match down: stops its timer and drops it from the store.
    #[instrument(skip(self))]
    pub async fn abandon(&self, match_id: &str) -> Result<(), MatchError> {
        let handle = self
            .store
            .remove(match_id)
            .await
            .ok_or_else(|| MatchError::MatchNotFound(match_id.to_string()))?;
        handle.lock().await.disarm_timer();
        info!("Match abandoned");
        Ok(())
    }

    /// Re-arms the timer of an active match whose timer has exited.
    pub(crate) fn ensure_timer(&self, state: &mut MatchState, handle: &MatchHandle) {
        if state.is_active() && !state.timer_armed() {
            self.arm(state, handle);
        }
    }

    fn arm(&self, state: &mut MatchState, handle: &MatchHandle) {
        let timer = TurnTimer::spawn(
            self.clone(),
            Arc::clone(handle),
            state.match_id().clone(),
            self.shutdown.child_token(),
        );
        state.arm_timer(timer);
        debug!(match_id = %state.match_id(), "Turn timer armed");
    }

    /// Removes matches settled longer ago than the grace period.
    ///
    /// Returns the number evicted.
    #[instrument(skip(self))]
    pub async fn evict_settled(&self) -> usize {
        let mut evicted = 0;
        for match_id in self.store.ids().await {
            let Some(handle) = self.store.get(&match_id).await else {
                continue;
            };
            let expired = handle
                .lock()
                .await
                .reported_at()
                .is_some_and(|at| at.elapsed() >= self.eviction_grace);
            if expired && self.store.remove(&match_id).await.is_some() {
                evicted += 1;
            }
        }
        if evicted > 0 {
            info!(evicted, "Evicted settled matches");
        }
        evicted
    }

    /// Spawns the periodic eviction sweep.
    pub fn spawn_reaper(&self, interval: Duration) -> JoinHandle<()> {
        let coordinator = self.clone();
        let cancel = self.shutdown.clone();
        tokio::spawn(
            async move {
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(interval) => {
                            coordinator.evict_settled().await;
                        }
                    }
                }
                debug!("Reaper stopped");
            }
            .instrument(info_span!("match_reaper")),
        )
    }

    /// Cancels every turn timer and the reaper.
    pub fn shutdown(&self) {
        info!("Coordinator shutting down");
        self.shutdown.cancel();
    }

    async fn handle(&self, match_id: &str) -> Result<MatchHandle, MatchError> {
        self.store
            .get(match_id)
            .await
            .ok_or_else(|| MatchError::MatchNotFound(match_id.to_string()))
    }
}
