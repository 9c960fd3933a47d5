//! Process-lifetime store of match state.
//!
//! The map is guarded by an `RwLock` only for insert/remove/lookup. Each
//! match carries its own `Mutex`, which is the single critical section for
//! every append to that match: human moves and timer skips alike.

use chrono::{DateTime, Utc};
use derive_getters::Getters;
use serde::{Deserialize, Serialize};
use staked_tictactoe::{Mark, Outcome, Position};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::error::{MatchError, MoveRejection};
use crate::ledger::{LedgerEntry, MoveLedger, Seats};
use crate::timer::TurnTimer;

/// Opaque match identifier.
pub type MatchId = String;

/// Shared handle to one match's state.
pub type MatchHandle = Arc<Mutex<MatchState>>;

/// Everything the server knows about one match.
#[derive(Debug, Getters)]
pub struct MatchState {
    /// Match identifier.
    match_id: MatchId,
    /// Participant seats.
    seats: Seats,
    /// When the challenger created the match.
    created_at: DateTime<Utc>,
    /// When the opponent joined.
    started_at: Option<DateTime<Utc>>,
    /// Accepted entries.
    ledger: MoveLedger,
    /// Time allowed per turn.
    turn_timeout: Duration,
    /// Monotonic turn deadline, unset while waiting or terminal.
    deadline: Option<Instant>,
    /// Wall-clock form of the deadline for clients.
    deadline_at: Option<DateTime<Utc>>,
    /// When the terminal result was reported downstream.
    reported_at: Option<Instant>,
    #[getter(skip)]
    timer: Option<TurnTimer>,
}

impl MatchState {
    /// Creates a match with only the challenger seated.
    pub fn new(match_id: MatchId, challenger: &str, turn_timeout: Duration) -> Self {
        Self {
            match_id,
            seats: Seats::new(challenger),
            created_at: Utc::now(),
            started_at: None,
            ledger: MoveLedger::new(),
            turn_timeout,
            deadline: None,
            deadline_at: None,
            reported_at: None,
            timer: None,
        }
    }

    /// Seats the opponent and starts the turn clock.
    #[instrument(skip(self), fields(match_id = %self.match_id))]
    pub(crate) fn bind_opponent(&mut self, opponent: &str) -> Result<Mark, MatchError> {
        if let Some(mark) = self.seats.mark_of(opponent) {
            if mark == Mark::O {
                debug!("Opponent re-joined");
                return Ok(mark);
            }
            return Err(MatchError::SelfPlay);
        }
        if self.seats.is_full() {
            warn!(opponent, "Match already has two players");
            return Err(MatchError::MatchFull(self.match_id.clone()));
        }
        self.seats.bind_opponent(opponent);
        self.started_at = Some(Utc::now());
        self.rearm_deadline();
        info!(opponent, "Opponent seated, turn clock started");
        Ok(Mark::O)
    }

    /// Validates and appends a move under the caller's lock.
    pub(crate) fn propose(
        &mut self,
        pos: Position,
        address: &str,
    ) -> Result<usize, MoveRejection> {
        let len = self.ledger.propose(pos, address, &self.seats, Utc::now())?;
        self.rearm_deadline();
        Ok(len)
    }

    /// Appends a skip if slot `expected_len` is still open and overdue.
    pub(crate) fn expire_turn(&mut self, expected_len: usize) -> Option<usize> {
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => {}
            _ => {
                debug!(match_id = %self.match_id, "Deadline moved, expiry ignored");
                return None;
            }
        }
        let len = self
            .ledger
            .append_skip(expected_len, &self.seats, Utc::now())?;
        self.rearm_deadline();
        Some(len)
    }

    /// Clears the ledger and restarts the turn clock.
    ///
    /// A reported match stays reported: its result already went downstream
    /// and a replay on the same id must not pay out again.
    pub(crate) fn reset(&mut self) {
        self.ledger.reset();
        self.rearm_deadline();
    }

    fn rearm_deadline(&mut self) {
        if self.seats.is_full() && !self.ledger.resolution().is_terminal() {
            self.deadline = Some(Instant::now() + self.turn_timeout);
            let base = self.ledger.last_timestamp().unwrap_or_else(Utc::now);
            self.deadline_at = chrono::Duration::from_std(self.turn_timeout)
                .ok()
                .map(|timeout| base + timeout);
        } else {
            self.deadline = None;
            self.deadline_at = None;
        }
    }

    /// Whether the ledger has reached a win or draw.
    pub fn is_terminal(&self) -> bool {
        self.ledger.resolution().is_terminal()
    }

    /// Whether both seats are bound and the game is still running.
    pub fn is_active(&self) -> bool {
        self.seats.is_full() && !self.is_terminal()
    }

    /// Records that the terminal result went downstream.
    ///
    /// Returns `false` if it was already recorded.
    pub(crate) fn mark_reported(&mut self) -> bool {
        if self.reported_at.is_some() {
            return false;
        }
        self.reported_at = Some(Instant::now());
        true
    }

    /// Installs a freshly spawned timer, stopping any previous one.
    pub(crate) fn arm_timer(&mut self, timer: TurnTimer) {
        if let Some(old) = self.timer.replace(timer) {
            old.disarm();
        }
    }

    /// Stops the turn timer, if armed.
    pub(crate) fn disarm_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            debug!(match_id = %self.match_id, "Turn timer disarmed");
            timer.disarm();
        }
    }

    /// Whether a live timer is attached.
    pub fn timer_armed(&self) -> bool {
        self.timer.as_ref().is_some_and(TurnTimer::is_armed)
    }

    /// Presentation snapshot.
    pub fn summary(&self) -> MatchSummary {
        let resolution = self.ledger.resolution();
        MatchSummary {
            match_id: self.match_id.clone(),
            player_a: self.seats.player_a().clone(),
            player_b: self.seats.player_b().clone(),
            created_at: self.created_at,
            started_at: self.started_at,
            ledger_length: self.ledger.len(),
            next_mark: (!resolution.is_terminal()).then(|| resolution.next_mark()),
            outcome: resolution.outcome(),
            board: resolution.board().display(),
            deadline: self.deadline_at,
            reported: self.reported_at.is_some(),
        }
    }

    /// Copy of the entries after `known_length`.
    pub fn tail(&self, known_length: usize) -> Vec<LedgerEntry> {
        self.ledger.tail(known_length).to_vec()
    }
}

/// Match snapshot for the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchSummary {
    /// Match identifier.
    pub match_id: MatchId,
    /// Challenger address (X).
    pub player_a: String,
    /// Opponent address (O), if seated.
    pub player_b: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Time the opponent joined.
    pub started_at: Option<DateTime<Utc>>,
    /// Number of ledger entries.
    pub ledger_length: usize,
    /// Mark to move, unless the game is over.
    pub next_mark: Option<Mark>,
    /// Win, draw or in progress.
    pub outcome: Outcome,
    /// Human-readable board.
    pub board: String,
    /// Current turn deadline.
    pub deadline: Option<DateTime<Utc>>,
    /// Whether the result went to the payout collaborator.
    pub reported: bool,
}

/// Registry of live matches.
#[derive(Debug, Default)]
pub struct MatchStore {
    matches: RwLock<HashMap<MatchId, MatchHandle>>,
}

impl MatchStore {
    /// Creates an empty store.
    #[instrument]
    pub fn new() -> Self {
        info!("Creating match store");
        Self::default()
    }

    /// Inserts a new match.
    #[instrument(skip(self, state), fields(match_id = %state.match_id))]
    pub async fn create(&self, state: MatchState) -> Result<MatchHandle, MatchError> {
        let mut matches = self.matches.write().await;
        if matches.contains_key(&state.match_id) {
            warn!("Match already exists");
            return Err(MatchError::MatchExists(state.match_id));
        }
        let id = state.match_id.clone();
        let handle = Arc::new(Mutex::new(state));
        matches.insert(id, Arc::clone(&handle));
        info!(count = matches.len(), "Match stored");
        Ok(handle)
    }

    /// Looks up a match.
    pub async fn get(&self, match_id: &str) -> Option<MatchHandle> {
        let handle = self.matches.read().await.get(match_id).cloned();
        if handle.is_none() {
            debug!(match_id, "Match not found");
        }
        handle
    }

    /// Removes a match, returning its handle.
    #[instrument(skip(self))]
    pub async fn remove(&self, match_id: &str) -> Option<MatchHandle> {
        let removed = self.matches.write().await.remove(match_id);
        if removed.is_some() {
            info!("Match removed");
        }
        removed
    }

    /// Identifiers of all stored matches.
    pub async fn ids(&self) -> Vec<MatchId> {
        self.matches.read().await.keys().cloned().collect()
    }

    /// Number of stored matches.
    pub async fn len(&self) -> usize {
        self.matches.read().await.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.matches.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_rejects_duplicate_id() {
        let store = MatchStore::new();
        store
            .create(MatchState::new("m1".into(), "0xa", Duration::from_secs(120)))
            .await
            .unwrap();
        let dup = store
            .create(MatchState::new("m1".into(), "0xb", Duration::from_secs(120)))
            .await;
        assert_eq!(dup.unwrap_err(), MatchError::MatchExists("m1".into()));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_remove_then_get() {
        let store = MatchStore::new();
        store
            .create(MatchState::new("m1".into(), "0xa", Duration::from_secs(120)))
            .await
            .unwrap();
        assert!(store.remove("m1").await.is_some());
        assert!(store.get("m1").await.is_none());
        assert!(store.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_armed_only_when_seated() {
        let mut state = MatchState::new("m1".into(), "0xa", Duration::from_secs(120));
        assert!(state.deadline().is_none());
        state.bind_opponent("0xb").unwrap();
        assert!(state.deadline().is_some());
        assert!(state.summary().deadline.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_bind_opponent_rules() {
        let mut state = MatchState::new("m1".into(), "0xA", Duration::from_secs(120));
        assert_eq!(state.bind_opponent("0xa"), Err(MatchError::SelfPlay));
        assert_eq!(state.bind_opponent("0xb"), Ok(Mark::O));
        assert_eq!(state.bind_opponent("0xB"), Ok(Mark::O));
        assert_eq!(
            state.bind_opponent("0xc"),
            Err(MatchError::MatchFull("m1".into()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_expire_turn_waits_for_deadline() {
        let mut state = MatchState::new("m1".into(), "0xa", Duration::from_secs(120));
        state.bind_opponent("0xb").unwrap();
        assert_eq!(state.expire_turn(0), None);
        tokio::time::advance(Duration::from_secs(121)).await;
        assert_eq!(state.expire_turn(0), Some(1));
        assert_eq!(state.expire_turn(0), None);
    }
}
