//! Append-only move ledger for one match.
//!
//! The ledger owns turn-order enforcement and cell legality. It is plain
//! data: callers serialize access through the match lock in
//! [`MatchStore`](crate::MatchStore).

use chrono::{DateTime, Utc};
use derive_getters::Getters;
use serde::{Deserialize, Serialize};
use staked_tictactoe::{Mark, Position, Resolution, ResolveError, Slot};
use tracing::{debug, info, instrument, warn};

use crate::error::MoveRejection;

/// Normalizes a wallet address for comparison.
pub fn normalize_address(address: &str) -> String {
    address.trim().to_lowercase()
}

/// One accepted entry. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Eq, Getters, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Cell played, or skip.
    slot: Slot,
    /// Mark derived from the entry's turn slot.
    mark: Mark,
    /// Address of the participant owning the slot.
    address: String,
    /// Server time the entry was appended.
    timestamp: DateTime<Utc>,
}

/// The two participant seats of a match.
#[derive(Debug, Clone, PartialEq, Eq, Getters, Serialize, Deserialize)]
pub struct Seats {
    /// Challenger address, plays X.
    player_a: String,
    /// Opponent address, plays O. Unset while waiting.
    player_b: Option<String>,
}

impl Seats {
    /// Seats with only the challenger bound.
    pub fn new(challenger: &str) -> Self {
        Self {
            player_a: normalize_address(challenger),
            player_b: None,
        }
    }

    /// Binds the opponent seat.
    pub(crate) fn bind_opponent(&mut self, opponent: &str) {
        self.player_b = Some(normalize_address(opponent));
    }

    /// Whether both seats are bound.
    pub fn is_full(&self) -> bool {
        self.player_b.is_some()
    }

    /// Mark assigned to an address, if it holds a seat.
    pub fn mark_of(&self, address: &str) -> Option<Mark> {
        let address = normalize_address(address);
        if self.player_a == address {
            Some(Mark::X)
        } else if self.player_b.as_deref() == Some(address.as_str()) {
            Some(Mark::O)
        } else {
            None
        }
    }

    /// Address holding a mark.
    pub fn address_of(&self, mark: Mark) -> Option<&str> {
        match mark {
            Mark::X => Some(self.player_a.as_str()),
            Mark::O => self.player_b.as_deref(),
        }
    }
}

/// Ordered log of accepted entries with its cached board projection.
///
/// The cached [`Resolution`] always equals `resolve` over the entries.
/// `epoch` counts resets, so a reader can tell a rewritten ledger from an
/// extended one of the same length.
#[derive(Debug, Clone, Default)]
pub struct MoveLedger {
    entries: Vec<LedgerEntry>,
    resolution: Resolution,
    epoch: u64,
}

impl MoveLedger {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates and appends a move at `pos` for `address`.
    ///
    /// Checks run in order and the first failure wins: terminal state, cell
    /// occupied, seat lookup, opponent bound, turn ownership. The range check
    /// happens before a [`Position`] exists.
    ///
    /// Returns the new ledger length.
    #[instrument(skip(self, seats, now), fields(len = self.entries.len()))]
    pub fn propose(
        &mut self,
        pos: Position,
        address: &str,
        seats: &Seats,
        now: DateTime<Utc>,
    ) -> Result<usize, MoveRejection> {
        if self.resolution.is_terminal() {
            debug!(outcome = ?self.resolution.outcome(), "Move after terminal result");
            return Err(MoveRejection::GameAlreadyOver);
        }

        if !self.resolution.board().is_empty(pos) {
            debug!(position = %pos, "Cell already occupied");
            return Err(MoveRejection::PositionTaken);
        }

        let mark = seats.mark_of(address).ok_or_else(|| {
            warn!(address, "Address holds no seat in this match");
            MoveRejection::UnknownPlayer
        })?;

        if !seats.is_full() {
            debug!("Opponent not bound yet");
            return Err(MoveRejection::MatchNotReady);
        }

        let expected = self.resolution.next_mark();
        if mark != expected {
            debug!(?mark, ?expected, "Player tried to move out of turn");
            return Err(MoveRejection::WrongTurn);
        }

        self.append(Slot::Cell(pos), seats, now)
            .map_err(|e| match e {
                ResolveError::CellReused(_) => MoveRejection::PositionTaken,
                ResolveError::MoveAfterTerminal(_) => MoveRejection::GameAlreadyOver,
            })
    }

    /// Appends a skip for the player owning slot `expected_len`.
    ///
    /// Returns `None` without touching the ledger when it has already moved
    /// past that slot, is terminal, or the match is not fully seated. This
    /// makes duplicate timer firings harmless.
    #[instrument(skip(self, seats, now), fields(len = self.entries.len()))]
    pub fn append_skip(
        &mut self,
        expected_len: usize,
        seats: &Seats,
        now: DateTime<Utc>,
    ) -> Option<usize> {
        if self.entries.len() != expected_len {
            debug!(expected_len, "Turn already advanced, skip dropped");
            return None;
        }
        if self.resolution.is_terminal() || !seats.is_full() {
            debug!("Match not skippable");
            return None;
        }
        match self.append(Slot::Skip, seats, now) {
            Ok(len) => Some(len),
            Err(e) => {
                debug!(error = %e, "Skip not appended");
                None
            }
        }
    }

    fn append(
        &mut self,
        slot: Slot,
        seats: &Seats,
        now: DateTime<Utc>,
    ) -> Result<usize, ResolveError> {
        let mark = self.resolution.advance(slot)?;
        let address = seats.address_of(mark).unwrap_or_default().to_string();
        info!(%slot, ?mark, address = %address, "Ledger entry appended");
        self.entries.push(LedgerEntry {
            slot,
            mark,
            address,
            timestamp: now,
        });
        Ok(self.entries.len())
    }

    /// All entries in order.
    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    /// Entries after the first `known_length`.
    ///
    /// A client ahead of the ledger (it was reset) gets the whole ledger.
    pub fn tail(&self, known_length: usize) -> &[LedgerEntry] {
        if known_length > self.entries.len() {
            &self.entries
        } else {
            &self.entries[known_length..]
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the ledger is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Board projection and terminal state.
    pub fn resolution(&self) -> &Resolution {
        &self.resolution
    }

    /// Timestamp of the latest entry.
    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.entries.last().map(|e| e.timestamp)
    }

    /// Number of resets so far.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Clears every entry and starts a new epoch.
    #[instrument(skip(self), fields(len = self.entries.len()))]
    pub fn reset(&mut self) {
        self.entries.clear();
        self.resolution = Resolution::new();
        self.epoch += 1;
        info!(epoch = self.epoch, "Ledger reset");
    }
}
