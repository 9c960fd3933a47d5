//! Board resolver: projects an ordered slot sequence onto a board.
//!
//! The mark for each entry comes from its position in the sequence (even
//! slots X, odd slots O). Whatever mark a stored entry claims is ignored,
//! so a replayed or malformed entry cannot change whose turn it was.

use crate::rules::{check_winner, is_full};
use crate::{Board, Mark, Outcome, Position, Slot, Square};
use serde::{Deserialize, Serialize};
use tracing::instrument;

/// Number of turn slots in a match.
pub const MAX_SLOTS: usize = 9;

/// Why a slot sequence has no valid projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display, derive_more::Error)]
pub enum ResolveError {
    /// A cell was claimed twice.
    #[display("cell {} is used more than once", _0.to_index())]
    CellReused(#[error(not(source))] Position),
    /// An entry follows a win or draw.
    #[display("entry {} follows a terminal result", _0)]
    MoveAfterTerminal(#[error(not(source))] usize),
}

/// Board, terminal state and turn bookkeeping derived from a slot sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    board: Board,
    outcome: Outcome,
    slots_consumed: usize,
}

impl Resolution {
    /// Resolution of the empty sequence.
    pub fn new() -> Self {
        Self {
            board: Board::new(),
            outcome: Outcome::InProgress,
            slots_consumed: 0,
        }
    }

    /// Applies one more slot, keeping the projection in step with a ledger.
    ///
    /// # Errors
    ///
    /// Fails without modifying `self` if the sequence is already terminal or
    /// the cell is taken.
    pub fn advance(&mut self, slot: Slot) -> Result<Mark, ResolveError> {
        if self.outcome.is_terminal() {
            return Err(ResolveError::MoveAfterTerminal(self.slots_consumed));
        }
        let mark = self.next_mark();
        if let Slot::Cell(pos) = slot {
            if !self.board.is_empty(pos) {
                return Err(ResolveError::CellReused(pos));
            }
            self.board.set(pos, Square::Occupied(mark));
        }
        self.slots_consumed += 1;
        self.outcome = evaluate(&self.board, self.slots_consumed);
        Ok(mark)
    }

    /// The projected board.
    pub fn board(&self) -> &Board {
        &self.board
    }

    /// Win, draw or still in progress.
    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    /// The winning mark, if any.
    pub fn winner(&self) -> Option<Mark> {
        self.outcome.winner()
    }

    /// The winning line, if any.
    pub fn winning_line(&self) -> Option<[Position; 3]> {
        match self.outcome {
            Outcome::Won { line, .. } => Some(line),
            _ => None,
        }
    }

    /// Whether the sequence ended in a draw.
    pub fn is_draw(&self) -> bool {
        self.outcome == Outcome::Draw
    }

    /// Whether no further entries are legal.
    pub fn is_terminal(&self) -> bool {
        self.outcome.is_terminal()
    }

    /// Turn slots used so far, skips included.
    pub fn slots_consumed(&self) -> usize {
        self.slots_consumed
    }

    /// Mark owning the next turn slot.
    pub fn next_mark(&self) -> Mark {
        Mark::for_slot(self.slots_consumed)
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Self::new()
    }
}

fn evaluate(board: &Board, slots_consumed: usize) -> Outcome {
    if let Some((mark, line)) = check_winner(board) {
        Outcome::Won { mark, line }
    } else if is_full(board) || slots_consumed >= MAX_SLOTS {
        Outcome::Draw
    } else {
        Outcome::InProgress
    }
}

/// Resolves an ordered sequence of slots.
///
/// Pure and deterministic: the same sequence always yields the same
/// resolution.
///
/// # Errors
///
/// Returns [`ResolveError`] for a reused cell or for any entry after a
/// terminal result.
#[instrument(level = "trace", skip(slots))]
pub fn resolve<I>(slots: I) -> Result<Resolution, ResolveError>
where
    I: IntoIterator<Item = Slot>,
{
    let mut resolution = Resolution::new();
    for slot in slots {
        resolution.advance(slot)?;
    }
    Ok(resolution)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cells(indices: &[i64]) -> Vec<Slot> {
        indices
            .iter()
            .map(|i| Slot::Cell(Position::from_index(*i).unwrap()))
            .collect()
    }

    #[test]
    fn test_empty_sequence_in_progress() {
        let res = resolve(Vec::new()).unwrap();
        assert_eq!(res.outcome(), Outcome::InProgress);
        assert_eq!(res.next_mark(), Mark::X);
    }

    #[test]
    fn test_advance_rejects_without_mutating() {
        let mut res = resolve(cells(&[4])).unwrap();
        let before = res.clone();
        assert_eq!(
            res.advance(Slot::Cell(Position::Center)),
            Err(ResolveError::CellReused(Position::Center))
        );
        assert_eq!(res, before);
    }

    #[test]
    fn test_skip_consumes_slot_not_cell() {
        let mut slots = cells(&[0]);
        slots.push(Slot::Skip);
        let res = resolve(slots).unwrap();
        assert_eq!(res.slots_consumed(), 2);
        assert_eq!(res.board().occupied(), 1);
        assert_eq!(res.next_mark(), Mark::X);
    }
}
