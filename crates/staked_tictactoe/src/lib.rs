//! Pure tic-tac-toe logic for staked matches.
//!
//! Everything here is synchronous and free of I/O: board types, the win and
//! draw rules, and the resolver that projects a ledger of turn slots onto a
//! board.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod position;
mod resolver;
pub mod rules;
mod types;

pub use position::{Position, Slot};
pub use resolver::{MAX_SLOTS, Resolution, ResolveError, resolve};
pub use types::{Board, Mark, Outcome, Square};
