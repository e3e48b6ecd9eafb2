//! Deterministic game logic: board evaluation, room state, move rules.
//!
//! ## Module Structure
//!
//! - `board`: Pure win/draw evaluation over the 3x3 grid
//! - `room`: Room entity, seats, lifecycle status, snapshots
//! - `rules`: Move authorization against room state and identity
//!
//! Nothing here performs IO; all mutation happens under the room store's
//! per-room lock.

pub mod board;
pub mod room;
pub mod rules;

// Re-export key types
pub use board::{Board, Mark, BOARD_CELLS};
pub use room::{GameResult, PlayerId, Room, RoomSnapshot, RoomStatus, Seat};
pub use rules::{authorize, Denial};
