//! Move Validator
//!
//! Authorizes a proposed move against current room state and claimed
//! identity. Pure and side-effect-free; the coordinator treats a denial
//! as a silent no-op, so only accepted moves ever reach a broadcast.

use thiserror::Error;

use crate::game::board::BOARD_CELLS;
use crate::game::room::{PlayerId, Room, RoomStatus, Seat};

/// Why a proposed move was denied.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum Denial {
    /// Acting identity is neither host nor guest of the room.
    #[error("not a participant")]
    NotParticipant,

    /// The room is not in the playing state.
    #[error("game not in progress")]
    NotPlaying,

    /// Cell index outside the 0-8 range.
    #[error("cell out of range")]
    OutOfRange,

    /// Cell already holds a mark.
    #[error("cell occupied")]
    Occupied,

    /// Acting identity does not match the turn owner.
    #[error("not your turn")]
    NotYourTurn,
}

/// Authorize a move. Returns the mover's seat when every check passes.
pub fn authorize(room: &Room, identity: PlayerId, cell: usize) -> Result<Seat, Denial> {
    let seat = room.seat_of(identity).ok_or(Denial::NotParticipant)?;

    if room.status != RoomStatus::Playing {
        return Err(Denial::NotPlaying);
    }
    if cell >= BOARD_CELLS {
        return Err(Denial::OutOfRange);
    }
    if room.board.cell(cell).is_some() {
        return Err(Denial::Occupied);
    }
    if seat != room.turn {
        return Err(Denial::NotYourTurn);
    }

    Ok(seat)
}
