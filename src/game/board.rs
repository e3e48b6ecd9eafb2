//! Board Engine
//!
//! Pure win/draw evaluation over the fixed 3x3 grid.
//! No identities, no side effects; the coordinator is the only caller.

use serde::{Deserialize, Serialize};

/// Number of cells on the board.
pub const BOARD_CELLS: usize = 9;

/// The 8 winning triples, scanned in fixed order:
/// rows, then columns, then diagonals.
const LINES: [[usize; 3]; 8] = [
    [0, 1, 2],
    [3, 4, 5],
    [6, 7, 8],
    [0, 3, 6],
    [1, 4, 7],
    [2, 5, 8],
    [0, 4, 8],
    [2, 4, 6],
];

/// A player's mark on the board.
///
/// The host always plays `X`, the guest `O`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mark {
    /// Host mark.
    X,
    /// Guest mark.
    O,
}

/// The 3x3 board as a fixed-length sequence of cells.
///
/// Cells are indexed 0..9 row-major. A cell is either empty or holds a
/// mark; marks are never removed within a game.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Board([Option<Mark>; BOARD_CELLS]);

impl Board {
    /// Create an all-empty board.
    pub const fn new() -> Self {
        Self([None; BOARD_CELLS])
    }

    /// Get the mark at a cell, if any. Out-of-range indices read as empty.
    pub fn cell(&self, index: usize) -> Option<Mark> {
        self.0.get(index).copied().flatten()
    }

    /// Place a mark at a cell. Out-of-range indices are ignored; the
    /// validator rejects them before this is reached.
    pub fn place(&mut self, index: usize, mark: Mark) {
        if let Some(slot) = self.0.get_mut(index) {
            *slot = Some(mark);
        }
    }

    /// Check whether a line of three identical non-empty marks exists.
    ///
    /// Returns the first matching mark in scan order. Order only matters
    /// for determinism in tests: at most one player can complete a line
    /// per accepted move.
    pub fn winner(&self) -> Option<Mark> {
        for [a, b, c] in LINES {
            if let Some(mark) = self.0[a] {
                if self.0[b] == Some(mark) && self.0[c] == Some(mark) {
                    return Some(mark);
                }
            }
        }
        None
    }

    /// True iff no empty cells remain.
    pub fn is_full(&self) -> bool {
        self.0.iter().all(|cell| cell.is_some())
    }

    /// Cells as a slice, for snapshots.
    pub fn cells(&self) -> &[Option<Mark>; BOARD_CELLS] {
        &self.0
    }
}

impl From<[Option<Mark>; BOARD_CELLS]> for Board {
    fn from(cells: [Option<Mark>; BOARD_CELLS]) -> Self {
        Self(cells)
    }
}
