//! Room State
//!
//! The durable record of one game session: seats, board, turn order,
//! status and outcome. Transitions are applied under the room store's
//! per-room lock; nothing here performs IO.

use std::fmt;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::game::board::{Board, Mark};

// =============================================================================
// PLAYER ID
// =============================================================================

/// Opaque player identity (16 bytes, derived from the auth subject).
///
/// Implements Ord for deterministic BTreeMap ordering. Serializes as a
/// hex string on the wire.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PlayerId([u8; 16]);

impl PlayerId {
    /// Create from raw bytes.
    pub const fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Get raw bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Parse from a 32-char hex string.
    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        let arr: [u8; 16] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    /// Short hex prefix for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PlayerId({})", self.short())
    }
}

impl Serialize for PlayerId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for PlayerId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).ok_or_else(|| serde::de::Error::custom("expected 32 hex chars"))
    }
}

// =============================================================================
// SEATS, STATUS, OUTCOME
// =============================================================================

/// Which of the two seats a player occupies. Also names the turn owner.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Seat {
    /// The room creator. Always present; plays `X`.
    Host,
    /// The second player. Plays `O`.
    Guest,
}

impl Seat {
    /// The mark this seat plays.
    pub fn mark(self) -> Mark {
        match self {
            Seat::Host => Mark::X,
            Seat::Guest => Mark::O,
        }
    }

    /// The opposing seat.
    pub fn other(self) -> Seat {
        match self {
            Seat::Host => Seat::Guest,
            Seat::Guest => Seat::Host,
        }
    }
}

/// Room lifecycle status.
///
/// Monotonic waiting -> playing -> finished, except guest departure
/// returns playing -> waiting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    /// Host present, no guest seated.
    Waiting,
    /// Both seats filled, game in progress.
    Playing,
    /// Terminal for the game; room lingers for result display until cleanup.
    Finished,
}

/// How a finished game ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameResult {
    /// One seat completed a line, or won by forfeit.
    Win,
    /// Board filled with no line.
    Draw,
}

/// Result of applying an accepted move.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MoveOutcome {
    /// Game continues; turn has flipped.
    InPlay,
    /// The mover completed a line.
    Won,
    /// Board full, no line.
    Drawn,
}

// =============================================================================
// ROOM
// =============================================================================

/// One game session.
pub struct Room {
    /// Short shareable identifier; immutable, the broadcast-group key.
    pub code: String,
    /// Room creator's identity.
    pub host: PlayerId,
    /// Second player's identity; absent while waiting.
    pub guest: Option<PlayerId>,
    /// Current board.
    pub board: Board,
    /// Whose move is next.
    pub turn: Seat,
    /// Lifecycle status.
    pub status: RoomStatus,
    /// Set once, together with the transition into `Finished`.
    pub result: Option<GameResult>,
    /// Set only when `result` is `Win`.
    pub winner: Option<PlayerId>,
    /// Wall-clock creation time, exposed in the public view.
    pub created_at: DateTime<Utc>,
    /// Monotonic creation time, drives lobby expiry.
    pub opened: Instant,
    /// Set when zero connections remain subscribed; drives the grace-window
    /// purge. Cleared on re-subscribe.
    pub empty_since: Option<Instant>,
}

impl Room {
    /// Create a new room in `Waiting` with the given host.
    pub fn new(code: String, host: PlayerId) -> Self {
        Self {
            code,
            host,
            guest: None,
            board: Board::new(),
            turn: Seat::Host,
            status: RoomStatus::Waiting,
            result: None,
            winner: None,
            created_at: Utc::now(),
            opened: Instant::now(),
            empty_since: None,
        }
    }

    /// Which seat the identity occupies, if any.
    pub fn seat_of(&self, id: PlayerId) -> Option<Seat> {
        if id == self.host {
            Some(Seat::Host)
        } else if self.guest == Some(id) {
            Some(Seat::Guest)
        } else {
            None
        }
    }

    /// The identity occupying a seat, if filled.
    pub fn occupant(&self, seat: Seat) -> Option<PlayerId> {
        match seat {
            Seat::Host => Some(self.host),
            Seat::Guest => self.guest,
        }
    }

    /// waiting --guest joins--> playing.
    ///
    /// Board reset to all-empty, host moves first. The caller has already
    /// checked that the seat is free and the identity is not the host.
    pub fn admit_guest(&mut self, guest: PlayerId) {
        self.guest = Some(guest);
        self.board = Board::new();
        self.turn = Seat::Host;
        self.status = RoomStatus::Playing;
    }

    /// Apply an already-authorized move for `seat` at `cell`.
    ///
    /// Places the seat's mark, evaluates the board once, and either flips
    /// the turn or finishes the game.
    pub fn apply_move(&mut self, seat: Seat, cell: usize) -> MoveOutcome {
        self.board.place(cell, seat.mark());

        if self.board.winner().is_some() {
            self.finish(GameResult::Win, self.occupant(seat));
            MoveOutcome::Won
        } else if self.board.is_full() {
            self.finish(GameResult::Draw, None);
            MoveOutcome::Drawn
        } else {
            self.turn = seat.other();
            MoveOutcome::InPlay
        }
    }

    /// playing --guest disconnects--> waiting.
    ///
    /// Guest reference cleared, board reset, host moves first. The host is
    /// not penalized; the room stays joinable under the same code.
    pub fn guest_departed(&mut self) {
        self.guest = None;
        self.board = Board::new();
        self.turn = Seat::Host;
        self.status = RoomStatus::Waiting;
    }

    /// playing --host disconnects--> finished.
    ///
    /// The guest is declared winner by forfeit. Host departure always ends
    /// the game because the room is keyed by and owned by the host.
    /// Returns the winner's identity.
    pub fn host_departed(&mut self) -> Option<PlayerId> {
        let winner = self.guest;
        self.finish(GameResult::Win, winner);
        winner
    }

    /// Enter `Finished`, setting result and winner exactly once.
    fn finish(&mut self, result: GameResult, winner: Option<PlayerId>) {
        if self.status == RoomStatus::Finished {
            return;
        }
        self.status = RoomStatus::Finished;
        self.result = Some(result);
        self.winner = winner;
    }
}

// =============================================================================
// SNAPSHOT
// =============================================================================

/// A seated player in the client-visible view.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerRef {
    /// The player's identity.
    pub id: PlayerId,
    /// Display name, resolved through the account store.
    pub name: Option<String>,
}

/// Both seats in the client-visible view.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomPlayers {
    /// The host seat.
    pub host: PlayerRef,
    /// The guest seat, if filled.
    pub guest: Option<PlayerRef>,
}

/// The full client-visible room state, broadcast after every mutating
/// transition and returned by room lookups.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSnapshot {
    /// Room code.
    pub code: String,
    /// Current board.
    pub board: Board,
    /// Whose move is next.
    pub turn: Seat,
    /// Lifecycle status.
    pub status: RoomStatus,
    /// Outcome, once finished.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<GameResult>,
    /// Winner, when the result is a win.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner: Option<PlayerId>,
    /// Seated players.
    pub players: RoomPlayers,
    /// When the room was created.
    pub created_at: DateTime<Utc>,
}

impl Room {
    /// Build the client-visible snapshot, resolving display names through
    /// the given lookup.
    pub fn snapshot(&self, resolve: impl Fn(PlayerId) -> Option<String>) -> RoomSnapshot {
        RoomSnapshot {
            code: self.code.clone(),
            board: self.board,
            turn: self.turn,
            status: self.status,
            result: self.result,
            winner: self.winner,
            players: RoomPlayers {
                host: PlayerRef {
                    id: self.host,
                    name: resolve(self.host),
                },
                guest: self.guest.map(|id| PlayerRef {
                    id,
                    name: resolve(id),
                }),
            },
            created_at: self.created_at,
        }
    }
}
