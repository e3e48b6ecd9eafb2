//! # Gridlock Server
//!
//! Authoritative server for two-player grid matches played over
//! persistent WebSocket connections. Players create or join a room by
//! short code; the server owns board state, turn order, win/draw
//! detection, and room lifecycle including abandonment cleanup.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      GRIDLOCK SERVER                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  game/           - Deterministic game logic                  │
//! │  ├── board.rs    - Win/draw evaluation over the 3x3 grid     │
//! │  ├── room.rs     - Room entity, seats, status, snapshots     │
//! │  └── rules.rs    - Move authorization                        │
//! │                                                              │
//! │  session/        - Room lifecycle                            │
//! │  ├── store.rs    - Canonical store, per-room serialization   │
//! │  ├── coordinator.rs - Join/move/departure state machine      │
//! │  └── cleanup.rs  - Grace-window and lobby-TTL retirement     │
//! │                                                              │
//! │  network/        - Realtime surface                          │
//! │  ├── server.rs   - WebSocket gateway, broadcast groups       │
//! │  ├── protocol.rs - Message types                             │
//! │  └── auth.rs     - Token verification, identity binding      │
//! │                                                              │
//! │  accounts.rs     - External account/stats store seam         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Authority Guarantees
//!
//! - Identity binds to a connection once, at authentication; event
//!   payloads never carry (and are never trusted for) identity.
//! - All mutation of one room is serialized behind its store lock, so a
//!   move is fully applied or fully rejected before any broadcast.
//! - Only accepted moves and real transitions broadcast; rejected moves
//!   are invisible to everyone but the sender.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod accounts;
pub mod game;
pub mod network;
pub mod session;

// Re-export commonly used types
pub use accounts::{AccountStore, InMemoryAccounts, StatsRecord};
pub use game::board::{Board, Mark, BOARD_CELLS};
pub use game::room::{PlayerId, Room, RoomSnapshot, RoomStatus, Seat};
pub use network::server::{Gateway, GatewayConfig};
pub use session::coordinator::Coordinator;
pub use session::store::{RoomStore, StoreConfig};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
