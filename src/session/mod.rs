//! Room lifecycle: canonical store, coordinator state machine, cleanup.
//!
//! ## Module Structure
//!
//! - `store`: In-memory room store with per-room write serialization
//! - `coordinator`: Join/move/departure transitions and snapshot emission
//! - `cleanup`: Retirement policy for abandoned rooms and stale lobbies

pub mod cleanup;
pub mod coordinator;
pub mod store;

// Re-export key types
pub use cleanup::CleanupConfig;
pub use coordinator::{Coordinator, JoinError, JoinOutcome, MoveReply};
pub use store::{RoomStore, StoreConfig, StoreError, ROOM_CODE_LEN};
