//! Room Store
//!
//! Canonical in-memory store of live rooms. One write lock per room
//! serializes every read-modify-write on that code; different rooms are
//! mutated fully independently.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::RwLock;

use crate::game::room::{PlayerId, Room, RoomStatus};

/// Length of generated room codes.
pub const ROOM_CODE_LEN: usize = 6;

/// Code alphabet: uppercase alphanumerics minus the ambiguous 0/O/1/I.
/// 32 symbols, so one byte of entropy maps evenly onto one symbol.
const CODE_ALPHABET: &[u8; 32] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Maximum live rooms at any instant.
    pub max_rooms: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { max_rooms: 10_000 }
    }
}

/// Store errors.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Live-room cap reached; creation refused, nothing modified.
    #[error("room store at capacity")]
    AtCapacity,
}

/// The room store.
pub struct RoomStore {
    config: StoreConfig,
    rooms: RwLock<BTreeMap<String, Arc<RwLock<Room>>>>,
}

impl RoomStore {
    /// Create an empty store.
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            rooms: RwLock::new(BTreeMap::new()),
        }
    }

    /// Create a room for `host` and return its code.
    ///
    /// Codes are drawn from UUIDv4 bytes and regenerated on collision.
    /// The loop has no fixed bound, but with the room cap far below the
    /// 32^6 code space a free code is found on the first draw in practice.
    pub async fn create(&self, host: PlayerId) -> Result<String, StoreError> {
        let mut rooms = self.rooms.write().await;
        if rooms.len() >= self.config.max_rooms {
            return Err(StoreError::AtCapacity);
        }

        let code = loop {
            let candidate = generate_code();
            if !rooms.contains_key(&candidate) {
                break candidate;
            }
        };

        let room = Room::new(code.clone(), host);
        rooms.insert(code.clone(), Arc::new(RwLock::new(room)));
        Ok(code)
    }

    /// Look up a room's lock by code.
    async fn slot(&self, code: &str) -> Option<Arc<RwLock<Room>>> {
        self.rooms.read().await.get(code).cloned()
    }

    /// Read a room without taking the write lock.
    pub async fn read<T>(&self, code: &str, f: impl FnOnce(&Room) -> T) -> Option<T> {
        let slot = self.slot(code).await?;
        let room = slot.read().await;
        Some(f(&room))
    }

    /// Atomically read-modify-write one room.
    ///
    /// The per-room write lock guarantees two concurrent updates on the
    /// same code never interleave; `None` means the code has no live room.
    pub async fn update<T>(&self, code: &str, f: impl FnOnce(&mut Room) -> T) -> Option<T> {
        let slot = self.slot(code).await?;
        let mut room = slot.write().await;
        Some(f(&mut room))
    }

    /// Delete a room. Returns false if the code had no live room.
    pub async fn remove(&self, code: &str) -> bool {
        self.rooms.write().await.remove(code).is_some()
    }

    /// Record that the room's broadcast group drained to zero.
    ///
    /// Keeps the earliest marker if one is already set, so repeated
    /// notifications do not extend the grace window.
    pub async fn mark_empty(&self, code: &str, at: Instant) {
        self.update(code, |room| {
            room.empty_since.get_or_insert(at);
        })
        .await;
    }

    /// Clear the empty marker after a re-subscribe.
    pub async fn clear_empty(&self, code: &str) {
        self.update(code, |room| {
            room.empty_since = None;
        })
        .await;
    }

    /// Codes of rooms due for retirement at `now`: empty past the grace
    /// window, or still waiting past the lobby lifetime.
    pub async fn expired(&self, now: Instant, grace: Duration, lobby_ttl: Duration) -> Vec<String> {
        let rooms = self.rooms.read().await;
        let mut due = Vec::new();

        for (code, slot) in rooms.iter() {
            let room = slot.read().await;
            let abandoned = room
                .empty_since
                .is_some_and(|since| now.saturating_duration_since(since) >= grace);
            let stale_lobby = room.status == RoomStatus::Waiting
                && now.saturating_duration_since(room.opened) >= lobby_ttl;
            if abandoned || stale_lobby {
                due.push(code.clone());
            }
        }

        due
    }

    /// Number of live rooms.
    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }
}

/// Draw a candidate code from fresh UUIDv4 bytes.
fn generate_code() -> String {
    let entropy = *uuid::Uuid::new_v4().as_bytes();
    entropy[..ROOM_CODE_LEN]
        .iter()
        .map(|b| CODE_ALPHABET[(b % 32) as usize] as char)
        .collect()
}
