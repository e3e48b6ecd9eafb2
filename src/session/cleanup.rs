//! Cleanup Scheduler
//!
//! Retirement policy for abandoned rooms. The gateway runs the periodic
//! loop; this module decides what is due and removes it from the store.
//!
//! Two independent clocks:
//! - a room whose broadcast group has been empty for the grace period is
//!   purged; a re-subscribe before then clears the marker and the room
//!   survives.
//! - a room that never leaves `waiting` is reaped after a shorter lobby
//!   lifetime, so abandoned lobbies cannot accumulate unboundedly.

use std::time::{Duration, Instant};

use tracing::info;

use crate::session::store::RoomStore;

/// Cleanup policy knobs.
#[derive(Debug, Clone)]
pub struct CleanupConfig {
    /// How often the sweep runs.
    pub sweep_interval: Duration,
    /// How long an empty room survives before permanent deletion.
    pub grace_period: Duration,
    /// How long a room may sit in `waiting` before it is reaped.
    pub lobby_ttl: Duration,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(60),
            grace_period: Duration::from_secs(3600),
            lobby_ttl: Duration::from_secs(600),
        }
    }
}

/// One sweep: delete every room due for retirement at `now`.
///
/// Returns the removed codes so the caller can drop the matching
/// broadcast groups.
pub async fn sweep(store: &RoomStore, now: Instant, config: &CleanupConfig) -> Vec<String> {
    let due = store
        .expired(now, config.grace_period, config.lobby_ttl)
        .await;

    for code in &due {
        if store.remove(code).await {
            info!("room {} retired", code);
        }
    }

    due
}
