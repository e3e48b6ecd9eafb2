//! Account Store
//!
//! Seam for the external account/statistics collaborator. The core only
//! needs two capabilities from it: resolving an identity to a display
//! name, and bumping win/loss/draw counters exactly once per finished
//! game. Everything else about accounts (issuance, persistence) lives
//! outside this crate.

use std::collections::BTreeMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::game::room::PlayerId;

/// Lifetime win/loss/draw counters for one identity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsRecord {
    /// Games won, including wins by forfeit.
    pub wins: u32,
    /// Games lost, including losses by forfeit.
    pub losses: u32,
    /// Drawn games.
    pub draws: u32,
}

/// The account/statistics collaborator, as the coordinator sees it.
///
/// Implementations must tolerate unknown identities: recording against an
/// identity that has never authenticated creates its record.
pub trait AccountStore: Send + Sync {
    /// Record or refresh an identity's display name at authentication.
    fn upsert_profile(&self, id: PlayerId, name: Option<String>);

    /// Resolve an identity to its display name, if known.
    fn display_name(&self, id: PlayerId) -> Option<String>;

    /// Current counters for an identity.
    fn stats(&self, id: PlayerId) -> StatsRecord;

    /// One finished game: winner's win-count and loser's loss-count.
    fn record_win(&self, winner: PlayerId, loser: PlayerId);

    /// One drawn game: both players' draw-counts.
    fn record_draw(&self, a: PlayerId, b: PlayerId);
}

#[derive(Clone, Debug, Default)]
struct AccountRecord {
    name: Option<String>,
    stats: StatsRecord,
}

/// In-memory account store.
#[derive(Default)]
pub struct InMemoryAccounts {
    records: RwLock<BTreeMap<PlayerId, AccountRecord>>,
}

impl InMemoryAccounts {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn with_record<T>(&self, id: PlayerId, f: impl FnOnce(&mut AccountRecord) -> T) -> T {
        // A poisoned lock only means some writer panicked mid-update;
        // the counters themselves stay usable.
        let mut records = self
            .records
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(records.entry(id).or_default())
    }
}

impl AccountStore for InMemoryAccounts {
    fn upsert_profile(&self, id: PlayerId, name: Option<String>) {
        self.with_record(id, |record| {
            if name.is_some() {
                record.name = name;
            }
        });
    }

    fn display_name(&self, id: PlayerId) -> Option<String> {
        let records = self
            .records
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        records.get(&id).and_then(|record| record.name.clone())
    }

    fn stats(&self, id: PlayerId) -> StatsRecord {
        let records = self
            .records
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        records.get(&id).map(|record| record.stats).unwrap_or_default()
    }

    fn record_win(&self, winner: PlayerId, loser: PlayerId) {
        self.with_record(winner, |record| record.stats.wins += 1);
        self.with_record(loser, |record| record.stats.losses += 1);
    }

    fn record_draw(&self, a: PlayerId, b: PlayerId) {
        self.with_record(a, |record| record.stats.draws += 1);
        self.with_record(b, |record| record.stats.draws += 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn player(byte: u8) -> PlayerId {
        PlayerId::new([byte; 16])
    }

    #[test]
    fn test_unknown_identity_has_empty_stats() {
        let accounts = InMemoryAccounts::new();
        assert_eq!(accounts.stats(player(1)), StatsRecord::default());
        assert_eq!(accounts.display_name(player(1)), None);
    }

    #[test]
    fn test_profile_upsert_and_lookup() {
        let accounts = InMemoryAccounts::new();
        accounts.upsert_profile(player(1), Some("alice".into()));
        assert_eq!(accounts.display_name(player(1)).as_deref(), Some("alice"));

        // Re-authenticating without a name keeps the known one.
        accounts.upsert_profile(player(1), None);
        assert_eq!(accounts.display_name(player(1)).as_deref(), Some("alice"));

        accounts.upsert_profile(player(1), Some("alicia".into()));
        assert_eq!(accounts.display_name(player(1)).as_deref(), Some("alicia"));
    }

    #[test]
    fn test_win_updates_both_sides() {
        let accounts = InMemoryAccounts::new();
        accounts.record_win(player(1), player(2));

        assert_eq!(accounts.stats(player(1)).wins, 1);
        assert_eq!(accounts.stats(player(2)).losses, 1);
        assert_eq!(accounts.stats(player(1)).losses, 0);
        assert_eq!(accounts.stats(player(2)).wins, 0);
    }

    #[test]
    fn test_draw_updates_both_sides() {
        let accounts = InMemoryAccounts::new();
        accounts.record_draw(player(1), player(2));

        assert_eq!(accounts.stats(player(1)).draws, 1);
        assert_eq!(accounts.stats(player(2)).draws, 1);
    }
}
