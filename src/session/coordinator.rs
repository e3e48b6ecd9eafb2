//! Session Coordinator
//!
//! The state machine driving room lifecycle (waiting -> playing ->
//! finished) and turn transitions. Consumes the move validator and board
//! engine, mutates the room store, and tells the gateway what to send:
//! every mutating transition yields exactly one snapshot to broadcast;
//! rejected moves and idempotent re-joins yield none.

use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tracing::{debug, info};

use crate::accounts::AccountStore;
use crate::game::room::{MoveOutcome, PlayerId, Room, RoomSnapshot, RoomStatus, Seat};
use crate::game::rules::{authorize, Denial};
use crate::session::store::{RoomStore, StoreError};

/// Why a join request was refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum JoinError {
    /// No live room under that code.
    #[error("room not found")]
    NotFound,

    /// Both seats already taken by other identities.
    #[error("room is full")]
    Full,
}

/// Result of a join request.
#[derive(Debug)]
pub enum JoinOutcome {
    /// The identity is seated. When `broadcast` is set the join changed
    /// room state (guest attached) and the snapshot goes to the whole
    /// group; otherwise it was an idempotent re-join and the snapshot
    /// goes only to the joiner.
    Seated {
        /// Current room state.
        snapshot: RoomSnapshot,
        /// Whether the join mutated the room.
        broadcast: bool,
    },

    /// Refused; the reason goes only to the requester.
    Refused(JoinError),
}

/// Result of a move request.
#[derive(Debug)]
pub enum MoveReply {
    /// Accepted and applied; broadcast this snapshot to the room.
    Applied(RoomSnapshot),

    /// Denied; a silent no-op for the room, notice only to the sender.
    Rejected(Denial),

    /// No live room under that code.
    NotFound,
}

/// How a finished game settles into the account store.
enum Settlement {
    Win { winner: PlayerId, loser: PlayerId },
    Draw { host: PlayerId, guest: PlayerId },
}

/// The session coordinator.
pub struct Coordinator {
    store: Arc<RoomStore>,
    accounts: Arc<dyn AccountStore>,
}

impl Coordinator {
    /// Create a coordinator over the given store and account collaborator.
    pub fn new(store: Arc<RoomStore>, accounts: Arc<dyn AccountStore>) -> Self {
        Self { store, accounts }
    }

    /// The room store backing this coordinator.
    pub fn store(&self) -> &Arc<RoomStore> {
        &self.store
    }

    /// Create a room owned by `host` and return its code.
    ///
    /// This is the operation the request/response layer wraps; the host
    /// then attaches over a realtime connection using the code.
    pub async fn create_room(&self, host: PlayerId) -> Result<String, StoreError> {
        let code = self.store.create(host).await?;
        info!("room {} created by {}", code, host.short());
        Ok(code)
    }

    /// Public view of a room, for lookups.
    pub async fn room_view(&self, code: &str) -> Option<RoomSnapshot> {
        self.store
            .read(code, |room| self.snapshot(room))
            .await
    }

    /// Seat an identity in a room.
    ///
    /// A second distinct identity attaches as guest and starts the game
    /// (board reset, host to move). A re-join of an already-seated
    /// identity is idempotent: no mutation, no broadcast. A third
    /// identity is refused.
    pub async fn join(&self, code: &str, identity: PlayerId) -> JoinOutcome {
        let outcome = self
            .store
            .update(code, |room| {
                if room.seat_of(identity).is_some() {
                    return Ok((self.snapshot(room), false));
                }
                if room.status == RoomStatus::Waiting && room.guest.is_none() {
                    room.admit_guest(identity);
                    return Ok((self.snapshot(room), true));
                }
                Err(JoinError::Full)
            })
            .await;

        match outcome {
            None => JoinOutcome::Refused(JoinError::NotFound),
            Some(Err(reason)) => {
                debug!("join of {} refused for {}: {}", code, identity.short(), reason);
                JoinOutcome::Refused(reason)
            }
            Some(Ok((snapshot, broadcast))) => {
                if broadcast {
                    info!("guest {} joined room {}", identity.short(), code);
                }
                JoinOutcome::Seated { snapshot, broadcast }
            }
        }
    }

    /// Apply a move for `identity` at `cell`.
    ///
    /// Validation and mutation happen under the room's write lock: the
    /// move is fully applied or fully rejected before any broadcast, so
    /// two concurrent moves on the same cell can never both succeed.
    pub async fn make_move(&self, code: &str, identity: PlayerId, cell: usize) -> MoveReply {
        let result = self
            .store
            .update(code, |room| {
                let seat = authorize(room, identity, cell)?;
                let outcome = room.apply_move(seat, cell);

                let settlement = match outcome {
                    MoveOutcome::InPlay => None,
                    MoveOutcome::Won => room
                        .occupant(seat)
                        .zip(room.occupant(seat.other()))
                        .map(|(winner, loser)| Settlement::Win { winner, loser }),
                    MoveOutcome::Drawn => room
                        .guest
                        .map(|guest| Settlement::Draw { host: room.host, guest }),
                };

                Ok((self.snapshot(room), settlement))
            })
            .await;

        match result {
            None => MoveReply::NotFound,
            Some(Err(denial)) => {
                debug!("move in {} by {} denied: {}", code, identity.short(), denial);
                MoveReply::Rejected(denial)
            }
            Some(Ok((snapshot, settlement))) => {
                if let Some(settlement) = settlement {
                    self.settle(code, settlement);
                }
                MoveReply::Applied(snapshot)
            }
        }
    }

    /// Handle a seated identity leaving the room (leave event or dropped
    /// connection).
    ///
    /// Guest departure is recoverable: the room returns to waiting with a
    /// fresh board. Host departure ends the game, crediting the guest
    /// with a win by forfeit. Returns a snapshot to broadcast when the
    /// departure changed room state.
    pub async fn departure(&self, code: &str, identity: PlayerId) -> Option<RoomSnapshot> {
        let outcome = self
            .store
            .update(code, |room| {
                if room.status != RoomStatus::Playing {
                    return None;
                }
                match room.seat_of(identity)? {
                    Seat::Guest => {
                        room.guest_departed();
                        info!("guest {} left room {}, back to waiting", identity.short(), code);
                        Some((self.snapshot(room), None))
                    }
                    Seat::Host => {
                        let winner = room.host_departed();
                        info!("host {} left room {}, forfeit", identity.short(), code);
                        let settlement = winner.map(|winner| Settlement::Win {
                            winner,
                            loser: identity,
                        });
                        Some((self.snapshot(room), settlement))
                    }
                }
            })
            .await??;

        let (snapshot, settlement) = outcome;
        if let Some(settlement) = settlement {
            self.settle(code, settlement);
        }
        Some(snapshot)
    }

    /// Record that a room's broadcast group drained to zero.
    pub async fn room_emptied(&self, code: &str) {
        self.store.mark_empty(code, Instant::now()).await;
    }

    /// Record that a room regained a subscriber.
    pub async fn room_occupied(&self, code: &str) {
        self.store.clear_empty(code).await;
    }

    /// Push one finished game into the account store.
    fn settle(&self, code: &str, settlement: Settlement) {
        match settlement {
            Settlement::Win { winner, loser } => {
                info!("room {} finished: {} beats {}", code, winner.short(), loser.short());
                self.accounts.record_win(winner, loser);
            }
            Settlement::Draw { host, guest } => {
                info!("room {} finished: draw", code);
                self.accounts.record_draw(host, guest);
            }
        }
    }

    fn snapshot(&self, room: &Room) -> RoomSnapshot {
        room.snapshot(|id| self.accounts.display_name(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::InMemoryAccounts;
    use crate::game::board::Mark;
    use crate::game::room::{GameResult, RoomStatus};
    use crate::session::store::StoreConfig;

    fn player(byte: u8) -> PlayerId {
        PlayerId::new([byte; 16])
    }

    fn coordinator() -> (Coordinator, Arc<InMemoryAccounts>) {
        let accounts = Arc::new(InMemoryAccounts::new());
        let store = Arc::new(RoomStore::new(StoreConfig::default()));
        (Coordinator::new(store, accounts.clone()), accounts)
    }

    async fn playing_room(coordinator: &Coordinator) -> String {
        let code = coordinator.create_room(player(1)).await.unwrap();
        coordinator.join(&code, player(2)).await;
        code
    }

    fn expect_applied(reply: MoveReply) -> RoomSnapshot {
        match reply {
            MoveReply::Applied(snapshot) => snapshot,
            other => panic!("expected applied move, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_guest_join_starts_game() {
        let (coordinator, _) = coordinator();
        let code = coordinator.create_room(player(1)).await.unwrap();

        let outcome = coordinator.join(&code, player(2)).await;
        let JoinOutcome::Seated { snapshot, broadcast } = outcome else {
            panic!("guest join refused");
        };

        assert!(broadcast);
        assert_eq!(snapshot.status, RoomStatus::Playing);
        assert_eq!(snapshot.turn, Seat::Host);
        assert!(snapshot.board.cells().iter().all(|cell| cell.is_none()));
    }

    #[tokio::test]
    async fn test_join_unknown_room() {
        let (coordinator, _) = coordinator();
        let outcome = coordinator.join("NOSUCH", player(1)).await;
        assert!(matches!(outcome, JoinOutcome::Refused(JoinError::NotFound)));
    }

    #[tokio::test]
    async fn test_third_identity_refused() {
        let (coordinator, _) = coordinator();
        let code = playing_room(&coordinator).await;

        let outcome = coordinator.join(&code, player(3)).await;
        assert!(matches!(outcome, JoinOutcome::Refused(JoinError::Full)));
    }

    #[tokio::test]
    async fn test_rejoin_is_idempotent() {
        let (coordinator, _) = coordinator();
        let code = playing_room(&coordinator).await;
        expect_applied(coordinator.make_move(&code, player(1), 4).await);

        let before = coordinator.room_view(&code).await.unwrap();
        let outcome = coordinator.join(&code, player(2)).await;
        let JoinOutcome::Seated { snapshot, broadcast } = outcome else {
            panic!("member re-join refused");
        };

        assert!(!broadcast);
        assert_eq!(snapshot, before);
    }

    #[tokio::test]
    async fn test_host_rejoin_while_waiting() {
        let (coordinator, _) = coordinator();
        let code = coordinator.create_room(player(1)).await.unwrap();

        // The host attaching to their own waiting room must not seat them
        // as guest.
        let outcome = coordinator.join(&code, player(1)).await;
        let JoinOutcome::Seated { snapshot, broadcast } = outcome else {
            panic!("host re-join refused");
        };
        assert!(!broadcast);
        assert_eq!(snapshot.status, RoomStatus::Waiting);
        assert!(snapshot.players.guest.is_none());
    }

    #[tokio::test]
    async fn test_turn_alternates_and_marks_land() {
        let (coordinator, _) = coordinator();
        let code = playing_room(&coordinator).await;

        let snapshot = expect_applied(coordinator.make_move(&code, player(1), 0).await);
        assert_eq!(snapshot.turn, Seat::Guest);
        assert_eq!(snapshot.board.cell(0), Some(Mark::X));

        let snapshot = expect_applied(coordinator.make_move(&code, player(2), 4).await);
        assert_eq!(snapshot.turn, Seat::Host);
        assert_eq!(snapshot.board.cell(4), Some(Mark::O));
    }

    #[tokio::test]
    async fn test_scenario_host_wins_top_row() {
        let (coordinator, accounts) = coordinator();
        let code = playing_room(&coordinator).await;

        expect_applied(coordinator.make_move(&code, player(1), 0).await);

        // Same cell again: rejected, board unchanged.
        let reply = coordinator.make_move(&code, player(2), 0).await;
        assert!(matches!(reply, MoveReply::Rejected(Denial::Occupied)));
        let view = coordinator.room_view(&code).await.unwrap();
        assert_eq!(view.board.cell(0), Some(Mark::X));
        assert_eq!(view.turn, Seat::Guest);

        expect_applied(coordinator.make_move(&code, player(2), 4).await);
        expect_applied(coordinator.make_move(&code, player(1), 1).await);
        expect_applied(coordinator.make_move(&code, player(2), 5).await);
        let last = expect_applied(coordinator.make_move(&code, player(1), 2).await);

        assert_eq!(last.status, RoomStatus::Finished);
        assert_eq!(last.result, Some(GameResult::Win));
        assert_eq!(last.winner, Some(player(1)));

        assert_eq!(accounts.stats(player(1)).wins, 1);
        assert_eq!(accounts.stats(player(2)).losses, 1);

        // Finished rooms accept no further moves.
        let reply = coordinator.make_move(&code, player(2), 8).await;
        assert!(matches!(reply, MoveReply::Rejected(Denial::NotPlaying)));
    }

    #[tokio::test]
    async fn test_scenario_draw() {
        let (coordinator, accounts) = coordinator();
        let code = playing_room(&coordinator).await;

        // X O X / X O O / O X X
        let moves = [
            (player(1), 0),
            (player(2), 1),
            (player(1), 2),
            (player(2), 4),
            (player(1), 3),
            (player(2), 5),
            (player(1), 7),
            (player(2), 6),
            (player(1), 8),
        ];
        let mut last = None;
        for (who, cell) in moves {
            last = Some(expect_applied(coordinator.make_move(&code, who, cell).await));
        }

        let last = last.unwrap();
        assert_eq!(last.status, RoomStatus::Finished);
        assert_eq!(last.result, Some(GameResult::Draw));
        assert_eq!(last.winner, None);

        assert_eq!(accounts.stats(player(1)).draws, 1);
        assert_eq!(accounts.stats(player(2)).draws, 1);
        assert_eq!(accounts.stats(player(1)).wins, 0);
    }

    #[tokio::test]
    async fn test_concurrent_same_cell_moves() {
        let (coordinator, _) = coordinator();
        let coordinator = Arc::new(coordinator);
        let code = playing_room(&coordinator).await;

        // Both seats race for cell 4 out of turn order: exactly the
        // host's move is accepted, the guest's is rejected with no board
        // change beyond the single mark.
        let a = {
            let coordinator = coordinator.clone();
            let code = code.clone();
            tokio::spawn(async move { coordinator.make_move(&code, player(1), 4).await })
        };
        let b = {
            let coordinator = coordinator.clone();
            let code = code.clone();
            tokio::spawn(async move { coordinator.make_move(&code, player(2), 4).await })
        };

        let replies = [a.await.unwrap(), b.await.unwrap()];
        let accepted = replies
            .iter()
            .filter(|reply| matches!(reply, MoveReply::Applied(_)))
            .count();
        assert_eq!(accepted, 1);

        let view = coordinator.room_view(&code).await.unwrap();
        assert_eq!(view.board.cell(4), Some(Mark::X));
        let marks = view
            .board
            .cells()
            .iter()
            .filter(|cell| cell.is_some())
            .count();
        assert_eq!(marks, 1);
    }

    #[tokio::test]
    async fn test_guest_departure_resets_room() {
        let (coordinator, accounts) = coordinator();
        let code = playing_room(&coordinator).await;
        expect_applied(coordinator.make_move(&code, player(1), 0).await);

        let snapshot = coordinator.departure(&code, player(2)).await.unwrap();
        assert_eq!(snapshot.status, RoomStatus::Waiting);
        assert!(snapshot.players.guest.is_none());
        assert!(snapshot.board.cells().iter().all(|cell| cell.is_none()));
        assert_eq!(snapshot.turn, Seat::Host);

        // Host is not penalized.
        assert_eq!(accounts.stats(player(1)).losses, 0);

        // The room is joinable again.
        let outcome = coordinator.join(&code, player(3)).await;
        assert!(matches!(outcome, JoinOutcome::Seated { broadcast: true, .. }));
    }

    #[tokio::test]
    async fn test_host_departure_forfeits() {
        let (coordinator, accounts) = coordinator();
        let code = playing_room(&coordinator).await;

        let snapshot = coordinator.departure(&code, player(1)).await.unwrap();
        assert_eq!(snapshot.status, RoomStatus::Finished);
        assert_eq!(snapshot.result, Some(GameResult::Win));
        assert_eq!(snapshot.winner, Some(player(2)));

        assert_eq!(accounts.stats(player(2)).wins, 1);
        assert_eq!(accounts.stats(player(1)).losses, 1);
    }

    #[tokio::test]
    async fn test_departure_outside_playing_is_silent() {
        let (coordinator, _) = coordinator();
        let code = coordinator.create_room(player(1)).await.unwrap();

        assert!(coordinator.departure(&code, player(1)).await.is_none());

        // Finished rooms have no departure transitions either.
        coordinator.join(&code, player(2)).await;
        coordinator.departure(&code, player(1)).await.unwrap();
        assert!(coordinator.departure(&code, player(2)).await.is_none());

        let view = coordinator.room_view(&code).await.unwrap();
        assert_eq!(view.winner, Some(player(2)));
    }

    #[tokio::test]
    async fn test_stranger_departure_is_silent() {
        let (coordinator, _) = coordinator();
        let code = playing_room(&coordinator).await;
        assert!(coordinator.departure(&code, player(9)).await.is_none());
        let view = coordinator.room_view(&code).await.unwrap();
        assert_eq!(view.status, RoomStatus::Playing);
    }

    #[tokio::test]
    async fn test_snapshot_carries_display_names() {
        let (coordinator, accounts) = coordinator();
        accounts.upsert_profile(player(1), Some("alice".into()));
        accounts.upsert_profile(player(2), Some("bob".into()));
        let code = playing_room(&coordinator).await;

        let view = coordinator.room_view(&code).await.unwrap();
        assert_eq!(view.players.host.name.as_deref(), Some("alice"));
        assert_eq!(
            view.players.guest.as_ref().and_then(|p| p.name.as_deref()),
            Some("bob")
        );
    }
}
