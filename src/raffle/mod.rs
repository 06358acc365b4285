//! Raffle coordinator
//!
//! Owns the ledger and the bet engine behind a single coarse lock, so every
//! command sees and mutates the whole game state atomically. Bet creation
//! and resolution touch several ledger entries at once; per-entry locking
//! cannot give that without partial-application hazards, so the lock is one
//! mutex around everything.
//!
//! Mutating operations schedule a snapshot save in the background. A failed
//! save is logged and never rolls back the in-memory change.

use crate::bets::{Bet, BetEngine, Distribution};
use crate::draw::DrawEngine;
use crate::error::Result;
use crate::ledger::{LedgerEntry, LedgerStore};
use crate::pricing::{PricingEngine, Quote};
use crate::storage::{Snapshot, SnapshotStore};
use crate::types::{BetId, UserId};
use parking_lot::Mutex;
use tracing::{info, warn};

#[derive(Debug, Default)]
struct Inner {
    ledger: LedgerStore,
    bets: BetEngine,
}

/// The whole game state plus its persistence hook.
pub struct Raffle {
    inner: Mutex<Inner>,
    pricing: PricingEngine,
    store: Option<SnapshotStore>,
}

impl Raffle {
    pub fn new(pricing: PricingEngine) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            pricing,
            store: None,
        }
    }

    /// Attach a snapshot store; mutating commands will persist through it.
    pub fn with_store(mut self, store: SnapshotStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn pricing(&self) -> &PricingEngine {
        &self.pricing
    }

    /// Register a participant. Returns the entry and whether it is new.
    pub fn register(&self, user: UserId) -> (LedgerEntry, bool) {
        let mut inner = self.inner.lock();
        let newly = !inner.ledger.contains(user);
        let entry = inner.ledger.ensure(user).clone();
        drop(inner);
        if newly {
            info!("Registered {user}");
            self.schedule_snapshot();
        }
        (entry, newly)
    }

    pub fn status(&self, user: UserId) -> Option<LedgerEntry> {
        self.inner.lock().ledger.get(user).cloned()
    }

    /// Buy in. Auto-registers unknown participants, like the original bot.
    pub fn buy_in(&self, user: UserId, amount: u64) -> Result<(Quote, LedgerEntry)> {
        let mut inner = self.inner.lock();
        let quote = inner.ledger.apply_buy_in(user, amount, &self.pricing)?;
        let entry = inner.ledger.get(user).cloned().unwrap_or_default();
        drop(inner);
        info!(
            "{user} bought in ${amount}: +{} tickets, +${} owed",
            quote.tickets_granted, quote.amount_charged
        );
        self.schedule_snapshot();
        Ok((quote, entry))
    }

    /// Create a bet. The initiator is always the first participant, so the
    /// escrow and the remainder tie-break both start with them.
    pub fn create_bet(
        &self,
        initiator: UserId,
        others: &[UserId],
        amount: u64,
        name: Option<&str>,
    ) -> Result<BetId> {
        let mut participants = Vec::with_capacity(others.len() + 1);
        participants.push(initiator);
        participants.extend_from_slice(others);

        let mut inner = self.inner.lock();
        let Inner { ledger, bets } = &mut *inner;
        let id = bets.create(ledger, &participants, amount, name)?;
        drop(inner);

        info!("{initiator} opened bet {id} for {amount} tickets x {} heads", participants.len());
        self.schedule_snapshot();
        Ok(id)
    }

    pub fn resolve_bet(
        &self,
        bet_id: BetId,
        closer: UserId,
        closer_is_admin: bool,
        winners: &[UserId],
    ) -> Result<Distribution> {
        let mut inner = self.inner.lock();
        let Inner { ledger, bets } = &mut *inner;
        let dist = bets.resolve(ledger, bet_id, closer, closer_is_admin, winners)?;
        drop(inner);

        info!("{closer} resolved bet {bet_id}: pool {} to {} winners", dist.total_pool, dist.awards.len());
        self.schedule_snapshot();
        Ok(dist)
    }

    pub fn open_bets_for(&self, user: UserId) -> Vec<Bet> {
        let inner = self.inner.lock();
        inner
            .bets
            .open_bets()
            .filter(|bet| bet.is_participant(user))
            .cloned()
            .collect()
    }

    /// Weighted random draw. Non-destructive: winners keep their tickets.
    pub fn draw(&self) -> Option<UserId> {
        let inner = self.inner.lock();
        let winner = DrawEngine::draw_one(&inner.ledger);
        drop(inner);
        match winner {
            Some(user) => info!("Draw winner: {user}"),
            None => info!("Draw with no entries, no winner"),
        }
        winner
    }

    pub fn reset_user(&self, user: UserId) -> Result<()> {
        self.inner.lock().ledger.reset(user)?;
        info!("Reset {user}");
        self.schedule_snapshot();
        Ok(())
    }

    /// Per-participant amounts owed plus the grand total, for settlement.
    pub fn settle_totals(&self) -> (Vec<(UserId, u64)>, u64) {
        let inner = self.inner.lock();
        let rows: Vec<(UserId, u64)> = inner
            .ledger
            .iter()
            .map(|(user, entry)| (*user, entry.amount_owed))
            .collect();
        let total = inner.ledger.total_owed();
        (rows, total)
    }

    /// Every registered participant with their current entry, for the
    /// pre-draw broadcast.
    pub fn roster(&self) -> Vec<(UserId, LedgerEntry)> {
        self.inner
            .lock()
            .ledger
            .iter()
            .map(|(user, entry)| (*user, entry.clone()))
            .collect()
    }

    pub fn snapshot(&self) -> Snapshot {
        let inner = self.inner.lock();
        Snapshot {
            ledger: inner.ledger.to_map(),
            open_bets: inner
                .bets
                .open_bets()
                .map(|bet| (bet.id, bet.into()))
                .collect(),
            used_bet_ids: inner.bets.used_ids(),
        }
    }

    pub fn restore(&self, snapshot: Snapshot) {
        let mut inner = self.inner.lock();
        inner.ledger = LedgerStore::from_map(snapshot.ledger);
        inner.bets = BetEngine::restore(
            snapshot
                .open_bets
                .into_iter()
                .map(|(id, record)| record.into_bet(id)),
            snapshot.used_bet_ids,
        );
        info!(
            "Restored {} participants, {} open bets",
            inner.ledger.len(),
            inner.bets.open_bets().count()
        );
    }

    /// Fire-and-forget snapshot save. Runs outside the lock; a failure is
    /// logged and never reported to the user whose command triggered it.
    fn schedule_snapshot(&self) {
        let Some(store) = self.store.clone() else {
            return;
        };
        let snapshot = self.snapshot();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = store.save(&snapshot).await {
                        warn!("Failed to save snapshot: {e}");
                    }
                });
            }
            Err(_) => warn!("No async runtime; skipping snapshot save"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RaffleError;
    use crate::pricing::Tier;
    use tempfile::tempdir;

    fn raffle() -> Raffle {
        let pricing = PricingEngine::new(vec![
            Tier { price: 20, tickets: 25 },
            Tier { price: 10, tickets: 11 },
            Tier { price: 1, tickets: 1 },
        ])
        .unwrap();
        Raffle::new(pricing)
    }

    #[test]
    fn register_is_idempotent() {
        let raffle = raffle();
        let (_, first) = raffle.register(UserId(1));
        let (_, second) = raffle.register(UserId(1));
        assert!(first);
        assert!(!second);
    }

    #[test]
    fn full_bet_cycle_through_the_coordinator() {
        let raffle = raffle();
        raffle.buy_in(UserId(1), 20).unwrap();
        raffle.buy_in(UserId(2), 20).unwrap();

        let id = raffle
            .create_bet(UserId(1), &[UserId(2)], 5, Some("heads"))
            .unwrap();
        assert_eq!(raffle.status(UserId(1)).unwrap().tickets_available, 20);
        assert_eq!(raffle.open_bets_for(UserId(2)).len(), 1);

        let dist = raffle
            .resolve_bet(id, UserId(2), false, &[UserId(2)])
            .unwrap();
        assert_eq!(dist.awards, vec![(UserId(2), 10)]);
        assert_eq!(raffle.status(UserId(2)).unwrap().tickets_available, 30);
        assert!(raffle.open_bets_for(UserId(1)).is_empty());
    }

    #[test]
    fn rejected_bet_leaves_state_untouched() {
        let raffle = raffle();
        raffle.buy_in(UserId(1), 20).unwrap();
        raffle.register(UserId(2));

        let err = raffle
            .create_bet(UserId(1), &[UserId(2)], 5, None)
            .unwrap_err();
        assert!(matches!(err, RaffleError::BetRejected(_)));
        assert_eq!(raffle.status(UserId(1)).unwrap().tickets_available, 25);
        assert!(raffle.snapshot().open_bets.is_empty());
    }

    #[test]
    fn oversized_buy_in_is_an_error_not_a_panic() {
        let raffle = raffle();
        raffle.buy_in(UserId(1), 20).unwrap();

        let err = raffle.buy_in(UserId(1), u64::MAX).unwrap_err();
        assert!(matches!(err, RaffleError::InvalidAmount(_)));
        assert_eq!(raffle.status(UserId(1)).unwrap().tickets_available, 25);
        assert_eq!(raffle.status(UserId(1)).unwrap().amount_owed, 20);
    }

    #[test]
    fn settle_totals_sums_everyone() {
        let raffle = raffle();
        raffle.buy_in(UserId(1), 20).unwrap();
        raffle.buy_in(UserId(2), 10).unwrap();
        let (rows, total) = raffle.settle_totals();
        assert_eq!(rows, vec![(UserId(1), 20), (UserId(2), 10)]);
        assert_eq!(total, 30);
    }

    #[test]
    fn snapshot_restore_round_trips() {
        let raffle = raffle();
        raffle.buy_in(UserId(1), 20).unwrap();
        raffle.buy_in(UserId(2), 20).unwrap();
        let open = raffle
            .create_bet(UserId(1), &[UserId(2)], 3, Some("live"))
            .unwrap();
        let closed = raffle.create_bet(UserId(1), &[UserId(2)], 1, None).unwrap();
        raffle
            .resolve_bet(closed, UserId(1), false, &[UserId(1)])
            .unwrap();

        let snapshot = raffle.snapshot();

        let other = self::raffle();
        other.restore(snapshot.clone());
        assert_eq!(other.snapshot(), snapshot);

        // Escrow preserved and retired ids stay retired.
        assert_eq!(other.status(UserId(1)).unwrap().open_bets.len(), 1);
        let next = other.create_bet(UserId(1), &[UserId(2)], 1, None).unwrap();
        assert_ne!(next, open);
        assert_ne!(next, closed);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn mutations_write_snapshots_in_background() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        let raffle = raffle().with_store(store.clone());

        raffle.buy_in(UserId(1), 45).unwrap();

        // The save is spawned; give it a moment to land.
        for _ in 0..50 {
            if store.load_latest().await.unwrap().is_some() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        let snapshot = store.load_latest().await.unwrap().expect("snapshot saved");
        assert_eq!(snapshot.ledger[&UserId(1)].tickets_available, 55);
        assert_eq!(snapshot.ledger[&UserId(1)].amount_owed, 45);
    }
}
