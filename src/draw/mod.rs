//! Weighted random draw
//!
//! Samples one participant uniformly over the multiset of all outstanding
//! tickets: a participant holding five tickets is five times as likely as
//! one holding a single ticket, and zero tickets means zero chance.
//!
//! The draw is non-destructive: the winning ticket stays on the winner's
//! balance. Consuming tickets between events is an admin action (`reset`).

use crate::ledger::LedgerStore;
use crate::types::UserId;
use rand::Rng;

pub struct DrawEngine;

impl DrawEngine {
    /// Draw one winner, or `None` when nobody holds any tickets.
    pub fn draw_one(ledger: &LedgerStore) -> Option<UserId> {
        Self::draw_one_with(ledger, &mut rand::rng())
    }

    /// Draw with a caller-supplied RNG. Walks the cumulative ticket counts
    /// instead of materializing one vector slot per ticket, which is the
    /// same distribution without the allocation.
    pub fn draw_one_with<R: Rng>(ledger: &LedgerStore, rng: &mut R) -> Option<UserId> {
        let total = ledger.total_tickets();
        if total == 0 {
            return None;
        }

        let mut pick = rng.random_range(0..total);
        for (user, entry) in ledger.iter() {
            if pick < entry.tickets_available {
                return Some(*user);
            }
            pick -= entry.tickets_available;
        }
        None
    }
}
