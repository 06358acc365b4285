//! Participant ledger
//!
//! Single source of truth for ticket balances. One entry per participant,
//! keyed by platform user id. Amounts owed only ever grow — settlement
//! happens outside this system (admins collect cash in person).

use crate::error::{RaffleError, Result};
use crate::pricing::{PricingEngine, Quote};
use crate::types::{BetId, UserId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Per-participant balance state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Tickets not currently escrowed in a bet.
    pub tickets_available: u64,
    /// Money owed from buy-ins. Monotonically non-decreasing except by
    /// an admin reset.
    pub amount_owed: u64,
    /// Bets this participant currently has tickets escrowed in.
    #[serde(default)]
    pub open_bets: BTreeSet<BetId>,
}

/// In-memory participant ledger.
#[derive(Debug, Clone, Default)]
pub struct LedgerStore {
    entries: BTreeMap<UserId, LedgerEntry>,
}

impl LedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, user: UserId) -> Option<&LedgerEntry> {
        self.entries.get(&user)
    }

    pub fn contains(&self, user: UserId) -> bool {
        self.entries.contains_key(&user)
    }

    /// Create-if-absent with a zeroed entry.
    pub fn ensure(&mut self, user: UserId) -> &mut LedgerEntry {
        self.entries.entry(user).or_default()
    }

    pub(crate) fn get_mut(&mut self, user: UserId) -> Option<&mut LedgerEntry> {
        self.entries.get_mut(&user)
    }

    /// Buy in: convert `amount` through the pricing engine, credit the
    /// tickets and add the charge to the amount owed. Registers the
    /// participant if they were not registered yet.
    ///
    /// Rejects buy-ins the entry cannot hold; the entry is only mutated
    /// once both new balances are known to fit.
    pub fn apply_buy_in(
        &mut self,
        user: UserId,
        amount: u64,
        pricing: &PricingEngine,
    ) -> Result<Quote> {
        let quote = pricing.convert(amount)?;
        let entry = self.ensure(user);
        let tickets = entry.tickets_available.checked_add(quote.tickets_granted);
        let owed = entry.amount_owed.checked_add(quote.amount_charged);
        match (tickets, owed) {
            (Some(tickets), Some(owed)) => {
                entry.tickets_available = tickets;
                entry.amount_owed = owed;
                Ok(quote)
            }
            _ => Err(RaffleError::InvalidAmount(format!(
                "a ${amount} buy-in would overflow {user}'s balance"
            ))),
        }
    }

    /// Zero out a participant's entry. The entry stays registered.
    pub fn reset(&mut self, user: UserId) -> Result<()> {
        match self.entries.get_mut(&user) {
            Some(entry) => {
                *entry = LedgerEntry::default();
                Ok(())
            }
            None => Err(RaffleError::ParticipantNotRegistered(user)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&UserId, &LedgerEntry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of all amounts owed, for settlement reporting.
    pub fn total_owed(&self) -> u64 {
        self.entries.values().map(|e| e.amount_owed).sum()
    }

    /// Total tickets currently available across all participants.
    pub fn total_tickets(&self) -> u64 {
        self.entries.values().map(|e| e.tickets_available).sum()
    }

    pub fn to_map(&self) -> BTreeMap<UserId, LedgerEntry> {
        self.entries.clone()
    }

    pub fn from_map(entries: BTreeMap<UserId, LedgerEntry>) -> Self {
        Self { entries }
    }
}
