//! Escrowed side bets
//!
//! A bet takes the same stake from every participant up front (escrow),
//! holds the pool while the bet is open, and pays the whole pool out to
//! the declared winners on resolution. Creation and resolution are
//! all-or-nothing: every precondition is checked for every participant
//! before any ledger entry is touched.

mod allocator;

pub use allocator::BetIdAllocator;

use crate::error::{RaffleError, Result, Violation};
use crate::ledger::LedgerStore;
use crate::types::{BetId, UserId};
use std::collections::BTreeMap;

/// An open bet with its escrowed pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bet {
    pub id: BetId,
    pub amount_per_participant: u64,
    /// Order matters: remainder tickets on resolution are handed out in
    /// the order the winners are named.
    pub participants: Vec<UserId>,
    /// Case-normalized label, unique among one participant's open bets.
    pub name: Option<String>,
    pub total_pool: u64,
}

impl Bet {
    pub fn is_participant(&self, user: UserId) -> bool {
        self.participants.contains(&user)
    }
}

/// Result of resolving a bet: per-winner awards in caller order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Distribution {
    pub bet_id: BetId,
    pub awards: Vec<(UserId, u64)>,
    pub total_pool: u64,
}

/// Owns the open-bets map and the id allocator.
#[derive(Debug, Default)]
pub struct BetEngine {
    open: BTreeMap<BetId, Bet>,
    allocator: BetIdAllocator,
}

fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

impl BetEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the engine from persisted open bets and the used-id set.
    pub fn restore(open: impl IntoIterator<Item = Bet>, used_ids: Vec<BetId>) -> Self {
        Self {
            open: open.into_iter().map(|b| (b.id, b)).collect(),
            allocator: BetIdAllocator::restore(used_ids),
        }
    }

    pub fn get(&self, id: BetId) -> Option<&Bet> {
        self.open.get(&id)
    }

    pub fn open_bets(&self) -> impl Iterator<Item = &Bet> {
        self.open.values()
    }

    pub fn used_ids(&self) -> Vec<BetId> {
        self.allocator.used_ids()
    }

    /// Create a bet, escrowing `amount` tickets from each participant.
    ///
    /// Validates every participant before deducting from any of them and
    /// reports all violations found, not just the first. The participant
    /// list is taken in caller order and must not contain duplicates.
    pub fn create(
        &mut self,
        ledger: &mut LedgerStore,
        participants: &[UserId],
        amount: u64,
        name: Option<&str>,
    ) -> Result<BetId> {
        if amount == 0 {
            return Err(RaffleError::InvalidAmount(
                "bet stake must be at least 1 ticket".to_string(),
            ));
        }
        if participants.is_empty() {
            return Err(RaffleError::InvalidAmount(
                "a bet needs at least one participant".to_string(),
            ));
        }
        for (i, user) in participants.iter().enumerate() {
            if participants[..i].contains(user) {
                return Err(RaffleError::InvalidAmount(format!(
                    "participant {user} listed more than once"
                )));
            }
        }

        let normalized = name.map(normalize_name).filter(|n| !n.is_empty());

        let mut violations = Vec::new();
        for &user in participants {
            let entry = match ledger.get(user) {
                Some(entry) => entry,
                None => {
                    violations.push(Violation::NotRegistered(user));
                    continue;
                }
            };
            if entry.tickets_available < amount {
                violations.push(Violation::InsufficientTickets {
                    participant: user,
                    available: entry.tickets_available,
                    required: amount,
                });
            }
            if let Some(wanted) = &normalized {
                let taken = entry.open_bets.iter().any(|id| {
                    self.open
                        .get(id)
                        .and_then(|bet| bet.name.as_deref())
                        .is_some_and(|existing| existing == wanted)
                });
                if taken {
                    violations.push(Violation::DuplicateBetName {
                        participant: user,
                        name: wanted.clone(),
                    });
                }
            }
        }
        if !violations.is_empty() {
            return Err(RaffleError::BetRejected(violations));
        }

        let total_pool = amount
            .checked_mul(participants.len() as u64)
            .ok_or_else(|| {
                RaffleError::InvalidAmount(format!(
                    "a pool of {amount} tickets x {} participants does not fit",
                    participants.len()
                ))
            })?;

        let id = self.allocator.next();
        for &user in participants {
            // Validated above; no entry can be missing here.
            if let Some(entry) = ledger.get_mut(user) {
                entry.tickets_available -= amount;
                entry.open_bets.insert(id);
            }
        }

        self.open.insert(
            id,
            Bet {
                id,
                amount_per_participant: amount,
                participants: participants.to_vec(),
                name: normalized,
                total_pool,
            },
        );
        Ok(id)
    }

    /// Resolve an open bet, paying the escrowed pool out to `winners`.
    ///
    /// The pool splits as `floor(pool / winners)` each, with the remainder
    /// handed out one ticket at a time to the first winners in the order
    /// the caller named them. Every ticket in the pool is distributed; no
    /// two awards differ by more than one.
    ///
    /// `closer` must be a participant of the bet unless `closer_is_admin`.
    pub fn resolve(
        &mut self,
        ledger: &mut LedgerStore,
        bet_id: BetId,
        closer: UserId,
        closer_is_admin: bool,
        winners: &[UserId],
    ) -> Result<Distribution> {
        let bet = match self.open.get(&bet_id) {
            Some(bet) => bet,
            None if self.allocator.is_used(bet_id) => {
                return Err(RaffleError::BetAlreadyClosed(bet_id))
            }
            None => return Err(RaffleError::BetNotFound(bet_id)),
        };

        if !closer_is_admin && !bet.is_participant(closer) {
            return Err(RaffleError::PermissionDenied(closer));
        }
        if winners.is_empty() {
            return Err(RaffleError::InvalidAmount(
                "at least one winner must be named".to_string(),
            ));
        }
        for (i, winner) in winners.iter().enumerate() {
            if !bet.is_participant(*winner) {
                return Err(RaffleError::WinnerNotParticipant(*winner));
            }
            if winners[..i].contains(winner) {
                return Err(RaffleError::InvalidAmount(format!(
                    "winner {winner} listed more than once"
                )));
            }
        }

        let total_pool = bet.total_pool;
        let participants = bet.participants.clone();

        let winner_count = winners.len() as u64;
        let base = total_pool / winner_count;
        let remainder = total_pool - base * winner_count;

        let mut awards = Vec::with_capacity(winners.len());
        for (i, &winner) in winners.iter().enumerate() {
            let award = if (i as u64) < remainder { base + 1 } else { base };
            awards.push((winner, award));
        }

        // Make sure every payout fits before touching anything; a partial
        // distribution would lose escrowed tickets.
        for &(winner, award) in &awards {
            if let Some(entry) = ledger.get(winner) {
                if entry.tickets_available.checked_add(award).is_none() {
                    return Err(RaffleError::InvalidAmount(format!(
                        "paying {award} tickets would overflow {winner}'s balance"
                    )));
                }
            }
        }

        // All checks passed; the id stays in the used set forever.
        self.open.remove(&bet_id);

        for &(winner, award) in &awards {
            if let Some(entry) = ledger.get_mut(winner) {
                entry.tickets_available += award;
            }
        }
        for &user in &participants {
            if let Some(entry) = ledger.get_mut(user) {
                entry.open_bets.remove(&bet_id);
            }
        }

        Ok(Distribution {
            bet_id,
            awards,
            total_pool,
        })
    }
}
