//! Tiered buy-in pricing
//!
//! Converts a raw money amount into tickets using descending bulk-price
//! tiers, e.g. $20 buys 25 tickets, $10 buys 11, $1 buys 1. Conversion is
//! pure: callers apply the returned deltas to a ledger entry themselves.

use crate::error::{RaffleError, Result};
use serde::{Deserialize, Serialize};

/// One pricing rule: `price` buys `tickets`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tier {
    pub price: u64,
    pub tickets: u64,
}

/// Result of converting a money amount into tickets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quote {
    pub tickets_granted: u64,
    pub amount_charged: u64,
}

/// Converts money into tickets against a fixed, descending tier schedule.
#[derive(Debug, Clone)]
pub struct PricingEngine {
    tiers: Vec<Tier>,
}

impl PricingEngine {
    /// Build an engine from a tier schedule.
    ///
    /// Tiers must be strictly descending by price and every field must be
    /// positive. A misordered schedule silently changes the discount
    /// structure, so this fails fast at configuration load instead.
    pub fn new(tiers: Vec<Tier>) -> Result<Self> {
        if tiers.is_empty() {
            return Err(RaffleError::Config("pricing tiers are empty".to_string()));
        }
        for tier in &tiers {
            if tier.price == 0 || tier.tickets == 0 {
                return Err(RaffleError::Config(format!(
                    "tier ${} -> {} tickets: price and tickets must be positive",
                    tier.price, tier.tickets
                )));
            }
        }
        for pair in tiers.windows(2) {
            if pair[0].price <= pair[1].price {
                return Err(RaffleError::Config(format!(
                    "pricing tiers must be strictly descending by price (${} then ${})",
                    pair[0].price, pair[1].price
                )));
            }
        }
        Ok(Self { tiers })
    }

    /// Convert `amount` into tickets.
    ///
    /// Greedy over the tiers in descending order: take as many whole units
    /// of each tier as the remaining money allows, then move to the next
    /// cheaper tier. Any residue smaller than the cheapest tier's price is
    /// neither charged nor converted.
    ///
    /// Amounts whose ticket count would not fit in a `u64` are rejected;
    /// any chat user can type an arbitrary number, so this must never
    /// panic or wrap.
    pub fn convert(&self, amount: u64) -> Result<Quote> {
        let mut remaining = amount;
        let mut tickets = 0u64;
        let mut charge = 0u64;

        for tier in &self.tiers {
            let units = remaining / tier.price;
            // units * price never exceeds remaining; only the ticket side
            // can grow past the charge.
            charge += units * tier.price;
            remaining -= units * tier.price;
            tickets = units
                .checked_mul(tier.tickets)
                .and_then(|t| tickets.checked_add(t))
                .ok_or_else(|| {
                    RaffleError::InvalidAmount(format!(
                        "${amount} is too large to convert into tickets"
                    ))
                })?;
        }

        Ok(Quote {
            tickets_granted: tickets,
            amount_charged: charge,
        })
    }

    pub fn tiers(&self) -> &[Tier] {
        &self.tiers
    }

    /// Human-readable price list for the registration reply.
    pub fn price_list(&self) -> String {
        self.tiers
            .iter()
            .map(|t| format!("${} for {} tickets", t.price, t.tickets))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_engine() -> PricingEngine {
        PricingEngine::new(vec![
            Tier { price: 20, tickets: 25 },
            Tier { price: 10, tickets: 11 },
            Tier { price: 1, tickets: 1 },
        ])
        .unwrap()
    }

    #[test]
    fn rejects_misordered_tiers() {
        let result = PricingEngine::new(vec![
            Tier { price: 10, tickets: 11 },
            Tier { price: 20, tickets: 25 },
        ]);
        assert!(matches!(result, Err(RaffleError::Config(_))));
    }

    #[test]
    fn rejects_equal_prices() {
        let result = PricingEngine::new(vec![
            Tier { price: 10, tickets: 11 },
            Tier { price: 10, tickets: 12 },
        ]);
        assert!(matches!(result, Err(RaffleError::Config(_))));
    }

    #[test]
    fn rejects_empty_schedule() {
        assert!(PricingEngine::new(vec![]).is_err());
    }

    #[test]
    fn rejects_zero_price() {
        let result = PricingEngine::new(vec![Tier { price: 0, tickets: 1 }]);
        assert!(result.is_err());
    }

    #[test]
    fn converts_exact_tier_amount() {
        let engine = default_engine();
        let quote = engine.convert(20).unwrap();
        assert_eq!(quote.tickets_granted, 25);
        assert_eq!(quote.amount_charged, 20);
    }

    #[test]
    fn cascades_through_tiers() {
        // 45 = 2 x $20 (50 tickets) + 0 x $10 + 5 x $1 (5 tickets)
        let engine = default_engine();
        let quote = engine.convert(45).unwrap();
        assert_eq!(quote.tickets_granted, 55);
        assert_eq!(quote.amount_charged, 45);
    }

    #[test]
    fn drops_leftover_below_cheapest_tier() {
        let engine = PricingEngine::new(vec![
            Tier { price: 20, tickets: 25 },
            Tier { price: 10, tickets: 11 },
        ])
        .unwrap();
        // 45 = 2 x $20 + leftover 5, below the $10 tier
        let quote = engine.convert(45).unwrap();
        assert_eq!(quote.tickets_granted, 50);
        assert_eq!(quote.amount_charged, 40);
    }

    #[test]
    fn zero_amount_converts_to_nothing() {
        let engine = default_engine();
        let quote = engine.convert(0).unwrap();
        assert_eq!(quote.tickets_granted, 0);
        assert_eq!(quote.amount_charged, 0);
    }

    #[test]
    fn huge_amount_is_rejected_not_wrapped() {
        // The $20 tier mints 25 tickets per unit, so u64::MAX dollars
        // cannot be represented as a ticket count.
        let engine = default_engine();
        assert!(matches!(
            engine.convert(u64::MAX),
            Err(RaffleError::InvalidAmount(_))
        ));
    }

    #[test]
    fn one_to_one_tier_handles_max_amount() {
        let engine = PricingEngine::new(vec![Tier { price: 1, tickets: 1 }]).unwrap();
        let quote = engine.convert(u64::MAX).unwrap();
        assert_eq!(quote.tickets_granted, u64::MAX);
        assert_eq!(quote.amount_charged, u64::MAX);
    }

    #[test]
    fn charge_never_exceeds_amount() {
        let engine = default_engine();
        for amount in 0..200 {
            let quote = engine.convert(amount).unwrap();
            assert!(quote.amount_charged <= amount);
            // Leftover is strictly below the cheapest tier price.
            assert!(amount - quote.amount_charged < 1);
        }
    }

    #[test]
    fn tickets_are_monotonic_in_amount() {
        let engine = default_engine();
        let mut previous = 0;
        for amount in 0..200 {
            let quote = engine.convert(amount).unwrap();
            assert!(quote.tickets_granted >= previous);
            previous = quote.tickets_granted;
        }
    }

    #[test]
    fn price_list_formats_tiers() {
        let engine = default_engine();
        assert_eq!(
            engine.price_list(),
            "$20 for 25 tickets, $10 for 11 tickets, $1 for 1 tickets"
        );
    }
}
