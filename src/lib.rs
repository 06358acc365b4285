//! Community Raffle Bot
//!
//! Coordinates a ticket-based raffle over chat: participants buy tickets
//! with tiered bulk pricing, open escrowed side bets against each other,
//! and enter a weighted random drawing.
//!
//! ## Architecture
//!
//! ```text
//! Gateway (Telegram) → CommandHandler → Raffle coordinator
//!                                          ├── LedgerStore (balances)
//!                                          ├── PricingEngine (buy-ins)
//!                                          ├── BetEngine (escrowed bets)
//!                                          └── DrawEngine (weighted draw)
//!                                                 ↓
//!                                       SnapshotStore (JSON files)
//! ```

pub mod bets;
pub mod config;
pub mod draw;
pub mod error;
pub mod gateway;
pub mod ledger;
pub mod notify;
pub mod pricing;
pub mod raffle;
pub mod storage;
pub mod types;
