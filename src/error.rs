//! Error types for the raffle core
//!
//! Every core operation returns a typed error kind; the gateway layer
//! decides the user-facing text. All variants are recoverable — nothing
//! here is fatal to the process.

use crate::types::{BetId, UserId};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RaffleError>;

/// A single precondition failure found while validating a bet creation.
///
/// `BetEngine::create` collects every violation before rejecting, so the
/// gateway can message each blocked participant, not just the first.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    #[error("participant {0} is not registered")]
    NotRegistered(UserId),

    #[error("participant {participant} has {available} tickets, needs {required}")]
    InsufficientTickets {
        participant: UserId,
        available: u64,
        required: u64,
    },

    #[error("participant {participant} already has an open bet named '{name}'")]
    DuplicateBetName { participant: UserId, name: String },
}

#[derive(Error, Debug)]
pub enum RaffleError {
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("participant {0} is not registered")]
    ParticipantNotRegistered(UserId),

    #[error("bet rejected: {}", format_violations(.0))]
    BetRejected(Vec<Violation>),

    #[error("no open bet {0}")]
    BetNotFound(BetId),

    #[error("bet {0} has already been resolved")]
    BetAlreadyClosed(BetId),

    #[error("{0} is not a participant of this bet")]
    WinnerNotParticipant(UserId),

    #[error("{0} may not close this bet")]
    PermissionDenied(UserId),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

fn format_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
