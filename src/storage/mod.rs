//! Snapshot persistence
//!
//! Writes the whole game state to a timestamped JSON file after every
//! mutating command and restores the newest one on startup. Persistence is
//! best-effort: the in-memory state is authoritative and a failed save is
//! logged, never surfaced as a command failure.

use crate::bets::Bet;
use crate::error::{RaffleError, Result};
use crate::ledger::LedgerEntry;
use crate::types::{BetId, UserId};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const FILE_SUFFIX: &str = "-game_state.json";

/// Persisted projection of one open bet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BetRecord {
    pub total_pool: u64,
    pub participants: Vec<UserId>,
    #[serde(default)]
    pub name: Option<String>,
}

impl From<&Bet> for BetRecord {
    fn from(bet: &Bet) -> Self {
        Self {
            total_pool: bet.total_pool,
            participants: bet.participants.clone(),
            name: bet.name.clone(),
        }
    }
}

impl BetRecord {
    /// Rebuild the bet. The pool is always an exact multiple of the
    /// participant count, so the per-head stake divides back out cleanly.
    pub fn into_bet(self, id: BetId) -> Bet {
        let count = self.participants.len().max(1) as u64;
        Bet {
            id,
            amount_per_participant: self.total_pool / count,
            participants: self.participants,
            name: self.name,
            total_pool: self.total_pool,
        }
    }
}

/// Serializable projection of the full game state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub ledger: BTreeMap<UserId, LedgerEntry>,
    pub open_bets: BTreeMap<BetId, BetRecord>,
    pub used_bet_ids: Vec<BetId>,
}

/// Writes and reads snapshot files in a single directory.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Save a snapshot to `<dir>/<yymmddHHMMSS>-game_state.json`.
    pub async fn save(&self, snapshot: &Snapshot) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let name = format!("{}{}", Utc::now().format("%y%m%d%H%M%S"), FILE_SUFFIX);
        let path = self.dir.join(name);
        let json = serde_json::to_vec_pretty(snapshot)?;
        tokio::fs::write(&path, json).await?;

        debug!("Saved snapshot to {}", path.display());
        Ok(path)
    }

    /// Load the newest snapshot in the directory, if any exists.
    ///
    /// Snapshot names sort chronologically, so "newest" is the
    /// lexicographically largest matching file name.
    pub async fn load_latest(&self) -> Result<Option<Snapshot>> {
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut newest: Option<PathBuf> = None;
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            let is_snapshot = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(FILE_SUFFIX));
            if is_snapshot && newest.as_ref().is_none_or(|best| &path > best) {
                newest = Some(path);
            }
        }

        match newest {
            Some(path) => Ok(Some(self.load(&path).await?)),
            None => Ok(None),
        }
    }

    pub async fn load(&self, path: &Path) -> Result<Snapshot> {
        let bytes = tokio::fs::read(path).await?;
        serde_json::from_slice(&bytes).map_err(RaffleError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use tempfile::tempdir;

    fn sample_snapshot() -> Snapshot {
        let mut ledger = BTreeMap::new();
        ledger.insert(
            UserId(11),
            LedgerEntry {
                tickets_available: 30,
                amount_owed: 25,
                open_bets: BTreeSet::from([BetId(2)]),
            },
        );
        ledger.insert(
            UserId(12),
            LedgerEntry {
                tickets_available: 4,
                amount_owed: 10,
                open_bets: BTreeSet::from([BetId(2)]),
            },
        );

        let mut open_bets = BTreeMap::new();
        open_bets.insert(
            BetId(2),
            BetRecord {
                total_pool: 6,
                participants: vec![UserId(11), UserId(12)],
                name: Some("rematch".to_string()),
            },
        );

        Snapshot {
            ledger,
            open_bets,
            used_bet_ids: vec![BetId(1), BetId(2)],
        }
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());

        let snapshot = sample_snapshot();
        let path = store.save(&snapshot).await.unwrap();
        assert!(path.to_string_lossy().ends_with(FILE_SUFFIX));

        let loaded = store.load(&path).await.unwrap();
        assert_eq!(loaded, snapshot);
    }

    #[tokio::test]
    async fn load_latest_picks_newest_file() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());

        let old = Snapshot::default();
        let new = sample_snapshot();
        // Write with explicit names so ordering does not depend on the clock.
        tokio::fs::write(
            dir.path().join(format!("240101000000{FILE_SUFFIX}")),
            serde_json::to_vec(&old).unwrap(),
        )
        .await
        .unwrap();
        tokio::fs::write(
            dir.path().join(format!("250101000000{FILE_SUFFIX}")),
            serde_json::to_vec(&new).unwrap(),
        )
        .await
        .unwrap();

        let loaded = store.load_latest().await.unwrap().unwrap();
        assert_eq!(loaded, new);
    }

    #[tokio::test]
    async fn load_latest_ignores_other_files() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        tokio::fs::write(dir.path().join("notes.txt"), b"hi").await.unwrap();

        assert_eq!(store.load_latest().await.unwrap(), None);
    }

    #[tokio::test]
    async fn missing_directory_is_not_an_error() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("nope"));
        assert_eq!(store.load_latest().await.unwrap(), None);
    }

    #[test]
    fn bet_record_round_trips_the_stake() {
        let record = BetRecord {
            total_pool: 9,
            participants: vec![UserId(1), UserId(2), UserId(3)],
            name: None,
        };
        let bet = record.into_bet(BetId(4));
        assert_eq!(bet.amount_per_participant, 3);
        assert_eq!(bet.total_pool, 9);
    }
}
