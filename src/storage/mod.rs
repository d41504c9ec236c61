//! # Storage — round persistence layer
//!
//! Sled-backed persistence for live rounds, the per-room lucky-ball set,
//! and terminated round history. The live-round slot is the hot tier the
//! recovery layer reads at startup; the history trees are the cold tier.
//!
//! ## Layout
//!
//! One sled database with four trees:
//!
//! ```text
//! g38_current_rounds   room      → StoredRound    (TTL enforced on read)
//! g38_lucky_balls      room      → StoredLuckySet (no TTL)
//! g38_history          round_id  → StoredRound    (retention-pruned)
//! g38_history_index    room      → HistoryIndex   (append-only id list)
//! ```
//!
//! Records are bincode-encoded and carry a schema version byte plus a
//! `saved_at` stamp. Sled has no native TTL, so `load_current` discards
//! records older than the configured hot TTL; history is pruned by a
//! retention sweep the server drives from its housekeeping tick.
//!
//! The store is cheap to clone — sled `Db`/`Tree` handles are Arc-based —
//! so the server, orchestrators and the status command share one instance
//! without locking.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use log::{debug, warn};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::game::round::{Ball, Round, LUCKY_SET_SIZE};

const TREE_CURRENT: &str = "g38_current_rounds";
const TREE_LUCKY: &str = "g38_lucky_balls";
const TREE_HISTORY: &str = "g38_history";
const TREE_HISTORY_INDEX: &str = "g38_history_index";

pub const ROUND_SCHEMA_VERSION: u8 = 1;
pub const LUCKY_SCHEMA_VERSION: u8 = 1;

/// Default hot-tier TTL for the live-round slot.
pub const DEFAULT_CURRENT_TTL_HOURS: i64 = 24;
/// Default cold-tier retention for terminated rounds.
pub const DEFAULT_HISTORY_RETENTION_DAYS: i64 = 30;

/// Errors from the persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Wrapper around sled's error type.
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    /// Wrapper around bincode serialization and deserialization errors.
    #[error("serialization error: {0}")]
    Bincode(#[from] bincode::Error),

    /// Wrapper around IO errors (directory creation, etc.).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Returned when deserializing a record with an unexpected schema version.
    #[error("schema mismatch for {entity}: expected {expected}, got {found}")]
    SchemaMismatch {
        entity: &'static str,
        expected: u8,
        found: u8,
    },

    /// Returned when a lucky set does not contain exactly seven distinct
    /// in-range numbers.
    #[error("invalid lucky set: {0}")]
    InvalidLuckySet(String),
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredRound {
    version: u8,
    saved_at: DateTime<Utc>,
    round: Round,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredLuckySet {
    version: u8,
    saved_at: DateTime<Utc>,
    balls: Vec<Ball>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct HistoryIndex {
    round_ids: Vec<Uuid>,
}

/// Helper builder so tests can easily create throwaway stores with custom
/// paths and TTLs.
pub struct RoundStoreBuilder {
    path: PathBuf,
    current_ttl: ChronoDuration,
    history_retention: ChronoDuration,
}

impl RoundStoreBuilder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            current_ttl: ChronoDuration::hours(DEFAULT_CURRENT_TTL_HOURS),
            history_retention: ChronoDuration::days(DEFAULT_HISTORY_RETENTION_DAYS),
        }
    }

    pub fn current_ttl(mut self, ttl: ChronoDuration) -> Self {
        self.current_ttl = ttl;
        self
    }

    pub fn history_retention(mut self, retention: ChronoDuration) -> Self {
        self.history_retention = retention;
        self
    }

    pub fn open(self) -> Result<RoundStore, StoreError> {
        RoundStore::open_with_options(self.path, self.current_ttl, self.history_retention)
    }
}

/// Sled-backed persistence for round state.
///
/// Cheap to clone; all internal sled handles share the same underlying
/// database.
#[derive(Clone)]
pub struct RoundStore {
    _db: sled::Db,
    current: sled::Tree,
    lucky: sled::Tree,
    history: sled::Tree,
    history_index: sled::Tree,
    current_ttl: ChronoDuration,
    history_retention: ChronoDuration,
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    Ok(bincode::deserialize(bytes)?)
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    Ok(bincode::serialize(value)?)
}

impl RoundStore {
    /// Open (or create) the store under `path` with default TTLs.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        RoundStoreBuilder::new(path.as_ref()).open()
    }

    fn open_with_options(
        path: PathBuf,
        current_ttl: ChronoDuration,
        history_retention: ChronoDuration,
    ) -> Result<Self, StoreError> {
        std::fs::create_dir_all(&path)?;
        let db = sled::open(&path)?;
        let current = db.open_tree(TREE_CURRENT)?;
        let lucky = db.open_tree(TREE_LUCKY)?;
        let history = db.open_tree(TREE_HISTORY)?;
        let history_index = db.open_tree(TREE_HISTORY_INDEX)?;
        Ok(RoundStore {
            _db: db,
            current,
            lucky,
            history,
            history_index,
            current_ttl,
            history_retention,
        })
    }

    /// Last-saved live round for the room, if any. Expired and
    /// non-recoverable records are discarded (and cleared) so the caller
    /// starts a fresh round.
    pub fn load_current(&self, room: &str) -> Result<Option<Round>, StoreError> {
        let Some(bytes) = self.current.get(room.as_bytes())? else {
            return Ok(None);
        };
        let stored: StoredRound = decode(&bytes)?;
        if stored.version != ROUND_SCHEMA_VERSION {
            return Err(StoreError::SchemaMismatch {
                entity: "round",
                expected: ROUND_SCHEMA_VERSION,
                found: stored.version,
            });
        }
        if Utc::now() - stored.saved_at > self.current_ttl {
            debug!("live round for {room} expired (saved {})", stored.saved_at);
            self.current.remove(room.as_bytes())?;
            return Ok(None);
        }
        if !stored.round.recoverable {
            debug!("live round for {room} flagged non-recoverable; discarding");
            self.current.remove(room.as_bytes())?;
            return Ok(None);
        }
        Ok(Some(stored.round))
    }

    /// Overwrite the room's live-round slot. Single-key insert, so readers
    /// see either the previous or the new record, never a mix.
    pub fn save_current(&self, round: &Round) -> Result<(), StoreError> {
        let stored = StoredRound {
            version: ROUND_SCHEMA_VERSION,
            saved_at: Utc::now(),
            round: round.clone(),
        };
        self.current
            .insert(round.room.as_bytes(), encode(&stored)?)?;
        Ok(())
    }

    pub fn clear_current(&self, room: &str) -> Result<(), StoreError> {
        self.current.remove(room.as_bytes())?;
        Ok(())
    }

    /// Append a terminated round to the history trees. Idempotent per
    /// round id, so a round lands in history exactly once.
    pub fn append_history(&self, round: &Round) -> Result<(), StoreError> {
        let mut index: HistoryIndex = match self.history_index.get(round.room.as_bytes())? {
            Some(bytes) => decode(&bytes)?,
            None => HistoryIndex::default(),
        };
        if index.round_ids.contains(&round.round_id) {
            debug!("history append skipped, {} already recorded", round.round_id);
            return Ok(());
        }
        let stored = StoredRound {
            version: ROUND_SCHEMA_VERSION,
            saved_at: Utc::now(),
            round: round.clone(),
        };
        self.history
            .insert(round.round_id.as_bytes(), encode(&stored)?)?;
        index.round_ids.push(round.round_id);
        self.history_index
            .insert(round.room.as_bytes(), encode(&index)?)?;
        Ok(())
    }

    /// Ordered round ids recorded for the room.
    pub fn history_ids(&self, room: &str) -> Result<Vec<Uuid>, StoreError> {
        match self.history_index.get(room.as_bytes())? {
            Some(bytes) => Ok(decode::<HistoryIndex>(&bytes)?.round_ids),
            None => Ok(Vec::new()),
        }
    }

    pub fn load_history(&self, round_id: Uuid) -> Result<Option<Round>, StoreError> {
        match self.history.get(round_id.as_bytes())? {
            Some(bytes) => {
                let stored: StoredRound = decode(&bytes)?;
                Ok(Some(stored.round))
            }
            None => Ok(None),
        }
    }

    /// Remove history entries older than the retention window. Returns how
    /// many rounds were dropped.
    pub fn prune_history(&self) -> Result<usize, StoreError> {
        let cutoff = Utc::now() - self.history_retention;
        let mut pruned = 0usize;
        for item in self.history.iter() {
            let (key, bytes) = item?;
            let stored: StoredRound = match decode(&bytes) {
                Ok(s) => s,
                Err(e) => {
                    warn!("unreadable history record, dropping: {e}");
                    self.history.remove(&key)?;
                    pruned += 1;
                    continue;
                }
            };
            if stored.saved_at < cutoff {
                self.history.remove(&key)?;
                self.drop_from_index(&stored.round.room, stored.round.round_id)?;
                pruned += 1;
            }
        }
        Ok(pruned)
    }

    fn drop_from_index(&self, room: &str, round_id: Uuid) -> Result<(), StoreError> {
        if let Some(bytes) = self.history_index.get(room.as_bytes())? {
            let mut index: HistoryIndex = decode(&bytes)?;
            index.round_ids.retain(|id| *id != round_id);
            self.history_index
                .insert(room.as_bytes(), encode(&index)?)?;
        }
        Ok(())
    }

    /// The room's advertised lucky set, if one was ever saved.
    pub fn get_lucky_balls(&self, room: &str) -> Result<Option<Vec<Ball>>, StoreError> {
        let Some(bytes) = self.lucky.get(room.as_bytes())? else {
            return Ok(None);
        };
        let stored: StoredLuckySet = decode(&bytes)?;
        if stored.version != LUCKY_SCHEMA_VERSION {
            return Err(StoreError::SchemaMismatch {
                entity: "lucky_set",
                expected: LUCKY_SCHEMA_VERSION,
                found: stored.version,
            });
        }
        Ok(Some(stored.balls))
    }

    /// Persist the room's advertised lucky set. Validates the seven-distinct
    /// invariant before writing.
    pub fn save_lucky_balls(&self, room: &str, balls: &[Ball]) -> Result<(), StoreError> {
        if balls.len() != LUCKY_SET_SIZE {
            return Err(StoreError::InvalidLuckySet(format!(
                "expected {LUCKY_SET_SIZE} balls, got {}",
                balls.len()
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for ball in balls {
            if !(1..=75).contains(&ball.number) {
                return Err(StoreError::InvalidLuckySet(format!(
                    "number {} out of range",
                    ball.number
                )));
            }
            if !seen.insert(ball.number) {
                return Err(StoreError::InvalidLuckySet(format!(
                    "duplicate number {}",
                    ball.number
                )));
            }
        }
        let stored = StoredLuckySet {
            version: LUCKY_SCHEMA_VERSION,
            saved_at: Utc::now(),
            balls: balls.to_vec(),
        };
        self.lucky.insert(room.as_bytes(), encode(&stored)?)?;
        Ok(())
    }

    /// Synchronous durability point; called on terminal transitions and at
    /// shutdown rather than per command.
    pub fn flush(&self) -> Result<(), StoreError> {
        self._db.flush()?;
        Ok(())
    }
}
