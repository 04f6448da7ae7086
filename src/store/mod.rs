//! Shared waiting-room store
//!
//! Every engine instance talks to the same store. A pool is kept in four
//! structures per exercise type: an ordering list, a score index, a metadata
//! hash and one TTL marker per token. Backends must create and destroy those
//! together, atomically, so that concurrent instances never observe half an
//! entry.

pub mod memory;
pub mod redis_store;

use crate::error::{MatchmakingError, Result};
use crate::types::{ExerciseType, RemainingTtl, WaitingEntry};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use self::memory::InMemoryPoolStore;
pub use self::redis_store::RedisPoolStore;

/// Result of a store-level removal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    /// A live entry was deleted
    Removed,
    /// Nothing live was there; leftovers may have been purged
    Absent,
    /// A guarded removal found the entry still waiting and left it alone
    StillWaiting,
}

/// Guard applied by [`PoolStore::remove_entry`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalMode {
    /// Remove whatever is there; reports `Removed` only for a live entry
    Unconditional,
    /// Remove only when the TTL marker is gone, checked in the same atomic unit
    LapsedOnly,
    /// Remove only when the token is not in the score index, checked in the
    /// same atomic unit
    OrphanOnly,
}

/// What the store knows about one token's metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntrySnapshot {
    /// Metadata present and the TTL marker alive
    Live(WaitingEntry),
    /// Metadata present but the TTL marker is gone
    Lapsed(WaitingEntry),
    /// No (readable) metadata
    Missing,
}

/// Storage operations for waiting pools
#[async_trait]
pub trait PoolStore: Send + Sync {
    /// Round-trip to the backend
    async fn ping(&self) -> Result<()>;

    /// Insert all four structures for `entry` in one atomic unit.
    ///
    /// Returns `false` without touching anything when the token already has a
    /// live entry. A lapsed leftover for the same token is purged first.
    async fn insert_entry(&self, entry: &WaitingEntry, ttl: Duration) -> Result<bool>;

    /// Delete every trace of `token` in one atomic unit
    async fn remove_entry(
        &self,
        exercise_type: ExerciseType,
        token: &str,
        mode: RemovalMode,
    ) -> Result<Removal>;

    /// Score-index members with `min <= score <= max`
    async fn tokens_in_score_range(
        &self,
        exercise_type: ExerciseType,
        min: i32,
        max: i32,
    ) -> Result<Vec<String>>;

    /// Metadata and marker state for each token, in input order
    async fn fetch_entries(
        &self,
        exercise_type: ExerciseType,
        tokens: &[String],
    ) -> Result<Vec<EntrySnapshot>>;

    async fn remaining_ttl(&self, exercise_type: ExerciseType, token: &str)
        -> Result<RemainingTtl>;

    async fn in_score_index(&self, exercise_type: ExerciseType, token: &str) -> Result<bool>;

    /// Union of tokens found in the ordering list, score index and metadata hash
    async fn tracked_tokens(&self, exercise_type: ExerciseType) -> Result<Vec<String>>;

    /// Number of metadata records in the pool
    async fn pool_size(&self, exercise_type: ExerciseType) -> Result<usize>;
}

/// Supported store backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Redis,
    Memory,
}

impl std::fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreBackend::Redis => write!(f, "redis"),
            StoreBackend::Memory => write!(f, "memory"),
        }
    }
}

impl std::str::FromStr for StoreBackend {
    type Err = MatchmakingError;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.to_lowercase().as_str() {
            "redis" => Ok(StoreBackend::Redis),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(MatchmakingError::ConfigurationError {
                message: format!("Unknown store backend: {}", other),
            }),
        }
    }
}

/// Key names for one exercise-type pool.
///
/// All keys share the `{pool:<type>}` hash tag so a pool lives in a single
/// cluster slot and the atomic scripts may touch every key of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolKeys {
    pub queue: String,
    pub scores: String,
    pub info: String,
    expire_prefix: String,
}

impl PoolKeys {
    pub fn new(prefix: &str, exercise_type: ExerciseType) -> Self {
        let base = format!("{}{{pool:{}}}", prefix, exercise_type);
        Self {
            queue: format!("{}:queue", base),
            scores: format!("{}:scores", base),
            info: format!("{}:info", base),
            expire_prefix: format!("{}:expire:", base),
        }
    }

    /// TTL marker key for `token`
    pub fn expire(&self, token: &str) -> String {
        format!("{}{}", self.expire_prefix, token)
    }
}
