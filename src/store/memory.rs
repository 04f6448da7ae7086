//! In-memory pool store for single-instance runs and tests
//!
//! Each call takes the write (or read) lock once, so every operation is
//! atomic with respect to the others, mirroring the server-side scripts of
//! the Redis backend.

use crate::error::{MatchmakingError, Result};
use crate::store::{EntrySnapshot, PoolStore, Removal, RemovalMode};
use crate::types::{ExerciseType, RemainingTtl, Score, WaitingEntry};
use crate::utils::{Clock, SystemClock};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};
use std::time::Duration;

#[derive(Debug, Default)]
struct PoolState {
    queue: Vec<String>,
    scores: HashMap<String, Score>,
    info: HashMap<String, WaitingEntry>,
    /// TTL marker deadlines
    markers: HashMap<String, DateTime<Utc>>,
}

impl PoolState {
    fn marker_alive(&self, token: &str, now: DateTime<Utc>) -> bool {
        self.markers
            .get(token)
            .map(|deadline| *deadline > now)
            .unwrap_or(false)
    }

    fn has_trace(&self, token: &str) -> bool {
        self.info.contains_key(token)
            || self.scores.contains_key(token)
            || self.queue.iter().any(|t| t == token)
    }

    /// Drop every structure for `token`; true if it was in the score index
    fn purge(&mut self, token: &str) -> bool {
        let indexed = self.scores.remove(token).is_some();
        self.info.remove(token);
        self.queue.retain(|t| t != token);
        self.markers.remove(token);
        indexed
    }
}

/// Pool store held in process memory
pub struct InMemoryPoolStore {
    pools: RwLock<HashMap<ExerciseType, PoolState>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryPoolStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Use `clock` to decide when TTL markers lapse
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            pools: RwLock::new(HashMap::new()),
            clock,
        }
    }

    fn read_error() -> MatchmakingError {
        MatchmakingError::InternalError {
            message: "Failed to acquire pool store read lock".to_string(),
        }
    }

    fn write_error() -> MatchmakingError {
        MatchmakingError::InternalError {
            message: "Failed to acquire pool store write lock".to_string(),
        }
    }

    /// Leave metadata and an ordering-list entry behind without a score-index
    /// member, the shape a crashed writer leaves.
    #[cfg(test)]
    pub(crate) fn insert_orphan(&self, entry: &WaitingEntry) {
        let mut pools = self.pools.write().unwrap();
        let pool = pools.entry(entry.exercise_type).or_default();
        pool.queue.push(entry.token.clone());
        pool.info.insert(entry.token.clone(), entry.clone());
    }

    /// Index member with no metadata behind it
    #[cfg(test)]
    pub(crate) fn insert_bare_score(&self, exercise_type: ExerciseType, token: &str, score: Score) {
        let mut pools = self.pools.write().unwrap();
        let pool = pools.entry(exercise_type).or_default();
        pool.scores.insert(token.to_string(), score);
    }
}

impl Default for InMemoryPoolStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PoolStore for InMemoryPoolStore {
    async fn ping(&self) -> Result<()> {
        self.pools
            .read()
            .map(|_| ())
            .map_err(|_| Self::read_error().into())
    }

    async fn insert_entry(&self, entry: &WaitingEntry, ttl: Duration) -> Result<bool> {
        let now = self.clock.now();
        let ttl = chrono::Duration::from_std(ttl).map_err(|e| MatchmakingError::InternalError {
            message: format!("Wait TTL out of range: {}", e),
        })?;

        let mut pools = self.pools.write().map_err(|_| Self::write_error())?;
        let pool = pools.entry(entry.exercise_type).or_default();

        let present = pool.info.contains_key(&entry.token) || pool.scores.contains_key(&entry.token);
        if present && pool.marker_alive(&entry.token, now) {
            return Ok(false);
        }
        pool.purge(&entry.token);

        pool.info.insert(entry.token.clone(), entry.clone());
        pool.scores.insert(entry.token.clone(), entry.score);
        pool.queue.push(entry.token.clone());
        pool.markers.insert(entry.token.clone(), now + ttl);
        Ok(true)
    }

    async fn remove_entry(
        &self,
        exercise_type: ExerciseType,
        token: &str,
        mode: RemovalMode,
    ) -> Result<Removal> {
        let now = self.clock.now();
        let mut pools = self.pools.write().map_err(|_| Self::write_error())?;
        let Some(pool) = pools.get_mut(&exercise_type) else {
            return Ok(Removal::Absent);
        };

        let alive = pool.marker_alive(token, now);
        match mode {
            RemovalMode::LapsedOnly if alive => return Ok(Removal::StillWaiting),
            RemovalMode::OrphanOnly if pool.scores.contains_key(token) => {
                return Ok(Removal::StillWaiting)
            }
            _ => {}
        }

        let traced = pool.has_trace(token);
        let indexed = pool.purge(token);
        Ok(match mode {
            RemovalMode::Unconditional if indexed && alive => Removal::Removed,
            RemovalMode::LapsedOnly if indexed => Removal::Removed,
            RemovalMode::OrphanOnly if traced => Removal::Removed,
            _ => Removal::Absent,
        })
    }

    async fn tokens_in_score_range(
        &self,
        exercise_type: ExerciseType,
        min: i32,
        max: i32,
    ) -> Result<Vec<String>> {
        let pools = self.pools.read().map_err(|_| Self::read_error())?;
        Ok(pools
            .get(&exercise_type)
            .map(|pool| {
                pool.scores
                    .iter()
                    .filter(|(_, score)| (min..=max).contains(&i32::from(**score)))
                    .map(|(token, _)| token.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn fetch_entries(
        &self,
        exercise_type: ExerciseType,
        tokens: &[String],
    ) -> Result<Vec<EntrySnapshot>> {
        let now = self.clock.now();
        let pools = self.pools.read().map_err(|_| Self::read_error())?;
        let Some(pool) = pools.get(&exercise_type) else {
            return Ok(vec![EntrySnapshot::Missing; tokens.len()]);
        };

        Ok(tokens
            .iter()
            .map(|token| match pool.info.get(token) {
                Some(entry) if pool.marker_alive(token, now) => EntrySnapshot::Live(entry.clone()),
                Some(entry) => EntrySnapshot::Lapsed(entry.clone()),
                None => EntrySnapshot::Missing,
            })
            .collect())
    }

    async fn remaining_ttl(
        &self,
        exercise_type: ExerciseType,
        token: &str,
    ) -> Result<RemainingTtl> {
        let now = self.clock.now();
        let pools = self.pools.read().map_err(|_| Self::read_error())?;
        let Some(pool) = pools.get(&exercise_type) else {
            return Ok(RemainingTtl::Absent);
        };

        if let Some(deadline) = pool.markers.get(token) {
            if let Ok(left) = (*deadline - now).to_std() {
                if !left.is_zero() {
                    return Ok(RemainingTtl::Remaining(left));
                }
            }
        }

        if pool.has_trace(token) || pool.markers.contains_key(token) {
            Ok(RemainingTtl::Expired)
        } else {
            Ok(RemainingTtl::Absent)
        }
    }

    async fn in_score_index(&self, exercise_type: ExerciseType, token: &str) -> Result<bool> {
        let pools = self.pools.read().map_err(|_| Self::read_error())?;
        Ok(pools
            .get(&exercise_type)
            .map(|pool| pool.scores.contains_key(token))
            .unwrap_or(false))
    }

    async fn tracked_tokens(&self, exercise_type: ExerciseType) -> Result<Vec<String>> {
        let pools = self.pools.read().map_err(|_| Self::read_error())?;
        let Some(pool) = pools.get(&exercise_type) else {
            return Ok(Vec::new());
        };

        let tokens: BTreeSet<&String> = pool
            .queue
            .iter()
            .chain(pool.scores.keys())
            .chain(pool.info.keys())
            .collect();
        Ok(tokens.into_iter().cloned().collect())
    }

    async fn pool_size(&self, exercise_type: ExerciseType) -> Result<usize> {
        let pools = self.pools.read().map_err(|_| Self::read_error())?;
        Ok(pools
            .get(&exercise_type)
            .map(|pool| pool.info.len())
            .unwrap_or(0))
    }
}
