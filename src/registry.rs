//! Per-pool bookkeeping of waiting players
//!
//! The registry is the only writer of pool structures. Each method maps to a
//! single atomic store operation, so no caller ever sees an entry that is
//! half admitted or half removed.

use crate::error::{MatchmakingError, Result};
use crate::store::{EntrySnapshot, PoolStore, Removal, RemovalMode};
use crate::types::{ExerciseType, RemainingTtl, Score, WaitingEntry};
use crate::utils::{score_window, Clock};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Waiting-entry registry layered on a shared [`PoolStore`]
pub struct WaitingEntryRegistry {
    store: Arc<dyn PoolStore>,
    clock: Arc<dyn Clock>,
    wait_ttl: Duration,
}

impl WaitingEntryRegistry {
    pub fn new(store: Arc<dyn PoolStore>, clock: Arc<dyn Clock>, wait_ttl: Duration) -> Self {
        Self {
            store,
            clock,
            wait_ttl,
        }
    }

    pub fn wait_ttl(&self) -> Duration {
        self.wait_ttl
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Build an entry stamped with the current time
    pub fn new_entry(&self, token: &str, exercise_type: ExerciseType, score: Score) -> WaitingEntry {
        WaitingEntry {
            token: token.to_string(),
            exercise_type,
            score,
            joined_at: self.clock.now(),
        }
    }

    /// Admit `entry` with the configured wait TTL.
    ///
    /// Fails with `AlreadyPresent` when the token holds a live entry.
    pub async fn admit(&self, entry: &WaitingEntry) -> Result<()> {
        let admitted = self.store.insert_entry(entry, self.wait_ttl).await?;
        if !admitted {
            return Err(MatchmakingError::AlreadyPresent {
                token: entry.token.clone(),
                exercise_type: entry.exercise_type,
            }
            .into());
        }

        debug!(
            "Admitted {} to pool {} (score {}, ttl {:?})",
            entry.token, entry.exercise_type, entry.score, self.wait_ttl
        );
        Ok(())
    }

    /// The live entry for `token`, if any
    pub async fn lookup(
        &self,
        exercise_type: ExerciseType,
        token: &str,
    ) -> Result<Option<WaitingEntry>> {
        let snapshots = self
            .store
            .fetch_entries(exercise_type, &[token.to_string()])
            .await?;

        Ok(snapshots.into_iter().next().and_then(|snapshot| match snapshot {
            EntrySnapshot::Live(entry) => Some(entry),
            _ => None,
        }))
    }

    /// Live entries with `center - half_width <= score <= center + half_width`.
    ///
    /// Index members without metadata are dropped here; lapsed ones are left
    /// for the sweeper. Order is unspecified.
    pub async fn candidates_in_score_range(
        &self,
        exercise_type: ExerciseType,
        center: Score,
        half_width: i32,
    ) -> Result<Vec<WaitingEntry>> {
        let (min, max) = score_window(center, half_width);
        let tokens = self
            .store
            .tokens_in_score_range(exercise_type, min, max)
            .await?;
        if tokens.is_empty() {
            return Ok(Vec::new());
        }

        let snapshots = self.store.fetch_entries(exercise_type, &tokens).await?;
        let mut candidates = Vec::with_capacity(tokens.len());
        for (token, snapshot) in tokens.iter().zip(snapshots) {
            match snapshot {
                EntrySnapshot::Live(entry) => candidates.push(entry),
                EntrySnapshot::Lapsed(_) => {
                    debug!("Skipping lapsed candidate {} in pool {}", token, exercise_type);
                }
                EntrySnapshot::Missing => {
                    debug!(
                        "Dropping stale candidate {} in pool {}: no metadata",
                        token, exercise_type
                    );
                }
            }
        }

        Ok(candidates)
    }

    /// Remove every trace of `token`. Returns `true` only if a live entry
    /// was removed; lapsed leftovers are cleared but not reported, and
    /// removing an absent token is a no-op.
    pub async fn remove(&self, exercise_type: ExerciseType, token: &str) -> Result<bool> {
        let removal = self
            .store
            .remove_entry(exercise_type, token, RemovalMode::Unconditional)
            .await?;
        Ok(removal == Removal::Removed)
    }

    /// Remove `token` only if its TTL marker has lapsed, re-checked atomically
    pub async fn remove_if_lapsed(&self, exercise_type: ExerciseType, token: &str) -> Result<Removal> {
        self.store
            .remove_entry(exercise_type, token, RemovalMode::LapsedOnly)
            .await
    }

    /// Clear leftovers of `token` unless it is back in the score index,
    /// re-checked atomically
    pub async fn purge(&self, exercise_type: ExerciseType, token: &str) -> Result<Removal> {
        let removal = self
            .store
            .remove_entry(exercise_type, token, RemovalMode::OrphanOnly)
            .await?;
        match removal {
            Removal::Removed => info!("Purged leftovers of {} from pool {}", token, exercise_type),
            Removal::StillWaiting => debug!(
                "Token {} in pool {} was re-admitted, leaving it in place",
                token, exercise_type
            ),
            Removal::Absent => {}
        }
        Ok(removal)
    }

    pub async fn remaining_ttl(
        &self,
        exercise_type: ExerciseType,
        token: &str,
    ) -> Result<RemainingTtl> {
        self.store.remaining_ttl(exercise_type, token).await
    }

    pub async fn in_score_index(&self, exercise_type: ExerciseType, token: &str) -> Result<bool> {
        self.store.in_score_index(exercise_type, token).await
    }

    pub async fn tracked_tokens(&self, exercise_type: ExerciseType) -> Result<Vec<String>> {
        self.store.tracked_tokens(exercise_type).await
    }

    pub async fn pool_size(&self, exercise_type: ExerciseType) -> Result<usize> {
        self.store.pool_size(exercise_type).await
    }

    pub async fn ping(&self) -> Result<()> {
        self.store.ping().await
    }
}
