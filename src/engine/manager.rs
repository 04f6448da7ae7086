//! Matchmaking engine
//!
//! A join first tries to claim the longest-waiting compatible player. The
//! claim is the registry's atomic remove: whichever instance removes the
//! entry owns the match, everyone else moves on to the next candidate. Only
//! when nobody can be claimed is the requester admitted to wait.

use crate::amqp::publisher::EventPublisher;
use crate::engine::matching::{order_candidates, MatchingConfig, SCORE_WINDOW_HALF_WIDTH};
use crate::error::{MatchmakingError, Result};
use crate::metrics::MetricsCollector;
use crate::pool::ExerciseTypeProvider;
use crate::registry::WaitingEntryRegistry;
use crate::session::SessionIdDeriver;
use crate::types::{
    EnterOutcome, ExerciseType, LeaveReason, MatchFound, MatchResult, PlayerEnteredWaitingRoom,
    PlayerLeftWaitingRoom, Score, WaitingEntry,
};
use crate::utils::date_stamp;
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Statistics about engine operations
#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    /// Join requests that passed validation
    pub players_entered: u64,
    /// Joins that ended up waiting
    pub players_admitted: u64,
    /// Joins rejected because the token was already waiting
    pub already_waiting: u64,
    /// Committed matches
    pub matches_made: u64,
    /// Voluntary leaves that removed a live entry
    pub players_left: u64,
    /// Candidates claimed by someone else first
    pub lost_races: u64,
    /// Events dropped after publish retries
    pub publish_failures: u64,
}

/// The matchmaking engine
#[derive(Clone)]
pub struct MatchmakingEngine {
    /// Waiting-entry registry over the shared store
    registry: Arc<WaitingEntryRegistry>,
    /// Known exercise types
    exercise_types: Arc<dyn ExerciseTypeProvider>,
    /// Sink for match and waiting-room events
    event_publisher: Arc<dyn EventPublisher>,
    session_ids: SessionIdDeriver,
    matching_config: MatchingConfig,
    stats: Arc<RwLock<EngineStats>>,
    metrics_collector: Arc<MetricsCollector>,
}

impl MatchmakingEngine {
    /// Create a new engine with the default matching configuration
    pub fn new(
        registry: Arc<WaitingEntryRegistry>,
        exercise_types: Arc<dyn ExerciseTypeProvider>,
        event_publisher: Arc<dyn EventPublisher>,
        session_ids: SessionIdDeriver,
        metrics_collector: Arc<MetricsCollector>,
    ) -> Self {
        Self::with_config(
            registry,
            exercise_types,
            event_publisher,
            session_ids,
            metrics_collector,
            MatchingConfig::default(),
        )
    }

    /// Create a new engine with a custom matching configuration
    pub fn with_config(
        registry: Arc<WaitingEntryRegistry>,
        exercise_types: Arc<dyn ExerciseTypeProvider>,
        event_publisher: Arc<dyn EventPublisher>,
        session_ids: SessionIdDeriver,
        metrics_collector: Arc<MetricsCollector>,
        matching_config: MatchingConfig,
    ) -> Self {
        Self {
            registry,
            exercise_types,
            event_publisher,
            session_ids,
            matching_config,
            stats: Arc::new(RwLock::new(EngineStats::default())),
            metrics_collector,
        }
    }

    pub fn registry(&self) -> Arc<WaitingEntryRegistry> {
        self.registry.clone()
    }

    pub fn session_ids(&self) -> &SessionIdDeriver {
        &self.session_ids
    }

    /// Match `token` against the pool or admit it to wait
    pub async fn try_enter(
        &self,
        token: &str,
        exercise_type: ExerciseType,
        score: Score,
    ) -> Result<EnterOutcome> {
        let start_time = Instant::now();
        self.validate(token, exercise_type)?;

        info!(
            "Processing join - token: '{}', exercise_type: {}, score: {}",
            token, exercise_type, score
        );
        self.metrics_collector.record_enter(exercise_type);
        self.update_stats(|stats| stats.players_entered += 1)?;

        let result = async {
            if self.registry.lookup(exercise_type, token).await?.is_some() {
                info!(
                    "Token '{}' is already waiting in pool {}, ignoring join",
                    token, exercise_type
                );
                self.update_stats(|stats| stats.already_waiting += 1)?;
                return Ok(EnterOutcome::AlreadyWaiting);
            }

            self.match_or_admit(token, exercise_type, score).await
        }
        .await;

        let duration = start_time.elapsed();
        info!(
            "Join completed - token: '{}', duration: {:.2}ms, result: {}",
            token,
            duration.as_secs_f64() * 1000.0,
            match &result {
                Ok(EnterOutcome::Matched(_)) => "MATCHED",
                Ok(EnterOutcome::Admitted(_)) => "ADMITTED",
                Ok(EnterOutcome::AlreadyWaiting) => "ALREADY_WAITING",
                Err(_) => "FAILED",
            }
        );
        self.metrics_collector.record_enter_duration(duration);

        result
    }

    /// Stop waiting. Returns `true` if a live entry was removed.
    pub async fn leave(&self, token: &str, exercise_type: ExerciseType) -> Result<bool> {
        if token.trim().is_empty() {
            return Err(MatchmakingError::InvalidRequest {
                reason: "Token cannot be empty".to_string(),
            }
            .into());
        }

        let removed = self.registry.remove(exercise_type, token).await?;
        if !removed {
            debug!(
                "Leave for '{}' in pool {} found nothing to remove",
                token, exercise_type
            );
            return Ok(false);
        }

        info!("Player '{}' left pool {}", token, exercise_type);
        self.update_stats(|stats| stats.players_left += 1)?;
        self.metrics_collector.record_player_left(LeaveReason::Voluntary);

        let event = PlayerLeftWaitingRoom {
            token: token.to_string(),
            exercise_type,
            reason: LeaveReason::Voluntary,
            timestamp: self.registry.clock().now(),
        };
        if let Err(e) = self.event_publisher.publish_player_left(event).await {
            self.record_publish_failure("PlayerLeftWaitingRoom", &e)?;
        }

        Ok(true)
    }

    /// Waiting players per known exercise type
    pub async fn waiting_counts(&self) -> Result<Vec<(ExerciseType, usize)>> {
        let mut counts = Vec::new();
        for exercise_type in self.exercise_types.exercise_types() {
            counts.push((exercise_type, self.registry.pool_size(exercise_type).await?));
        }
        Ok(counts)
    }

    /// Get current engine statistics
    pub async fn get_stats(&self) -> Result<EngineStats> {
        let stats = self
            .stats
            .read()
            .map_err(|_| MatchmakingError::InternalError {
                message: "Failed to acquire stats lock".to_string(),
            })?;

        Ok(stats.clone())
    }

    fn validate(&self, token: &str, exercise_type: ExerciseType) -> Result<()> {
        if token.trim().is_empty() {
            return Err(MatchmakingError::InvalidRequest {
                reason: "Token cannot be empty".to_string(),
            }
            .into());
        }
        if !self.exercise_types.is_known(exercise_type) {
            return Err(MatchmakingError::UnknownExerciseType { exercise_type }.into());
        }
        Ok(())
    }

    async fn match_or_admit(
        &self,
        token: &str,
        exercise_type: ExerciseType,
        score: Score,
    ) -> Result<EnterOutcome> {
        for round in 1..=self.matching_config.max_match_rounds {
            let candidates = self
                .registry
                .candidates_in_score_range(exercise_type, score, SCORE_WINDOW_HALF_WIDTH)
                .await?;
            let ordered = order_candidates(candidates, token);
            if ordered.is_empty() {
                debug!(
                    "No candidates for '{}' in pool {} (round {})",
                    token, exercise_type, round
                );
                break;
            }

            debug!(
                "Round {}: {} candidate(s) for '{}' in pool {}",
                round,
                ordered.len(),
                token,
                exercise_type
            );

            for candidate in ordered {
                if self.registry.remove(exercise_type, &candidate.token).await? {
                    let match_result = self.commit_match(candidate, token, score).await?;
                    return Ok(EnterOutcome::Matched(match_result));
                }

                warn!(
                    "Candidate '{}' in pool {} was claimed concurrently, trying next",
                    candidate.token, exercise_type
                );
                self.metrics_collector.record_lost_race();
                self.update_stats(|stats| stats.lost_races += 1)?;
            }
        }

        self.admit(token, exercise_type, score).await
    }

    /// Build the result for a claimed candidate and announce it
    async fn commit_match(
        &self,
        candidate: WaitingEntry,
        token: &str,
        score: Score,
    ) -> Result<MatchResult> {
        let matched_at = self.registry.clock().now();
        let session_id = self
            .session_ids
            .derive_id(&candidate.token, &date_stamp(matched_at));
        let waited = (matched_at - candidate.joined_at)
            .to_std()
            .unwrap_or_default();

        let match_result = MatchResult {
            token_a: candidate.token,
            token_b: token.to_string(),
            exercise_type: candidate.exercise_type,
            score_a: candidate.score,
            score_b: score,
            session_id,
            matched_at,
        };

        info!(
            "Match found in pool {} - '{}' ({}) vs '{}' ({}), waited {:.1}s, session {}",
            match_result.exercise_type,
            match_result.token_a,
            match_result.score_a,
            match_result.token_b,
            match_result.score_b,
            waited.as_secs_f64(),
            match_result.session_id
        );
        self.metrics_collector
            .record_match(match_result.exercise_type, waited);
        self.update_stats(|stats| stats.matches_made += 1)?;

        let event = MatchFound {
            match_result: match_result.clone(),
            timestamp: matched_at,
        };
        if let Err(e) = self.event_publisher.publish_match_found(event).await {
            self.record_publish_failure("MatchFound", &e)?;
        }

        Ok(match_result)
    }

    async fn admit(
        &self,
        token: &str,
        exercise_type: ExerciseType,
        score: Score,
    ) -> Result<EnterOutcome> {
        let entry = self.registry.new_entry(token, exercise_type, score);
        if let Err(e) = self.registry.admit(&entry).await {
            if MatchmakingError::is_already_present(&e) {
                info!(
                    "Token '{}' was admitted concurrently to pool {}",
                    token, exercise_type
                );
                self.update_stats(|stats| stats.already_waiting += 1)?;
                return Ok(EnterOutcome::AlreadyWaiting);
            }
            return Err(e);
        }

        info!(
            "Player '{}' is now waiting in pool {} (score {}, ttl {}s)",
            token,
            exercise_type,
            score,
            self.registry.wait_ttl().as_secs()
        );
        self.metrics_collector.record_admitted(exercise_type);
        self.update_stats(|stats| stats.players_admitted += 1)?;

        let expires_at = entry.joined_at
            + chrono::Duration::from_std(self.registry.wait_ttl()).unwrap_or_default();
        let event = PlayerEnteredWaitingRoom {
            token: entry.token.clone(),
            exercise_type,
            score,
            expires_at,
            timestamp: entry.joined_at,
        };
        if let Err(e) = self.event_publisher.publish_player_entered(event).await {
            self.record_publish_failure("PlayerEnteredWaitingRoom", &e)?;
        }

        Ok(EnterOutcome::Admitted(entry))
    }

    fn record_publish_failure(&self, event: &str, error: &anyhow::Error) -> Result<()> {
        warn!("Failed to publish {} event: {}", event, error);
        self.metrics_collector.record_publish_failure();
        self.update_stats(|stats| stats.publish_failures += 1)
    }

    fn update_stats(&self, update: impl FnOnce(&mut EngineStats)) -> Result<()> {
        let mut stats = self
            .stats
            .write()
            .map_err(|_| MatchmakingError::InternalError {
                message: "Failed to acquire stats lock".to_string(),
            })?;
        update(&mut stats);
        Ok(())
    }
}
