//! Finished-match reporting
//!
//! Resolves both players, decides the outcome and hands the result to the
//! ranking service. Persistence and the rank formulas live behind the
//! collaborator traits.
//!
//! This is a library surface for applications that embed the crate next to
//! a result intake; the waiting-room service itself never reports results.

use crate::error::{MatchmakingError, Result};
use crate::types::{ExerciseType, Score, Token, UserId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// A finished match as submitted by the game client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameResultReport {
    pub token_1: Token,
    pub token_2: Token,
    /// Repetitions completed by each player
    pub score_1: i32,
    pub score_2: i32,
    pub exercise_type: ExerciseType,
    pub duration_seconds: u32,
    /// Seconds left on the clock; non-zero means player 2 left early
    pub remain_time: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameOutcome {
    Draw,
    Player1Won,
    Player2Won,
}

impl GameOutcome {
    /// Decide the outcome of a finished match
    pub fn decide(report: &GameResultReport) -> Self {
        if report.remain_time != 0 {
            return GameOutcome::Player1Won;
        }
        match report.score_1.cmp(&report.score_2) {
            std::cmp::Ordering::Greater => GameOutcome::Player1Won,
            std::cmp::Ordering::Less => GameOutcome::Player2Won,
            std::cmp::Ordering::Equal => GameOutcome::Draw,
        }
    }

    /// Numeric code understood by the ranking service
    pub fn code(&self) -> u8 {
        match self {
            GameOutcome::Draw => 0,
            GameOutcome::Player1Won => 1,
            GameOutcome::Player2Won => 2,
        }
    }
}

/// Input to the ranking service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExerciseResult {
    pub user_id_1: UserId,
    pub user_id_2: UserId,
    pub score_1: i32,
    pub score_2: i32,
    pub outcome: GameOutcome,
    pub exercise_type: ExerciseType,
}

/// Rank scores before and after a result was applied
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankUpdate {
    pub user1_previous_score: Score,
    pub user1_new_score: Score,
    pub user2_previous_score: Score,
    pub user2_new_score: Score,
}

/// Resolves an opaque request token to a durable user id
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn resolve_user_id(&self, token: &str) -> Result<UserId>;
}

/// Applies a finished match to both players' rank scores
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RankingService: Send + Sync {
    async fn update_rank_scores(&self, result: ExerciseResult) -> Result<RankUpdate>;
}

pub struct ResultReporter {
    identity: Arc<dyn IdentityProvider>,
    ranking: Arc<dyn RankingService>,
}

impl ResultReporter {
    pub fn new(identity: Arc<dyn IdentityProvider>, ranking: Arc<dyn RankingService>) -> Self {
        Self { identity, ranking }
    }

    pub async fn report(&self, report: GameResultReport) -> Result<RankUpdate> {
        if report.token_1.trim().is_empty() || report.token_2.trim().is_empty() {
            return Err(MatchmakingError::InvalidRequest {
                reason: "Both player tokens are required".to_string(),
            }
            .into());
        }

        let user_id_1 = self.identity.resolve_user_id(&report.token_1).await?;
        let user_id_2 = self.identity.resolve_user_id(&report.token_2).await?;
        let outcome = GameOutcome::decide(&report);

        let result = ExerciseResult {
            user_id_1,
            user_id_2,
            score_1: report.score_1,
            score_2: report.score_2,
            outcome,
            exercise_type: report.exercise_type,
        };

        info!(
            "Reporting result for {} vs {} in exercise {}: {:?} ({}-{}, {}s)",
            result.user_id_1,
            result.user_id_2,
            result.exercise_type,
            outcome,
            result.score_1,
            result.score_2,
            report.duration_seconds
        );

        self.ranking.update_rank_scores(result).await
    }
}
