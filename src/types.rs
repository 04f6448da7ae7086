//! Common types used throughout the waiting-room service

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Opaque player handle carried by requests
pub type Token = String;

/// Exercise type; each value owns an independent waiting pool
pub type ExerciseType = i64;

/// Skill score used for the candidate window
pub type Score = i16;

/// Stable user identifier resolved from a token
pub type UserId = String;

/// A player waiting in one exercise-type pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitingEntry {
    pub token: Token,
    pub exercise_type: ExerciseType,
    pub score: Score,
    pub joined_at: DateTime<Utc>,
}

/// A committed pairing. `token_a` is the party that was waiting,
/// `token_b` the requester that found it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchResult {
    pub token_a: Token,
    pub token_b: Token,
    pub exercise_type: ExerciseType,
    pub score_a: Score,
    pub score_b: Score,
    pub session_id: String,
    pub matched_at: DateTime<Utc>,
}

/// Outcome of a join attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnterOutcome {
    /// Paired immediately with a waiting party
    Matched(MatchResult),
    /// No partner found; the requester now waits
    Admitted(WaitingEntry),
    /// The token already holds a live entry in this pool
    AlreadyWaiting,
}

/// Remaining lifetime of a waiting entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemainingTtl {
    Remaining(Duration),
    /// The TTL marker is gone but other traces of the entry remain
    Expired,
    /// Nothing is known about the token
    Absent,
}

/// Why a player is no longer waiting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LeaveReason {
    Voluntary,
    Expired,
}

impl std::fmt::Display for LeaveReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LeaveReason::Voluntary => write!(f, "voluntary"),
            LeaveReason::Expired => write!(f, "expired"),
        }
    }
}

/// AMQP Message Types
/// Request to wait for (or immediately find) an opponent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnterRequest {
    pub token: Token,
    pub exercise_type: ExerciseType,
    pub score: Score,
    pub timestamp: DateTime<Utc>,
}

/// Request to stop waiting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaveRequest {
    pub token: Token,
    pub exercise_type: ExerciseType,
    pub timestamp: DateTime<Utc>,
}

/// Inbound waiting-room request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WaitingRoomRequest {
    Enter(EnterRequest),
    Leave(LeaveRequest),
}

impl WaitingRoomRequest {
    pub fn token(&self) -> &str {
        match self {
            WaitingRoomRequest::Enter(request) => &request.token,
            WaitingRoomRequest::Leave(request) => &request.token,
        }
    }

    pub fn exercise_type(&self) -> ExerciseType {
        match self {
            WaitingRoomRequest::Enter(request) => request.exercise_type,
            WaitingRoomRequest::Leave(request) => request.exercise_type,
        }
    }
}

/// Event emitted when a player starts waiting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerEnteredWaitingRoom {
    pub token: Token,
    pub exercise_type: ExerciseType,
    pub score: Score,
    pub expires_at: DateTime<Utc>,
    pub timestamp: DateTime<Utc>,
}

/// Event emitted when a waiting player leaves or lapses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerLeftWaitingRoom {
    pub token: Token,
    pub exercise_type: ExerciseType,
    pub reason: LeaveReason,
    pub timestamp: DateTime<Utc>,
}

/// Event emitted once per committed match
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchFound {
    pub match_result: MatchResult,
    pub timestamp: DateTime<Utc>,
}

/// Union type for all outbound events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WaitingRoomEvent {
    MatchFound(MatchFound),
    PlayerEnteredWaitingRoom(PlayerEnteredWaitingRoom),
    PlayerLeftWaitingRoom(PlayerLeftWaitingRoom),
}
