//! Error types for the waiting-room service
//!
//! Operations return `anyhow::Result`; callers that need to branch on a
//! specific failure downcast to [`MatchmakingError`].

/// Result type alias for convenience
pub type Result<T> = anyhow::Result<T>;

/// Custom error types for specific matchmaking scenarios
#[derive(Debug, thiserror::Error)]
pub enum MatchmakingError {
    #[error("Player {token} is already waiting in pool {exercise_type}")]
    AlreadyPresent { token: String, exercise_type: i64 },

    #[error("Shared store unavailable: {message}")]
    StoreUnavailable { message: String },

    #[error("Session id hash unavailable: {reason}")]
    HashUnavailable { reason: String },

    #[error("Invalid waiting room request: {reason}")]
    InvalidRequest { reason: String },

    #[error("Unknown exercise type: {exercise_type}")]
    UnknownExerciseType { exercise_type: i64 },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("AMQP connection failed: {message}")]
    AmqpConnectionFailed { message: String },

    #[error("Internal service error: {message}")]
    InternalError { message: String },
}

impl MatchmakingError {
    /// True when `err` carries an `AlreadyPresent` rejection
    pub fn is_already_present(err: &anyhow::Error) -> bool {
        matches!(
            err.downcast_ref::<MatchmakingError>(),
            Some(MatchmakingError::AlreadyPresent { .. })
        )
    }

    /// True when `err` was caused by the shared store
    pub fn is_store_unavailable(err: &anyhow::Error) -> bool {
        matches!(
            err.downcast_ref::<MatchmakingError>(),
            Some(MatchmakingError::StoreUnavailable { .. })
        )
    }
}

impl From<redis::RedisError> for MatchmakingError {
    fn from(err: redis::RedisError) -> Self {
        MatchmakingError::StoreUnavailable {
            message: err.to_string(),
        }
    }
}
