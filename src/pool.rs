//! Exercise-type catalogue
//!
//! Every admitted entry must live in a pool the sweeper visits, so the engine
//! admits only exercise types this provider knows.

use crate::error::{MatchmakingError, Result};
use crate::types::ExerciseType;
use std::collections::BTreeSet;

/// Trait for enumerating the exercise types that have waiting pools
pub trait ExerciseTypeProvider: Send + Sync {
    /// All exercise types, in ascending order
    fn exercise_types(&self) -> Vec<ExerciseType>;

    /// Whether `exercise_type` has a pool
    fn is_known(&self, exercise_type: ExerciseType) -> bool {
        self.exercise_types().contains(&exercise_type)
    }
}

/// Fixed catalogue, loaded from configuration at startup
#[derive(Debug, Clone)]
pub struct StaticExerciseTypeProvider {
    types: BTreeSet<ExerciseType>,
}

impl StaticExerciseTypeProvider {
    /// Build a provider, rejecting empty lists, non-positive ids and duplicates
    pub fn new(exercise_types: &[ExerciseType]) -> Result<Self> {
        if exercise_types.is_empty() {
            return Err(MatchmakingError::ConfigurationError {
                message: "At least one exercise type is required".to_string(),
            }
            .into());
        }

        let mut types = BTreeSet::new();
        for &exercise_type in exercise_types {
            if exercise_type <= 0 {
                return Err(MatchmakingError::ConfigurationError {
                    message: format!("Exercise type must be positive, got {}", exercise_type),
                }
                .into());
            }
            if !types.insert(exercise_type) {
                return Err(MatchmakingError::ConfigurationError {
                    message: format!("Duplicate exercise type: {}", exercise_type),
                }
                .into());
            }
        }

        Ok(Self { types })
    }
}

impl ExerciseTypeProvider for StaticExerciseTypeProvider {
    fn exercise_types(&self) -> Vec<ExerciseType> {
        self.types.iter().copied().collect()
    }

    fn is_known(&self, exercise_type: ExerciseType) -> bool {
        self.types.contains(&exercise_type)
    }
}
