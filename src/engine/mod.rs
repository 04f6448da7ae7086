//! Matchmaking engine: candidate search, atomic claim and admission

pub mod manager;
pub mod matching;

pub use manager::{EngineStats, MatchmakingEngine};
pub use matching::{MatchingConfig, SCORE_WINDOW_HALF_WIDTH};
