//! Configuration management for the sparring-room service
//!
//! Handles configuration loading from environment variables or TOML files,
//! validation, and default values for the matchmaking service.

pub mod app;

// Re-export commonly used types
pub use app::{
    parse_exercise_types, validate_config, AmqpSettings, AppConfig, MatchmakingSettings,
    ServiceSettings, StoreSettings,
};
