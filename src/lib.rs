//! Sparring Room - two-party matchmaking for sparring sessions
//!
//! This crate pairs players waiting in per-exercise-type pools by score,
//! keeps the pools in a shared store so several service instances can
//! cooperate, expires stale entries and announces matches over AMQP.

pub mod amqp;
pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod pool;
pub mod registry;
pub mod reporting;
pub mod service;
pub mod session;
pub mod store;
pub mod sweeper;
pub mod types;
pub mod utils;

// Re-export commonly used types and traits
pub use error::{MatchmakingError, Result};
pub use types::*;

// Re-export key components
pub use amqp::publisher::EventPublisher;
pub use engine::MatchmakingEngine;
pub use service::MatchmakingService;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
