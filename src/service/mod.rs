//! Service layer for the sparring-room matchmaking service
//!
//! Contains the operational surface of the waiting room, the production
//! application state and the health probes.

pub mod app;
pub mod health;

pub use app::{AppState, MatchmakingService, ServiceError, WaitingRoomMessageHandler};
pub use health::{HealthCheck, HealthContext, HealthStatus};
