//! Health check probes for the sparring-room service
//!
//! Readiness and liveness probes plus the detailed report served on
//! `/stats`.

use crate::amqp::connection::AmqpConnection;
use crate::service::app::MatchmakingService;
use crate::types::ExerciseType;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, error};

/// Health check status
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Gauge value exported as `sparring_room_health_status`
    pub fn as_gauge(&self) -> u8 {
        match self {
            HealthStatus::Unhealthy => 0,
            HealthStatus::Degraded => 1,
            HealthStatus::Healthy => 2,
        }
    }

    fn worst(self, other: &HealthStatus) -> HealthStatus {
        if self.as_gauge() <= other.as_gauge() {
            self
        } else {
            other.clone()
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "✅ healthy"),
            HealthStatus::Degraded => write!(f, "⚠️  degraded"),
            HealthStatus::Unhealthy => write!(f, "❌ unhealthy"),
        }
    }
}

/// Everything the probes need to look at
#[derive(Clone)]
pub struct HealthContext {
    pub service_name: String,
    pub service: Arc<MatchmakingService>,
    /// Absent when running without a broker
    pub amqp_connection: Option<Arc<AmqpConnection>>,
    pub is_running: Arc<RwLock<bool>>,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    /// Overall service status
    pub status: HealthStatus,
    /// Service name
    pub service: String,
    pub version: String,
    /// Current timestamp
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Detailed component checks
    pub checks: Vec<ComponentCheck>,
    /// Service statistics
    pub stats: ServiceStats,
}

/// Individual component health check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentCheck {
    /// Component name
    pub name: String,
    /// Component status
    pub status: HealthStatus,
    /// Optional error message if unhealthy
    pub message: Option<String>,
    /// Check duration in milliseconds
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoolStatus {
    pub exercise_type: ExerciseType,
    pub waiting: usize,
}

/// Service statistics for health reporting
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceStats {
    /// Players waiting across all pools
    pub players_waiting: usize,
    pub pools: Vec<PoolStatus>,
    pub players_entered: u64,
    pub players_admitted: u64,
    pub matches_made: u64,
    pub players_left: u64,
    pub lost_races: u64,
    pub publish_failures: u64,
    pub uptime_seconds: u64,
}

impl HealthCheck {
    /// Perform a comprehensive health check of the service
    pub async fn check(context: &HealthContext) -> Result<Self> {
        let mut checks = Vec::new();

        checks.push(Self::check_service_running(context).await);
        checks.push(Self::check_store(context).await);
        if let Some(connection) = &context.amqp_connection {
            checks.push(Self::check_amqp_health(connection));
        }

        let status = checks
            .iter()
            .fold(HealthStatus::Healthy, |status, check| status.worst(&check.status));
        let stats = Self::gather_service_stats(context).await;

        Ok(HealthCheck {
            status,
            service: context.service_name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: chrono::Utc::now(),
            checks,
            stats,
        })
    }

    /// Simple liveness check - just verify service is running
    pub async fn liveness_check(context: &HealthContext) -> Result<HealthStatus> {
        if *context.is_running.read().await {
            Ok(HealthStatus::Healthy)
        } else {
            Ok(HealthStatus::Unhealthy)
        }
    }

    /// Readiness check - the service must be running and reach its store
    pub async fn readiness_check(context: &HealthContext) -> Result<HealthStatus> {
        if !*context.is_running.read().await {
            return Ok(HealthStatus::Unhealthy);
        }

        let mut status = Self::check_store(context).await.status;
        if let Some(connection) = &context.amqp_connection {
            status = status.worst(&Self::check_amqp_health(connection).status);
        }
        Ok(status)
    }

    async fn check_service_running(context: &HealthContext) -> ComponentCheck {
        let start = Instant::now();

        let (status, message) = if *context.is_running.read().await {
            (HealthStatus::Healthy, None)
        } else {
            (
                HealthStatus::Unhealthy,
                Some("Service is not running".to_string()),
            )
        };

        ComponentCheck {
            name: "service_running".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    /// Round-trip to the shared store
    async fn check_store(context: &HealthContext) -> ComponentCheck {
        let start = Instant::now();

        let (status, message) = match context.service.ping_store().await {
            Ok(()) => (HealthStatus::Healthy, None),
            Err(e) => {
                error!("Store health check failed: {}", e);
                (
                    HealthStatus::Unhealthy,
                    Some(format!("Store unreachable: {}", e)),
                )
            }
        };

        ComponentCheck {
            name: "store".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    fn check_amqp_health(connection: &AmqpConnection) -> ComponentCheck {
        let start = Instant::now();

        let (status, message) = if connection.is_alive() {
            (HealthStatus::Healthy, None)
        } else {
            (
                HealthStatus::Unhealthy,
                Some("AMQP connection is closed".to_string()),
            )
        };

        ComponentCheck {
            name: "amqp_connection".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    async fn gather_service_stats(context: &HealthContext) -> ServiceStats {
        let mut stats = ServiceStats {
            uptime_seconds: context.service.uptime().as_secs(),
            ..ServiceStats::default()
        };

        match context.service.pool_sizes().await {
            Ok(sizes) => {
                stats.players_waiting = sizes.iter().map(|(_, waiting)| waiting).sum();
                stats.pools = sizes
                    .into_iter()
                    .map(|(exercise_type, waiting)| PoolStatus {
                        exercise_type,
                        waiting,
                    })
                    .collect();
            }
            Err(e) => debug!("Failed to read pool sizes for health check: {}", e),
        }

        match context.service.engine().get_stats().await {
            Ok(engine_stats) => {
                stats.players_entered = engine_stats.players_entered;
                stats.players_admitted = engine_stats.players_admitted;
                stats.matches_made = engine_stats.matches_made;
                stats.players_left = engine_stats.players_left;
                stats.lost_races = engine_stats.lost_races;
                stats.publish_failures = engine_stats.publish_failures;
            }
            Err(e) => debug!("Failed to read engine stats for health check: {}", e),
        }

        stats
    }

    /// Convert health check to JSON string
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| anyhow::anyhow!("Failed to serialize health check: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amqp::publisher::MockEventPublisher;
    use crate::config::AppConfig;
    use crate::metrics::MetricsCollector;
    use crate::store::InMemoryPoolStore;
    use crate::utils::SystemClock;

    fn create_context(running: bool) -> HealthContext {
        let service = MatchmakingService::new(
            &AppConfig::default(),
            Arc::new(InMemoryPoolStore::new()),
            Arc::new(SystemClock),
            Arc::new(MockEventPublisher::new()),
            Arc::new(MetricsCollector::new().unwrap()),
        )
        .unwrap();

        HealthContext {
            service_name: "sparring-room".to_string(),
            service: Arc::new(service),
            amqp_connection: None,
            is_running: Arc::new(RwLock::new(running)),
        }
    }

    #[tokio::test]
    async fn test_healthy_service_report() {
        let context = create_context(true);
        context
            .service
            .enter_waiting_room("alice", 1, 500)
            .await
            .unwrap();

        let health = HealthCheck::check(&context).await.unwrap();
        assert_eq!(health.status, HealthStatus::Healthy);
        assert_eq!(health.checks.len(), 2);
        assert_eq!(health.stats.players_waiting, 1);
        assert_eq!(health.stats.players_admitted, 1);
        assert_eq!(health.stats.pools.len(), 3);
        assert!(health.to_json().unwrap().contains("\"store\""));
    }

    #[tokio::test]
    async fn test_stopped_service_is_unhealthy() {
        let context = create_context(false);

        let health = HealthCheck::check(&context).await.unwrap();
        assert_eq!(health.status, HealthStatus::Unhealthy);
        assert_eq!(
            HealthCheck::liveness_check(&context).await.unwrap(),
            HealthStatus::Unhealthy
        );
        assert_eq!(
            HealthCheck::readiness_check(&context).await.unwrap(),
            HealthStatus::Unhealthy
        );
    }

    #[test]
    fn test_status_ordering() {
        assert_eq!(
            HealthStatus::Healthy.worst(&HealthStatus::Degraded),
            HealthStatus::Degraded
        );
        assert_eq!(
            HealthStatus::Unhealthy.worst(&HealthStatus::Healthy),
            HealthStatus::Unhealthy
        );
        assert_eq!(HealthStatus::Healthy.as_gauge(), 2);
    }
}
