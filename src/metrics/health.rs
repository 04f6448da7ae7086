//! Health check endpoints and Prometheus metrics server
//!
//! HTTP endpoints for health checks and Prometheus metrics of the
//! sparring-room service, served with Axum.

use crate::metrics::collector::MetricsCollector;
use crate::service::health::{HealthCheck, HealthContext, HealthStatus};
use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

const SERVICE_NAME: &str = "sparring-room";

/// Health server configuration
#[derive(Debug, Clone)]
pub struct HealthServerConfig {
    /// Port to bind the health server to
    pub port: u16,
    /// Host to bind to (typically "0.0.0.0" for all interfaces)
    pub host: String,
}

impl Default for HealthServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            host: "0.0.0.0".to_string(),
        }
    }
}

/// Shared state for the health server
#[derive(Clone)]
pub struct HealthServerState {
    pub metrics_collector: Arc<MetricsCollector>,
    pub context: Option<HealthContext>,
}

/// Health server that provides HTTP endpoints for monitoring
pub struct HealthServer {
    config: HealthServerConfig,
    state: HealthServerState,
    shutdown_tx: broadcast::Sender<()>,
}

impl HealthServer {
    /// Create a new health server
    pub fn new(config: HealthServerConfig, metrics_collector: Arc<MetricsCollector>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            state: HealthServerState {
                metrics_collector,
                context: None,
            },
            shutdown_tx,
        }
    }

    /// Attach the components the probes inspect
    pub fn with_context(mut self, context: HealthContext) -> Self {
        self.state.context = Some(context);
        self
    }

    /// Start the health server
    pub async fn start(&self) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .context("Invalid health server address")?;

        let app = self.create_router();
        let listener = TcpListener::bind(addr).await?;

        info!("Health server listening on http://{}", addr);

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                info!("Health server shutdown signal received");
            })
            .await?;

        info!("Health server stopped");
        Ok(())
    }

    /// Create the Axum router with all health endpoints
    fn create_router(&self) -> Router {
        Router::new()
            .route("/", get(root_handler))
            .route("/health", get(health_handler))
            .route("/ready", get(ready_handler))
            .route("/alive", get(alive_handler))
            .route("/metrics", get(metrics_handler))
            .route("/stats", get(stats_handler))
            .with_state(self.state.clone())
    }

    /// Stop the health server
    pub async fn stop(&self) -> Result<()> {
        info!("Stopping health server...");

        if let Err(e) = self.shutdown_tx.send(()) {
            warn!("Failed to send shutdown signal to health server: {}", e);
        }

        Ok(())
    }
}

/// Root endpoint handler - shows service information
async fn root_handler() -> impl IntoResponse {
    Json(json!({
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": [
            "/health",
            "/ready",
            "/alive",
            "/metrics",
            "/stats"
        ]
    }))
}

/// Lightweight health check endpoint handler
async fn health_handler(State(state): State<HealthServerState>) -> impl IntoResponse {
    debug!("Health check requested");

    let Some(context) = &state.context else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "unhealthy",
                "service": SERVICE_NAME,
                "version": env!("CARGO_PKG_VERSION"),
                "error": "Service not initialized"
            })),
        );
    };

    let (code, status) = match HealthCheck::readiness_check(context).await {
        Ok(HealthStatus::Healthy) => (StatusCode::OK, "healthy"),
        Ok(HealthStatus::Degraded) => (StatusCode::OK, "degraded"),
        Ok(HealthStatus::Unhealthy) | Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "unhealthy"),
    };

    (
        code,
        Json(json!({
            "status": status,
            "service": SERVICE_NAME,
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

/// Readiness check endpoint handler
async fn ready_handler(State(state): State<HealthServerState>) -> impl IntoResponse {
    debug!("Readiness check requested");

    match &state.context {
        Some(context) => match HealthCheck::readiness_check(context).await {
            Ok(HealthStatus::Healthy) => (StatusCode::OK, "Ready"),
            Ok(HealthStatus::Degraded) => (StatusCode::OK, "Degraded but ready"),
            Ok(HealthStatus::Unhealthy) => (StatusCode::SERVICE_UNAVAILABLE, "Not ready"),
            Err(e) => {
                error!("Readiness check failed: {}", e);
                (StatusCode::SERVICE_UNAVAILABLE, "Not ready")
            }
        },
        None => (StatusCode::SERVICE_UNAVAILABLE, "Service not initialized"),
    }
}

/// Liveness check endpoint handler
async fn alive_handler(State(state): State<HealthServerState>) -> impl IntoResponse {
    debug!("Liveness check requested");

    match &state.context {
        Some(context) => match HealthCheck::liveness_check(context).await {
            Ok(HealthStatus::Healthy) => (StatusCode::OK, "Alive"),
            _ => (StatusCode::SERVICE_UNAVAILABLE, "Not alive"),
        },
        None => (StatusCode::SERVICE_UNAVAILABLE, "Service not initialized"),
    }
}

/// Prometheus metrics endpoint handler
async fn metrics_handler(State(state): State<HealthServerState>) -> Response {
    debug!("Metrics endpoint requested");

    let metric_families = state.metrics_collector.registry().gather();
    let encoder = TextEncoder::new();

    match encoder.encode_to_string(&metric_families) {
        Ok(metrics_output) => {
            debug!("Serving {} metric families", metric_families.len());
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, encoder.format_type().to_string())],
                metrics_output,
            )
                .into_response()
        }
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to encode metrics".to_string(),
            )
                .into_response()
        }
    }
}

/// Detailed service statistics endpoint handler (for debugging/human consumption)
async fn stats_handler(State(state): State<HealthServerState>) -> impl IntoResponse {
    debug!("Stats endpoint requested");

    let Some(context) = &state.context else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "service": {
                    "name": SERVICE_NAME,
                    "version": env!("CARGO_PKG_VERSION"),
                    "status": "error"
                },
                "error": "Service not initialized",
                "timestamp": chrono::Utc::now()
            })),
        );
    };

    match HealthCheck::check(context).await {
        Ok(health) => (
            StatusCode::OK,
            Json(json!({
                "service": {
                    "name": health.service,
                    "version": health.version,
                    "status": health.status,
                    "uptime_seconds": health.stats.uptime_seconds
                },
                "pools": health.stats.pools,
                "players": {
                    "waiting": health.stats.players_waiting,
                    "entered": health.stats.players_entered,
                    "admitted": health.stats.players_admitted,
                    "left": health.stats.players_left
                },
                "matches": {
                    "made": health.stats.matches_made,
                    "lost_races": health.stats.lost_races,
                    "publish_failures": health.stats.publish_failures
                },
                "components": health.checks,
                "timestamp": health.timestamp
            })),
        ),
        Err(e) => {
            error!("Failed to get stats: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "service": {
                        "name": SERVICE_NAME,
                        "version": env!("CARGO_PKG_VERSION"),
                        "status": "error"
                    },
                    "error": "Failed to get service stats",
                    "timestamp": chrono::Utc::now()
                })),
            )
        }
    }
}

/// Programmatic access to the same probes
pub struct HealthEndpoints;

impl HealthEndpoints {
    /// Get health status as JSON
    pub async fn get_health_status(context: Option<&HealthContext>) -> Result<serde_json::Value> {
        let status = match context {
            Some(context) => match HealthCheck::readiness_check(context).await {
                Ok(HealthStatus::Healthy) => "healthy",
                Ok(HealthStatus::Degraded) => "degraded",
                Ok(HealthStatus::Unhealthy) | Err(_) => "unhealthy",
            },
            None => {
                return Ok(json!({
                    "status": "unhealthy",
                    "service": SERVICE_NAME,
                    "error": "Service not initialized"
                }))
            }
        };

        Ok(json!({
            "status": status,
            "service": SERVICE_NAME
        }))
    }

    /// Get metrics as Prometheus text format
    pub async fn get_metrics_text(metrics_collector: Arc<MetricsCollector>) -> Result<String> {
        let metric_families = metrics_collector.registry().gather();
        TextEncoder::new()
            .encode_to_string(&metric_families)
            .map_err(|e| anyhow::anyhow!("Failed to encode metrics: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amqp::publisher::MockEventPublisher;
    use crate::config::AppConfig;
    use crate::service::app::MatchmakingService;
    use crate::store::InMemoryPoolStore;
    use crate::utils::SystemClock;
    use axum::{
        body::{to_bytes, Body},
        http::Request,
    };
    use tokio::sync::RwLock;
    use tower::ServiceExt; // for oneshot

    fn create_collector() -> Arc<MetricsCollector> {
        Arc::new(MetricsCollector::new().expect("Failed to create collector"))
    }

    fn create_context(collector: Arc<MetricsCollector>) -> HealthContext {
        let service = MatchmakingService::new(
            &AppConfig::default(),
            Arc::new(InMemoryPoolStore::new()),
            Arc::new(SystemClock),
            Arc::new(MockEventPublisher::new()),
            collector,
        )
        .unwrap();

        HealthContext {
            service_name: SERVICE_NAME.to_string(),
            service: Arc::new(service),
            amqp_connection: None,
            is_running: Arc::new(RwLock::new(true)),
        }
    }

    async fn get(app: Router, uri: &str) -> Response {
        app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_root_endpoint() {
        let server = HealthServer::new(HealthServerConfig::default(), create_collector());
        let response = get(server.create_router(), "/").await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let collector = create_collector();
        collector.record_enter(1);
        collector.update_health_status(2);

        let server = HealthServer::new(HealthServerConfig::default(), collector);
        let response = get(server.create_router(), "/metrics").await;

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers().get("content-type").unwrap();
        assert!(content_type.to_str().unwrap().contains("text/plain"));

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("sparring_room_players_entered_total"));
    }

    #[tokio::test]
    async fn test_health_endpoints_without_context() {
        let server = HealthServer::new(HealthServerConfig::default(), create_collector());
        let app = server.create_router();

        for uri in ["/health", "/ready", "/alive", "/stats"] {
            let response = get(app.clone(), uri).await;
            assert_eq!(
                response.status(),
                StatusCode::SERVICE_UNAVAILABLE,
                "unexpected status for {}",
                uri
            );
        }
    }

    #[tokio::test]
    async fn test_health_endpoints_with_context() {
        let collector = create_collector();
        let context = create_context(collector.clone());
        context
            .service
            .enter_waiting_room("alice", 2, 700)
            .await
            .unwrap();

        let server =
            HealthServer::new(HealthServerConfig::default(), collector).with_context(context);
        let app = server.create_router();

        for uri in ["/health", "/ready", "/alive"] {
            assert_eq!(get(app.clone(), uri).await.status(), StatusCode::OK);
        }

        let response = get(app, "/stats").await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let stats: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(stats["players"]["waiting"], 1);
        assert_eq!(stats["service"]["status"], "healthy");
    }

    #[tokio::test]
    async fn test_404_handling() {
        let server = HealthServer::new(HealthServerConfig::default(), create_collector());
        let response = get(server.create_router(), "/nonexistent").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_programmatic_access() {
        let collector = create_collector();
        collector.record_lost_race();

        let health_status = HealthEndpoints::get_health_status(None).await.unwrap();
        assert_eq!(health_status["status"], "unhealthy");

        let context = create_context(collector.clone());
        let health_status = HealthEndpoints::get_health_status(Some(&context))
            .await
            .unwrap();
        assert_eq!(health_status["status"], "healthy");

        let metrics_text = HealthEndpoints::get_metrics_text(collector).await.unwrap();
        assert!(metrics_text.contains("sparring_room_lost_races_total"));
    }
}
