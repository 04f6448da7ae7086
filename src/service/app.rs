//! Main application state and service coordination
//!
//! `MatchmakingService` is the operational surface of the waiting room.
//! `AppState` wires it to the shared store, the AMQP broker, the health
//! server and the background tasks of the production service.

use crate::amqp::connection::{AmqpConfig, AmqpConnection};
use crate::amqp::handlers::{MessageHandler, RequestConsumer};
use crate::amqp::publisher::{AmqpEventPublisher, EventPublisher, PublisherConfig};
use crate::config::AppConfig;
use crate::engine::MatchmakingEngine;
use crate::error::{MatchmakingError, Result as MatchmakingResult};
use crate::metrics::health::HealthServerConfig;
use crate::metrics::{HealthServer, MetricsCollector, MetricsService};
use crate::pool::{ExerciseTypeProvider, StaticExerciseTypeProvider};
use crate::registry::WaitingEntryRegistry;
use crate::service::health::{HealthCheck, HealthContext};
use crate::session::SessionIdDeriver;
use crate::store::{InMemoryPoolStore, PoolStore, RedisPoolStore, StoreBackend};
use crate::sweeper::{ExpirySweeper, SweepReport};
use crate::types::{EnterOutcome, ExerciseType, Score, WaitingRoomRequest};
use crate::utils::{Clock, SystemClock};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

/// Service-level errors
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("AMQP connection error: {message}")]
    AmqpConnection { message: String },

    #[error("Store error: {message}")]
    Store { message: String },

    #[error("Service initialization error: {message}")]
    Initialization { message: String },

    #[error("Background task error: {message}")]
    BackgroundTask { message: String },
}

/// The waiting room: admission, matching, leaving and the expiry sweep
pub struct MatchmakingService {
    engine: MatchmakingEngine,
    sweeper: Arc<ExpirySweeper>,
    registry: Arc<WaitingEntryRegistry>,
    started_at: Instant,
}

impl MatchmakingService {
    /// Assemble the waiting room on top of `store`.
    ///
    /// Refuses to start when the exercise types are invalid or the session
    /// id hash fails its self-test.
    pub fn new(
        config: &AppConfig,
        store: Arc<dyn PoolStore>,
        clock: Arc<dyn Clock>,
        event_publisher: Arc<dyn EventPublisher>,
        metrics_collector: Arc<MetricsCollector>,
    ) -> Result<Self, ServiceError> {
        let exercise_types: Arc<dyn ExerciseTypeProvider> = Arc::new(
            StaticExerciseTypeProvider::new(&config.matchmaking.exercise_types).map_err(|e| {
                ServiceError::Configuration {
                    message: format!("Invalid exercise types: {}", e),
                }
            })?,
        );

        let session_ids = SessionIdDeriver::new().map_err(|e| ServiceError::Initialization {
            message: format!("Session id derivation unavailable: {}", e),
        })?;

        let registry = Arc::new(WaitingEntryRegistry::new(store, clock, config.wait_ttl()));

        let engine = MatchmakingEngine::with_config(
            registry.clone(),
            exercise_types.clone(),
            event_publisher.clone(),
            session_ids,
            metrics_collector.clone(),
            config.matching_config(),
        );

        let sweeper = Arc::new(ExpirySweeper::new(
            registry.clone(),
            exercise_types,
            event_publisher,
            metrics_collector,
            config.sweep_interval(),
        ));

        info!(
            "Waiting room ready - pools: {:?}, wait ttl: {}s, sweep every {}s",
            config.matchmaking.exercise_types,
            config.matchmaking.wait_ttl_seconds,
            config.matchmaking.sweep_interval_seconds
        );

        Ok(Self {
            engine,
            sweeper,
            registry,
            started_at: Instant::now(),
        })
    }

    /// Match the player against the pool or admit them to wait
    pub async fn enter_waiting_room(
        &self,
        token: &str,
        exercise_type: ExerciseType,
        score: Score,
    ) -> MatchmakingResult<EnterOutcome> {
        self.engine.try_enter(token, exercise_type, score).await
    }

    /// Stop waiting. Returns `true` if the player was waiting.
    pub async fn leave_waiting_room(
        &self,
        token: &str,
        exercise_type: ExerciseType,
    ) -> MatchmakingResult<bool> {
        self.engine.leave(token, exercise_type).await
    }

    /// Run one expiry sweep over every pool
    pub async fn sweep_expired(&self) -> SweepReport {
        self.sweeper.sweep_expired().await
    }

    pub fn derive_session_id(&self, token: &str, date_stamp: &str) -> String {
        self.engine.session_ids().derive_id(token, date_stamp)
    }

    pub async fn pool_sizes(&self) -> MatchmakingResult<Vec<(ExerciseType, usize)>> {
        self.engine.waiting_counts().await
    }

    pub async fn ping_store(&self) -> MatchmakingResult<()> {
        self.registry.ping().await
    }

    pub fn engine(&self) -> &MatchmakingEngine {
        &self.engine
    }

    pub fn registry(&self) -> Arc<WaitingEntryRegistry> {
        self.registry.clone()
    }

    pub fn sweeper(&self) -> Arc<ExpirySweeper> {
        self.sweeper.clone()
    }

    pub fn uptime(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }
}

/// Forwards AMQP requests to the waiting room
pub struct WaitingRoomMessageHandler {
    service: Arc<MatchmakingService>,
    metrics_collector: Arc<MetricsCollector>,
}

impl WaitingRoomMessageHandler {
    pub fn new(service: Arc<MatchmakingService>, metrics_collector: Arc<MetricsCollector>) -> Self {
        Self {
            service,
            metrics_collector,
        }
    }
}

#[async_trait]
impl MessageHandler for WaitingRoomMessageHandler {
    async fn handle_request(&self, request: WaitingRoomRequest) -> MatchmakingResult<()> {
        let timer = self.metrics_collector.start_timer();
        let (operation, result) = match request {
            WaitingRoomRequest::Enter(enter) => {
                let result = self
                    .service
                    .enter_waiting_room(&enter.token, enter.exercise_type, enter.score)
                    .await
                    .map(|outcome| {
                        debug!("Enter request for '{}' resolved: {:?}", enter.token, outcome);
                    });
                ("enter", result)
            }
            WaitingRoomRequest::Leave(leave) => {
                let result = self
                    .service
                    .leave_waiting_room(&leave.token, leave.exercise_type)
                    .await
                    .map(|removed| {
                        debug!(
                            "Leave request for '{}' resolved: removed={}",
                            leave.token, removed
                        );
                    });
                ("leave", result)
            }
        };

        self.metrics_collector
            .record_amqp_operation(operation, result.is_ok(), timer.stop());
        result
    }

    async fn handle_error(&self, error: MatchmakingError, message_data: &[u8]) {
        match &error {
            MatchmakingError::InvalidRequest { .. }
            | MatchmakingError::UnknownExerciseType { .. } => {
                warn!("Dropping rejected waiting room request: {}", error);
            }
            _ => {
                error!(
                    "Waiting room request failed - error: '{}', message_size: {} bytes",
                    error,
                    message_data.len()
                );
            }
        }

        if !message_data.is_empty() {
            let preview_len = std::cmp::min(100, message_data.len());
            let preview = String::from_utf8_lossy(&message_data[..preview_len]);
            debug!("Message preview: {:?}", preview);
        }
    }
}

/// Main application state containing all service components
pub struct AppState {
    /// Application configuration
    config: AppConfig,

    /// The waiting room itself
    service: Arc<MatchmakingService>,

    /// AMQP connection for message handling
    amqp_connection: Arc<AmqpConnection>,

    /// Metrics service for monitoring and health checks
    metrics_service: Arc<MetricsService>,

    /// Background task handles
    background_tasks: Vec<JoinHandle<()>>,

    /// AMQP consumer for waiting-room requests
    request_consumer: Option<RequestConsumer>,

    /// Service status
    is_running: Arc<RwLock<bool>>,
}

impl AppState {
    /// Initialize the application with all dependencies
    pub async fn new(config: AppConfig) -> Result<Self, ServiceError> {
        info!("Initializing sparring-room matchmaking service");
        info!(
            "Configuration: service={}, amqp_url={}, store={}",
            config.service.name, config.amqp.url, config.store.backend
        );

        let metrics_collector =
            Arc::new(
                MetricsCollector::new().map_err(|e| ServiceError::Initialization {
                    message: format!("Failed to create metrics collector: {}", e),
                })?,
            );

        let store = Self::initialize_store(&config).await?;
        let amqp_connection = Self::initialize_amqp(&config).await?;
        let event_publisher = Self::initialize_publisher(&config, &amqp_connection).await?;

        let service = Arc::new(MatchmakingService::new(
            &config,
            store,
            Arc::new(SystemClock),
            event_publisher,
            metrics_collector.clone(),
        )?);

        let is_running = Arc::new(RwLock::new(false));
        let health_context = HealthContext {
            service_name: config.service.name.clone(),
            service: service.clone(),
            amqp_connection: Some(amqp_connection.clone()),
            is_running: is_running.clone(),
        };
        let metrics_service = Self::initialize_metrics(&config, metrics_collector, health_context);

        Ok(Self {
            config,
            service,
            amqp_connection,
            metrics_service,
            background_tasks: Vec::new(),
            request_consumer: None,
            is_running,
        })
    }

    /// Start all background services and message consumption
    pub async fn start(&mut self) -> Result<(), ServiceError> {
        info!("Starting sparring-room matchmaking service");

        // Mark as running
        *self.is_running.write().await = true;

        // Start metrics service first
        self.start_metrics_service().await?;

        // Start AMQP message consumption
        self.start_amqp_consumption().await?;

        // Start background tasks
        self.start_background_tasks();

        info!("✅ Sparring-room matchmaking service started successfully");
        Ok(())
    }

    /// Perform graceful shutdown
    pub async fn shutdown(&mut self) -> Result<(), ServiceError> {
        info!("Starting graceful shutdown of sparring-room service");

        // Mark as not running
        *self.is_running.write().await = false;

        // Stop AMQP message consumption
        if let Some(consumer) = &self.request_consumer {
            if let Err(e) = consumer.stop_consuming().await {
                warn!("Failed to stop AMQP consumer: {}", e);
            } else {
                info!("✅ AMQP message consumption stopped");
            }
        }

        // Stop background tasks (including metrics service task)
        self.stop_background_tasks().await;

        info!("Stopping metrics service...");
        if let Err(e) = self.metrics_service.stop().await {
            warn!("Failed to stop metrics service: {}", e);
        } else {
            info!("✅ Metrics service stopped");
        }

        let final_stats =
            self.service
                .engine()
                .get_stats()
                .await
                .map_err(|e| ServiceError::BackgroundTask {
                    message: format!("Failed to get final stats: {}", e),
                })?;

        info!("Final service statistics: {:?}", final_stats);
        info!("✅ Sparring-room service shutdown completed");

        Ok(())
    }

    /// Get service configuration
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Check if service is running
    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    pub fn service(&self) -> Arc<MatchmakingService> {
        self.service.clone()
    }

    /// Get metrics service
    pub fn metrics_service(&self) -> Arc<MetricsService> {
        self.metrics_service.clone()
    }

    /// Get AMQP connection for health checks
    pub fn amqp_connection(&self) -> Arc<AmqpConnection> {
        self.amqp_connection.clone()
    }

    /// Probe context over this service's components
    pub fn health_context(&self) -> HealthContext {
        HealthContext {
            service_name: self.config.service.name.clone(),
            service: self.service.clone(),
            amqp_connection: Some(self.amqp_connection.clone()),
            is_running: self.is_running.clone(),
        }
    }

    async fn initialize_store(config: &AppConfig) -> Result<Arc<dyn PoolStore>, ServiceError> {
        match config.store.backend {
            StoreBackend::Redis => {
                info!("Connecting to Redis store: {}", config.store.redis_url);
                let store = RedisPoolStore::connect(&config.store.redis_url, &config.store.key_prefix)
                    .await
                    .map_err(|e| ServiceError::Store {
                        message: format!("Failed to connect to Redis: {}", e),
                    })?;
                store.ping().await.map_err(|e| ServiceError::Store {
                    message: format!("Redis ping failed: {}", e),
                })?;
                Ok(Arc::new(store))
            }
            StoreBackend::Memory => {
                warn!("Using the in-memory store - pools are not shared between instances");
                Ok(Arc::new(InMemoryPoolStore::new()))
            }
        }
    }

    /// Initialize metrics service
    fn initialize_metrics(
        config: &AppConfig,
        metrics_collector: Arc<MetricsCollector>,
        health_context: HealthContext,
    ) -> Arc<MetricsService> {
        info!(
            "Initializing metrics service on port {}",
            config.service.health_port
        );

        let health_config = HealthServerConfig {
            port: config.service.health_port,
            host: "0.0.0.0".to_string(),
        };

        let health_server = Arc::new(
            HealthServer::new(health_config, metrics_collector.clone())
                .with_context(health_context),
        );
        Arc::new(MetricsService::new(metrics_collector, health_server))
    }

    /// Start metrics service
    async fn start_metrics_service(&mut self) -> Result<(), ServiceError> {
        info!("Starting metrics and health endpoints");

        let metrics_service = self.metrics_service.clone();
        let port = self.config.service.health_port;

        let metrics_handle = tokio::spawn(async move {
            if let Err(e) = metrics_service.start().await {
                error!("Metrics service failed: {}", e);
            } else {
                info!("Metrics service task completed");
            }
        });

        self.background_tasks.push(metrics_handle);

        // Give the server a moment to start up
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        info!("✅ Metrics service started on port {}", port);
        Ok(())
    }

    /// Initialize AMQP connection with retry logic
    async fn initialize_amqp(config: &AppConfig) -> Result<Arc<AmqpConnection>, ServiceError> {
        info!("Connecting to AMQP broker: {}", config.amqp.url);

        let amqp_config =
            AmqpConfig::from_settings(&config.amqp).map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to parse AMQP URL: {}", e),
            })?;

        let connection =
            AmqpConnection::new(amqp_config)
                .await
                .map_err(|e| ServiceError::AmqpConnection {
                    message: format!("Failed to connect to AMQP: {}", e),
                })?;

        Ok(Arc::new(connection))
    }

    async fn initialize_publisher(
        config: &AppConfig,
        amqp_connection: &AmqpConnection,
    ) -> Result<Arc<dyn EventPublisher>, ServiceError> {
        let channel = amqp_connection
            .connection()
            .open_channel(None)
            .await
            .map_err(|e| ServiceError::Initialization {
                message: format!("Failed to open AMQP channel: {}", e),
            })?;

        let publisher_config = PublisherConfig {
            max_retries: config.amqp.max_retry_attempts,
            retry_delay_ms: config.amqp.retry_delay_ms,
            ..PublisherConfig::default()
        };
        let event_publisher = AmqpEventPublisher::new(channel, publisher_config)
            .await
            .map_err(|e| ServiceError::Initialization {
                message: format!("Failed to initialize event publisher: {}", e),
            })?;

        Ok(Arc::new(event_publisher))
    }

    /// Start AMQP message consumption
    async fn start_amqp_consumption(&mut self) -> Result<(), ServiceError> {
        let queue_name = self.config.amqp.queue_name.clone();
        info!("Opening AMQP channel for message consumption...");
        let channel = self
            .amqp_connection
            .connection()
            .open_channel(None)
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to open consumer channel: {}", e),
            })?;

        // Declare the queue to ensure it exists
        let queue_declare_args = amqprs::channel::QueueDeclareArguments::new(&queue_name)
            .durable(true)
            .auto_delete(false)
            .finish();

        channel
            .queue_declare(queue_declare_args)
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to declare queue {}: {}", queue_name, e),
            })?;

        info!("Queue '{}' declared successfully", queue_name);

        let message_handler = Arc::new(WaitingRoomMessageHandler::new(
            self.service.clone(),
            self.metrics_service.collector(),
        ));
        let consumer = RequestConsumer::new(message_handler, channel);

        consumer
            .start_consuming(&queue_name)
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to start consuming messages: {}", e),
            })?;

        self.request_consumer = Some(consumer);

        info!(
            "AMQP message consumption started successfully on queue: '{}'",
            queue_name
        );
        Ok(())
    }

    /// Start background maintenance tasks
    fn start_background_tasks(&mut self) {
        info!("Starting background maintenance tasks...");

        // Expiry sweep
        let sweep_task = self.service.sweeper().start(self.is_running.clone());

        // Service health metrics task
        info!("Starting health metrics task (60s interval)...");
        let health_metrics_task = {
            let metrics_collector = self.metrics_service.collector();
            let health_context = self.health_context();
            let is_running = self.is_running.clone();

            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(60));
                info!("Health metrics task started");

                while *is_running.read().await {
                    interval.tick().await;

                    let uptime = health_context.service.uptime();
                    metrics_collector.update_uptime(uptime);

                    match HealthCheck::check(&health_context).await {
                        Ok(health) => {
                            metrics_collector.update_health_status(health.status.as_gauge());
                            for check in &health.checks {
                                metrics_collector.update_component_health(
                                    &check.name,
                                    check.status != crate::service::health::HealthStatus::Unhealthy,
                                );
                            }
                            debug!(
                                "Updated service health metrics - uptime: {}s, status: {}",
                                uptime.as_secs(),
                                health.status
                            );
                        }
                        Err(e) => warn!("Health metrics update failed: {}", e),
                    }
                }

                info!("Health metrics task stopped");
            })
        };

        self.background_tasks.push(sweep_task);
        self.background_tasks.push(health_metrics_task);

        info!("2 background maintenance tasks started successfully");
    }

    /// Stop all background tasks
    async fn stop_background_tasks(&mut self) {
        let task_count = self.background_tasks.len();
        if task_count == 0 {
            info!("No background tasks to stop");
            return;
        }

        info!("Stopping {} background tasks...", task_count);

        for (i, task) in self.background_tasks.drain(..).enumerate() {
            debug!("Aborting background task {}/{}", i + 1, task_count);
            task.abort();
        }

        // Give tasks time to clean up gracefully
        tokio::time::sleep(std::time::Duration::from_millis(500)).await;

        info!("✅ All {} background tasks stopped", task_count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amqp::handlers::process_message;
    use crate::amqp::messages::MessageUtils;
    use crate::amqp::publisher::MockEventPublisher;
    use crate::types::{EnterRequest, LeaveRequest};
    use crate::utils::{current_timestamp, date_stamp};

    fn create_service(config: &AppConfig) -> Arc<MatchmakingService> {
        Arc::new(
            MatchmakingService::new(
                config,
                Arc::new(InMemoryPoolStore::new()),
                Arc::new(SystemClock),
                Arc::new(MockEventPublisher::new()),
                Arc::new(MetricsCollector::new().unwrap()),
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_invalid_exercise_types_refuse_start() {
        let mut config = AppConfig::default();
        config.matchmaking.exercise_types = vec![];

        let result = MatchmakingService::new(
            &config,
            Arc::new(InMemoryPoolStore::new()),
            Arc::new(SystemClock),
            Arc::new(MockEventPublisher::new()),
            Arc::new(MetricsCollector::new().unwrap()),
        );
        assert!(matches!(result, Err(ServiceError::Configuration { .. })));
    }

    #[tokio::test]
    async fn test_operational_surface() {
        let service = create_service(&AppConfig::default());

        let outcome = service.enter_waiting_room("alice", 1, 500).await.unwrap();
        assert!(matches!(outcome, EnterOutcome::Admitted(_)));

        let outcome = service.enter_waiting_room("bob", 1, 540).await.unwrap();
        let EnterOutcome::Matched(result) = outcome else {
            panic!("expected a match");
        };
        assert_eq!(
            result.session_id,
            service.derive_session_id("alice", &date_stamp(result.matched_at))
        );

        service.enter_waiting_room("carol", 2, 100).await.unwrap();
        assert!(service.leave_waiting_room("carol", 2).await.unwrap());
        assert_eq!(service.sweep_expired().await.expired, 0);
    }

    #[tokio::test]
    async fn test_message_handler_dispatch() {
        let service = create_service(&AppConfig::default());
        let handler = WaitingRoomMessageHandler::new(
            service.clone(),
            Arc::new(MetricsCollector::new().unwrap()),
        );

        let enter = WaitingRoomRequest::Enter(EnterRequest {
            token: "alice".to_string(),
            exercise_type: 3,
            score: 800,
            timestamp: current_timestamp(),
        });
        process_message(&handler, &MessageUtils::serialize_request(&enter).unwrap())
            .await
            .unwrap();
        assert_eq!(service.registry().pool_size(3).await.unwrap(), 1);

        let leave = WaitingRoomRequest::Leave(LeaveRequest {
            token: "alice".to_string(),
            exercise_type: 3,
            timestamp: current_timestamp(),
        });
        process_message(&handler, &MessageUtils::serialize_request(&leave).unwrap())
            .await
            .unwrap();
        assert_eq!(service.registry().pool_size(3).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unknown_exercise_type_is_rejected_by_handler() {
        let service = create_service(&AppConfig::default());
        let handler =
            WaitingRoomMessageHandler::new(service, Arc::new(MetricsCollector::new().unwrap()));

        let enter = WaitingRoomRequest::Enter(EnterRequest {
            token: "alice".to_string(),
            exercise_type: 99,
            score: 800,
            timestamp: current_timestamp(),
        });
        let err = handler.handle_request(enter).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MatchmakingError>(),
            Some(MatchmakingError::UnknownExerciseType { exercise_type: 99 })
        ));
    }
}
