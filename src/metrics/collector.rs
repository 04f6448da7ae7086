//! Metrics collection using Prometheus
//!
//! All metrics are registered on a private registry exposed through the
//! `/metrics` endpoint of the health server.

use crate::types::{ExerciseType, LeaveReason};
use anyhow::Result;
use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    Opts, Registry,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Main metrics collector for the waiting-room service
#[derive(Clone)]
pub struct MetricsCollector {
    /// Prometheus registry
    registry: Arc<Registry>,

    /// Service-level metrics
    service_metrics: ServiceMetrics,

    /// Waiting-room metrics
    waiting_room_metrics: WaitingRoomMetrics,

    /// Performance metrics
    performance_metrics: PerformanceMetrics,
}

/// Service-level metrics
#[derive(Clone)]
pub struct ServiceMetrics {
    /// Service uptime in seconds
    pub uptime_seconds: IntGauge,

    /// Total AMQP messages processed
    pub amqp_messages_total: IntCounterVec,

    /// Events that could not be published after retries
    pub publish_failures_total: IntCounter,

    /// Health check status (0=unhealthy, 1=degraded, 2=healthy)
    pub health_status: IntGauge,

    /// Component health status
    pub component_health: IntGaugeVec,
}

/// Waiting-room metrics
#[derive(Clone)]
pub struct WaitingRoomMetrics {
    /// Join requests accepted for processing
    pub players_entered_total: IntCounterVec,

    /// Joins that ended up waiting
    pub players_admitted_total: IntCounterVec,

    /// Committed matches
    pub matches_total: IntCounterVec,

    /// Players leaving a pool, by reason
    pub players_left_total: IntCounterVec,

    /// Sweeper removals, by reason (expired, orphan)
    pub sweep_removed_total: IntCounterVec,

    /// Candidates taken by another instance between query and commit
    pub lost_races_total: IntCounter,

    /// Players currently waiting per pool
    pub players_waiting: IntGaugeVec,

    /// How long the matched party waited
    pub match_wait_seconds: Histogram,
}

/// Performance metrics
#[derive(Clone)]
pub struct PerformanceMetrics {
    /// End-to-end join processing time
    pub enter_duration_seconds: Histogram,

    /// Sweep pass duration
    pub sweep_duration_seconds: Histogram,

    /// AMQP operation durations
    pub amqp_operation_duration: HistogramVec,
}

impl MetricsCollector {
    /// Create a new metrics collector with default registry
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());
        Self::with_registry(registry)
    }

    /// Create a new metrics collector with custom registry
    pub fn with_registry(registry: Arc<Registry>) -> Result<Self> {
        let service_metrics = ServiceMetrics::new(&registry)?;
        let waiting_room_metrics = WaitingRoomMetrics::new(&registry)?;
        let performance_metrics = PerformanceMetrics::new(&registry)?;

        Ok(Self {
            registry,
            service_metrics,
            waiting_room_metrics,
            performance_metrics,
        })
    }

    /// Get the Prometheus registry
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    pub fn service(&self) -> &ServiceMetrics {
        &self.service_metrics
    }

    pub fn waiting_room(&self) -> &WaitingRoomMetrics {
        &self.waiting_room_metrics
    }

    pub fn performance(&self) -> &PerformanceMetrics {
        &self.performance_metrics
    }

    /// Record a join request that passed validation
    pub fn record_enter(&self, exercise_type: ExerciseType) {
        self.waiting_room_metrics
            .players_entered_total
            .with_label_values(&[&exercise_type.to_string()])
            .inc();
    }

    /// Record how long a join took, whatever its outcome
    pub fn record_enter_duration(&self, duration: Duration) {
        self.performance_metrics
            .enter_duration_seconds
            .observe(duration.as_secs_f64());
    }

    pub fn record_admitted(&self, exercise_type: ExerciseType) {
        self.waiting_room_metrics
            .players_admitted_total
            .with_label_values(&[&exercise_type.to_string()])
            .inc();
    }

    /// Record a committed match and the matched party's wait
    pub fn record_match(&self, exercise_type: ExerciseType, waited: Duration) {
        self.waiting_room_metrics
            .matches_total
            .with_label_values(&[&exercise_type.to_string()])
            .inc();
        self.waiting_room_metrics
            .match_wait_seconds
            .observe(waited.as_secs_f64());
    }

    pub fn record_player_left(&self, reason: LeaveReason) {
        self.waiting_room_metrics
            .players_left_total
            .with_label_values(&[&reason.to_string()])
            .inc();
    }

    pub fn record_sweep_removal(&self, reason: &str, count: u64) {
        if count == 0 {
            return;
        }
        self.waiting_room_metrics
            .sweep_removed_total
            .with_label_values(&[reason])
            .inc_by(count);
    }

    pub fn record_sweep_duration(&self, duration: Duration) {
        self.performance_metrics
            .sweep_duration_seconds
            .observe(duration.as_secs_f64());
    }

    pub fn record_lost_race(&self) {
        self.waiting_room_metrics.lost_races_total.inc();
    }

    pub fn record_publish_failure(&self) {
        self.service_metrics.publish_failures_total.inc();
    }

    pub fn set_players_waiting(&self, exercise_type: ExerciseType, waiting: usize) {
        self.waiting_room_metrics
            .players_waiting
            .with_label_values(&[&exercise_type.to_string()])
            .set(waiting as i64);
    }

    /// Record AMQP operation
    pub fn record_amqp_operation(&self, operation: &str, success: bool, duration: Duration) {
        let status = if success { "success" } else { "error" };

        self.service_metrics
            .amqp_messages_total
            .with_label_values(&[operation, status])
            .inc();

        self.performance_metrics
            .amqp_operation_duration
            .with_label_values(&[operation, status])
            .observe(duration.as_secs_f64());
    }

    pub fn update_uptime(&self, uptime: Duration) {
        self.service_metrics
            .uptime_seconds
            .set(uptime.as_secs() as i64);
    }

    /// Update health status
    pub fn update_health_status(&self, status: u8) {
        self.service_metrics.health_status.set(status as i64);
    }

    /// Update component health
    pub fn update_component_health(&self, component: &str, healthy: bool) {
        let status = if healthy { 1 } else { 0 };
        self.service_metrics
            .component_health
            .with_label_values(&[component])
            .set(status);
    }

    /// Create a timer for measuring operation duration
    pub fn start_timer(&self) -> MetricsTimer {
        MetricsTimer::new()
    }
}

/// Timer for measuring operation durations
pub struct MetricsTimer {
    start: Instant,
}

impl MetricsTimer {
    fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get the elapsed duration
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop the timer and return the duration
    pub fn stop(self) -> Duration {
        self.elapsed()
    }
}

impl ServiceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let uptime_seconds =
            IntGauge::new("sparring_room_uptime_seconds", "Service uptime in seconds")?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        let amqp_messages_total = IntCounterVec::new(
            Opts::new(
                "sparring_room_amqp_messages_total",
                "Total AMQP messages processed",
            ),
            &["operation", "status"],
        )?;
        registry.register(Box::new(amqp_messages_total.clone()))?;

        let publish_failures_total = IntCounter::new(
            "sparring_room_publish_failures_total",
            "Events dropped after exhausting publish retries",
        )?;
        registry.register(Box::new(publish_failures_total.clone()))?;

        let health_status = IntGauge::new(
            "sparring_room_health_status",
            "Health status (0=unhealthy, 1=degraded, 2=healthy)",
        )?;
        registry.register(Box::new(health_status.clone()))?;

        let component_health = IntGaugeVec::new(
            Opts::new("sparring_room_component_health", "Component health status"),
            &["component"],
        )?;
        registry.register(Box::new(component_health.clone()))?;

        Ok(Self {
            uptime_seconds,
            amqp_messages_total,
            publish_failures_total,
            health_status,
            component_health,
        })
    }
}

impl WaitingRoomMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let players_entered_total = IntCounterVec::new(
            Opts::new(
                "sparring_room_players_entered_total",
                "Join requests processed",
            ),
            &["exercise_type"],
        )?;
        registry.register(Box::new(players_entered_total.clone()))?;

        let players_admitted_total = IntCounterVec::new(
            Opts::new(
                "sparring_room_players_admitted_total",
                "Players admitted to wait",
            ),
            &["exercise_type"],
        )?;
        registry.register(Box::new(players_admitted_total.clone()))?;

        let matches_total = IntCounterVec::new(
            Opts::new("sparring_room_matches_total", "Committed matches"),
            &["exercise_type"],
        )?;
        registry.register(Box::new(matches_total.clone()))?;

        let players_left_total = IntCounterVec::new(
            Opts::new(
                "sparring_room_players_left_total",
                "Players that stopped waiting",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(players_left_total.clone()))?;

        let sweep_removed_total = IntCounterVec::new(
            Opts::new(
                "sparring_room_sweep_removed_total",
                "Entries removed by the expiry sweeper",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(sweep_removed_total.clone()))?;

        let lost_races_total = IntCounter::new(
            "sparring_room_lost_races_total",
            "Candidates claimed concurrently before commit",
        )?;
        registry.register(Box::new(lost_races_total.clone()))?;

        let players_waiting = IntGaugeVec::new(
            Opts::new(
                "sparring_room_players_waiting",
                "Players currently waiting",
            ),
            &["exercise_type"],
        )?;
        registry.register(Box::new(players_waiting.clone()))?;

        let match_wait_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "sparring_room_match_wait_seconds",
                "Wait of the matched party before pairing",
            )
            .buckets(vec![0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 30.0, 45.0, 60.0, 120.0]),
        )?;
        registry.register(Box::new(match_wait_seconds.clone()))?;

        Ok(Self {
            players_entered_total,
            players_admitted_total,
            matches_total,
            players_left_total,
            sweep_removed_total,
            lost_races_total,
            players_waiting,
            match_wait_seconds,
        })
    }
}

impl PerformanceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let enter_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "sparring_room_enter_duration_seconds",
                "Join processing time",
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
        )?;
        registry.register(Box::new(enter_duration_seconds.clone()))?;

        let sweep_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "sparring_room_sweep_duration_seconds",
                "Expiry sweep pass duration",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
        )?;
        registry.register(Box::new(sweep_duration_seconds.clone()))?;

        let amqp_operation_duration = HistogramVec::new(
            HistogramOpts::new(
                "sparring_room_amqp_operation_duration_seconds",
                "AMQP operation duration",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["operation", "status"],
        )?;
        registry.register(Box::new(amqp_operation_duration.clone()))?;

        Ok(Self {
            enter_duration_seconds,
            sweep_duration_seconds,
            amqp_operation_duration,
        })
    }
}
