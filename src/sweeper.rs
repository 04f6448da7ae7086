//! Periodic expiry sweep
//!
//! Reconciles every pool against its TTL markers. Entries whose marker has
//! lapsed are removed, and leftovers that fell out of the score index are
//! purged from the remaining structures.

use crate::amqp::publisher::EventPublisher;
use crate::error::Result;
use crate::metrics::MetricsCollector;
use crate::pool::ExerciseTypeProvider;
use crate::registry::WaitingEntryRegistry;
use crate::store::Removal;
use crate::types::{ExerciseType, LeaveReason, PlayerLeftWaitingRoom, RemainingTtl};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Outcome of one sweep pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub pools: usize,
    pub scanned: usize,
    pub expired: usize,
    pub orphans_purged: usize,
    pub still_waiting: usize,
    pub failed_pools: usize,
}

impl SweepReport {
    pub fn removed(&self) -> usize {
        self.expired + self.orphans_purged
    }
}

/// Removes lapsed entries and repairs orphans across all pools
pub struct ExpirySweeper {
    registry: Arc<WaitingEntryRegistry>,
    exercise_types: Arc<dyn ExerciseTypeProvider>,
    event_publisher: Arc<dyn EventPublisher>,
    metrics_collector: Arc<MetricsCollector>,
    interval: Duration,
}

impl ExpirySweeper {
    pub fn new(
        registry: Arc<WaitingEntryRegistry>,
        exercise_types: Arc<dyn ExerciseTypeProvider>,
        event_publisher: Arc<dyn EventPublisher>,
        metrics_collector: Arc<MetricsCollector>,
        interval: Duration,
    ) -> Self {
        Self {
            registry,
            exercise_types,
            event_publisher,
            metrics_collector,
            interval,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run one pass over every known pool.
    ///
    /// A failing pool is logged and counted; the remaining pools are still
    /// swept.
    pub async fn sweep_expired(&self) -> SweepReport {
        let start_time = Instant::now();
        let mut report = SweepReport::default();

        for exercise_type in self.exercise_types.exercise_types() {
            report.pools += 1;
            if let Err(e) = self.sweep_pool(exercise_type, &mut report).await {
                error!("Sweep of pool {} failed: {}", exercise_type, e);
                report.failed_pools += 1;
                continue;
            }

            match self.registry.pool_size(exercise_type).await {
                Ok(waiting) => self
                    .metrics_collector
                    .set_players_waiting(exercise_type, waiting),
                Err(e) => warn!("Failed to read size of pool {}: {}", exercise_type, e),
            }
        }

        let duration = start_time.elapsed();
        self.metrics_collector
            .record_sweep_removal("expired", report.expired as u64);
        self.metrics_collector
            .record_sweep_removal("orphan", report.orphans_purged as u64);
        self.metrics_collector.record_sweep_duration(duration);

        if report.removed() > 0 || report.failed_pools > 0 {
            info!(
                "Sweep completed in {:.2}ms - pools: {}, scanned: {}, expired: {}, orphans: {}, waiting: {}, failed pools: {}",
                duration.as_secs_f64() * 1000.0,
                report.pools,
                report.scanned,
                report.expired,
                report.orphans_purged,
                report.still_waiting,
                report.failed_pools
            );
        } else {
            debug!(
                "Sweep completed - {} entries still waiting across {} pools",
                report.still_waiting, report.pools
            );
        }

        report
    }

    async fn sweep_pool(&self, exercise_type: ExerciseType, report: &mut SweepReport) -> Result<()> {
        let tokens = self.registry.tracked_tokens(exercise_type).await?;

        for token in tokens {
            report.scanned += 1;

            if !self.registry.in_score_index(exercise_type, &token).await? {
                debug!("Token {} in pool {} is an orphan", token, exercise_type);
                match self.registry.purge(exercise_type, &token).await? {
                    Removal::Removed => {
                        report.orphans_purged += 1;
                        continue;
                    }
                    Removal::Absent => continue,
                    // re-admitted since the index check; judge it by its marker
                    Removal::StillWaiting => {}
                }
            }

            match self.registry.remaining_ttl(exercise_type, &token).await? {
                RemainingTtl::Remaining(left) => {
                    debug!(
                        "Token {} in pool {} has {:?} left",
                        token, exercise_type, left
                    );
                    report.still_waiting += 1;
                }
                RemainingTtl::Expired | RemainingTtl::Absent => {
                    match self.registry.remove_if_lapsed(exercise_type, &token).await? {
                        Removal::Removed => {
                            report.expired += 1;
                            self.announce_expiry(exercise_type, &token).await;
                        }
                        Removal::StillWaiting => {
                            // re-admitted between the read and the removal
                            report.still_waiting += 1;
                        }
                        Removal::Absent => {
                            debug!(
                                "Token {} in pool {} was removed concurrently",
                                token, exercise_type
                            );
                        }
                    }
                }
            }
        }

        Ok(())
    }

    async fn announce_expiry(&self, exercise_type: ExerciseType, token: &str) {
        info!("Player {} expired from pool {}", token, exercise_type);
        self.metrics_collector.record_player_left(LeaveReason::Expired);

        let event = PlayerLeftWaitingRoom {
            token: token.to_string(),
            exercise_type,
            reason: LeaveReason::Expired,
            timestamp: self.registry.clock().now(),
        };
        if let Err(e) = self.event_publisher.publish_player_left(event).await {
            warn!("Failed to publish PlayerLeftWaitingRoom event: {}", e);
            self.metrics_collector.record_publish_failure();
        }
    }

    /// Spawn the periodic sweep, running while `is_running` stays true
    pub fn start(self: Arc<Self>, is_running: Arc<RwLock<bool>>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            info!("Expiry sweeper started ({}s interval)", self.interval.as_secs());

            while *is_running.read().await {
                interval.tick().await;
                self.sweep_expired().await;
            }

            info!("Expiry sweeper stopped");
        })
    }
}
