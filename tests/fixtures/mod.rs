//! Test fixtures for integration and load testing

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use sparring_room::amqp::publisher::MockEventPublisher;
use sparring_room::config::AppConfig;
use sparring_room::metrics::MetricsCollector;
use sparring_room::service::MatchmakingService;
use sparring_room::store::InMemoryPoolStore;
use sparring_room::types::{EnterOutcome, LeaveReason, MatchResult, WaitingRoomEvent};
use sparring_room::utils::ManualClock;
use std::collections::HashSet;
use std::sync::Arc;

/// Fixed start of every harness clock
pub fn test_epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 14, 9, 30, 0)
        .single()
        .expect("valid test epoch")
}

/// A waiting room over one shared in-memory store, driven by a manual clock.
///
/// Extra service instances created with [`TestHarness::instance`] share the
/// store, clock and publisher, like several processes sharing one Redis.
pub struct TestHarness {
    pub config: AppConfig,
    pub clock: Arc<ManualClock>,
    pub store: Arc<InMemoryPoolStore>,
    pub publisher: Arc<MockEventPublisher>,
    pub service: Arc<MatchmakingService>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(AppConfig::default())
    }

    pub fn with_config(config: AppConfig) -> Self {
        let clock = Arc::new(ManualClock::new(test_epoch()));
        let store = Arc::new(InMemoryPoolStore::with_clock(clock.clone()));
        let publisher = Arc::new(MockEventPublisher::new());

        let service = build_service(&config, &clock, &store, &publisher);

        Self {
            config,
            clock,
            store,
            publisher,
            service,
        }
    }

    /// Another engine instance over the same store
    pub fn instance(&self) -> Arc<MatchmakingService> {
        build_service(&self.config, &self.clock, &self.store, &self.publisher)
    }

    pub fn advance_secs(&self, seconds: u64) {
        self.clock.advance(std::time::Duration::from_secs(seconds));
    }

    pub fn matches(&self) -> Vec<MatchResult> {
        self.publisher
            .matches()
            .into_iter()
            .map(|found| found.match_result)
            .collect()
    }

    /// Tokens announced as lapsed by the sweeper
    pub fn expired_tokens(&self) -> Vec<String> {
        self.publisher
            .departures()
            .into_iter()
            .filter(|left| left.reason == LeaveReason::Expired)
            .map(|left| left.token)
            .collect()
    }

    pub fn count_events_of_type(&self, event_type: &str) -> usize {
        self.publisher
            .get_published_events()
            .iter()
            .filter(|event| match event {
                WaitingRoomEvent::MatchFound(_) => event_type == "MatchFound",
                WaitingRoomEvent::PlayerEnteredWaitingRoom(_) => {
                    event_type == "PlayerEnteredWaitingRoom"
                }
                WaitingRoomEvent::PlayerLeftWaitingRoom(_) => {
                    event_type == "PlayerLeftWaitingRoom"
                }
            })
            .count()
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

fn build_service(
    config: &AppConfig,
    clock: &Arc<ManualClock>,
    store: &Arc<InMemoryPoolStore>,
    publisher: &Arc<MockEventPublisher>,
) -> Arc<MatchmakingService> {
    Arc::new(
        MatchmakingService::new(
            config,
            store.clone(),
            clock.clone(),
            publisher.clone(),
            Arc::new(MetricsCollector::new().expect("metrics collector")),
        )
        .expect("service should start"),
    )
}

/// Unwrap a `Matched` outcome
pub fn expect_matched(outcome: EnterOutcome) -> MatchResult {
    match outcome {
        EnterOutcome::Matched(result) => result,
        other => panic!("expected a match, got {:?}", other),
    }
}

pub fn is_admitted(outcome: &EnterOutcome) -> bool {
    matches!(outcome, EnterOutcome::Admitted(_))
}

/// No token may appear in more than one match, and every pair respects the window
pub fn assert_matches_consistent(matches: &[MatchResult]) {
    let mut seen = HashSet::new();
    for result in matches {
        assert_ne!(result.token_a, result.token_b, "player matched with itself");
        assert!(
            seen.insert(result.token_a.clone()),
            "token {} matched twice",
            result.token_a
        );
        assert!(
            seen.insert(result.token_b.clone()),
            "token {} matched twice",
            result.token_b
        );
        let gap = (i32::from(result.score_a) - i32::from(result.score_b)).abs();
        assert!(
            gap <= 99,
            "match {} vs {} has score gap {}",
            result.token_a,
            result.token_b,
            gap
        );
    }
}
