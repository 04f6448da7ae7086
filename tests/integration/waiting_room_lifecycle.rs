//! Waiting room lifecycle integration tests
//!
//! Entries are followed from admission through matching, leaving and
//! expiry, over one shared store and a manual clock.

use sparring_room::amqp::handlers::process_message;
use sparring_room::amqp::messages::MessageUtils;
use sparring_room::error::MatchmakingError;
use sparring_room::metrics::MetricsCollector;
use sparring_room::service::WaitingRoomMessageHandler;
use sparring_room::types::{
    EnterOutcome, EnterRequest, LeaveReason, LeaveRequest, WaitingRoomRequest,
};
use sparring_room::utils::current_timestamp;
use std::sync::Arc;

// Import test fixtures
use crate::fixtures::{expect_matched, is_admitted, TestHarness};

#[tokio::test]
async fn test_expired_entry_is_swept_and_can_rejoin() {
    let harness = TestHarness::new();
    let service = &harness.service;

    // Step 1: Alice waits, then her TTL runs out
    assert!(is_admitted(
        &service.enter_waiting_room("alice", 1, 1200).await.unwrap()
    ));
    harness.advance_secs(61);

    // Step 2: A lapsed entry is never offered as a candidate
    let outcome = service.enter_waiting_room("bob", 1, 1210).await.unwrap();
    assert!(is_admitted(&outcome), "bob must not match a lapsed entry");
    assert_eq!(harness.count_events_of_type("MatchFound"), 0);

    // Step 3: The sweep removes alice and announces it once
    let report = service.sweep_expired().await;
    assert_eq!(report.expired, 1);
    assert_eq!(report.still_waiting, 1);
    assert_eq!(report.failed_pools, 0);
    assert_eq!(harness.expired_tokens(), vec!["alice".to_string()]);

    let again = service.sweep_expired().await;
    assert_eq!(again.expired, 0);
    assert_eq!(harness.expired_tokens().len(), 1);

    // Step 4: Alice comes back and finds bob waiting
    let result = expect_matched(service.enter_waiting_room("alice", 1, 1200).await.unwrap());
    assert_eq!(result.token_a, "bob");
    assert_eq!(result.token_b, "alice");
    assert_eq!(service.pool_sizes().await.unwrap()[0], (1, 0));

    println!("✅ Expired entry swept and rejoin test passed");
}

#[tokio::test]
async fn test_entry_survives_until_ttl() {
    let harness = TestHarness::new();
    let service = &harness.service;

    service.enter_waiting_room("carol", 3, 400).await.unwrap();
    harness.advance_secs(59);

    let report = service.sweep_expired().await;
    assert_eq!(report.expired, 0);
    assert_eq!(report.still_waiting, 1);

    let result = expect_matched(service.enter_waiting_room("dave", 3, 420).await.unwrap());
    assert_eq!(result.token_a, "carol");

    println!("✅ Entry survives until TTL test passed");
}

#[tokio::test]
async fn test_score_window_edges() {
    let harness = TestHarness::new();
    let service = &harness.service;

    // A gap of 100 is outside the window
    assert!(is_admitted(
        &service.enter_waiting_room("low", 1, 1000).await.unwrap()
    ));
    harness.advance_secs(1);
    assert!(is_admitted(
        &service.enter_waiting_room("high", 1, 1100).await.unwrap()
    ));

    // 1050 reaches both; the earlier joiner is taken
    harness.advance_secs(1);
    let result = expect_matched(service.enter_waiting_room("mid", 1, 1050).await.unwrap());
    assert_eq!(result.token_a, "low");

    // A gap of exactly 99 is inside
    let result = expect_matched(service.enter_waiting_room("edge", 1, 1199).await.unwrap());
    assert_eq!(result.token_a, "high");

    println!("✅ Score window edges test passed");
}

#[tokio::test]
async fn test_pools_are_isolated_by_exercise_type() {
    let harness = TestHarness::new();
    let service = &harness.service;

    service.enter_waiting_room("alice", 1, 900).await.unwrap();
    let outcome = service.enter_waiting_room("bob", 2, 900).await.unwrap();
    assert!(is_admitted(&outcome));

    assert_eq!(
        service.pool_sizes().await.unwrap(),
        vec![(1, 1), (2, 1), (3, 0)]
    );

    println!("✅ Pool isolation test passed");
}

#[tokio::test]
async fn test_duplicate_join_is_ignored() {
    let harness = TestHarness::new();
    let service = &harness.service;

    service.enter_waiting_room("alice", 1, 900).await.unwrap();
    harness.advance_secs(10);
    let outcome = service.enter_waiting_room("alice", 1, 950).await.unwrap();
    assert_eq!(outcome, EnterOutcome::AlreadyWaiting);

    // The original entry, score and join time, is unchanged
    let entry = service
        .registry()
        .lookup(1, "alice")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.score, 900);
    assert_eq!(harness.count_events_of_type("PlayerEnteredWaitingRoom"), 1);
    assert_eq!(service.engine().get_stats().await.unwrap().already_waiting, 1);

    println!("✅ Duplicate join ignored test passed");
}

#[tokio::test]
async fn test_leave_removes_waiting_player() {
    let harness = TestHarness::new();
    let service = &harness.service;

    service.enter_waiting_room("alice", 2, 300).await.unwrap();
    assert!(service.leave_waiting_room("alice", 2).await.unwrap());
    assert!(!service.leave_waiting_room("alice", 2).await.unwrap());
    assert!(!service.leave_waiting_room("nobody", 2).await.unwrap());

    let departures = harness.publisher.departures();
    assert_eq!(departures.len(), 1);
    assert_eq!(departures[0].reason, LeaveReason::Voluntary);

    // Nobody is left to match against
    assert!(is_admitted(
        &service.enter_waiting_room("bob", 2, 300).await.unwrap()
    ));

    println!("✅ Leave removes waiting player test passed");
}

#[tokio::test]
async fn test_leave_after_expiry_is_not_a_departure() {
    let harness = TestHarness::new();
    let service = &harness.service;

    service.enter_waiting_room("alice", 1, 1000).await.unwrap();
    harness.advance_secs(61);
    assert!(service.registry().lookup(1, "alice").await.unwrap().is_none());

    // The lapsed leftovers are cleared, but nothing live left
    assert!(!service.leave_waiting_room("alice", 1).await.unwrap());
    assert!(harness.publisher.departures().is_empty());
    assert!(service.registry().tracked_tokens(1).await.unwrap().is_empty());
    assert_eq!(service.engine().get_stats().await.unwrap().players_left, 0);

    // The sweep has nothing left to announce
    let report = service.sweep_expired().await;
    assert_eq!(report.expired, 0);
    assert!(harness.expired_tokens().is_empty());

    println!("✅ Leave after expiry test passed");
}

#[tokio::test]
async fn test_leave_racing_a_match_has_one_winner() {
    for round in 0..20 {
        let harness = TestHarness::new();
        let joiner = harness.instance();
        let leaver = harness.instance();

        harness
            .service
            .enter_waiting_room("waiting", 1, 1000)
            .await
            .unwrap();

        let (outcome, left) = tokio::join!(
            joiner.enter_waiting_room("arriving", 1, 1001),
            leaver.leave_waiting_room("waiting", 1)
        );
        let outcome = outcome.unwrap();
        let left = left.unwrap();

        match outcome {
            EnterOutcome::Matched(result) => {
                assert!(!left, "round {}: matched player also left", round);
                assert_eq!(result.token_a, "waiting");
            }
            EnterOutcome::Admitted(_) => {
                assert!(left, "round {}: nobody claimed the waiting player", round);
            }
            EnterOutcome::AlreadyWaiting => panic!("round {}: unexpected outcome", round),
        }
    }

    println!("✅ Leave racing a match test passed");
}

#[tokio::test]
async fn test_instances_share_pools() {
    let harness = TestHarness::new();
    let first = harness.instance();
    let second = harness.instance();

    assert!(is_admitted(
        &first.enter_waiting_room("alice", 3, 1500).await.unwrap()
    ));
    let result = expect_matched(second.enter_waiting_room("bob", 3, 1450).await.unwrap());
    assert_eq!(result.token_a, "alice");

    // Only the instance that committed the match counts it
    assert_eq!(first.engine().get_stats().await.unwrap().matches_made, 0);
    assert_eq!(second.engine().get_stats().await.unwrap().matches_made, 1);
    assert_eq!(harness.count_events_of_type("MatchFound"), 1);

    println!("✅ Instances share pools test passed");
}

#[tokio::test]
async fn test_invalid_requests_are_rejected() {
    let harness = TestHarness::new();
    let service = &harness.service;

    let err = service.enter_waiting_room("alice", 42, 900).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<MatchmakingError>(),
        Some(MatchmakingError::UnknownExerciseType { exercise_type: 42 })
    ));

    let err = service.enter_waiting_room("  ", 1, 900).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<MatchmakingError>(),
        Some(MatchmakingError::InvalidRequest { .. })
    ));

    assert_eq!(harness.publisher.get_published_events().len(), 0);

    println!("✅ Invalid requests rejected test passed");
}

#[tokio::test]
async fn test_publish_failure_keeps_the_match() {
    let harness = TestHarness::new();
    let service = &harness.service;

    service.enter_waiting_room("alice", 1, 800).await.unwrap();
    harness.publisher.set_failing(true);

    let result = expect_matched(service.enter_waiting_room("bob", 1, 820).await.unwrap());
    assert_eq!(result.token_a, "alice");
    assert_eq!(service.registry().pool_size(1).await.unwrap(), 0);

    let stats = service.engine().get_stats().await.unwrap();
    assert_eq!(stats.matches_made, 1);
    assert_eq!(stats.publish_failures, 1);

    println!("✅ Publish failure keeps the match test passed");
}

#[tokio::test]
async fn test_amqp_requests_reach_the_waiting_room() {
    let harness = TestHarness::new();
    let handler = WaitingRoomMessageHandler::new(
        harness.service.clone(),
        Arc::new(MetricsCollector::new().unwrap()),
    );

    let requests = vec![
        WaitingRoomRequest::Enter(EnterRequest {
            token: "alice".to_string(),
            exercise_type: 1,
            score: 1000,
            timestamp: current_timestamp(),
        }),
        WaitingRoomRequest::Enter(EnterRequest {
            token: "bob".to_string(),
            exercise_type: 2,
            score: 1000,
            timestamp: current_timestamp(),
        }),
        WaitingRoomRequest::Leave(LeaveRequest {
            token: "bob".to_string(),
            exercise_type: 2,
            timestamp: current_timestamp(),
        }),
        WaitingRoomRequest::Enter(EnterRequest {
            token: "carol".to_string(),
            exercise_type: 1,
            score: 1040,
            timestamp: current_timestamp(),
        }),
    ];

    for request in &requests {
        let bytes = MessageUtils::serialize_request(request).unwrap();
        process_message(&handler, &bytes).await.unwrap();
    }

    let matches = harness.matches();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].token_a, "alice");
    assert_eq!(matches[0].token_b, "carol");
    assert_eq!(
        harness.service.pool_sizes().await.unwrap(),
        vec![(1, 0), (2, 0), (3, 0)]
    );

    // Garbage is rejected without touching the pools
    assert!(process_message(&handler, b"{\"type\":\"Teleport\"}")
        .await
        .is_err());

    println!("✅ AMQP requests reach the waiting room test passed");
}
