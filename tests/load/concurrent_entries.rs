//! High concurrency stress tests for waiting-room entries
//!
//! Many joins, leaves and sweeps run at once across several engine
//! instances sharing one store. No player may end up in two matches and
//! every match must respect the score window.

use futures::future::join_all;
use sparring_room::types::EnterOutcome;
use std::collections::HashSet;
use std::time::{Duration, Instant};

// Import test fixtures
use crate::fixtures::{assert_matches_consistent, TestHarness};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_200_concurrent_entries_across_instances() {
    let harness = TestHarness::new();
    let instances = vec![harness.instance(), harness.instance(), harness.instance()];
    let players = 200;

    let start_time = Instant::now();

    let handles: Vec<_> = (0..players)
        .map(|i| {
            let service = instances[i % instances.len()].clone();
            // Spread scores over 1000..1300 so most joins have several candidates
            let score = 1000 + ((i * 37) % 300) as i16;
            tokio::spawn(async move {
                service
                    .enter_waiting_room(&format!("load_player_{}", i), 1, score)
                    .await
            })
        })
        .collect();

    let results = join_all(handles).await;
    let duration = start_time.elapsed();

    let mut matched = 0;
    let mut admitted = 0;
    for result in results {
        match result {
            Ok(Ok(EnterOutcome::Matched(_))) => matched += 1,
            Ok(Ok(EnterOutcome::Admitted(_))) => admitted += 1,
            Ok(Ok(EnterOutcome::AlreadyWaiting)) => panic!("every token is distinct"),
            Ok(Err(e)) => panic!("Join failed: {}", e),
            Err(e) => panic!("Task failed: {}", e),
        }
    }

    let matches = harness.matches();
    assert_eq!(matches.len(), matched);
    assert_matches_consistent(&matches);

    // Every player is either in exactly one match or still waiting
    let waiting = harness.service.registry().pool_size(1).await.unwrap();
    assert_eq!(2 * matched + waiting, players);
    assert_eq!(admitted, matched + waiting);

    let matched_tokens: HashSet<_> = matches
        .iter()
        .flat_map(|m| [m.token_a.clone(), m.token_b.clone()])
        .collect();
    for token in harness.service.registry().tracked_tokens(1).await.unwrap() {
        assert!(
            !matched_tokens.contains(&token),
            "matched token {} is still in the pool",
            token
        );
    }

    assert!(
        duration < Duration::from_secs(10),
        "200 joins should complete within 10 seconds, took: {:?}",
        duration
    );

    println!(
        "✅ 200 concurrent entries test passed: {} matches, {} waiting in {:?}",
        matched, waiting, duration
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_joiners_contend_for_one_waiting_player() {
    let harness = TestHarness::new();
    harness
        .service
        .enter_waiting_room("target", 2, 1500)
        .await
        .unwrap();

    let instances = vec![harness.instance(), harness.instance()];
    let handles: Vec<_> = (0..50)
        .map(|i| {
            let service = instances[i % instances.len()].clone();
            tokio::spawn(async move {
                service
                    .enter_waiting_room(&format!("contender_{}", i), 2, 1500 + (i % 5) as i16)
                    .await
            })
        })
        .collect();

    let outcomes: Vec<_> = join_all(handles)
        .await
        .into_iter()
        .map(|result| result.unwrap().unwrap())
        .collect();

    // Contenders also pair among themselves; the target is claimed exactly once
    let matches = harness.matches();
    assert_matches_consistent(&matches);
    let target_matches = matches
        .iter()
        .filter(|m| m.token_a == "target" || m.token_b == "target")
        .count();
    assert_eq!(target_matches, 1);

    let matched = outcomes
        .iter()
        .filter(|o| matches!(o, EnterOutcome::Matched(_)))
        .count();
    assert_eq!(matched, matches.len());

    println!("✅ Contention for one waiting player test passed");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_sweeps_announce_each_expiry_once() {
    let harness = TestHarness::new();
    let players = 50;

    // Scores 200 apart never match each other
    for i in 0..players {
        let outcome = harness
            .service
            .enter_waiting_room(&format!("idle_{}", i), 3, (i * 200) as i16)
            .await
            .unwrap();
        assert!(matches!(outcome, EnterOutcome::Admitted(_)));
    }

    harness.advance_secs(61);

    let sweepers: Vec<_> = (0..4)
        .map(|_| {
            let service = harness.instance();
            tokio::spawn(async move { service.sweep_expired().await })
        })
        .collect();

    let reports: Vec<_> = join_all(sweepers)
        .await
        .into_iter()
        .map(|report| report.unwrap())
        .collect();

    let expired: usize = reports.iter().map(|report| report.expired).sum();
    assert_eq!(expired, players);
    assert!(reports.iter().all(|report| report.failed_pools == 0));

    let announced = harness.expired_tokens();
    assert_eq!(announced.len(), players);
    let unique: HashSet<_> = announced.into_iter().collect();
    assert_eq!(unique.len(), players);
    assert_eq!(harness.service.registry().pool_size(3).await.unwrap(), 0);

    println!("✅ Concurrent sweeps test passed");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_mixed_joins_and_leaves_keep_pools_consistent() {
    let harness = TestHarness::new();
    let instances = vec![harness.instance(), harness.instance()];

    let joins: Vec<_> = (0..60)
        .map(|i| {
            let service = instances[i % 2].clone();
            let exercise_type = (i % 3) as i64 + 1;
            tokio::spawn(async move {
                service
                    .enter_waiting_room(&format!("mixed_{}", i), exercise_type, 800 + (i * 11) as i16)
                    .await
                    .map(|_| ())
            })
        })
        .collect();

    let leaves: Vec<_> = (0..60)
        .step_by(3)
        .map(|i| {
            let service = instances[(i + 1) % 2].clone();
            let exercise_type = (i % 3) as i64 + 1;
            tokio::spawn(async move {
                service
                    .leave_waiting_room(&format!("mixed_{}", i), exercise_type)
                    .await
                    .map(|_| ())
            })
        })
        .collect();

    for result in join_all(joins.into_iter().chain(leaves)).await {
        result.unwrap().unwrap();
    }

    let matches = harness.matches();
    assert_matches_consistent(&matches);
    for result in &matches {
        let exercise_a = result.token_a.trim_start_matches("mixed_").parse::<usize>().unwrap() % 3;
        let exercise_b = result.token_b.trim_start_matches("mixed_").parse::<usize>().unwrap() % 3;
        assert_eq!(exercise_a, exercise_b, "match crossed exercise types");
    }

    let left = harness
        .publisher
        .departures()
        .len();
    let waiting: usize = harness
        .service
        .pool_sizes()
        .await
        .unwrap()
        .iter()
        .map(|(_, waiting)| waiting)
        .sum();
    assert_eq!(2 * matches.len() + left + waiting, 60);

    println!("✅ Mixed joins and leaves test passed");
}
