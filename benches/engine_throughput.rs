//! Performance benchmarks for the matchmaking engine

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use sparring_room::config::AppConfig;
use sparring_room::engine::matching::order_candidates;
use sparring_room::metrics::MetricsCollector;
use sparring_room::service::MatchmakingService;
use sparring_room::session::derive_session_id;
use sparring_room::store::InMemoryPoolStore;
use sparring_room::types::{
    MatchFound, PlayerEnteredWaitingRoom, PlayerLeftWaitingRoom, WaitingEntry,
};
use sparring_room::utils::{current_timestamp, SystemClock};
use std::sync::Arc;

// Event publisher that drops everything
#[derive(Debug, Clone)]
struct BenchEventPublisher;

#[async_trait::async_trait]
impl sparring_room::amqp::publisher::EventPublisher for BenchEventPublisher {
    async fn publish_match_found(&self, _event: MatchFound) -> sparring_room::error::Result<()> {
        Ok(())
    }

    async fn publish_player_entered(
        &self,
        _event: PlayerEnteredWaitingRoom,
    ) -> sparring_room::error::Result<()> {
        Ok(())
    }

    async fn publish_player_left(
        &self,
        _event: PlayerLeftWaitingRoom,
    ) -> sparring_room::error::Result<()> {
        Ok(())
    }
}

fn create_bench_system() -> MatchmakingService {
    MatchmakingService::new(
        &AppConfig::default(),
        Arc::new(InMemoryPoolStore::new()),
        Arc::new(SystemClock),
        Arc::new(BenchEventPublisher),
        Arc::new(MetricsCollector::new().unwrap()),
    )
    .unwrap()
}

fn bench_session_id(c: &mut Criterion) {
    c.bench_function("session_id_derivation", |b| {
        b.iter(|| black_box(derive_session_id(black_box("player-1"), black_box("2025-03-14"))))
    });
}

fn bench_candidate_ordering(c: &mut Criterion) {
    let now = current_timestamp();
    let candidates: Vec<WaitingEntry> = (0..100)
        .map(|i| WaitingEntry {
            token: format!("candidate_{}", i),
            exercise_type: 1,
            score: 1000 + (i % 50) as i16,
            joined_at: now - chrono::Duration::milliseconds(((i * 7919) % 1000) as i64),
        })
        .collect();

    c.bench_function("order_100_candidates", |b| {
        b.iter(|| black_box(order_candidates(candidates.clone(), "requester")))
    });
}

fn bench_admit_then_match(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("admit_then_match", |b| {
        b.iter(|| {
            rt.block_on(async {
                let service = create_bench_system();

                let _ = service.enter_waiting_room("waiting", 1, 1500).await;
                black_box(service.enter_waiting_room("arriving", 1, 1520).await)
            })
        })
    });
}

fn bench_join_into_busy_pool(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("join_into_busy_pool", |b| {
        b.to_async(&rt).iter(|| async {
            let service = create_bench_system();

            // Fill the pool with players who never match each other
            for i in 0..50 {
                let _ = service
                    .enter_waiting_room(&format!("player_{}", i), 1, (i * 200) as i16)
                    .await;
            }

            black_box(service.enter_waiting_room("requester", 1, 5000).await)
        })
    });
}

criterion_group!(
    benches,
    bench_session_id,
    bench_candidate_ordering,
    bench_admit_then_match,
    bench_join_into_busy_pool
);
criterion_main!(benches);
