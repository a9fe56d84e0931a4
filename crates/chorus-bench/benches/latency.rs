//! Latency benchmarks for Chorus.
//!
//! These benchmarks focus on measuring end-to-end latency through the
//! connection adapter.

use chorus_bench::{connect, next_content, user};
use chorus_core::{Hub, HubConfig};
use chorus_protocol::{ClientEnvelope, RoomId, WireFormat};
use criterion::{criterion_group, criterion_main, Criterion};
use std::time::Instant;
use tokio::runtime::Runtime;

/// Benchmark a chat message from one client to another.
fn bench_chat_latency(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("chat_latency");

    for format in [WireFormat::Json, WireFormat::MessagePack] {
        let (hub, _task) = rt.block_on(async { Hub::spawn(HubConfig::default()) });
        let room: RoomId = "user0-user1".parse().unwrap();
        let (alice, mut bob) = rt.block_on(async {
            let alice = connect(&hub, user(0), format).await;
            let bob = connect(&hub, user(1), format).await;
            let join = ClientEnvelope::join(room.clone());
            alice.send_envelope(&join, format).await.unwrap();
            bob.send_envelope(&join, format).await.unwrap();
            while hub.room_members(room.clone()).await.unwrap().len() < 2 {
                tokio::task::yield_now().await;
            }
            (alice, bob)
        });

        let chat = ClientEnvelope::chat(room.clone(), "x".repeat(64));
        group.bench_function(format.as_str(), |b| {
            b.iter_custom(|iters| {
                rt.block_on(async {
                    let start = Instant::now();
                    for _ in 0..iters {
                        alice.send_envelope(&chat, format).await.unwrap();
                        next_content(&mut bob).await.unwrap();
                    }
                    start.elapsed()
                })
            });
        });

        hub.shutdown();
    }

    group.finish();
}

/// Benchmark a query round-trip through the hub task.
fn bench_hub_query(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let (hub, _task) = rt.block_on(async { Hub::spawn(HubConfig::default()) });
    let handle = &hub;

    c.bench_function("hub_stats_roundtrip", |b| {
        b.to_async(&rt)
            .iter(|| async move { handle.stats().await.unwrap() });
    });

    hub.shutdown();
}

criterion_group!(benches, bench_chat_latency, bench_hub_query);
criterion_main!(benches);
