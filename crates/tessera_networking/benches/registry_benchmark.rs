//! # Registry Benchmark
//!
//! Hot paths of interest management: subscription churn, entity handoffs,
//! lifecycle recomputation and a full room tick with subscribed players.
//!
//! Run with: `cargo bench --package tessera_networking`

#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;
use tessera_core::EntityId;
use tessera_networking::{ChunkRegistry, Room};
use tessera_shared::{ChunkId, TesseraConfig, Vec3, WorldGrid};

const ENTITIES: u32 = 4096;

fn registry() -> ChunkRegistry {
    ChunkRegistry::new(WorldGrid::new(64.0, 768.0), 25, 200)
}

fn bench_subscribe_churn(c: &mut Criterion) {
    let mut reg = registry();
    let area: Vec<ChunkId> = ChunkId::new(0, 0).neighborhood(2).collect();

    c.bench_function("subscribe_unsubscribe_25", |b| {
        b.iter(|| {
            for &chunk in &area {
                let _ = reg.subscribe_player(chunk, 1, 1, Vec3::ZERO, None);
            }
            black_box(reg.unsubscribe_player_from_all(1).len())
        });
    });
}

fn bench_move_entities(c: &mut Criterion) {
    let mut reg = registry();
    for i in 0..ENTITIES {
        reg.insert_entity(EntityId::new(i, 0), ChunkId::new(0, 0));
    }
    let mut tick = 0;

    c.bench_function("move_entity_4K", |b| {
        b.iter(|| {
            tick += 1;
            let to = if tick % 2 == 0 { ChunkId::new(0, 0) } else { ChunkId::new(1, 0) };
            let mut handoffs = 0;
            for i in 0..ENTITIES {
                handoffs += usize::from(reg.move_entity(EntityId::new(i, 0), to).is_some());
            }
            reg.end_tick(tick);
            black_box(handoffs)
        });
    });
}

fn bench_end_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("end_tick");
    for players in [1_u64, 16, 64] {
        group.bench_with_input(BenchmarkId::from_parameter(players), &players, |b, &players| {
            let mut reg = registry();
            for player in 0..players {
                let home = ChunkId::new((player % 10) as i32 - 5, (player / 10) as i32 - 5);
                for chunk in home.neighborhood(2) {
                    let _ = reg.subscribe_player(chunk, player, player, Vec3::ZERO, None);
                }
                let _ = reg.set_player_present(home, player, true);
            }
            let mut tick = 0;
            b.iter(|| {
                tick += 1;
                black_box(reg.end_tick(tick).len())
            });
        });
    }
    group.finish();
}

fn bench_room_tick(c: &mut Criterion) {
    let mut config = TesseraConfig::default();
    config.world.npc_count = 256;
    let mut room = Room::new(config);
    for session in 0..64 {
        room.connect(session, session).unwrap_or_else(|err| panic!("connect {session}: {err}"));
        let frame = json!({
            "event": "chunk:subscribe",
            "data": {
                "chunks": ["-1,-1", "0,-1", "-1,0", "0,0", "1,0", "0,1", "1,1"],
                "position": { "x": 0.0, "y": 0.0, "z": 0.0 }
            }
        });
        room.handle_message(session, &frame.to_string(), 0).unwrap_or_else(|err| panic!("subscribe: {err}"));
    }
    room.drain_outbox();
    let mut now_ms = 0;

    c.bench_function("room_tick_64_players_256_npcs", |b| {
        b.iter(|| {
            now_ms += 50;
            room.tick(now_ms);
            black_box(room.drain_outbox().len())
        });
    });
}

criterion_group!(benches, bench_subscribe_churn, bench_move_entities, bench_end_tick, bench_room_tick);
criterion_main!(benches);
