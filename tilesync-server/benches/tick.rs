//! Tick loop throughput.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::{rngs::StdRng, Rng, SeedableRng};

use tilesync::core::geometry::{Position, Shape};
use tilesync::game::entity::{Entity, EntityId};
use tilesync::game::input::{Control, InputRecord};
use tilesync::game::map::MapConfig;
use tilesync::game::route::{Move, MoveRoute};
use tilesync::game::state::WorldState;
use tilesync::game::tick::{tick, EngineConfig};

fn populated(entities: u16) -> WorldState {
    let mut config = MapConfig { width: 200, height: 200, seed: 7, ..MapConfig::default() };
    for i in 0..32 {
        if let Ok(shape) = Shape::new(i * 180, (i % 8) * 300, 64, 64) {
            config.shapes.push(shape.named(format!("rock-{i}")));
        }
    }
    let mut state = WorldState::from_config(&config).expect("valid map");
    let mut layout = StdRng::seed_from_u64(42);

    for n in 0..entities {
        let mut bytes = [0u8; 16];
        bytes[..2].copy_from_slice(&n.to_be_bytes());
        let id = EntityId::new(bytes);
        let position = Position::new(layout.gen_range(0..6000), layout.gen_range(0..6000));
        let entity = if n % 2 == 0 { Entity::player(id, position) } else { Entity::scripted(id, position) };
        state.add_entity(entity).expect("unique id");
        if n % 2 == 1 {
            let _ = state.start_route(&id, MoveRoute::infinite(vec![Move::random(), Move::turn_random()]));
        }
    }
    state
}

fn bench_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("tick");
    let config = EngineConfig::default();

    for entities in [10u16, 100, 1000] {
        group.bench_with_input(BenchmarkId::from_parameter(entities), &entities, |b, &n| {
            let mut state = populated(n);
            let players: Vec<EntityId> = state
                .entities
                .iter()
                .filter(|(_, e)| e.kind == tilesync::EntityKind::PlayerControlled)
                .map(|(id, _)| *id)
                .collect();
            let mut frame = 0u64;

            b.iter(|| {
                for id in &players {
                    let _ = state.queue_input(id, InputRecord::new(frame, Control::Right));
                }
                frame += 1;
                black_box(tick(&mut state, &config));
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_tick);
criterion_main!(benches);
