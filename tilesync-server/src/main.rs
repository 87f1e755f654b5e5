//! Tilesync Server
//!
//! Authoritative movement server for tile-based maps.
//! `--demo` runs a scripted simulation offline and checks replay determinism.

use std::collections::BTreeMap;
use std::sync::Arc;
use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tilesync::{
    TICK_RATE, VERSION,
    core::{direction::Direction, geometry::{Position, Shape}},
    game::{
        entity::{Entity, EntityId},
        events::GameEventData,
        input::Control,
        map::MapConfig,
        route::{Move, MoveRoute},
        state::WorldState,
        tick::{tick, replay, EngineConfig},
    },
    network::{GameServer, ServerConfig},
};

/// Demo length in ticks (30 seconds @ 60 Hz).
const DEMO_TICKS: u64 = 1800;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Tilesync Server v{}", VERSION);
    info!("Tick Rate: {} Hz", TICK_RATE);

    if std::env::args().any(|a| a == "--demo") {
        return demo_map();
    }

    let config = ServerConfig::from_env().context("reading server configuration")?;
    let server = Arc::new(GameServer::new(config));
    server.open_configured_map().await.context("opening map")?;

    let signal_server = server.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_server.shutdown();
        }
    });

    server.run().await.context("server failed")?;
    info!("Server stopped");
    Ok(())
}

fn demo_world() -> anyhow::Result<WorldState> {
    let mut config = MapConfig {
        id: "demo".to_string(),
        seed: 12345,
        ..MapConfig::default()
    };
    config.shapes.push(Shape::new(320, 0, 32, 256)?.named("pillar"));
    config.shapes.push(Shape::new(96, 96, 64, 64)?.named("pressure-plate").as_trigger());

    let mut state = WorldState::from_config(&config)?;
    for i in 0..4u8 {
        let id = EntityId::new([i; 16]);
        state.add_entity(Entity::player(id, Position::new(64 + i as i32 * 48, 64)))?;
    }
    let guard = EntityId::new([10; 16]);
    state.add_entity(Entity::scripted(guard, Position::new(400, 300)))?;
    state.start_route(&guard, MoveRoute::infinite(vec![
        Move::tile_left(3),
        Move::wait(30),
        Move::tile_right(3),
        Move::turn_random(),
    ]))?;
    let wanderer = EntityId::new([11; 16]);
    state.add_entity(Entity::scripted(wanderer, Position::new(200, 200)))?;
    state.start_route(&wanderer, MoveRoute::infinite(vec![Move::random()]))?;
    Ok(state)
}

fn demo_controls() -> BTreeMap<EntityId, Vec<Option<Control>>> {
    (0..4u8)
        .map(|i| {
            let frames = (0..DEMO_TICKS)
                .map(|t| {
                    let phase = (t / 20 + u64::from(i)) % 6;
                    Direction::from_ordinal(phase as u8).map(Control::from)
                })
                .collect();
            (EntityId::new([i; 16]), frames)
        })
        .collect()
}

/// Run the demo map and verify that a replay reaches the same state.
fn demo_map() -> anyhow::Result<()> {
    info!("=== Starting Demo Map ===");

    let config = EngineConfig::default();
    let controls = demo_controls();
    let mut state = demo_world()?;
    info!("RNG Seed: {}", state.rng_seed);

    let mut total_events = 0;
    for t in 0..DEMO_TICKS {
        for (id, frames) in &controls {
            if let Some(Some(control)) = frames.get(t as usize) {
                state.queue_input(id, tilesync::InputRecord::new(t, *control))?;
            }
        }

        let result = tick(&mut state, &config);
        total_events += result.events.len();

        for event in &result.events {
            if let GameEventData::ShapeEntered { entity, shape } = &event.data {
                info!("Tick {}: {} entered {}", event.tick, entity.short(), shape);
            }
        }
        if result.tick % 600 == 0 {
            info!("Tick {}: checksum {}", result.tick, &result.diff.checksum[..16]);
        }
    }

    let hash = state.compute_hash();
    info!("Final State Hash: {}", hex::encode(hash));
    info!("Total events: {}", total_events);

    info!("=== Verifying Determinism ===");
    let (replayed, _) = replay(demo_world()?, &controls, DEMO_TICKS, &config);
    let replay_hash = replayed.compute_hash();
    info!("Replay State Hash: {}", hex::encode(replay_hash));

    if hash == replay_hash {
        info!("DETERMINISM VERIFIED: Hashes match!");
        Ok(())
    } else {
        warn!("DETERMINISM FAILURE: Hashes differ!");
        anyhow::bail!("replay diverged")
    }
}
