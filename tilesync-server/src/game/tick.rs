//! Authoritative Simulation Tick
//!
//! One call to [`tick`] advances a map by one step:
//!
//! 0. advance the tick counter, apply deferred commands
//! 1. per entity (id order): drain queued inputs FIFO, turn and move
//! 2. per entity: advance its move route one step (input first, route second)
//! 3. detect trigger and touch edges
//! 4. post route completion signals (tick boundary)
//! 5. build the partial diff for clients
//!
//! The function is deterministic: BTreeMap iteration, integer math and the
//! map's seeded RNG only.

use std::collections::BTreeMap;
use tracing::debug;

use crate::core::geometry::{BoundingBox, WorldBounds};
use crate::game::diff::TickDiff;
use crate::game::entity::{Entity, EntityId};
use crate::game::events::GameEvent;
use crate::game::input::{Control, InputRecord};
use crate::game::interpreter::{RouteCompletion, StepContext, StepOutcome};
use crate::game::state::WorldState;

/// Result of a tick.
#[derive(Debug, Default)]
pub struct TickResult {
    /// Tick number just run
    pub tick: u64,
    /// Events generated this tick, in processing order
    pub events: Vec<GameEvent>,
    /// Changes to broadcast
    pub diff: TickDiff,
    /// Entities whose route completed this tick
    pub completed_routes: Vec<EntityId>,
}

/// Configuration for the tick engine.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Instantaneous route steps allowed per entity per tick
    pub instant_step_budget: u32,
    /// Input records drained per entity per tick; the rest wait
    pub max_inputs_per_tick: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            instant_step_budget: 64,
            max_inputs_per_tick: 64,
        }
    }
}

/// Run one simulation tick.
///
/// # Determinism
///
/// - Entities are advanced in id order (BTreeMap)
/// - Integer world units only
/// - Random directives draw from `state.rng`
pub fn tick(state: &mut WorldState, config: &EngineConfig) -> TickResult {
    // 0. Advance tick counter, apply deferred commands
    state.tick += 1;
    let tick = state.tick;
    state.apply_deferred();
    for entity in state.entities.values_mut() {
        entity.begin_tick();
    }

    // Geometry snapshot at motion start
    let world = state.map.world_bounds();
    let obstacles = state.map.registry.obstacles();
    let (tile_width, tile_height) = (state.map.tile_width, state.map.tile_height);

    // 1-2. Inputs, then route, one entity at a time
    let ids: Vec<EntityId> = state.entities.keys().copied().collect();
    let mut finished = Vec::new();

    for id in ids {
        // Take the entity out so it is exclusively owned during its step
        let Some(mut entity) = state.entities.remove(&id) else {
            continue;
        };

        process_inputs(&mut entity, tick, world, &obstacles, config, &mut state.pending_events);

        if let Some(mut runner) = entity.route.take() {
            let mut ctx = StepContext {
                tick,
                world,
                obstacles: &obstacles,
                tile_width,
                tile_height,
                entities: &state.entities,
                rng: &mut state.rng,
                budget: config.instant_step_budget,
            };
            match runner.step(&mut entity, &mut ctx) {
                StepOutcome::Continue => entity.route = Some(runner),
                StepOutcome::Completed => finished.push((id, runner)),
            }
        }

        state.entities.insert(id, entity);
    }

    // 3. Trigger and touch edges
    let edges = state.triggers.update(tick, &state.entities, &state.map.registry);
    state.pending_events.extend(edges);

    // 4. Completion signals
    let mut completed_routes = Vec::with_capacity(finished.len());
    for (id, runner) in finished {
        debug!(tick, entity = %id.short(), "route completed");
        runner.finish(RouteCompletion { entity: id, tick });
        state.push_event(GameEvent::route_completed(tick, id));
        completed_routes.push(id);
    }

    // 5. Diff
    let checksum = state.compute_hash();
    let shapes = state.map.registry.take_changes();
    let diff = state.diff.build(tick, &state.entities, shapes, checksum);

    let mut events = state.take_events();
    events.sort_by(GameEvent::order);

    TickResult {
        tick,
        events,
        diff,
        completed_routes,
    }
}

/// Drain queued inputs FIFO.
///
/// Movement controls turn the entity and move it one `speed` step (no
/// displacement while `can_move` is false). `Action`/`Back` become events.
fn process_inputs(
    entity: &mut Entity,
    tick: u64,
    world: WorldBounds,
    obstacles: &[BoundingBox],
    config: &EngineConfig,
    events: &mut Vec<GameEvent>,
) {
    for _ in 0..config.max_inputs_per_tick {
        let Some(record) = entity.inputs.pop_front() else {
            break;
        };
        if entity.last_processed_frame.is_some_and(|w| record.frame <= w) {
            continue;
        }
        entity.last_processed_frame = Some(record.frame);

        match record.input.direction() {
            Some(direction) => {
                let _moved = entity.apply_motion(direction, entity.speed, world, obstacles);
                #[cfg(feature = "debug-tracing")]
                tracing::trace!(
                    tick,
                    entity = %entity.id.short(),
                    frame = record.frame,
                    moved = _moved,
                    "input applied"
                );
            }
            None => events.push(GameEvent::action_input(tick, entity.id, record.input, record.frame)),
        }
    }
}

/// Run `tick_count` ticks feeding one optional control per entity per tick.
///
/// The control for tick `t` is sent as frame `t`. Returns the final state
/// and every event.
pub fn replay(
    initial_state: WorldState,
    controls: &BTreeMap<EntityId, Vec<Option<Control>>>,
    tick_count: u64,
    config: &EngineConfig,
) -> (WorldState, Vec<GameEvent>) {
    let mut state = initial_state;
    let mut all_events = Vec::new();

    for t in 0..tick_count {
        for (id, frames) in controls {
            if let Some(Some(control)) = frames.get(t as usize) {
                if let Ok(entity) = state.entity_mut(id) {
                    entity.queue_input(InputRecord::new(t, *control));
                }
            }
        }

        let result = tick(&mut state, config);
        all_events.extend(result.events);
    }

    (state, all_events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::direction::Direction;
    use crate::core::geometry::{Position, Shape};
    use crate::game::command::EntityCommand;
    use crate::game::events::GameEventData;
    use crate::game::map::MapConfig;
    use crate::game::route::{Move, MoveRoute};

    fn world() -> WorldState {
        WorldState::from_config(&MapConfig::default()).unwrap()
    }

    fn add(state: &mut WorldState, n: u8, x: i32, y: i32) -> EntityId {
        let id = EntityId::new([n; 16]);
        state.add_entity(Entity::player(id, Position::new(x, y))).unwrap();
        id
    }

    #[test]
    fn test_tick_determinism() {
        let config = EngineConfig::default();
        let make = || {
            let mut state = world();
            for i in 0..4u8 {
                let id = add(&mut state, i, 100 + i as i32 * 40, 100);
                state.start_route(&id, MoveRoute::infinite(vec![Move::random()])).unwrap();
            }
            state
        };
        let mut a = make();
        let mut b = make();
        for _ in 0..100 {
            let ra = tick(&mut a, &config);
            let rb = tick(&mut b, &config);
            assert_eq!(ra.diff.checksum, rb.diff.checksum);
        }
        assert_eq!(a.compute_hash(), b.compute_hash());
    }

    #[test]
    fn test_input_moves_and_acks() {
        let mut state = world();
        let id = add(&mut state, 1, 100, 100);
        tick(&mut state, &EngineConfig::default());

        state.queue_input(&id, InputRecord::new(0, Control::Right)).unwrap();
        state.queue_input(&id, InputRecord::new(1, Control::Right)).unwrap();
        let result = tick(&mut state, &EngineConfig::default());

        let entity = state.entity(&id).unwrap();
        assert_eq!(entity.position, Position::new(106, 100));
        assert_eq!(entity.direction, Direction::Right);
        let entry = result.diff.entity(&id).unwrap();
        assert_eq!(entry.position, Some(Position::new(106, 100)));
        assert_eq!(entry.ack, Some(1));
    }

    #[test]
    fn test_cannot_move_input_turns_only() {
        let mut state = world();
        let id = add(&mut state, 1, 100, 100);
        state.entity_mut(&id).unwrap().can_move = false;
        state.queue_input(&id, InputRecord::new(0, Control::Up)).unwrap();
        tick(&mut state, &EngineConfig::default());
        let entity = state.entity(&id).unwrap();
        assert_eq!(entity.position, Position::new(100, 100));
        assert_eq!(entity.direction, Direction::Up);
    }

    #[test]
    fn test_action_input_becomes_event() {
        let mut state = world();
        let id = add(&mut state, 1, 0, 0);
        state.queue_input(&id, InputRecord::new(7, Control::Action)).unwrap();
        let result = tick(&mut state, &EngineConfig::default());
        assert!(result.events.contains(&GameEvent::action_input(1, id, Control::Action, 7)));
    }

    #[test]
    fn test_input_before_route_same_tick() {
        let mut state = world();
        let id = add(&mut state, 1, 100, 100);
        state.start_route(&id, MoveRoute::once(vec![Move::down(3)])).unwrap();
        state.queue_input(&id, InputRecord::new(0, Control::Right)).unwrap();
        let result = tick(&mut state, &EngineConfig::default());
        let entity = state.entity(&id).unwrap();
        assert_eq!(entity.position, Position::new(103, 103));
        assert_eq!(entity.direction, Direction::Down);
        assert_eq!(result.completed_routes, vec![id]);
    }

    #[tokio::test]
    async fn test_completion_posted_on_tick() {
        let mut state = world();
        let id = add(&mut state, 1, 0, 0);
        let mut handle = state.start_route(&id, MoveRoute::once(vec![Move::right(6)])).unwrap();

        tick(&mut state, &EngineConfig::default());
        assert_eq!(handle.try_result(), None);

        let result = tick(&mut state, &EngineConfig::default());
        assert_eq!(result.completed_routes, vec![id]);
        assert_eq!(handle.wait().await, Ok(RouteCompletion { entity: id, tick: 2 }));
        assert!(!state.entity(&id).unwrap().has_route());
    }

    #[test]
    fn test_deferred_commands_apply_next_tick() {
        let mut state = world();
        let id = add(&mut state, 1, 0, 0);
        state.defer(EntityCommand::SetSpeed { entity: id, speed: 8 });
        assert_eq!(state.entity(&id).unwrap().speed, 3);
        let result = tick(&mut state, &EngineConfig::default());
        assert_eq!(state.entity(&id).unwrap().speed, 8);
        assert!(result.diff.joined.iter().any(|s| s.id == id && s.kinetic.speed == 8));
    }

    #[test]
    fn test_shape_diff_and_obstruction() {
        let mut state = world();
        let id = add(&mut state, 1, 0, 0);
        tick(&mut state, &EngineConfig::default());

        state.defer(EntityCommand::CreateShape(Shape::new(40, 0, 10, 32).unwrap().named("wall")));
        let result = tick(&mut state, &EngineConfig::default());
        assert!(result.diff.shapes.get("wall").is_some_and(|s| s.is_some()));

        for frame in 0..5 {
            state.queue_input(&id, InputRecord::new(frame, Control::Right)).unwrap();
        }
        tick(&mut state, &EngineConfig::default());
        assert_eq!(state.entity(&id).unwrap().position.x, 8);

        state.defer(EntityCommand::RemoveShape { name: "wall".into() });
        let result = tick(&mut state, &EngineConfig::default());
        assert_eq!(result.diff.shapes.get("wall"), Some(&None));
    }

    #[test]
    fn test_trigger_events_emitted() {
        let mut state = world();
        state
            .map
            .registry
            .create(Shape::new(34, 0, 20, 20).unwrap().named("plate").as_trigger())
            .unwrap();
        let id = add(&mut state, 1, 0, 0);
        state.queue_input(&id, InputRecord::new(0, Control::Right)).unwrap();
        let result = tick(&mut state, &EngineConfig::default());
        assert!(result.events.iter().any(|e| matches!(
            &e.data,
            GameEventData::ShapeEntered { shape, .. } if shape == "plate"
        )));
    }

    #[test]
    fn test_removed_entity_inputs_discarded() {
        let mut state = world();
        let id = add(&mut state, 1, 0, 0);
        tick(&mut state, &EngineConfig::default());
        state.queue_input(&id, InputRecord::new(0, Control::Right)).unwrap();
        state.defer(EntityCommand::Remove { entity: id });
        let result = tick(&mut state, &EngineConfig::default());
        assert_eq!(result.diff.removed, vec![id]);
        assert!(result.events.contains(&GameEvent::entity_removed(2, id)));
        assert!(state.queue_input(&id, InputRecord::new(1, Control::Right)).is_err());
    }

    #[test]
    fn test_replay_determinism() {
        let make = || {
            let mut state = world();
            for i in 0..4u8 {
                add(&mut state, i, 200, 200);
            }
            state
        };
        let controls: BTreeMap<EntityId, Vec<Option<Control>>> = (0..4u8)
            .map(|i| {
                let frames = (0..100u64)
                    .map(|t| Direction::from_ordinal(((t + i as u64) % 5) as u8).map(Control::from))
                    .collect();
                (EntityId::new([i; 16]), frames)
            })
            .collect();

        let config = EngineConfig::default();
        let (a, events_a) = replay(make(), &controls, 100, &config);
        let (b, events_b) = replay(make(), &controls, 100, &config);
        assert_eq!(a.compute_hash(), b.compute_hash());
        assert_eq!(events_a, events_b);
    }

    #[test]
    fn test_extreme_speed_clamps_to_world() {
        let mut state = world();
        let id = add(&mut state, 1, 100, 100);
        state.defer(EntityCommand::SetSpeed { entity: id, speed: u32::MAX });
        state.queue_input(&id, InputRecord::new(0, Control::Right)).unwrap();
        tick(&mut state, &EngineConfig::default());

        let bounds = state.world_bounds();
        assert_eq!(state.entity(&id).unwrap().position, Position::new(bounds.width - 32, 100));

        state.queue_input(&id, InputRecord::new(1, Control::Up)).unwrap();
        tick(&mut state, &EngineConfig::default());
        assert_eq!(state.entity(&id).unwrap().position, Position::new(bounds.width - 32, 0));
    }
}
