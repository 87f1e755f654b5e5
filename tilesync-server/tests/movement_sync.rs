//! End-to-end movement and sync behavior through the public API.

use tilesync::client::ClientMirror;
use tilesync::core::direction::Direction;
use tilesync::core::geometry::{BoundingBox, Position, Shape};
use tilesync::game::command::EntityCommand;
use tilesync::game::diff::TickDiff;
use tilesync::game::entity::{Entity, EntityId};
use tilesync::game::input::{Control, InputRecord};
use tilesync::game::map::{MapConfig, ShapeRegistry};
use tilesync::game::route::{Move, MoveDirective, MoveRoute};
use tilesync::game::state::WorldState;
use tilesync::game::tick::{tick, EngineConfig, TickResult};
use tilesync::network::protocol::ServerMessage;

const HERO: EntityId = EntityId::new([1; 16]);
const OTHER: EntityId = EntityId::new([2; 16]);

fn world(config: MapConfig) -> WorldState {
    WorldState::from_config(&config).unwrap()
}

fn unbounded() -> MapConfig {
    MapConfig { width: 0, height: 0, ..MapConfig::default() }
}

fn run(state: &mut WorldState) -> TickResult {
    tick(state, &EngineConfig::default())
}

fn run_until_done(state: &mut WorldState, id: EntityId) {
    for _ in 0..1000 {
        if run(state).completed_routes.contains(&id) {
            return;
        }
    }
    panic!("route never completed");
}

#[test]
fn max_shape_independent_of_attach_order() {
    let shapes = [
        Shape::centered(0, 0, 100, 100).unwrap(),
        Shape::new(-40, 5, 20, 8).unwrap(),
        Shape::centered(30, -10, 50, 200).unwrap(),
    ];

    let mut forward = Entity::player(HERO, Position::new(200, 200));
    let mut backward = Entity::player(HERO, Position::new(200, 200));
    for shape in &shapes {
        forward.attach_shape(shape.clone()).unwrap();
    }
    for shape in shapes.iter().rev() {
        backward.attach_shape(shape.clone()).unwrap();
    }
    assert_eq!(forward.compute_max_shape(), backward.compute_max_shape());
}

#[test]
fn centered_shapes_grow_max_shape() {
    let mut entity = Entity::player(HERO, Position::new(200, 200));
    entity.set_hitbox(10, 10).unwrap();

    entity.attach_shape(Shape::centered(0, 0, 100, 100).unwrap()).unwrap();
    assert_eq!(entity.compute_max_shape(), BoundingBox::new(155, 155, 255, 255));

    entity.attach_shape(Shape::centered(0, 0, 50, 200).unwrap()).unwrap();
    assert_eq!(entity.compute_max_shape(), BoundingBox::new(155, 105, 255, 305));
}

#[test]
fn cannot_move_blocks_capture_and_tick() {
    let mut state = world(MapConfig::default());
    state.add_entity(Entity::player(HERO, Position::new(100, 100))).unwrap();
    state.entity_mut(&HERO).unwrap().can_move = false;

    let mut mirror = ClientMirror::new(HERO, &state.snapshot()).unwrap();
    for _ in 0..5 {
        mirror.capture(&[Control::Right]);
    }
    assert_eq!(mirror.pending_len(), 0);
    assert!(mirror.flush().is_empty());

    state.queue_input(&HERO, InputRecord::new(0, Control::Right)).unwrap();
    run(&mut state);
    assert_eq!(state.entity(&HERO).unwrap().position, Position::new(100, 100));
}

#[test]
fn move_by_speed_on_unbounded_map() {
    let mut state = world(unbounded());
    state.add_entity(Entity::scripted(HERO, Position::new(5000, 7000))).unwrap();
    let speed = state.entity(&HERO).unwrap().speed;

    state.start_route(&HERO, MoveRoute::once(vec![Move::right(speed)])).unwrap();
    run(&mut state);
    assert_eq!(state.entity(&HERO).unwrap().position, Position::new(5000 + speed as i32, 7000));
}

#[test]
fn repeated_move_by_doubles_distance() {
    let mut state = world(unbounded());
    state.add_entity(Entity::scripted(HERO, Position::new(0, 0))).unwrap();

    state.start_route(&HERO, MoveRoute::once(vec![Move::repeat(Move::right(3), 2)])).unwrap();
    run_until_done(&mut state, HERO);
    assert_eq!(state.entity(&HERO).unwrap().position, Position::new(6, 0));
}

#[test]
fn tile_move_ignores_speed() {
    let config = MapConfig { tile_width: 30, ..unbounded() };
    for speed in [1, 3, 7, 45] {
        let mut state = world(config.clone());
        state.add_entity(Entity::scripted(HERO, Position::new(0, 0))).unwrap();
        state.entity_mut(&HERO).unwrap().speed = speed;

        state.start_route(&HERO, MoveRoute::once(vec![Move::tile_right(2)])).unwrap();
        run_until_done(&mut state, HERO);
        assert_eq!(state.entity(&HERO).unwrap().position.x, 60, "speed {speed}");
    }
}

#[test]
fn turn_directives() {
    let turn_from = |start: Direction, directive: MoveDirective| {
        let mut state = world(MapConfig::default());
        let mut entity = Entity::scripted(HERO, Position::new(0, 0));
        entity.direction = start;
        state.add_entity(entity).unwrap();
        state.start_route(&HERO, MoveRoute::once(vec![directive])).unwrap();
        run(&mut state);
        state.entity(&HERO).unwrap().direction
    };

    assert_eq!(turn_from(Direction::Down, Move::turn_right()).ordinal(), 2);
    assert_eq!(turn_from(Direction::Down, Move::turn_left()).ordinal(), 4);

    let mut facing = Direction::Up;
    let mut cycle = vec![facing];
    for _ in 0..4 {
        facing = turn_from(facing, MoveDirective::RotateClockwise);
        cycle.push(facing);
    }
    assert_eq!(
        cycle,
        vec![Direction::Up, Direction::Right, Direction::Down, Direction::Left, Direction::Up]
    );
}

#[test]
fn toward_and_away_change_gap_by_speed() {
    for (directive, expected_y) in [(Move::toward(OTHER), 103), (Move::away_from(OTHER), 97)] {
        let mut state = world(MapConfig::default());
        state.add_entity(Entity::scripted(HERO, Position::new(100, 100))).unwrap();
        state.add_entity(Entity::scripted(OTHER, Position::new(100, 200))).unwrap();

        state.start_route(&HERO, MoveRoute::once(vec![directive])).unwrap();
        run(&mut state);
        assert_eq!(state.entity(&HERO).unwrap().position, Position::new(100, expected_y));
    }
}

#[test]
fn world_edge_clamps_motion() {
    let mut state = world(MapConfig::default());
    state.add_entity(Entity::player(HERO, Position::new(1, 50))).unwrap();
    state.queue_input(&HERO, InputRecord::new(0, Control::Left)).unwrap();
    run(&mut state);
    assert_eq!(state.entity(&HERO).unwrap().position, Position::new(0, 50));
}

#[test]
fn recreated_shape_has_no_stale_fields() {
    let mut registry = ShapeRegistry::new();
    registry
        .create(
            Shape::new(10, 10, 64, 64)
                .unwrap()
                .named("door")
                .as_trigger()
                .with_property("locked", serde_json::json!(true)),
        )
        .unwrap();
    registry.remove("door");
    registry.create(Shape::new(0, 0, 8, 8).unwrap().named("door")).unwrap();

    let door = registry.get("door").unwrap();
    assert!(door.properties.is_empty());
    assert!(door.collision);
    assert_eq!((door.x, door.y, door.width, door.height), (0, 0, 8, 8));
}

/// Serialize a diff the way the server sends it and parse it back.
fn over_the_wire(diff: TickDiff) -> TickDiff {
    let json = ServerMessage::Tick { diff }.to_json().unwrap();
    match ServerMessage::from_json(&json).unwrap() {
        ServerMessage::Tick { diff } => diff,
        other => panic!("unexpected message {other:?}"),
    }
}

#[test]
fn client_mirror_tracks_server() {
    let mut state = world(MapConfig::default());
    state.add_entity(Entity::player(HERO, Position::new(100, 100))).unwrap();
    state.add_entity(Entity::scripted(OTHER, Position::new(300, 300))).unwrap();
    state.start_route(&OTHER, MoveRoute::infinite(vec![Move::random()])).unwrap();

    let mut mirror = ClientMirror::new(HERO, &state.snapshot()).unwrap();

    for t in 0..30u64 {
        mirror.capture(&[if t % 10 < 5 { Control::Right } else { Control::Down }]);
        for record in mirror.flush() {
            state.queue_input(&HERO, record).unwrap();
        }
        if t == 12 {
            state.defer(EntityCommand::CreateShape(Shape::new(400, 0, 16, 16).unwrap().named("crate")));
        }

        let result = run(&mut state);
        assert!(mirror.apply_diff(&over_the_wire(result.diff)), "checksum mismatch at tick {}", result.tick);
    }

    assert_eq!(mirror.pending_len(), 0);
    assert_eq!(mirror.entity().position, state.entity(&HERO).unwrap().position);
    assert_eq!(
        mirror.authoritative(&OTHER).unwrap().kinetic.position,
        state.entity(&OTHER).unwrap().position
    );
    assert!(mirror.map().registry.get("crate").is_some());
}

#[test]
fn lost_diff_detected_by_checksum() {
    let mut state = world(MapConfig::default());
    state.add_entity(Entity::player(HERO, Position::new(100, 100))).unwrap();
    state.add_entity(Entity::scripted(OTHER, Position::new(300, 300))).unwrap();
    let mut mirror = ClientMirror::new(HERO, &state.snapshot()).unwrap();

    assert!(mirror.apply_diff(&run(&mut state).diff));

    state.defer(EntityCommand::SetPosition { entity: OTHER, position: Position::new(10, 10) });
    let _lost = run(&mut state);

    assert!(!mirror.apply_diff(&run(&mut state).diff));
    mirror.resync(&state.snapshot()).unwrap();
    assert_eq!(mirror.authoritative(&OTHER).unwrap().kinetic.position, Position::new(10, 10));
}

#[tokio::test]
async fn scripted_route_completes_through_command_channel() {
    let mut state = world(MapConfig::default());
    state.add_entity(Entity::scripted(HERO, Position::new(0, 0))).unwrap();

    let (commands, mut rx) = tilesync::game::command::CommandSender::channel();
    let handle = commands.move_to(HERO, Position::new(9, 6));

    for _ in 0..10 {
        while let Ok(command) = rx.try_recv() {
            state.defer(command);
        }
        run(&mut state);
    }

    let completion = handle.wait().await.unwrap();
    assert_eq!(completion.entity, HERO);
    assert_eq!(state.entity(&HERO).unwrap().position, Position::new(9, 6));
}

mod properties {
    use super::*;
    use proptest::prelude::*;

    fn arb_control() -> impl Strategy<Value = Option<Control>> {
        prop_oneof![
            Just(None),
            Just(Some(Control::Up)),
            Just(Some(Control::Down)),
            Just(Some(Control::Left)),
            Just(Some(Control::Right)),
            Just(Some(Control::Action)),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prediction_converges_for_any_input(controls in prop::collection::vec(arb_control(), 1..60)) {
            let mut config = MapConfig::default();
            config.shapes.push(Shape::new(160, 64, 32, 128).unwrap().named("wall"));
            let mut state = world(config);
            state.add_entity(Entity::player(HERO, Position::new(100, 100))).unwrap();
            let mut mirror = ClientMirror::new(HERO, &state.snapshot()).unwrap();

            for control in &controls {
                let held: Vec<Control> = control.iter().copied().collect();
                mirror.capture(&held);
                for record in mirror.flush() {
                    state.queue_input(&HERO, record).unwrap();
                }
                let diff = run(&mut state).diff;
                prop_assert!(mirror.apply_diff(&diff));
            }

            prop_assert_eq!(mirror.pending_len(), 0);
            prop_assert_eq!(mirror.entity().position, state.entity(&HERO).unwrap().position);
            prop_assert_eq!(mirror.entity().direction, state.entity(&HERO).unwrap().direction);
        }
    }
}
