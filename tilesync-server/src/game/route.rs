//! Move Routes
//!
//! A move route is a list of [`MoveDirective`]s plus a repeat policy for the
//! whole list. Routes are plain data; [`crate::game::interpreter`] executes
//! them one tick at a time.
//!
//! ```
//! use tilesync::game::route::{Move, MoveRoute};
//!
//! // Patrol: two tiles right, two tiles left, forever.
//! let patrol = MoveRoute::infinite(vec![
//!     Move::tile_right(2),
//!     Move::tile_left(2),
//! ]);
//! assert!(patrol.is_infinite());
//! ```

use serde::{Serialize, Deserialize};

use crate::core::direction::Direction;
use crate::core::geometry::Position;
use crate::game::entity::EntityId;

/// How many times something is replayed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepeatCount {
    /// Exactly `n` times (`Times(1)` = once)
    Times(u32),
    /// Until cancelled
    Infinite,
}

impl RepeatCount {
    /// Whether `done` repetitions satisfy the policy.
    #[inline]
    pub fn is_satisfied(self, done: u32) -> bool {
        match self {
            RepeatCount::Times(n) => done >= n,
            RepeatCount::Infinite => false,
        }
    }
}

impl Default for RepeatCount {
    fn default() -> Self {
        RepeatCount::Times(1)
    }
}

/// One scripted movement instruction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveDirective {
    /// Face a direction
    TurnTo(Direction),
    /// Face right
    TurnRight,
    /// Face left
    TurnLeft,
    /// Quarter turn clockwise from the current facing
    RotateClockwise,
    /// Quarter turn counter-clockwise from the current facing
    RotateCounterClockwise,
    /// Face a random direction
    TurnRandom,
    /// Face the target entity
    TurnTowardEntity(EntityId),
    /// Face away from the target entity
    TurnAwayFromEntity(EntityId),
    /// Walk `distance` units, `speed` per tick
    MoveBy {
        /// Walking direction
        direction: Direction,
        /// Total units
        distance: u32,
    },
    /// Walk whole tiles; distance is independent of speed
    TileMoveBy {
        /// Walking direction
        direction: Direction,
        /// Number of tiles
        tiles: u32,
    },
    /// Walk to a point, larger axis first
    MoveTo(Position),
    /// One step toward the target entity
    TowardEntity(EntityId),
    /// One step away from the target entity
    AwayFromEntity(EntityId),
    /// One step in a random direction
    Random,
    /// Suspend for a number of ticks
    Wait(u32),
    /// Replay a directive
    Repeat {
        /// Directive to replay
        directive: Box<MoveDirective>,
        /// Replay policy
        count: RepeatCount,
    },
}

/// Ordered directives plus a repeat policy.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveRoute {
    /// Directives in execution order
    pub directives: Vec<MoveDirective>,
    /// How often the whole list runs
    #[serde(default)]
    pub repeat: RepeatCount,
}

impl MoveRoute {
    /// Run the directives once.
    pub fn once(directives: Vec<MoveDirective>) -> Self {
        Self { directives, repeat: RepeatCount::Times(1) }
    }

    /// Run the directives `n` times.
    pub fn times(directives: Vec<MoveDirective>, n: u32) -> Self {
        Self { directives, repeat: RepeatCount::Times(n) }
    }

    /// Run the directives until cancelled.
    pub fn infinite(directives: Vec<MoveDirective>) -> Self {
        Self { directives, repeat: RepeatCount::Infinite }
    }

    /// Whether the route never completes by itself.
    pub fn is_infinite(&self) -> bool {
        self.repeat == RepeatCount::Infinite && !self.directives.is_empty()
    }
}

impl From<Vec<MoveDirective>> for MoveRoute {
    fn from(directives: Vec<MoveDirective>) -> Self {
        Self::once(directives)
    }
}

// =============================================================================
// BUILDERS
// =============================================================================

/// Shorthand constructors for directives.
pub struct Move;

impl Move {
    /// Walk up by `distance` units.
    pub fn up(distance: u32) -> MoveDirective {
        MoveDirective::MoveBy { direction: Direction::Up, distance }
    }

    /// Walk down by `distance` units.
    pub fn down(distance: u32) -> MoveDirective {
        MoveDirective::MoveBy { direction: Direction::Down, distance }
    }

    /// Walk left by `distance` units.
    pub fn left(distance: u32) -> MoveDirective {
        MoveDirective::MoveBy { direction: Direction::Left, distance }
    }

    /// Walk right by `distance` units.
    pub fn right(distance: u32) -> MoveDirective {
        MoveDirective::MoveBy { direction: Direction::Right, distance }
    }

    /// Walk `tiles` tiles up.
    pub fn tile_up(tiles: u32) -> MoveDirective {
        MoveDirective::TileMoveBy { direction: Direction::Up, tiles }
    }

    /// Walk `tiles` tiles down.
    pub fn tile_down(tiles: u32) -> MoveDirective {
        MoveDirective::TileMoveBy { direction: Direction::Down, tiles }
    }

    /// Walk `tiles` tiles left.
    pub fn tile_left(tiles: u32) -> MoveDirective {
        MoveDirective::TileMoveBy { direction: Direction::Left, tiles }
    }

    /// Walk `tiles` tiles right.
    pub fn tile_right(tiles: u32) -> MoveDirective {
        MoveDirective::TileMoveBy { direction: Direction::Right, tiles }
    }

    /// Face a direction.
    pub fn turn(direction: Direction) -> MoveDirective {
        MoveDirective::TurnTo(direction)
    }

    /// Face right.
    pub fn turn_right() -> MoveDirective {
        MoveDirective::TurnRight
    }

    /// Face left.
    pub fn turn_left() -> MoveDirective {
        MoveDirective::TurnLeft
    }

    /// Face a random direction.
    pub fn turn_random() -> MoveDirective {
        MoveDirective::TurnRandom
    }

    /// One step in a random direction.
    pub fn random() -> MoveDirective {
        MoveDirective::Random
    }

    /// One step toward an entity.
    pub fn toward(target: EntityId) -> MoveDirective {
        MoveDirective::TowardEntity(target)
    }

    /// One step away from an entity.
    pub fn away_from(target: EntityId) -> MoveDirective {
        MoveDirective::AwayFromEntity(target)
    }

    /// Face an entity.
    pub fn turn_toward(target: EntityId) -> MoveDirective {
        MoveDirective::TurnTowardEntity(target)
    }

    /// Face away from an entity.
    pub fn turn_away_from(target: EntityId) -> MoveDirective {
        MoveDirective::TurnAwayFromEntity(target)
    }

    /// Walk to a point.
    pub fn to(point: Position) -> MoveDirective {
        MoveDirective::MoveTo(point)
    }

    /// Suspend for `ticks` ticks.
    pub fn wait(ticks: u32) -> MoveDirective {
        MoveDirective::Wait(ticks)
    }

    /// Replay `directive` `n` times.
    pub fn repeat(directive: MoveDirective, n: u32) -> MoveDirective {
        MoveDirective::Repeat { directive: Box::new(directive), count: RepeatCount::Times(n) }
    }

    /// Replay `directive` until cancelled.
    pub fn forever(directive: MoveDirective) -> MoveDirective {
        MoveDirective::Repeat { directive: Box::new(directive), count: RepeatCount::Infinite }
    }

    /// `n` single speed-sized steps in one direction.
    pub fn repeat_move(direction: Direction, step: u32, n: u32) -> MoveDirective {
        Self::repeat(MoveDirective::MoveBy { direction, distance: step }, n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeat_count() {
        assert!(RepeatCount::Times(0).is_satisfied(0));
        assert!(!RepeatCount::Times(2).is_satisfied(1));
        assert!(RepeatCount::Times(2).is_satisfied(2));
        assert!(!RepeatCount::Infinite.is_satisfied(u32::MAX));
    }

    #[test]
    fn test_empty_infinite_route_is_finite() {
        assert!(!MoveRoute::infinite(vec![]).is_infinite());
        assert!(MoveRoute::infinite(vec![Move::random()]).is_infinite());
    }

    #[test]
    fn test_route_json() {
        let route = MoveRoute::times(vec![Move::tile_right(2), Move::wait(10)], 3);
        let json = serde_json::to_string(&route).unwrap();
        let back: MoveRoute = serde_json::from_str(&json).unwrap();
        assert_eq!(back, route);

        let parsed: MoveRoute =
            serde_json::from_str(r#"{"directives":["turn_right",{"wait":5}]}"#).unwrap();
        assert_eq!(parsed.repeat, RepeatCount::Times(1));
        assert_eq!(parsed.directives, vec![MoveDirective::TurnRight, MoveDirective::Wait(5)]);
    }
}
