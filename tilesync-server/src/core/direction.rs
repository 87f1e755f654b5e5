//! Facing Direction
//!
//! Four-way facing used by entities, inputs and move routes.
//! Screen coordinates: `+x` is right, `+y` is down.

use serde::{Serialize, Deserialize};

/// One of the four cardinal facings.
///
/// The ordinal is part of the wire format: `Up = 1`, `Right = 2`,
/// `Down = 3`, `Left = 4`. Clockwise order is Up → Right → Down → Left.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
#[derive(Default)]
pub enum Direction {
    /// Toward `-y`
    Up = 1,
    /// Toward `+x`
    Right = 2,
    /// Toward `+y`
    #[default]
    Down = 3,
    /// Toward `-x`
    Left = 4,
}

impl Direction {
    /// All directions in clockwise order starting at `Up`.
    pub const ALL: [Direction; 4] = [
        Direction::Up,
        Direction::Right,
        Direction::Down,
        Direction::Left,
    ];

    /// Wire ordinal.
    #[inline]
    pub fn ordinal(self) -> u8 {
        self as u8
    }

    /// Parse a wire ordinal.
    pub fn from_ordinal(value: u8) -> Option<Self> {
        match value {
            1 => Some(Direction::Up),
            2 => Some(Direction::Right),
            3 => Some(Direction::Down),
            4 => Some(Direction::Left),
            _ => None,
        }
    }

    /// Rotate a quarter turn clockwise.
    pub fn clockwise(self) -> Self {
        match self {
            Direction::Up => Direction::Right,
            Direction::Right => Direction::Down,
            Direction::Down => Direction::Left,
            Direction::Left => Direction::Up,
        }
    }

    /// Rotate a quarter turn counter-clockwise.
    pub fn counter_clockwise(self) -> Self {
        match self {
            Direction::Up => Direction::Left,
            Direction::Left => Direction::Down,
            Direction::Down => Direction::Right,
            Direction::Right => Direction::Up,
        }
    }

    /// Opposite facing.
    pub fn opposite(self) -> Self {
        self.clockwise().clockwise()
    }

    /// Unit step `(dx, dy)` for this direction.
    #[inline]
    pub fn unit(self) -> (i32, i32) {
        match self {
            Direction::Up => (0, -1),
            Direction::Right => (1, 0),
            Direction::Down => (0, 1),
            Direction::Left => (-1, 0),
        }
    }

    /// Whether this direction moves along the x axis.
    #[inline]
    pub fn is_horizontal(self) -> bool {
        matches!(self, Direction::Left | Direction::Right)
    }

    /// Direction that reduces the offset `(dx, dy)` from an origin to a target.
    ///
    /// The axis with the larger magnitude wins. Equal magnitudes resolve to
    /// the vertical axis. Returns `None` when the offset is zero.
    pub fn toward(dx: i32, dy: i32) -> Option<Self> {
        if dx == 0 && dy == 0 {
            return None;
        }
        if dy.unsigned_abs() >= dx.unsigned_abs() {
            Some(if dy < 0 { Direction::Up } else { Direction::Down })
        } else {
            Some(if dx < 0 { Direction::Left } else { Direction::Right })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordinals_roundtrip() {
        for dir in Direction::ALL {
            assert_eq!(Direction::from_ordinal(dir.ordinal()), Some(dir));
        }
        assert_eq!(Direction::from_ordinal(0), None);
        assert_eq!(Direction::from_ordinal(5), None);
    }

    #[test]
    fn test_rotation_from_down() {
        assert_eq!(Direction::Down.counter_clockwise(), Direction::Right);
        assert_eq!(Direction::Down.clockwise(), Direction::Left);
        assert_eq!(Direction::Down.opposite(), Direction::Up);
    }

    #[test]
    fn test_full_rotation_cycle() {
        let mut dir = Direction::Up;
        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(dir);
            dir = dir.clockwise();
        }
        assert_eq!(seen, Direction::ALL.to_vec());
        assert_eq!(dir, Direction::Up);

        for d in Direction::ALL {
            assert_eq!(d.clockwise().counter_clockwise(), d);
        }
    }

    #[test]
    fn test_toward_tie_prefers_vertical() {
        assert_eq!(Direction::toward(5, 5), Some(Direction::Down));
        assert_eq!(Direction::toward(-5, -5), Some(Direction::Up));
        assert_eq!(Direction::toward(6, 5), Some(Direction::Right));
        assert_eq!(Direction::toward(-6, 5), Some(Direction::Left));
        assert_eq!(Direction::toward(0, -1), Some(Direction::Up));
        assert_eq!(Direction::toward(0, 0), None);
    }
}
