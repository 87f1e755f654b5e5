//! Input Controls and Records
//!
//! A client samples its controls once per render frame and turns every
//! active control into an [`InputRecord`]. Records travel to the server in
//! frame order and are drained FIFO by the tick engine.

use serde::{Serialize, Deserialize};

use crate::core::direction::Direction;

// =============================================================================
// CONTROLS
// =============================================================================

/// A logical control a player can press.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Control {
    /// Walk up
    Up,
    /// Walk down
    Down,
    /// Walk left
    Left,
    /// Walk right
    Right,
    /// Interact / confirm
    Action,
    /// Cancel / menu
    Back,
}

impl Control {
    /// Whether holding the control produces a record every frame.
    ///
    /// Movement repeats while held; `Action` and `Back` fire on press only.
    #[inline]
    pub fn is_repeatable(self) -> bool {
        self.direction().is_some()
    }

    /// Facing this control moves toward, if it is a movement control.
    #[inline]
    pub fn direction(self) -> Option<Direction> {
        match self {
            Control::Up => Some(Direction::Up),
            Control::Down => Some(Direction::Down),
            Control::Left => Some(Direction::Left),
            Control::Right => Some(Direction::Right),
            Control::Action | Control::Back => None,
        }
    }
}

impl From<Direction> for Control {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::Up => Control::Up,
            Direction::Down => Control::Down,
            Direction::Left => Control::Left,
            Direction::Right => Control::Right,
        }
    }
}

// =============================================================================
// INPUT RECORD
// =============================================================================

/// One control sampled on one client frame.
///
/// `frame` is a client-local monotonically increasing counter. The server
/// acknowledges records by echoing the highest processed frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputRecord {
    /// Client frame the control was sampled on
    pub frame: u64,
    /// Sampled control
    pub input: Control,
}

impl InputRecord {
    /// Create a record.
    pub const fn new(frame: u64, input: Control) -> Self {
        Self { frame, input }
    }
}
