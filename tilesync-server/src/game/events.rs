//! Simulation Events
//!
//! Events produced during a tick for collaborators outside the kinetic core
//! (interaction scripts, UI, logging).

use std::cmp::Ordering;
use serde::{Serialize, Deserialize};

use crate::game::entity::EntityId;
use crate::game::input::Control;

/// Priority for event processing order.
///
/// Lower value = processed first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum EventPriority {
    /// Entities leaving the map
    Removal = 0,
    /// Trigger region enter/leave
    Trigger = 1,
    /// Non-movement controls
    Action = 2,
    /// Move route lifecycle
    Route = 3,
    /// Lowest priority
    Other = 255,
}

/// Event payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GameEventData {
    /// A non-movement control was processed
    ActionInput {
        entity: EntityId,
        control: Control,
        frame: u64,
    },

    /// Hitbox started overlapping a trigger shape
    ShapeEntered {
        entity: EntityId,
        shape: String,
    },

    /// Hitbox stopped overlapping a trigger shape
    ShapeLeft {
        entity: EntityId,
        shape: String,
    },

    /// Two hitboxes started overlapping
    EntityTouched {
        entity: EntityId,
        other: EntityId,
    },

    /// A move route ran to completion
    RouteCompleted {
        entity: EntityId,
    },

    /// Entity removed from the map
    EntityRemoved {
        entity: EntityId,
    },
}

impl GameEventData {
    /// Entity the event is about.
    pub fn entity(&self) -> EntityId {
        match self {
            GameEventData::ActionInput { entity, .. }
            | GameEventData::ShapeEntered { entity, .. }
            | GameEventData::ShapeLeft { entity, .. }
            | GameEventData::EntityTouched { entity, .. }
            | GameEventData::RouteCompleted { entity }
            | GameEventData::EntityRemoved { entity } => *entity,
        }
    }
}

/// An event with timing and priority.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GameEvent {
    /// Tick when the event occurred
    pub tick: u64,

    /// Processing priority
    pub priority: EventPriority,

    /// Event data
    pub data: GameEventData,
}

impl GameEvent {
    /// Create a new event.
    pub fn new(tick: u64, priority: EventPriority, data: GameEventData) -> Self {
        Self { tick, priority, data }
    }

    /// Create action input event.
    pub fn action_input(tick: u64, entity: EntityId, control: Control, frame: u64) -> Self {
        Self::new(
            tick,
            EventPriority::Action,
            GameEventData::ActionInput { entity, control, frame },
        )
    }

    /// Create shape entered event.
    pub fn shape_entered(tick: u64, entity: EntityId, shape: impl Into<String>) -> Self {
        Self::new(
            tick,
            EventPriority::Trigger,
            GameEventData::ShapeEntered { entity, shape: shape.into() },
        )
    }

    /// Create shape left event.
    pub fn shape_left(tick: u64, entity: EntityId, shape: impl Into<String>) -> Self {
        Self::new(
            tick,
            EventPriority::Trigger,
            GameEventData::ShapeLeft { entity, shape: shape.into() },
        )
    }

    /// Create entity touched event.
    pub fn entity_touched(tick: u64, entity: EntityId, other: EntityId) -> Self {
        Self::new(
            tick,
            EventPriority::Trigger,
            GameEventData::EntityTouched { entity, other },
        )
    }

    /// Create route completed event.
    pub fn route_completed(tick: u64, entity: EntityId) -> Self {
        Self::new(tick, EventPriority::Route, GameEventData::RouteCompleted { entity })
    }

    /// Create entity removed event.
    pub fn entity_removed(tick: u64, entity: EntityId) -> Self {
        Self::new(tick, EventPriority::Removal, GameEventData::EntityRemoved { entity })
    }

    /// Processing order: tick, then priority, then entity id.
    pub fn order(a: &Self, b: &Self) -> Ordering {
        a.tick
            .cmp(&b.tick)
            .then(a.priority.cmp(&b.priority))
            .then(a.data.entity().cmp(&b.data.entity()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_ordering() {
        let id1 = EntityId::new([1; 16]);
        let id2 = EntityId::new([2; 16]);

        let removed = GameEvent::entity_removed(10, id2);
        let entered = GameEvent::shape_entered(10, id1, "door");
        let action = GameEvent::action_input(10, id1, Control::Action, 3);
        let later = GameEvent::entity_removed(11, id1);

        let mut events = vec![later.clone(), action.clone(), entered.clone(), removed.clone()];
        events.sort_by(GameEvent::order);
        assert_eq!(events, vec![removed, entered, action, later]);
    }

    #[test]
    fn test_event_json_tag() {
        let event = GameEvent::route_completed(2, EntityId::new([0; 16]));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["data"]["type"], "route_completed");
    }
}
