//! Trigger Detection
//!
//! Edge-triggered overlap tracking. Obstruction is handled by the motion
//! primitives in [`crate::game::entity`]; this module only reports when a
//! hitbox starts or stops overlapping something:
//!
//! - a non-collision registry shape (`ShapeEntered` / `ShapeLeft`),
//! - another entity's hitbox (`EntityTouched`, once per contact).
//!
//! Touching edges do not count as overlap.

use std::collections::{BTreeMap, BTreeSet};
use serde::{Serialize, Deserialize};

use crate::core::geometry::BoundingBox;
use crate::game::entity::{Entity, EntityId};
use crate::game::events::GameEvent;
use crate::game::map::ShapeRegistry;

/// Names of the trigger shapes a box overlaps.
pub fn triggers_overlapping(bounds: &BoundingBox, registry: &ShapeRegistry) -> BTreeSet<String> {
    registry
        .triggers()
        .filter(|(_, shape_box)| shape_box.intersects(bounds))
        .map(|(name, _)| name.to_string())
        .collect()
}

/// Pairs `(a, b)` with `a < b` whose hitboxes overlap.
pub fn overlapping_pairs(entities: &BTreeMap<EntityId, Entity>) -> BTreeSet<(EntityId, EntityId)> {
    let boxes: Vec<(EntityId, BoundingBox)> = entities
        .values()
        .map(|e| (e.id, e.hitbox_bounds()))
        .collect();

    let mut pairs = BTreeSet::new();
    for (i, (a, box_a)) in boxes.iter().enumerate() {
        for (b, box_b) in &boxes[i + 1..] {
            if box_a.intersects(box_b) {
                pairs.insert((*a, *b));
            }
        }
    }
    pairs
}

/// Overlap state carried between ticks.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TriggerTracker {
    inside: BTreeMap<EntityId, BTreeSet<String>>,
    touching: BTreeSet<(EntityId, EntityId)>,
}

impl TriggerTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Trigger shapes `entity` is currently inside.
    pub fn shapes_under(&self, entity: &EntityId) -> impl Iterator<Item = &str> {
        self.inside.get(entity).into_iter().flatten().map(String::as_str)
    }

    /// Compare current overlaps with the previous tick and emit the edges.
    ///
    /// Removed entities and removed shapes drop out silently for entities,
    /// and as `ShapeLeft` for shapes.
    pub fn update(
        &mut self,
        tick: u64,
        entities: &BTreeMap<EntityId, Entity>,
        registry: &ShapeRegistry,
    ) -> Vec<GameEvent> {
        let mut events = Vec::new();

        self.inside.retain(|id, _| entities.contains_key(id));
        for (id, entity) in entities {
            let now = triggers_overlapping(&entity.hitbox_bounds(), registry);
            let before = self.inside.remove(id).unwrap_or_default();

            for left in before.difference(&now) {
                events.push(GameEvent::shape_left(tick, *id, left.as_str()));
            }
            for entered in now.difference(&before) {
                events.push(GameEvent::shape_entered(tick, *id, entered.as_str()));
            }
            if !now.is_empty() {
                self.inside.insert(*id, now);
            }
        }

        let touching = overlapping_pairs(entities);
        for (a, b) in touching.difference(&self.touching) {
            events.push(GameEvent::entity_touched(tick, *a, *b));
        }
        self.touching = touching;

        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::geometry::{Position, Shape};
    use crate::game::events::GameEventData;

    fn world_with(positions: &[(u8, i32, i32)]) -> BTreeMap<EntityId, Entity> {
        positions
            .iter()
            .map(|(n, x, y)| {
                let id = EntityId::new([*n; 16]);
                (id, Entity::player(id, Position::new(*x, *y)))
            })
            .collect()
    }

    fn registry_with_zone() -> ShapeRegistry {
        let mut registry = ShapeRegistry::new();
        registry
            .create(Shape::new(100, 0, 50, 50).unwrap().named("zone").as_trigger())
            .unwrap();
        registry.create(Shape::new(300, 0, 50, 50).unwrap().named("wall")).unwrap();
        registry
    }

    #[test]
    fn test_enter_and_leave_trigger() {
        let registry = registry_with_zone();
        let mut tracker = TriggerTracker::new();

        let mut entities = world_with(&[(1, 0, 0)]);
        assert!(tracker.update(1, &entities, &registry).is_empty());

        let id = EntityId::new([1; 16]);
        entities.get_mut(&id).unwrap().position = Position::new(80, 0);
        let events = tracker.update(2, &entities, &registry);
        assert_eq!(events, vec![GameEvent::shape_entered(2, id, "zone")]);
        assert_eq!(tracker.shapes_under(&id).collect::<Vec<_>>(), vec!["zone"]);

        // Staying inside emits nothing.
        assert!(tracker.update(3, &entities, &registry).is_empty());

        entities.get_mut(&id).unwrap().position = Position::new(150, 0);
        let events = tracker.update(4, &entities, &registry);
        assert_eq!(events, vec![GameEvent::shape_left(4, id, "zone")]);
    }

    #[test]
    fn test_touching_edge_is_not_inside() {
        let registry = registry_with_zone();
        let mut tracker = TriggerTracker::new();
        let entities = world_with(&[(1, 68, 0)]);
        assert!(tracker.update(1, &entities, &registry).is_empty());
    }

    #[test]
    fn test_collision_shapes_are_not_triggers() {
        let registry = registry_with_zone();
        let mut tracker = TriggerTracker::new();
        let entities = world_with(&[(1, 310, 10)]);
        assert!(tracker.update(1, &entities, &registry).is_empty());
    }

    #[test]
    fn test_entity_touch_reported_once() {
        let registry = ShapeRegistry::new();
        let mut tracker = TriggerTracker::new();
        let entities = world_with(&[(1, 0, 0), (2, 16, 16), (3, 500, 500)]);

        let events = tracker.update(1, &entities, &registry);
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0].data,
            GameEventData::EntityTouched { entity, other }
                if entity == EntityId::new([1; 16]) && other == EntityId::new([2; 16])
        ));
        assert!(tracker.update(2, &entities, &registry).is_empty());
    }
}
