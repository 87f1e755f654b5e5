//! Tick Diffs
//!
//! After every tick the server sends each client a partial diff: only the
//! kinetic fields that changed since the previous diff, the registry shapes
//! that changed (`None` = removed), and each entity's acknowledged input
//! watermark. A checksum of the full synchronized state rides along so a
//! mirror can detect drift.

use std::collections::BTreeMap;
use serde::{Serialize, Deserialize};

use crate::core::direction::Direction;
use crate::core::geometry::{Position, Shape, Size};
use crate::core::hash::{StateHash, StateHasher, compute_state_hash};
use crate::game::entity::{Entity, EntityId, EntityKind};
use crate::game::map::{MapConfig, ShapeChanges, ShapeRegistry};

// =============================================================================
// SNAPSHOTS
// =============================================================================

/// Synchronized kinetic fields of one entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KineticState {
    /// Position
    pub position: Position,
    /// Facing
    pub direction: Direction,
    /// Units per step
    pub speed: u32,
    /// Displacement allowed
    pub can_move: bool,
    /// Hitbox size
    pub hitbox: Size,
}

impl KineticState {
    /// Read from an entity.
    pub fn of(entity: &Entity) -> Self {
        Self {
            position: entity.position,
            direction: entity.direction,
            speed: entity.speed,
            can_move: entity.can_move,
            hitbox: entity.hitbox(),
        }
    }

    /// Hash into a checksum. Client and server use the same layout.
    pub fn hash_into(&self, id: &EntityId, hasher: &mut StateHasher) {
        hasher.update_bytes(id.as_bytes());
        hasher.update_position(self.position);
        hasher.update_direction(self.direction);
        hasher.update_u32(self.speed);
        hasher.update_bool(self.can_move);
        hasher.update_i32(self.hitbox.width);
        hasher.update_i32(self.hitbox.height);
    }
}

/// Full view of an entity, for joins.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    /// Entity id
    pub id: EntityId,
    /// Capability tag
    pub kind: EntityKind,
    /// Kinetic fields
    pub kinetic: KineticState,
    /// Attached shapes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub shapes: Vec<Shape>,
}

impl EntitySnapshot {
    /// Read from an entity.
    pub fn of(entity: &Entity) -> Self {
        Self {
            id: entity.id,
            kind: entity.kind,
            kinetic: KineticState::of(entity),
            shapes: entity.attached_shapes().cloned().collect(),
        }
    }
}

/// Everything a joining client needs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    /// Tick the snapshot was taken after
    pub tick: u64,
    /// Map content with current registry shapes
    pub map: MapConfig,
    /// Every entity
    pub entities: Vec<EntitySnapshot>,
}

/// Checksum over entity kinetics (id order) and registry shapes (name order).
pub fn checksum<'a>(
    tick: u64,
    kinetics: impl IntoIterator<Item = (&'a EntityId, &'a KineticState)>,
    registry: &ShapeRegistry,
) -> StateHash {
    compute_state_hash(tick, |hasher| {
        for (id, kinetic) in kinetics {
            kinetic.hash_into(id, hasher);
        }
        for (_, shape) in registry.iter() {
            hasher.update_shape(shape);
        }
    })
}

// =============================================================================
// DIFFS
// =============================================================================

/// Changed fields of one entity. Absent fields are unchanged.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDiff {
    /// Entity id
    pub id: EntityId,
    /// New position
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    /// New facing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,
    /// New speed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<u32>,
    /// New movement permission
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub can_move: Option<bool>,
    /// New hitbox
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hitbox: Option<Size>,
    /// Highest input frame processed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack: Option<u64>,
}

impl EntityDiff {
    /// Whether nothing changed.
    pub fn is_empty(&self) -> bool {
        self.position.is_none()
            && self.direction.is_none()
            && self.speed.is_none()
            && self.can_move.is_none()
            && self.hitbox.is_none()
            && self.ack.is_none()
    }

    /// Apply the changed fields to a kinetic state.
    pub fn apply_to(&self, kinetic: &mut KineticState) {
        if let Some(position) = self.position {
            kinetic.position = position;
        }
        if let Some(direction) = self.direction {
            kinetic.direction = direction;
        }
        if let Some(speed) = self.speed {
            kinetic.speed = speed;
        }
        if let Some(can_move) = self.can_move {
            kinetic.can_move = can_move;
        }
        if let Some(hitbox) = self.hitbox {
            kinetic.hitbox = hitbox;
        }
    }
}

/// Everything that changed during one tick.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TickDiff {
    /// Tick number
    pub tick: u64,
    /// Entities new since the previous diff
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub joined: Vec<EntitySnapshot>,
    /// Changed entities (id order)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entities: Vec<EntityDiff>,
    /// Entities gone since the previous diff
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub removed: Vec<EntityId>,
    /// Registry changes: `None` = removed
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub shapes: ShapeChanges,
    /// Hex checksum of the state after this tick
    pub checksum: String,
}

impl TickDiff {
    /// Whether nothing changed this tick.
    pub fn is_empty(&self) -> bool {
        self.joined.is_empty()
            && self.entities.is_empty()
            && self.removed.is_empty()
            && self.shapes.is_empty()
    }

    /// Diff entry for one entity.
    pub fn entity(&self, id: &EntityId) -> Option<&EntityDiff> {
        self.entities.iter().find(|d| d.id == *id)
    }
}

/// Last values sent, per entity.
#[derive(Clone, Debug, Default)]
pub struct DiffTracker {
    sent: BTreeMap<EntityId, (KineticState, Option<u64>)>,
}

impl DiffTracker {
    /// Empty tracker: the first diff reports every entity as joined.
    pub fn new() -> Self {
        Self::default()
    }

    /// Compare against the last sent values and remember the new ones.
    pub fn build(
        &mut self,
        tick: u64,
        entities: &BTreeMap<EntityId, Entity>,
        shapes: ShapeChanges,
        checksum: StateHash,
    ) -> TickDiff {
        let mut diff = TickDiff {
            tick,
            shapes,
            checksum: hex::encode(checksum),
            ..TickDiff::default()
        };

        diff.removed = self
            .sent
            .keys()
            .filter(|id| !entities.contains_key(id))
            .copied()
            .collect();
        for id in &diff.removed {
            self.sent.remove(id);
        }

        for (id, entity) in entities {
            let now = KineticState::of(entity);
            let ack = entity.last_processed_frame;

            let Some((before, before_ack)) = self.sent.get(id) else {
                diff.joined.push(EntitySnapshot::of(entity));
                if ack.is_some() {
                    diff.entities.push(EntityDiff { id: *id, ack, ..EntityDiff::default() });
                }
                self.sent.insert(*id, (now, ack));
                continue;
            };

            let changed = EntityDiff {
                id: *id,
                position: (now.position != before.position).then_some(now.position),
                direction: (now.direction != before.direction).then_some(now.direction),
                speed: (now.speed != before.speed).then_some(now.speed),
                can_move: (now.can_move != before.can_move).then_some(now.can_move),
                hitbox: (now.hitbox != before.hitbox).then_some(now.hitbox),
                ack: if ack != *before_ack { ack } else { None },
            };
            if !changed.is_empty() {
                diff.entities.push(changed);
                self.sent.insert(*id, (now, ack));
            }
        }

        diff
    }
}
