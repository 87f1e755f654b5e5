//! Client-Side Prediction
//!
//! A [`ClientMirror`] keeps the client's view of one map: the locally
//! controlled entity (predicted), the last authoritative state of every
//! entity, and a mirror of the shape registry.
//!
//! ## Flow
//!
//! 1. `capture` records at most one input per render frame and predicts
//!    the resulting motion with the same `apply_motion` the server runs.
//! 2. `flush` hands out the records not yet sent.
//! 3. `apply_diff` overwrites the mirror with the server's state, drops
//!    acknowledged records and re-applies the ones still pending.
//!
//! The client has no authority. A checksum mismatch is reported and the
//! caller resyncs from a fresh snapshot.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use thiserror::Error;
use tracing::{debug, warn};

use crate::core::geometry::GeometryError;
use crate::game::diff::{EntitySnapshot, KineticState, TickDiff, WorldSnapshot, checksum};
use crate::game::entity::{Entity, EntityId};
use crate::game::input::{Control, InputRecord};
use crate::game::map::{ConfigError, Map};

/// Mirror construction errors.
#[derive(Debug, Error)]
pub enum MirrorError {
    /// Our own entity is not in the snapshot
    #[error("entity {0} missing from snapshot")]
    MissingEntity(EntityId),

    /// Map content rejected
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Entity geometry rejected
    #[error(transparent)]
    Geometry(#[from] GeometryError),
}

/// Client view of a map.
#[derive(Debug)]
pub struct ClientMirror {
    /// Locally controlled entity, predicted
    local: Entity,

    /// Map dimensions and registry mirror
    map: Map,

    /// Last authoritative state per entity (ours included)
    authoritative: BTreeMap<EntityId, EntitySnapshot>,

    /// Tick of the last applied diff
    tick: u64,

    /// Next render frame number
    frame: u64,

    /// Captured, unacknowledged records
    pending_move: VecDeque<InputRecord>,

    /// Highest frame handed out by `flush`
    sent_through: Option<u64>,

    /// Controls active on the previous frame (press-edge detection)
    held: BTreeSet<Control>,

    /// Checksum mismatches seen
    desyncs: u64,
}

impl ClientMirror {
    /// Build a mirror from the snapshot received on join.
    pub fn new(id: EntityId, snapshot: &WorldSnapshot) -> Result<Self, MirrorError> {
        let own = snapshot
            .entities
            .iter()
            .find(|s| s.id == id)
            .ok_or(MirrorError::MissingEntity(id))?;

        Ok(Self {
            local: entity_from_snapshot(own)?,
            map: Map::from_config(&snapshot.map)?,
            authoritative: snapshot.entities.iter().map(|s| (s.id, s.clone())).collect(),
            tick: snapshot.tick,
            frame: 0,
            pending_move: VecDeque::new(),
            sent_through: None,
            held: BTreeSet::new(),
            desyncs: 0,
        })
    }

    /// Rebuild from a fresh snapshot, keeping the frame counter.
    pub fn resync(&mut self, snapshot: &WorldSnapshot) -> Result<(), MirrorError> {
        let frame = self.frame;
        let desyncs = self.desyncs;
        *self = Self::new(self.local.id, snapshot)?;
        self.frame = frame;
        self.desyncs = desyncs;
        Ok(())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Our entity id.
    pub fn id(&self) -> EntityId {
        self.local.id
    }

    /// Locally predicted entity.
    pub fn entity(&self) -> &Entity {
        &self.local
    }

    /// Map mirror.
    pub fn map(&self) -> &Map {
        &self.map
    }

    /// Last authoritative state of an entity.
    pub fn authoritative(&self, id: &EntityId) -> Option<&EntitySnapshot> {
        self.authoritative.get(id)
    }

    /// Every other entity, by id.
    pub fn others(&self) -> impl Iterator<Item = &EntitySnapshot> {
        let own = self.local.id;
        self.authoritative.values().filter(move |s| s.id != own)
    }

    /// Tick of the last applied diff.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Next frame number.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Unacknowledged records, oldest first.
    pub fn pending_move(&self) -> impl Iterator<Item = &InputRecord> {
        self.pending_move.iter()
    }

    /// Number of unacknowledged records.
    pub fn pending_len(&self) -> usize {
        self.pending_move.len()
    }

    /// Checksum mismatches seen so far.
    pub fn desync_count(&self) -> u64 {
        self.desyncs
    }

    // =========================================================================
    // Input
    // =========================================================================

    /// Capture one render frame of input.
    ///
    /// `active` lists the controls held this frame, in priority order. The
    /// first eligible one is recorded: repeatable controls every frame they
    /// are held, `Action`/`Back` only on the frame they are pressed. While
    /// `can_move` is false nothing is recorded or predicted.
    pub fn capture(&mut self, active: &[Control]) -> Option<InputRecord> {
        let frame = self.frame;
        self.frame += 1;

        let previously_held = std::mem::replace(&mut self.held, active.iter().copied().collect());
        if !self.local.can_move {
            return None;
        }

        let control = active
            .iter()
            .copied()
            .find(|c| c.is_repeatable() || !previously_held.contains(c))?;

        let record = InputRecord::new(frame, control);
        self.predict(control);
        self.pending_move.push_back(record);
        Some(record)
    }

    /// Records not sent yet, oldest first.
    ///
    /// They stay pending until acknowledged.
    pub fn flush(&mut self) -> Vec<InputRecord> {
        let unsent: Vec<InputRecord> = self
            .pending_move
            .iter()
            .filter(|r| self.sent_through.map_or(true, |s| r.frame > s))
            .copied()
            .collect();
        if let Some(last) = unsent.last() {
            self.sent_through = Some(last.frame);
        }
        unsent
    }

    /// Drop records at or below the server's watermark.
    pub fn acknowledge(&mut self, frame: u64) {
        self.pending_move.retain(|r| r.frame > frame);
        if self.sent_through.map_or(true, |s| s < frame) {
            self.sent_through = Some(frame);
        }
    }

    fn predict(&mut self, control: Control) {
        if let Some(direction) = control.direction() {
            let world = self.map.world_bounds();
            let obstacles = self.map.registry.obstacles();
            let speed = self.local.speed;
            self.local.apply_motion(direction, speed, world, &obstacles);
        }
    }

    // =========================================================================
    // Reconciliation
    // =========================================================================

    /// Apply a server diff.
    ///
    /// Returns false when the resulting state does not match the server's
    /// checksum; the caller should resync.
    pub fn apply_diff(&mut self, diff: &TickDiff) -> bool {
        if diff.tick <= self.tick {
            debug!(tick = diff.tick, current = self.tick, "stale diff ignored");
            return true;
        }
        self.tick = diff.tick;

        for id in &diff.removed {
            self.authoritative.remove(id);
        }
        for snapshot in &diff.joined {
            self.authoritative.insert(snapshot.id, snapshot.clone());
        }
        let own = self.local.id;
        for entry in &diff.entities {
            if let Some(snapshot) = self.authoritative.get_mut(&entry.id) {
                entry.apply_to(&mut snapshot.kinetic);
            }
            if entry.id == own {
                if let Some(frame) = entry.ack {
                    self.acknowledge(frame);
                }
            }
        }
        self.map.registry.apply_changes(&diff.shapes);

        self.reconcile();

        let expected = checksum(
            diff.tick,
            self.authoritative.iter().map(|(id, s)| (id, &s.kinetic)),
            &self.map.registry,
        );
        if hex::encode(expected) != diff.checksum {
            self.desyncs += 1;
            warn!(tick = diff.tick, entity = %own.short(), "mirror checksum mismatch");
            return false;
        }
        true
    }

    /// Snap to the authoritative state, then re-apply pending records.
    fn reconcile(&mut self) {
        let Some(server) = self.authoritative.get(&self.local.id).map(|s| s.kinetic) else {
            return;
        };
        if let Err(e) = snap(&mut self.local, &server) {
            warn!(error = %e, "authoritative hitbox rejected");
        }

        let pending: Vec<Control> = self.pending_move.iter().map(|r| r.input).collect();
        if !self.local.can_move {
            return;
        }
        for control in pending {
            self.predict(control);
        }
    }
}

/// Overwrite an entity's kinetic fields.
fn snap(entity: &mut Entity, kinetic: &KineticState) -> Result<(), GeometryError> {
    entity.position = kinetic.position;
    entity.direction = kinetic.direction;
    entity.speed = kinetic.speed;
    entity.can_move = kinetic.can_move;
    if entity.hitbox() != kinetic.hitbox {
        entity.set_hitbox(kinetic.hitbox.width, kinetic.hitbox.height)?;
    }
    Ok(())
}

fn entity_from_snapshot(snapshot: &EntitySnapshot) -> Result<Entity, GeometryError> {
    let mut entity = Entity::new(snapshot.id, snapshot.kind, snapshot.kinetic.position);
    snap(&mut entity, &snapshot.kinetic)?;
    for shape in &snapshot.shapes {
        entity.attach_shape(shape.clone())?;
    }
    Ok(entity)
}
