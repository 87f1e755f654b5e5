//! World State
//!
//! Everything the tick engine owns for one map: entities, the map and its
//! registry, the map RNG, deferred commands and per-tick bookkeeping.
//! Uses BTreeMap for deterministic iteration order.

use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, warn};

use crate::core::geometry::{GeometryError, Position, WorldBounds};
use crate::core::hash::StateHash;
use crate::core::rng::DeterministicRng;
use crate::game::collision::TriggerTracker;
use crate::game::command::EntityCommand;
use crate::game::diff::{DiffTracker, EntitySnapshot, KineticState, WorldSnapshot, checksum};
use crate::game::entity::{Entity, EntityId, EntityKind};
use crate::game::events::GameEvent;
use crate::game::input::InputRecord;
use crate::game::interpreter::RouteHandle;
use crate::game::map::{ConfigError, Map, MapConfig};
use crate::game::route::MoveRoute;

/// Errors from direct world calls.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorldError {
    /// No entity with this id on the map
    #[error("unknown entity {0}")]
    UnknownEntity(EntityId),

    /// An entity with this id already exists
    #[error("entity {0} already exists")]
    DuplicateEntity(EntityId),

    /// Geometry rejected
    #[error(transparent)]
    Geometry(#[from] GeometryError),
}

/// Complete state of one map.
#[derive(Debug)]
pub struct WorldState {
    /// Ticks run so far
    pub tick: u64,

    /// Map dimensions and shape registry
    pub map: Map,

    /// RNG seed (for replays)
    pub rng_seed: u64,

    /// Deterministic RNG for random directives
    pub rng: DeterministicRng,

    /// All entities (BTreeMap for deterministic iteration)
    pub entities: BTreeMap<EntityId, Entity>,

    /// Trigger overlap state
    pub(crate) triggers: TriggerTracker,

    /// Last values sent to clients
    pub(crate) diff: DiffTracker,

    /// Commands waiting for the next tick
    deferred: Vec<EntityCommand>,

    /// Events generated since last taken
    pub(crate) pending_events: Vec<GameEvent>,
}

impl WorldState {
    /// Create state for a map.
    pub fn new(map: Map) -> Self {
        let rng_seed = map.seed;
        Self {
            tick: 0,
            map,
            rng_seed,
            rng: DeterministicRng::new(rng_seed),
            entities: BTreeMap::new(),
            triggers: TriggerTracker::new(),
            diff: DiffTracker::new(),
            deferred: Vec::new(),
            pending_events: Vec::new(),
        }
    }

    /// Create state from map content.
    pub fn from_config(config: &MapConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(Map::from_config(config)?))
    }

    /// World rectangle.
    #[inline]
    pub fn world_bounds(&self) -> WorldBounds {
        self.map.world_bounds()
    }

    // =========================================================================
    // Entities
    // =========================================================================

    /// Add an entity. Its position is clamped into the world.
    pub fn add_entity(&mut self, mut entity: Entity) -> Result<EntityId, WorldError> {
        let id = entity.id;
        if self.entities.contains_key(&id) {
            return Err(WorldError::DuplicateEntity(id));
        }
        entity.set_position(entity.position, self.world_bounds());
        self.entities.insert(id, entity);
        debug!(entity = %id.short(), "entity added");
        Ok(id)
    }

    /// Spawn a fresh entity at `position`.
    pub fn spawn(&mut self, kind: EntityKind, position: Position) -> EntityId {
        let mut id = EntityId::random();
        while self.entities.contains_key(&id) {
            id = EntityId::random();
        }
        let mut entity = Entity::new(id, kind, position);
        entity.set_position(position, self.world_bounds());
        self.entities.insert(id, entity);
        id
    }

    /// Remove an entity. Its route is cancelled and its inputs discarded.
    pub fn remove_entity(&mut self, id: &EntityId) -> Result<Entity, WorldError> {
        let entity = self.entities.remove(id).ok_or(WorldError::UnknownEntity(*id))?;
        if entity.has_route() {
            debug!(entity = %id.short(), "route cancelled by removal");
        }
        self.push_event(GameEvent::entity_removed(self.tick, *id));
        Ok(entity)
    }

    /// Get an entity.
    pub fn entity(&self, id: &EntityId) -> Result<&Entity, WorldError> {
        self.entities.get(id).ok_or(WorldError::UnknownEntity(*id))
    }

    /// Get an entity mutably.
    pub fn entity_mut(&mut self, id: &EntityId) -> Result<&mut Entity, WorldError> {
        self.entities.get_mut(id).ok_or(WorldError::UnknownEntity(*id))
    }

    /// Queue an input record for the next tick.
    ///
    /// Returns `Ok(false)` when the record was a resend.
    pub fn queue_input(&mut self, id: &EntityId, record: InputRecord) -> Result<bool, WorldError> {
        Ok(self.entity_mut(id)?.queue_input(record))
    }

    /// Start a route right away (outside the command channel).
    pub fn start_route(&mut self, id: &EntityId, route: MoveRoute) -> Result<RouteHandle, WorldError> {
        Ok(self.entity_mut(id)?.start_route(route))
    }

    // =========================================================================
    // Deferred commands
    // =========================================================================

    /// Queue a command for the next tick boundary.
    pub fn defer(&mut self, command: EntityCommand) {
        self.deferred.push(command);
    }

    /// Number of commands waiting.
    pub fn deferred_len(&self) -> usize {
        self.deferred.len()
    }

    /// Apply every deferred command in arrival order.
    pub(crate) fn apply_deferred(&mut self) {
        for command in std::mem::take(&mut self.deferred) {
            if let Err(e) = self.apply_command(command) {
                warn!(tick = self.tick, error = %e, "deferred command rejected");
            }
        }
    }

    /// Apply one command now.
    pub fn apply_command(&mut self, command: EntityCommand) -> Result<(), WorldError> {
        let world = self.world_bounds();
        match command {
            EntityCommand::Spawn(entity) => {
                self.add_entity(*entity)?;
            }
            EntityCommand::Remove { entity } => {
                self.remove_entity(&entity)?;
            }
            EntityCommand::AttachShape { entity, shape, reply } => {
                let handle = self.entity_mut(&entity)?.attach_shape(shape)?;
                if let Some(reply) = reply {
                    let _ = reply.send(handle);
                }
            }
            EntityCommand::DetachShape { entity, handle } => {
                self.entity_mut(&entity)?.detach_shape(handle);
            }
            EntityCommand::SetHitbox { entity, width, height } => {
                self.entity_mut(&entity)?.set_hitbox(width, height)?;
            }
            EntityCommand::StartRoute { entity, runner } => {
                // Unknown entity: the runner drops here and its waiter sees cancellation.
                self.entity_mut(&entity)?.install_route(runner);
            }
            EntityCommand::StopRoute { entity } => {
                self.entity_mut(&entity)?.stop_route();
            }
            EntityCommand::SetCanMove { entity, can_move } => {
                self.entity_mut(&entity)?.can_move = can_move;
            }
            EntityCommand::SetSpeed { entity, speed } => {
                self.entity_mut(&entity)?.speed = speed;
            }
            EntityCommand::SetFrequency { entity, frequency } => {
                self.entity_mut(&entity)?.frequency = frequency;
            }
            EntityCommand::SetPosition { entity, position } => {
                self.entity_mut(&entity)?.set_position(position, world);
            }
            EntityCommand::CreateShape(shape) => {
                if let Err(e) = self.map.registry.create(shape) {
                    warn!(error = %e, "shape not created");
                }
            }
            EntityCommand::UpdateShape { name, update } => {
                if !self.map.registry.update(&name, &update)? {
                    debug!(shape = %name, "update for unknown shape ignored");
                }
            }
            EntityCommand::RemoveShape { name } => {
                self.map.registry.remove(&name);
            }
        }
        Ok(())
    }

    // =========================================================================
    // Snapshots & events
    // =========================================================================

    /// Checksum of the synchronized state.
    pub fn compute_hash(&self) -> StateHash {
        let kinetics: Vec<(EntityId, KineticState)> = self
            .entities
            .iter()
            .map(|(id, e)| (*id, KineticState::of(e)))
            .collect();
        checksum(self.tick, kinetics.iter().map(|(id, k)| (id, k)), &self.map.registry)
    }

    /// Full snapshot for a joining client.
    pub fn snapshot(&self) -> WorldSnapshot {
        WorldSnapshot {
            tick: self.tick,
            map: self.map.snapshot(),
            entities: self.entities.values().map(EntitySnapshot::of).collect(),
        }
    }

    /// Take pending events (consumes them).
    pub fn take_events(&mut self) -> Vec<GameEvent> {
        std::mem::take(&mut self.pending_events)
    }

    /// Push an event.
    pub fn push_event(&mut self, event: GameEvent) {
        self.pending_events.push(event);
    }
}

// =============================================================================
// TESTS
// =============================================================================
