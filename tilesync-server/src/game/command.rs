//! Deferred Entity Commands
//!
//! Scripts and other collaborators never touch a map's state directly while
//! a tick runs. They send [`EntityCommand`]s through a [`CommandSender`];
//! the map session drains the channel between ticks and the tick engine
//! applies the commands at the start of the next tick.

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::core::geometry::{Position, Shape};
use crate::game::entity::{Entity, EntityId, ShapeHandle};
use crate::game::interpreter::{RouteHandle, RouteRunner};
use crate::game::map::ShapeUpdate;
use crate::game::route::{MoveDirective, MoveRoute};

/// The map session behind a [`CommandSender`] is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("map session closed")]
pub struct SessionClosed;

/// A mutation applied at the next tick boundary.
#[derive(Debug)]
pub enum EntityCommand {
    /// Add an entity
    Spawn(Box<Entity>),
    /// Remove an entity (cancels its route, drops its inputs)
    Remove {
        /// Entity to remove
        entity: EntityId,
    },
    /// Attach a shape; the handle is sent back on `reply`
    AttachShape {
        /// Entity receiving the shape
        entity: EntityId,
        /// Shape to attach
        shape: Shape,
        /// Where to send the new handle
        reply: Option<oneshot::Sender<ShapeHandle>>,
    },
    /// Detach a shape
    DetachShape {
        /// Entity carrying the shape
        entity: EntityId,
        /// Handle returned by the attach
        handle: ShapeHandle,
    },
    /// Replace the hitbox
    SetHitbox {
        /// Target entity
        entity: EntityId,
        /// New width (rejected when negative)
        width: i32,
        /// New height (rejected when negative)
        height: i32,
    },
    /// Install a route runner (replacing any active route)
    StartRoute {
        /// Target entity
        entity: EntityId,
        /// Runner whose handle the caller already holds
        runner: RouteRunner,
    },
    /// Cancel the active route
    StopRoute {
        /// Target entity
        entity: EntityId,
    },
    /// Allow or block displacement
    SetCanMove {
        /// Target entity
        entity: EntityId,
        /// False freezes the entity in place
        can_move: bool,
    },
    /// Change speed
    SetSpeed {
        /// Target entity
        entity: EntityId,
        /// Units per tick
        speed: u32,
    },
    /// Change route pacing
    SetFrequency {
        /// Target entity
        entity: EntityId,
        /// Idle ticks after each route step that moved
        frequency: u32,
    },
    /// Teleport
    SetPosition {
        /// Target entity
        entity: EntityId,
        /// Destination, clamped into the world
        position: Position,
    },
    /// Create or replace a registry shape
    CreateShape(Shape),
    /// Partially update a registry shape
    UpdateShape {
        /// Registry name
        name: String,
        /// Fields to change
        update: ShapeUpdate,
    },
    /// Remove a registry shape
    RemoveShape {
        /// Registry name
        name: String,
    },
}

impl EntityCommand {
    /// Entity the command targets, if any.
    pub fn target(&self) -> Option<EntityId> {
        match self {
            EntityCommand::Spawn(entity) => Some(entity.id),
            EntityCommand::Remove { entity }
            | EntityCommand::AttachShape { entity, .. }
            | EntityCommand::DetachShape { entity, .. }
            | EntityCommand::SetHitbox { entity, .. }
            | EntityCommand::StartRoute { entity, .. }
            | EntityCommand::StopRoute { entity }
            | EntityCommand::SetCanMove { entity, .. }
            | EntityCommand::SetSpeed { entity, .. }
            | EntityCommand::SetFrequency { entity, .. }
            | EntityCommand::SetPosition { entity, .. } => Some(*entity),
            EntityCommand::CreateShape(_)
            | EntityCommand::UpdateShape { .. }
            | EntityCommand::RemoveShape { .. } => None,
        }
    }
}

/// Receiving half, owned by the map session.
pub type CommandReceiver = mpsc::UnboundedReceiver<EntityCommand>;

/// Cloneable sending half handed to collaborators.
#[derive(Clone, Debug)]
pub struct CommandSender {
    tx: mpsc::UnboundedSender<EntityCommand>,
}

impl CommandSender {
    /// Create a linked sender/receiver pair.
    pub fn channel() -> (Self, CommandReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue a raw command.
    pub fn send(&self, command: EntityCommand) -> Result<(), SessionClosed> {
        self.tx.send(command).map_err(|_| SessionClosed)
    }

    /// Start a route on the next tick.
    ///
    /// If the session is gone or the entity does not exist when the command
    /// is applied, the handle resolves to `RouteCancelled`.
    pub fn start_route(&self, entity: EntityId, route: MoveRoute) -> RouteHandle {
        let (runner, handle) = RouteRunner::new(route);
        // On failure the runner is dropped with the command, which cancels the handle.
        let _ = self.send(EntityCommand::StartRoute { entity, runner });
        handle
    }

    /// Walk to a point, as a single-directive route.
    pub fn move_to(&self, entity: EntityId, point: Position) -> RouteHandle {
        self.start_route(entity, MoveRoute::once(vec![MoveDirective::MoveTo(point)]))
    }

    /// Cancel the active route.
    pub fn stop_route(&self, entity: EntityId) -> Result<(), SessionClosed> {
        self.send(EntityCommand::StopRoute { entity })
    }

    /// Attach a shape. The receiver yields the handle once applied.
    pub fn attach_shape(
        &self,
        entity: EntityId,
        shape: Shape,
    ) -> Result<oneshot::Receiver<ShapeHandle>, SessionClosed> {
        let (reply, rx) = oneshot::channel();
        self.send(EntityCommand::AttachShape { entity, shape, reply: Some(reply) })?;
        Ok(rx)
    }

    /// Detach a shape.
    pub fn detach_shape(&self, entity: EntityId, handle: ShapeHandle) -> Result<(), SessionClosed> {
        self.send(EntityCommand::DetachShape { entity, handle })
    }

    /// Replace the hitbox.
    pub fn set_hitbox(&self, entity: EntityId, width: i32, height: i32) -> Result<(), SessionClosed> {
        self.send(EntityCommand::SetHitbox { entity, width, height })
    }

    /// Allow or block displacement.
    pub fn set_can_move(&self, entity: EntityId, can_move: bool) -> Result<(), SessionClosed> {
        self.send(EntityCommand::SetCanMove { entity, can_move })
    }

    /// Change speed.
    pub fn set_speed(&self, entity: EntityId, speed: u32) -> Result<(), SessionClosed> {
        self.send(EntityCommand::SetSpeed { entity, speed })
    }

    /// Change route pacing.
    pub fn set_frequency(&self, entity: EntityId, frequency: u32) -> Result<(), SessionClosed> {
        self.send(EntityCommand::SetFrequency { entity, frequency })
    }

    /// Teleport.
    pub fn set_position(&self, entity: EntityId, position: Position) -> Result<(), SessionClosed> {
        self.send(EntityCommand::SetPosition { entity, position })
    }

    /// Remove an entity.
    pub fn remove(&self, entity: EntityId) -> Result<(), SessionClosed> {
        self.send(EntityCommand::Remove { entity })
    }

    /// Create or replace a registry shape.
    pub fn create_shape(&self, shape: Shape) -> Result<(), SessionClosed> {
        self.send(EntityCommand::CreateShape(shape))
    }

    /// Partially update a registry shape.
    pub fn update_shape(&self, name: impl Into<String>, update: ShapeUpdate) -> Result<(), SessionClosed> {
        self.send(EntityCommand::UpdateShape { name: name.into(), update })
    }

    /// Remove a registry shape.
    pub fn remove_shape(&self, name: impl Into<String>) -> Result<(), SessionClosed> {
        self.send(EntityCommand::RemoveShape { name: name.into() })
    }
}
