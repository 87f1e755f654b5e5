//! Entity Kinetic State
//!
//! Position, facing, speed and collision geometry of a single entity, and
//! the two motion primitives everything else is built on:
//! [`Entity::apply_motion`] (one direction, one distance) and
//! [`Entity::apply_delta`] (x then y).
//!
//! Players and scripted events share this type. The [`EntityKind`] tag only
//! tells the network layer who is allowed to feed inputs.

use std::collections::VecDeque;
use serde::{Serialize, Deserialize};

use crate::core::direction::Direction;
use crate::core::geometry::{
    BoundingBox, GeometryError, Position, Shape, Size, WorldBounds,
    compose_bounding_box, sweep_axis,
};
use crate::game::input::InputRecord;
use crate::game::interpreter::{RouteHandle, RouteRunner};
use crate::game::route::MoveRoute;

/// Default world units per step.
pub const DEFAULT_SPEED: u32 = 3;

/// Default hitbox edge length.
pub const DEFAULT_HITBOX: i32 = 32;

// =============================================================================
// ENTITY ID
// =============================================================================

/// Unique entity identifier (UUID as bytes).
///
/// Implements Ord for deterministic BTreeMap ordering.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(pub [u8; 16]);

impl EntityId {
    /// Create from raw bytes.
    pub const fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Fresh random (v4) id.
    pub fn random() -> Self {
        Self(*uuid::Uuid::new_v4().as_bytes())
    }

    /// Parse from a UUID string.
    pub fn from_uuid_str(s: &str) -> Option<Self> {
        uuid::Uuid::parse_str(s).ok().map(|u| Self(*u.as_bytes()))
    }

    /// Convert to UUID string.
    pub fn to_uuid_string(&self) -> String {
        uuid::Uuid::from_bytes(self.0).to_string()
    }

    /// Short hex prefix for logs.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_uuid_string())
    }
}

/// Who drives an entity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Fed by a connected client's inputs
    PlayerControlled,
    /// Driven only by move routes and commands
    #[default]
    ScriptControlled,
}

// =============================================================================
// ATTACHED SHAPES
// =============================================================================

/// Handle returned by [`Entity::attach_shape`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ShapeHandle(pub u32);

/// Shape carried by an entity, positioned relative to it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AttachedShape {
    /// Detach handle
    pub handle: ShapeHandle,
    /// Shape geometry (offset from the entity)
    pub shape: Shape,
}

// =============================================================================
// ENTITY
// =============================================================================

/// Kinetic and collision state of one entity.
#[derive(Debug, Serialize, Deserialize)]
pub struct Entity {
    /// Unique id
    pub id: EntityId,

    /// Capability tag
    pub kind: EntityKind,

    /// Top-left of the hitbox
    pub position: Position,

    /// Current facing
    pub direction: Direction,

    /// World units per step
    pub speed: u32,

    /// Collision rectangle anchored at `position`
    hitbox: Size,

    /// Extra shapes for the render bounding box
    attached_shapes: Vec<AttachedShape>,

    /// Next handle to hand out
    next_handle: u32,

    /// Whether displacement is allowed
    pub can_move: bool,

    /// Idle ticks between two route steps
    pub frequency: u32,

    /// Highest input frame processed by the server
    pub last_processed_frame: Option<u64>,

    /// Active move route
    #[serde(skip)]
    pub(crate) route: Option<RouteRunner>,

    /// Received, unprocessed inputs (server side)
    #[serde(skip)]
    pub(crate) inputs: VecDeque<InputRecord>,

    /// Displaced during the current tick
    #[serde(skip)]
    moved: bool,

    /// Hitbox or shapes changed since last taken
    #[serde(skip)]
    bounds_changed: bool,
}

impl Entity {
    /// Create an entity with default kinetics (speed 3, 32x32 hitbox, facing down).
    pub fn new(id: EntityId, kind: EntityKind, position: Position) -> Self {
        Self {
            id,
            kind,
            position,
            direction: Direction::default(),
            speed: DEFAULT_SPEED,
            hitbox: Size { width: DEFAULT_HITBOX, height: DEFAULT_HITBOX },
            attached_shapes: Vec::new(),
            next_handle: 0,
            can_move: true,
            frequency: 0,
            last_processed_frame: None,
            route: None,
            inputs: VecDeque::new(),
            moved: false,
            bounds_changed: false,
        }
    }

    /// Player-controlled entity.
    pub fn player(id: EntityId, position: Position) -> Self {
        Self::new(id, EntityKind::PlayerControlled, position)
    }

    /// Script-controlled entity.
    pub fn scripted(id: EntityId, position: Position) -> Self {
        Self::new(id, EntityKind::ScriptControlled, position)
    }

    // =========================================================================
    // Geometry
    // =========================================================================

    /// Hitbox size.
    #[inline]
    pub fn hitbox(&self) -> Size {
        self.hitbox
    }

    /// Replace the hitbox.
    pub fn set_hitbox(&mut self, width: i32, height: i32) -> Result<(), GeometryError> {
        self.hitbox = Size::new(width, height)?;
        self.bounds_changed = true;
        Ok(())
    }

    /// Hitbox in world coordinates.
    #[inline]
    pub fn hitbox_bounds(&self) -> BoundingBox {
        self.hitbox.at(self.position)
    }

    /// Hitbox center.
    #[inline]
    pub fn center(&self) -> (i32, i32) {
        self.hitbox_bounds().center()
    }

    /// Attach a shape; the returned handle detaches it again.
    pub fn attach_shape(&mut self, shape: Shape) -> Result<ShapeHandle, GeometryError> {
        shape.validate()?;
        let handle = ShapeHandle(self.next_handle);
        self.next_handle = self.next_handle.wrapping_add(1);
        self.attached_shapes.push(AttachedShape { handle, shape });
        self.bounds_changed = true;
        Ok(handle)
    }

    /// Detach a shape. Returns it if the handle was known.
    pub fn detach_shape(&mut self, handle: ShapeHandle) -> Option<Shape> {
        let index = self.attached_shapes.iter().position(|a| a.handle == handle)?;
        self.bounds_changed = true;
        Some(self.attached_shapes.remove(index).shape)
    }

    /// Attached shapes in attach order.
    pub fn attached_shapes(&self) -> impl Iterator<Item = &Shape> {
        self.attached_shapes.iter().map(|a| &a.shape)
    }

    /// Union of the hitbox and every attached shape.
    pub fn compute_max_shape(&self) -> BoundingBox {
        compose_bounding_box(self.position, self.hitbox, self.attached_shapes())
    }

    /// Whether the hitbox or shapes changed since the last call.
    pub fn take_bounds_changed(&mut self) -> bool {
        std::mem::take(&mut self.bounds_changed)
    }

    // =========================================================================
    // Motion
    // =========================================================================

    /// Turn toward `direction` and walk up to `distance` units.
    ///
    /// Displacement is clamped to the world and stops at the first collision
    /// obstacle. Returns the distance actually covered. Nothing moves while
    /// `can_move` is false, but the entity still turns.
    pub fn apply_motion(
        &mut self,
        direction: Direction,
        distance: u32,
        world: WorldBounds,
        obstacles: &[BoundingBox],
    ) -> u32 {
        self.direction = direction;
        if !self.can_move || distance == 0 {
            return 0;
        }

        let distance = distance.min(i32::MAX as u32) as i32;
        let (ux, uy) = direction.unit();
        let (dx, dy) = self.apply_delta(
            ux.saturating_mul(distance),
            uy.saturating_mul(distance),
            world,
            obstacles,
        );
        (dx.unsigned_abs()).max(dy.unsigned_abs())
    }

    /// Displace by `(dx, dy)`: x first, then y, each axis clamped on its own.
    ///
    /// Returns the displacement actually applied. Facing is unchanged.
    pub fn apply_delta(
        &mut self,
        dx: i32,
        dy: i32,
        world: WorldBounds,
        obstacles: &[BoundingBox],
    ) -> (i32, i32) {
        if !self.can_move {
            return (0, 0);
        }

        let allowed_x = sweep_axis(self.hitbox_bounds(), dx, true, world, obstacles);
        self.position.x = self.position.x.saturating_add(allowed_x);

        let allowed_y = sweep_axis(self.hitbox_bounds(), dy, false, world, obstacles);
        self.position.y = self.position.y.saturating_add(allowed_y);

        if allowed_x != 0 || allowed_y != 0 {
            self.moved = true;
        }
        (allowed_x, allowed_y)
    }

    /// Teleport, keeping the hitbox inside the world.
    pub fn set_position(&mut self, position: Position, world: WorldBounds) {
        let max_x = (world.width - self.hitbox.width).max(0);
        let max_y = (world.height - self.hitbox.height).max(0);
        let clamped = Position {
            x: position.x.min(max_x).max(0),
            y: position.y.min(max_y).max(0),
            z: position.z,
        };
        if clamped != self.position {
            self.moved = true;
        }
        self.position = clamped;
    }

    /// Whether the entity was displaced during the current tick.
    #[inline]
    pub fn is_moving(&self) -> bool {
        self.moved
    }

    /// Clear per-tick flags. Called by the tick engine before stepping.
    pub(crate) fn begin_tick(&mut self) {
        self.moved = false;
    }

    // =========================================================================
    // Routes & inputs
    // =========================================================================

    /// Start a move route, replacing (and cancelling) any active one.
    pub fn start_route(&mut self, route: MoveRoute) -> RouteHandle {
        let (runner, handle) = RouteRunner::new(route);
        self.install_route(runner);
        handle
    }

    /// Install an already-built runner, cancelling any active one.
    pub(crate) fn install_route(&mut self, runner: RouteRunner) {
        if self.route.replace(runner).is_some() {
            tracing::debug!(entity = %self.id.short(), "route replaced");
        }
    }

    /// Cancel the active route. Waiters observe cancellation.
    pub fn stop_route(&mut self) -> bool {
        self.route.take().is_some()
    }

    /// Whether a route is running.
    pub fn has_route(&self) -> bool {
        self.route.is_some()
    }

    /// Active route runner, if any.
    pub fn route(&self) -> Option<&RouteRunner> {
        self.route.as_ref()
    }

    /// Queue a received input record.
    ///
    /// Records at or below the processed watermark are resends and dropped.
    pub fn queue_input(&mut self, record: InputRecord) -> bool {
        if self.last_processed_frame.is_some_and(|w| record.frame <= w) {
            return false;
        }
        self.inputs.push_back(record);
        true
    }

    /// Number of queued, unprocessed inputs.
    pub fn pending_inputs(&self) -> usize {
        self.inputs.len()
    }
}
