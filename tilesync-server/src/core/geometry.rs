//! Geometry Engine
//!
//! Axis-aligned rectangles in integer world units (pixels).
//! Everything here is pure and order-independent: composing the same set of
//! rectangles in any order yields the same bounding box.
//!
//! ```text
//!   (min_x, min_y) ┌──────────────┐
//!                  │   hitbox     │   +x →
//!                  │      ┌───────┼──┐
//!                  └──────┼───────┘  │ attached shape
//!                         └──────────┘ (max_x, max_y)
//!                  +y ↓
//! ```

use std::collections::BTreeMap;
use serde::{Serialize, Deserialize};
use thiserror::Error;

/// Geometry construction errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GeometryError {
    /// Width or height below zero.
    #[error("invalid geometry: {width}x{height} has a negative dimension")]
    InvalidGeometry {
        /// Requested width
        width: i32,
        /// Requested height
        height: i32,
    },
}

// =============================================================================
// POSITION & SIZE
// =============================================================================

/// World position. `z` is the layer and takes no part in collision math.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    /// Horizontal coordinate
    pub x: i32,
    /// Vertical coordinate (grows downward)
    pub y: i32,
    /// Layer / elevation
    pub z: i32,
}

impl Position {
    /// Create a position on layer 0.
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y, z: 0 }
    }

    /// Offset by `(dx, dy)`, keeping the layer.
    #[inline]
    pub fn offset(self, dx: i32, dy: i32) -> Self {
        Self {
            x: self.x.saturating_add(dx),
            y: self.y.saturating_add(dy),
            z: self.z,
        }
    }
}

/// Non-negative rectangle dimensions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size {
    /// Width in world units
    pub width: i32,
    /// Height in world units
    pub height: i32,
}

impl Size {
    /// Validate and create a size.
    pub fn new(width: i32, height: i32) -> Result<Self, GeometryError> {
        if width < 0 || height < 0 {
            return Err(GeometryError::InvalidGeometry { width, height });
        }
        Ok(Self { width, height })
    }

    /// Rectangle of this size with its top-left corner at `position`.
    #[inline]
    pub fn at(self, position: Position) -> BoundingBox {
        BoundingBox {
            min_x: position.x,
            min_y: position.y,
            max_x: position.x.saturating_add(self.width),
            max_y: position.y.saturating_add(self.height),
        }
    }
}

// =============================================================================
// BOUNDING BOX
// =============================================================================

/// Axis-aligned box, `min` inclusive corner to `max` corner.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Left edge
    pub min_x: i32,
    /// Top edge
    pub min_y: i32,
    /// Right edge
    pub max_x: i32,
    /// Bottom edge
    pub max_y: i32,
}

impl BoundingBox {
    /// Create from corners.
    pub const fn new(min_x: i32, min_y: i32, max_x: i32, max_y: i32) -> Self {
        Self { min_x, min_y, max_x, max_y }
    }

    /// Box width.
    #[inline]
    pub fn width(&self) -> i32 {
        self.max_x.saturating_sub(self.min_x)
    }

    /// Box height.
    #[inline]
    pub fn height(&self) -> i32 {
        self.max_y.saturating_sub(self.min_y)
    }

    /// Center point (floored).
    #[inline]
    pub fn center(&self) -> (i32, i32) {
        (
            self.min_x.saturating_add(self.width() / 2),
            self.min_y.saturating_add(self.height() / 2),
        )
    }

    /// Smallest box covering both.
    #[inline]
    pub fn union(&self, other: &Self) -> Self {
        Self {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
        }
    }

    /// Translate by `(dx, dy)`, saturating at the `i32` range.
    #[inline]
    pub fn translate(&self, dx: i32, dy: i32) -> Self {
        Self {
            min_x: self.min_x.saturating_add(dx),
            min_y: self.min_y.saturating_add(dy),
            max_x: self.max_x.saturating_add(dx),
            max_y: self.max_y.saturating_add(dy),
        }
    }

    /// AABB overlap test. Touching edges (zero-area contact) do not count.
    #[inline]
    pub fn intersects(&self, other: &Self) -> bool {
        self.min_x < other.max_x
            && other.min_x < self.max_x
            && self.min_y < other.max_y
            && other.min_y < self.max_y
    }

    /// Twice the center along one axis, exact for odd extents.
    #[inline]
    fn doubled_center(&self, horizontal: bool) -> i64 {
        if horizontal {
            i64::from(self.min_x) + i64::from(self.max_x)
        } else {
            i64::from(self.min_y) + i64::from(self.max_y)
        }
    }

    /// Strict overlap of the y ranges only.
    #[inline]
    fn overlaps_y(&self, other: &Self) -> bool {
        self.min_y < other.max_y && other.min_y < self.max_y
    }

    /// Strict overlap of the x ranges only.
    #[inline]
    fn overlaps_x(&self, other: &Self) -> bool {
        self.min_x < other.max_x && other.min_x < self.max_x
    }
}

/// World rectangle `[0, width] x [0, height]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldBounds {
    /// World width in units
    pub width: i32,
    /// World height in units
    pub height: i32,
}

impl WorldBounds {
    /// Effectively unbounded world, for maps without a size.
    pub const UNBOUNDED: Self = Self { width: i32::MAX / 2, height: i32::MAX / 2 };

    /// Create world bounds.
    pub const fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }
}

/// Truncate a box to stay within the world rectangle.
///
/// A box entirely outside collapses onto the nearest world edge.
pub fn clamp_to_world(bbox: BoundingBox, world: WorldBounds) -> BoundingBox {
    BoundingBox {
        min_x: bbox.min_x.clamp(0, world.width),
        min_y: bbox.min_y.clamp(0, world.height),
        max_x: bbox.max_x.clamp(0, world.width),
        max_y: bbox.max_y.clamp(0, world.height),
    }
}

// =============================================================================
// SHAPES
// =============================================================================

/// How a shape's `x, y` relate to its anchor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShapePositioning {
    /// `x, y` is the top-left corner (offset from the entity position when attached).
    #[default]
    TopLeft,
    /// `x, y` is the center (offset from the hitbox center when attached).
    Center,
}

/// A named or anonymous axis-aligned rectangle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Shape {
    /// Identity inside a map registry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Horizontal anchor coordinate
    pub x: i32,
    /// Vertical anchor coordinate
    pub y: i32,
    /// Width (never negative)
    pub width: i32,
    /// Height (never negative)
    pub height: i32,
    /// Anchor interpretation
    #[serde(default)]
    pub positioning: ShapePositioning,
    /// Obstructs motion when true; trigger region when false
    #[serde(default = "default_collision")]
    pub collision: bool,
    /// Opaque user data
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, serde_json::Value>,
}

fn default_collision() -> bool {
    true
}

impl Shape {
    /// Create an anonymous top-left shape.
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Result<Self, GeometryError> {
        Size::new(width, height)?;
        Ok(Self {
            name: None,
            x,
            y,
            width,
            height,
            positioning: ShapePositioning::TopLeft,
            collision: true,
            properties: BTreeMap::new(),
        })
    }

    /// Create a shape centered on its anchor.
    pub fn centered(x: i32, y: i32, width: i32, height: i32) -> Result<Self, GeometryError> {
        Ok(Self::new(x, y, width, height)?.with_positioning(ShapePositioning::Center))
    }

    /// Set the registry name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set positioning.
    pub fn with_positioning(mut self, positioning: ShapePositioning) -> Self {
        self.positioning = positioning;
        self
    }

    /// Turn this shape into a trigger region (no obstruction).
    pub fn as_trigger(mut self) -> Self {
        self.collision = false;
        self
    }

    /// Attach an opaque property.
    pub fn with_property(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    /// Check the size invariant (for shapes built by deserialization).
    pub fn validate(&self) -> Result<(), GeometryError> {
        Size::new(self.width, self.height).map(|_| ())
    }

    /// Dimensions.
    #[inline]
    pub fn size(&self) -> Size {
        Size { width: self.width, height: self.height }
    }

    /// Box in world coordinates for a free-standing (registry) shape.
    pub fn bounds(&self) -> BoundingBox {
        match self.positioning {
            ShapePositioning::TopLeft => self.size().at(Position::new(self.x, self.y)),
            ShapePositioning::Center => centered_box(self.x, self.y, self.size()),
        }
    }

    /// Box in world coordinates when attached to an entity.
    pub fn attached_bounds(&self, position: Position, hitbox: Size) -> BoundingBox {
        match self.positioning {
            ShapePositioning::TopLeft => {
                self.size().at(position.offset(self.x, self.y))
            }
            ShapePositioning::Center => {
                let (cx, cy) = hitbox.at(position).center();
                centered_box(cx.saturating_add(self.x), cy.saturating_add(self.y), self.size())
            }
        }
    }
}

fn centered_box(cx: i32, cy: i32, size: Size) -> BoundingBox {
    let min_x = cx.saturating_sub(size.width / 2);
    let min_y = cy.saturating_sub(size.height / 2);
    size.at(Position::new(min_x, min_y))
}

/// Union of the hitbox at `position` and every attached shape.
pub fn compose_bounding_box<'a>(
    position: Position,
    hitbox: Size,
    shapes: impl IntoIterator<Item = &'a Shape>,
) -> BoundingBox {
    shapes
        .into_iter()
        .map(|shape| shape.attached_bounds(position, hitbox))
        .fold(hitbox.at(position), |acc, b| acc.union(&b))
}

// =============================================================================
// AXIS SWEEP
// =============================================================================

/// Largest displacement along one axis, up to `delta`, that keeps `moving`
/// inside the world and out of every obstacle.
///
/// An obstacle the mover already overlaps only permits motion away from its
/// center on this axis; anything else is blocked outright.
///
/// Returns the signed displacement actually allowed.
pub fn sweep_axis(
    moving: BoundingBox,
    delta: i32,
    horizontal: bool,
    world: WorldBounds,
    obstacles: &[BoundingBox],
) -> i32 {
    if delta == 0 {
        return 0;
    }

    let target = if horizontal {
        moving.translate(delta, 0)
    } else {
        moving.translate(0, delta)
    };
    let clipped = clamp_to_world(target, world);

    let mut allowed = match (horizontal, delta > 0) {
        (true, true) => clipped.max_x.saturating_sub(moving.max_x).clamp(0, delta),
        (true, false) => clipped.min_x.saturating_sub(moving.min_x).clamp(delta, 0),
        (false, true) => clipped.max_y.saturating_sub(moving.max_y).clamp(0, delta),
        (false, false) => clipped.min_y.saturating_sub(moving.min_y).clamp(delta, 0),
    };

    for obstacle in obstacles {
        if obstacle.intersects(&moving) {
            let mover = moving.doubled_center(horizontal);
            let other = obstacle.doubled_center(horizontal);
            let deeper = (delta > 0 && mover < other) || (delta < 0 && mover > other);
            if deeper {
                return 0;
            }
            continue;
        }
        if horizontal {
            if !obstacle.overlaps_y(&moving) {
                continue;
            }
            if delta > 0 && obstacle.min_x >= moving.max_x {
                allowed = allowed.min(obstacle.min_x.saturating_sub(moving.max_x));
            } else if delta < 0 && obstacle.max_x <= moving.min_x {
                allowed = allowed.max(obstacle.max_x.saturating_sub(moving.min_x));
            }
        } else {
            if !obstacle.overlaps_x(&moving) {
                continue;
            }
            if delta > 0 && obstacle.min_y >= moving.max_y {
                allowed = allowed.min(obstacle.min_y.saturating_sub(moving.max_y));
            } else if delta < 0 && obstacle.max_y <= moving.min_y {
                allowed = allowed.max(obstacle.max_y.saturating_sub(moving.min_y));
            }
        }
    }

    allowed
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_negative_size_rejected() {
        assert_eq!(
            Size::new(-1, 4),
            Err(GeometryError::InvalidGeometry { width: -1, height: 4 })
        );
        assert!(Shape::new(0, 0, 5, -2).is_err());
        assert!(Size::new(0, 0).is_ok());
    }

    #[test]
    fn test_default_hitbox_box() {
        let hitbox = Size::new(32, 32).unwrap();
        let bbox = compose_bounding_box(Position::default(), hitbox, []);
        assert_eq!(bbox, BoundingBox::new(0, 0, 32, 32));
    }

    #[test]
    fn test_hitbox_with_position() {
        let hitbox = Size::new(100, 100).unwrap();
        let bbox = compose_bounding_box(Position::new(50, 50), hitbox, []);
        assert_eq!(bbox, BoundingBox::new(50, 50, 150, 150));
    }

    #[test]
    fn test_degenerate_hitbox_is_point() {
        let bbox = compose_bounding_box(Position::new(7, 9), Size::default(), []);
        assert_eq!(bbox, BoundingBox::new(7, 9, 7, 9));
    }

    #[test]
    fn test_center_shapes_compose() {
        let position = Position::new(200, 200);
        let hitbox = Size::new(10, 10).unwrap();
        let first = Shape::centered(0, 0, 100, 100).unwrap();
        let second = Shape::centered(0, 0, 50, 200).unwrap();

        let one = compose_bounding_box(position, hitbox, [&first]);
        assert_eq!(one, BoundingBox::new(155, 155, 255, 255));

        let both = compose_bounding_box(position, hitbox, [&first, &second]);
        assert_eq!(both, BoundingBox::new(155, 105, 255, 305));
    }

    #[test]
    fn test_top_left_shape_offsets_from_position() {
        let shape = Shape::new(-10, 40, 5, 5).unwrap();
        let bbox = shape.attached_bounds(Position::new(100, 100), Size::new(32, 32).unwrap());
        assert_eq!(bbox, BoundingBox::new(90, 140, 95, 145));
    }

    #[test]
    fn test_touching_edges_do_not_intersect() {
        let a = BoundingBox::new(0, 0, 10, 10);
        let b = BoundingBox::new(10, 0, 20, 10);
        let c = BoundingBox::new(9, 9, 20, 20);
        assert!(!a.intersects(&b));
        assert!(a.intersects(&c));
        assert!(c.intersects(&a));
    }

    #[test]
    fn test_clamp_to_world() {
        let world = WorldBounds::new(100, 50);
        let clipped = clamp_to_world(BoundingBox::new(-5, 10, 30, 80), world);
        assert_eq!(clipped, BoundingBox::new(0, 10, 30, 50));
    }

    #[test]
    fn test_sweep_stops_at_world_edge() {
        let world = WorldBounds::new(100, 100);
        let moving = BoundingBox::new(1, 0, 33, 32);
        assert_eq!(sweep_axis(moving, -3, true, world, &[]), -1);
        let at_right = BoundingBox::new(60, 0, 92, 32);
        assert_eq!(sweep_axis(at_right, 20, true, world, &[]), 8);
    }

    #[test]
    fn test_sweep_stops_at_obstacle() {
        let world = WorldBounds::UNBOUNDED;
        let moving = BoundingBox::new(0, 0, 10, 10);
        let wall = BoundingBox::new(14, 0, 20, 10);
        assert_eq!(sweep_axis(moving, 10, true, world, &[wall]), 4);
        // Wall out of the y range does not block.
        let high_wall = BoundingBox::new(14, 10, 20, 20);
        assert_eq!(sweep_axis(moving, 10, true, world, &[high_wall]), 10);
        // Vertical sweep down into a floor.
        let floor = BoundingBox::new(0, 12, 10, 14);
        assert_eq!(sweep_axis(moving, 5, false, world, &[floor]), 2);
    }

    #[test]
    fn test_sweep_escapes_overlapping_obstacle() {
        let moving = BoundingBox::new(0, 0, 10, 10);
        let around = BoundingBox::new(-5, -5, 15, 15);
        assert_eq!(sweep_axis(moving, 3, true, WorldBounds::UNBOUNDED, &[around]), 3);
    }

    #[test]
    fn test_sweep_blocks_deeper_into_overlapped_wall() {
        let world = WorldBounds::UNBOUNDED;
        let moving = BoundingBox::new(100, 0, 132, 32);
        let wall = BoundingBox::new(130, 0, 160, 32);
        assert_eq!(sweep_axis(moving, 100, true, world, &[wall]), 0);
        // Backing out the way it came is fine.
        assert_eq!(sweep_axis(moving, -100, true, world, &[wall]), -100);
        // Sliding along the wall is not deeper on that axis.
        assert_eq!(sweep_axis(moving, 5, false, world, &[wall]), 5);
    }

    #[test]
    fn test_translate_saturates() {
        let moving = BoundingBox::new(-10, -10, 22, 22);
        let far = moving.translate(i32::MAX, i32::MIN);
        assert_eq!(far, BoundingBox::new(i32::MAX - 10, i32::MIN, i32::MAX, i32::MIN + 22));
        let edge = Size::new(32, 32).unwrap().at(Position::new(i32::MAX - 4, 0));
        assert_eq!(edge.max_x, i32::MAX);
    }

    #[test]
    fn test_sweep_huge_delta_stays_in_world() {
        let world = WorldBounds::new(640, 480);
        let moving = BoundingBox::new(100, 100, 132, 132);
        assert_eq!(sweep_axis(moving, i32::MAX, true, world, &[]), 508);
        assert_eq!(sweep_axis(moving, i32::MIN, false, world, &[]), -100);
        let unbounded = sweep_axis(moving, i32::MAX, true, WorldBounds::UNBOUNDED, &[]);
        assert_eq!(unbounded, WorldBounds::UNBOUNDED.width - 132);
    }

    fn arb_shape() -> impl Strategy<Value = Shape> {
        (-50i32..50, -50i32..50, 0i32..200, 0i32..200, any::<bool>()).prop_map(|(x, y, w, h, center)| {
            let shape = Shape::new(x, y, w, h).unwrap();
            if center {
                shape.with_positioning(ShapePositioning::Center)
            } else {
                shape
            }
        })
    }

    proptest! {
        #[test]
        fn prop_union_is_order_independent(
            shapes in prop::collection::vec(arb_shape(), 0..6),
            px in -500i32..500,
            py in -500i32..500,
        ) {
            let position = Position::new(px, py);
            let hitbox = Size::new(16, 24).unwrap();
            let forward = compose_bounding_box(position, hitbox, shapes.iter());
            let backward = compose_bounding_box(position, hitbox, shapes.iter().rev());
            prop_assert_eq!(forward, backward);

            // Every constituent lies within the union.
            for shape in &shapes {
                let b = shape.attached_bounds(position, hitbox);
                prop_assert!(b.min_x >= forward.min_x && b.max_x <= forward.max_x);
                prop_assert!(b.min_y >= forward.min_y && b.max_y <= forward.max_y);
            }
        }

        #[test]
        fn prop_sweep_never_leaves_world(
            x in 0i32..68,
            delta in -200i32..200,
            horizontal in any::<bool>(),
        ) {
            let world = WorldBounds::new(100, 100);
            let moving = BoundingBox::new(x, x, x + 32, x + 32);
            let allowed = sweep_axis(moving, delta, horizontal, world, &[]);
            let moved = if horizontal { moving.translate(allowed, 0) } else { moving.translate(0, allowed) };
            prop_assert!(moved.min_x >= 0 && moved.max_x <= 100);
            prop_assert!(moved.min_y >= 0 && moved.max_y <= 100);
            prop_assert!(allowed.abs() <= delta.abs());
        }
    }
}
