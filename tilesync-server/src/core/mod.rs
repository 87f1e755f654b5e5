//! Core primitives.
//!
//! Pure, allocation-light building blocks shared by the server tick engine
//! and the client mirror. Nothing in here knows about entities or networking.

pub mod direction;
pub mod geometry;
pub mod rng;
pub mod hash;

// Re-export core types
pub use direction::Direction;
pub use geometry::{
    BoundingBox, GeometryError, Position, Shape, ShapePositioning, Size, WorldBounds,
    clamp_to_world, compose_bounding_box,
};
pub use rng::DeterministicRng;
pub use hash::{StateHash, compute_state_hash};
