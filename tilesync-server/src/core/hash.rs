//! State Checksums
//!
//! SHA-256 over the synchronized part of a map (entity kinetics and registry
//! shapes). Sent with every tick diff so a client mirror can tell when it
//! has drifted from the server.

use sha2::{Sha256, Digest};

use super::direction::Direction;
use super::geometry::{Position, Shape, ShapePositioning};

/// 256-bit checksum.
pub type StateHash = [u8; 32];

/// Order-sensitive hasher with helpers for simulation types.
pub struct StateHasher {
    hasher: Sha256,
}

impl StateHasher {
    /// Create a hasher with a domain separator.
    pub fn new(domain: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(domain);
        Self { hasher }
    }

    /// Hasher for map state.
    pub fn for_map_state() -> Self {
        Self::new(b"TILESYNC_MAP_STATE_V1")
    }

    /// Update with raw bytes.
    #[inline]
    pub fn update_bytes(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    /// Update with a u8.
    #[inline]
    pub fn update_u8(&mut self, value: u8) {
        self.hasher.update([value]);
    }

    /// Update with a u32 (little-endian).
    #[inline]
    pub fn update_u32(&mut self, value: u32) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Update with a u64 (little-endian).
    #[inline]
    pub fn update_u64(&mut self, value: u64) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Update with an i32 (little-endian).
    #[inline]
    pub fn update_i32(&mut self, value: i32) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Update with a boolean.
    #[inline]
    pub fn update_bool(&mut self, value: bool) {
        self.update_u8(value as u8);
    }

    /// Update with a position (all three coordinates).
    #[inline]
    pub fn update_position(&mut self, position: Position) {
        self.update_i32(position.x);
        self.update_i32(position.y);
        self.update_i32(position.z);
    }

    /// Update with a direction ordinal.
    #[inline]
    pub fn update_direction(&mut self, direction: Direction) {
        self.update_u8(direction.ordinal());
    }

    /// Update with a string, length-prefixed.
    pub fn update_str(&mut self, value: &str) {
        self.update_u32(value.len() as u32);
        self.hasher.update(value.as_bytes());
    }

    /// Update with the geometry of a shape. Properties are opaque and skipped.
    pub fn update_shape(&mut self, shape: &Shape) {
        self.update_str(shape.name.as_deref().unwrap_or(""));
        self.update_i32(shape.x);
        self.update_i32(shape.y);
        self.update_i32(shape.width);
        self.update_i32(shape.height);
        self.update_u8(match shape.positioning {
            ShapePositioning::TopLeft => 0,
            ShapePositioning::Center => 1,
        });
        self.update_bool(shape.collision);
    }

    /// Finalize.
    pub fn finalize(self) -> StateHash {
        self.hasher.finalize().into()
    }
}

/// Hash map state for a tick.
///
/// The closure appends the state-specific data after the tick counter.
pub fn compute_state_hash<F>(tick: u64, add_state: F) -> StateHash
where
    F: FnOnce(&mut StateHasher),
{
    let mut hasher = StateHasher::for_map_state();
    hasher.update_u64(tick);
    add_state(&mut hasher);
    hasher.finalize()
}
