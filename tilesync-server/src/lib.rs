//! # Tilesync Server
//!
//! Authoritative movement and collision sync for tile-based multiplayer maps.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     TILESYNC SERVER                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/             - Deterministic primitives                │
//! │  ├── direction.rs  - Facings and quarter turns               │
//! │  ├── geometry.rs   - Shapes, bounding boxes, clamping        │
//! │  ├── rng.rs        - Deterministic Xorshift128+ PRNG         │
//! │  └── hash.rs       - State hashing for diff checksums        │
//! │                                                              │
//! │  game/             - Map simulation (deterministic)          │
//! │  ├── entity.rs     - Kinetic state, hitbox, shapes           │
//! │  ├── route.rs      - Move-route directives                   │
//! │  ├── interpreter.rs- Resumable route runner                  │
//! │  ├── map.rs        - Map content, shape registry             │
//! │  ├── collision.rs  - Trigger and touch detection             │
//! │  ├── diff.rs       - Partial tick diffs                      │
//! │  ├── state.rs      - World state per map                     │
//! │  └── tick.rs       - Authoritative simulation loop           │
//! │                                                              │
//! │  client/           - Prediction and reconciliation           │
//! │                                                              │
//! │  network/          - Networking (non-deterministic)          │
//! │  ├── server.rs     - WebSocket server                        │
//! │  ├── protocol.rs   - Message types                           │
//! │  └── session.rs    - Map session management                  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Determinism Guarantee
//!
//! The `core/` and `game/` modules are **100% deterministic**:
//! - Integer world units only
//! - No HashMap (uses BTreeMap for sorted iteration)
//! - No system time dependencies
//! - All randomness from the map's seeded Xorshift128+
//!
//! The client mirror runs the same kinetic code, so a prediction matches
//! the server whenever nothing else touched the entity.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod client;
pub mod network;

// Re-export commonly used types
pub use crate::core::direction::Direction;
pub use crate::core::geometry::{BoundingBox, Position, Shape, ShapePositioning, Size};
pub use crate::core::rng::DeterministicRng;
pub use crate::game::entity::{Entity, EntityId, EntityKind};
pub use crate::game::input::{Control, InputRecord};
pub use crate::game::route::{Move, MoveDirective, MoveRoute};
pub use crate::game::state::WorldState;
pub use crate::client::ClientMirror;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Simulation tick rate (Hz)
pub const TICK_RATE: u32 = 60;
