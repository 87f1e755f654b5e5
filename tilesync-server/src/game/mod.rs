//! Game Logic Module
//!
//! All map simulation code. 100% deterministic.
//!
//! ## Module Structure
//!
//! - `input`: Controls and frame-numbered input records
//! - `entity`: Entity kinetic state, hitbox, attached shapes
//! - `route`: Move-route directives and builders
//! - `interpreter`: Resumable route runner, completion signals
//! - `map`: Map content and the named shape registry
//! - `collision`: Trigger and touch detection
//! - `events`: Game events for scripts and replay
//! - `diff`: Partial tick diffs and checksums
//! - `command`: Deferred commands from collaborators
//! - `state`: World state for one map
//! - `tick`: Authoritative simulation loop

pub mod input;
pub mod entity;
pub mod route;
pub mod interpreter;
pub mod map;
pub mod collision;
pub mod events;
pub mod diff;
pub mod command;
pub mod state;
pub mod tick;

// Re-export key types
pub use input::{Control, InputRecord};
pub use entity::{Entity, EntityId, EntityKind, ShapeHandle};
pub use route::{Move, MoveDirective, MoveRoute, RepeatCount};
pub use interpreter::{RouteCancelled, RouteCompletion, RouteHandle, RouteRunner, RunnerState};
pub use map::{Map, MapConfig, ShapeRegistry, ShapeUpdate};
pub use events::{GameEvent, GameEventData};
pub use diff::{EntitySnapshot, KineticState, TickDiff, WorldSnapshot};
pub use command::{CommandSender, EntityCommand};
pub use state::{WorldError, WorldState};
pub use tick::{EngineConfig, TickResult};
