//! Client Mirror
//!
//! Client-side input capture, prediction and reconciliation against the
//! server's tick diffs. Uses the same kinetic code as the server so
//! predictions match whenever nothing else interferes.

pub mod prediction;

pub use prediction::{ClientMirror, MirrorError};
