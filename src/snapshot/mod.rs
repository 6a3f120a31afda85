//! Health Snapshot Module
//!
//! The heart of CodePulse: remembering what the codebase looked like and
//! explaining what changed.
//! This module provides:
//! - Health snapshots (immutable point-in-time captures)
//! - Entity matching across snapshots (exact keys plus rename heuristics)
//! - Snapshot diff engine
//! - Finding lifecycle and chronic tracking

pub mod cache;
pub mod diff;
pub mod lifecycle;
pub mod matcher;
pub mod models;
pub mod store;

pub use store::SnapshotStore;
#[allow(unused_imports)]
pub use diff::{Delta, DiffEngine, DiffOptions};
#[allow(unused_imports)]
pub use lifecycle::{FindingLifecycle, LifecycleTracker};
#[allow(unused_imports)]
pub use models::{FindingId, NewSnapshot, Severity, Snapshot, SnapshotId};
