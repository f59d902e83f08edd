// ============================================================================
// Versioned State
// ============================================================================
//
// The unit of optimistic concurrency control: every entity keeps its whole
// mutable state in one `VersionedCell`, whose head is a `StateSnapshot`.
//
// Design Patterns Used:
// - Copy-on-Write: committed snapshots are cloned before they are written
// - Compare-and-Swap: the chain head is replaced atomically, never locked
//
// ============================================================================

pub mod cell;
pub mod snapshot;

pub use cell::{CellInfo, VersionedCell};
pub use snapshot::{EntityState, SnapshotStatus, StateSnapshot};
