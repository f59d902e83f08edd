// ============================================================================
// Entities
// ============================================================================
//
// An entity owns exactly one state cell and one relation registry.
//
// Lifecycle:
//
// ```text
// Entity::create       ──────────────────────────────> Live
// Entity::materialize  ──> Constructing ──load_with──> Live
//                               │
//                               └── loader error: stays Constructing
// ```
//
// ============================================================================

pub mod kind;
pub mod loader;
pub mod object;

pub use kind::{EntityType, RelationSpec};
pub use loader::{DocumentLoader, LoaderError, StateLoader};
pub use object::{Entity, EntityPhase};
