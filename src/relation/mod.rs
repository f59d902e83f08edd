// ============================================================================
// Relations
// ============================================================================
//
// Derived collections hanging off an entity. They are orthogonal to the
// entity's state cell: each relation keeps its members in its own cell and
// is created lazily, once per entity, through the registry.
//
// ============================================================================

pub mod list;
pub mod registry;

pub use list::{RelationElements, RelationList};
pub use registry::LazyRelationRegistry;
