use crate::state::EntityState;

/// A relation an entity type declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelationSpec {
    pub name: &'static str,
    /// Built eagerly when a new entity is created instead of on first
    /// access.
    pub always_present: bool,
}

impl RelationSpec {
    pub const fn lazy(name: &'static str) -> Self {
        Self {
            name,
            always_present: false,
        }
    }

    pub const fn eager(name: &'static str) -> Self {
        Self {
            name,
            always_present: true,
        }
    }
}

/// Static description of one entity type.
///
/// ```
/// use vstate::{EntityType, RelationSpec};
///
/// #[derive(Debug, Clone, Default)]
/// struct FolderState {
///     title: String,
/// }
///
/// struct Folder;
///
/// impl EntityType for Folder {
///     type State = FolderState;
///     const KIND_NAME: &'static str = "Folder";
///     const KIND_ID: u16 = 7;
///
///     fn relations() -> &'static [RelationSpec] {
///         const RELATIONS: &[RelationSpec] =
///             &[RelationSpec::eager("children"), RelationSpec::lazy("tags")];
///         RELATIONS
///     }
/// }
/// ```
pub trait EntityType: Send + Sync + 'static {
    type State: EntityState;

    const KIND_NAME: &'static str;

    /// Stored in the upper bits of every identity of this type.
    const KIND_ID: u16;

    fn relations() -> &'static [RelationSpec] {
        &[]
    }

    fn relation(name: &str) -> Option<&'static RelationSpec> {
        Self::relations().iter().find(|spec| spec.name == name)
    }
}
