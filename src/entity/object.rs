use super::kind::EntityType;
use super::loader::StateLoader;
use crate::core::{Identity, IdentityAllocator, Result, StateError};
use crate::relation::{LazyRelationRegistry, RelationList};
use crate::state::{StateSnapshot, VersionedCell};
use crate::transaction::Transaction;
use log::debug;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::sync::Arc;

/// Materialization phase of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityPhase {
    /// Materialized from storage, state not loaded yet.
    Constructing,
    Live,
}

/// An addressable domain object: one identity, one state cell and one
/// relation registry.
pub struct Entity<T: EntityType> {
    identity: Identity,
    fresh: bool,
    state: Arc<VersionedCell<T::State>>,
    relations: LazyRelationRegistry<RelationList>,
    _kind: PhantomData<fn() -> T>,
}

impl<T: EntityType> Entity<T> {
    /// Creates a new entity with a default pending state.
    ///
    /// Relations declared as always present are built immediately.
    pub fn create(allocator: &dyn IdentityAllocator) -> Result<Self> {
        let identity = allocator.allocate(T::KIND_ID);
        let entity = Self {
            identity,
            fresh: true,
            state: Arc::new(VersionedCell::new(identity)),
            relations: LazyRelationRegistry::new(),
            _kind: PhantomData,
        };

        for spec in T::relations().iter().filter(|spec| spec.always_present) {
            entity.relation(spec.name)?;
        }

        debug!("{} created: identity={}", T::KIND_NAME, identity);
        Ok(entity)
    }

    /// Shell for an entity that exists in storage. Its state must be
    /// installed with [`persistent_load`](Self::persistent_load) or
    /// [`load_with`](Self::load_with) before it is read.
    pub fn materialize(identity: Identity) -> Self {
        Self {
            identity,
            fresh: false,
            state: Arc::new(VersionedCell::empty(identity)),
            relations: LazyRelationRegistry::new(),
            _kind: PhantomData,
        }
    }

    pub fn identity(&self) -> Identity {
        self.identity
    }

    pub fn kind_name(&self) -> &'static str {
        T::KIND_NAME
    }

    pub fn is_freshly_created(&self) -> bool {
        self.fresh
    }

    pub fn phase(&self) -> EntityPhase {
        if self.state.is_materialized() {
            EntityPhase::Live
        } else {
            EntityPhase::Constructing
        }
    }

    pub fn state(&self) -> &Arc<VersionedCell<T::State>> {
        &self.state
    }

    /// Installs state read from storage, committed at version `tx`.
    pub fn persistent_load(&self, state: T::State, tx: u64) -> Result<()> {
        let snapshot = StateSnapshot::pending(self.identity, state);
        self.state.persistent_load(snapshot, tx)?;
        debug!(
            "{} loaded: identity={} version={}",
            T::KIND_NAME,
            self.identity,
            tx
        );
        Ok(())
    }

    /// Lets `loader` fill a default state, then installs it.
    ///
    /// On loader failure nothing is installed and the entity stays
    /// [`EntityPhase::Constructing`].
    pub fn load_with<L>(&self, loader: &L, tx: u64) -> Result<()>
    where
        L: StateLoader<T::State> + ?Sized,
    {
        let mut state = T::State::default();
        loader
            .load_state(self.identity, &mut state)
            .map_err(|source| StateError::Loader {
                identity: self.identity,
                source,
            })?;
        self.persistent_load(state, tx)
    }

    /// Reads the state through `f` in `tx`.
    pub fn get<R>(&self, tx: &Transaction, f: impl FnOnce(&T::State) -> R) -> Result<R> {
        tx.get(&self.state, f)
    }

    /// Mutates the state through `f` in `tx`.
    pub fn update<R>(&self, tx: &Transaction, f: impl FnOnce(&mut T::State) -> R) -> Result<R> {
        tx.update(&self.state, f)
    }

    /// Handle of the declared relation `name`, built on first access.
    pub fn relation(&self, name: &str) -> Result<Arc<RelationList>> {
        let spec = T::relation(name).ok_or_else(|| StateError::UnknownRelation {
            kind: T::KIND_NAME,
            relation: name.to_string(),
        })?;

        self.relations.get_or_create(spec.name, || {
            Ok(if self.fresh {
                RelationList::new(self.identity, spec.name)
            } else {
                RelationList::unloaded(self.identity, spec.name)
            })
        })
    }

    /// Names of relations built so far, in creation order.
    pub fn loaded_relations(&self) -> Vec<String> {
        self.relations.names()
    }
}

impl<T: EntityType> std::fmt::Debug for Entity<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entity")
            .field("kind", &T::KIND_NAME)
            .field("identity", &self.identity)
            .field("fresh", &self.fresh)
            .field("phase", &self.phase())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Invariant, SequentialAllocator};
    use crate::entity::RelationSpec;
    use crate::entity::loader::LoaderError;

    #[derive(Debug, Clone, Default, PartialEq)]
    struct NoteState {
        text: String,
    }

    struct Note;

    impl EntityType for Note {
        type State = NoteState;
        const KIND_NAME: &'static str = "Note";
        const KIND_ID: u16 = 2;

        fn relations() -> &'static [RelationSpec] {
            const RELATIONS: &[RelationSpec] =
                &[RelationSpec::eager("tags"), RelationSpec::lazy("links")];
            RELATIONS
        }
    }

    struct FailingLoader;

    impl StateLoader<NoteState> for FailingLoader {
        fn load_state(
            &self,
            _: Identity,
            state: &mut NoteState,
        ) -> std::result::Result<(), LoaderError> {
            state.text = "partial".into();
            Err("storage offline".into())
        }
    }

    struct FixedLoader(&'static str);

    impl StateLoader<NoteState> for FixedLoader {
        fn load_state(
            &self,
            _: Identity,
            state: &mut NoteState,
        ) -> std::result::Result<(), LoaderError> {
            state.text = self.0.into();
            Ok(())
        }
    }

    #[test]
    fn test_create_is_live_with_eager_relations() {
        let allocator = SequentialAllocator::new();
        let note = Entity::<Note>::create(&allocator).unwrap();

        assert!(note.is_freshly_created());
        assert_eq!(note.phase(), EntityPhase::Live);
        assert_eq!(note.identity().kind(), 2);
        assert_eq!(note.loaded_relations(), vec!["tags"]);
    }

    #[test]
    fn test_materialized_entity_needs_load() {
        let note = Entity::<Note>::materialize(Identity::new(2, 40));
        assert_eq!(note.phase(), EntityPhase::Constructing);
        assert!(note.loaded_relations().is_empty());

        let err = note.state().read(1).unwrap_err();
        assert_eq!(err.invariant_kind(), Some(Invariant::NotMaterialized));

        note.persistent_load(NoteState { text: "hi".into() }, 1).unwrap();
        assert_eq!(note.phase(), EntityPhase::Live);
        assert_eq!(note.state().read(2).unwrap().fields().unwrap().text, "hi");
    }

    #[test]
    fn test_loader_failure_keeps_constructing() {
        let note = Entity::<Note>::materialize(Identity::new(2, 41));
        let err = note.load_with(&FailingLoader, 1).unwrap_err();
        assert!(matches!(err, StateError::Loader { .. }));
        assert_eq!(note.phase(), EntityPhase::Constructing);

        note.load_with(&FixedLoader("ok"), 2).unwrap();
        let head = note.state().head().unwrap();
        assert!(head.is_committed());
        assert_eq!(head.version(), 2);
    }

    #[test]
    fn test_unknown_relation() {
        let note = Entity::<Note>::materialize(Identity::new(2, 42));
        let err = note.relation("owners").unwrap_err();
        assert!(matches!(
            err,
            StateError::UnknownRelation { kind: "Note", .. }
        ));
    }

    #[test]
    fn test_relation_lists_follow_freshness() {
        let allocator = SequentialAllocator::new();
        let fresh = Entity::<Note>::create(&allocator).unwrap();
        assert!(fresh.relation("links").unwrap().is_loaded());

        let stored = Entity::<Note>::materialize(Identity::new(2, 43));
        let links = stored.relation("links").unwrap();
        assert!(!links.is_loaded());
        assert!(Arc::ptr_eq(&links, &stored.relation("links").unwrap()));
    }
}
