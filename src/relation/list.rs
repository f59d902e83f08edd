use crate::core::{Identity, Result};
use crate::state::{StateSnapshot, VersionedCell};
use crate::transaction::Transaction;
use im::OrdSet;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Members of one relation, as a persistent set so copy-on-write is cheap.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationElements {
    members: OrdSet<Identity>,
}

impl RelationElements {
    pub fn contains(&self, identity: &Identity) -> bool {
        self.members.contains(identity)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Identity> {
        self.members.iter()
    }

    pub fn insert(&mut self, identity: Identity) -> bool {
        self.members.insert(identity).is_none()
    }

    pub fn remove(&mut self, identity: &Identity) -> bool {
        self.members.remove(identity).is_some()
    }
}

impl FromIterator<Identity> for RelationElements {
    fn from_iter<I: IntoIterator<Item = Identity>>(iter: I) -> Self {
        Self {
            members: iter.into_iter().collect(),
        }
    }
}

/// Derived collection of the entities related to `owner` through one
/// relation.
///
/// Its members live in their own versioned cell, so relation changes take
/// part in transactions exactly like state changes. A list belonging to an
/// entity materialized from storage starts unloaded.
pub struct RelationList {
    owner: Identity,
    name: String,
    elements: Arc<VersionedCell<RelationElements>>,
}

impl RelationList {
    /// Empty list of a freshly created owner.
    pub fn new(owner: Identity, name: impl Into<String>) -> Self {
        Self {
            owner,
            name: name.into(),
            elements: Arc::new(VersionedCell::new(owner)),
        }
    }

    /// List of a materialized owner; members must be loaded before use.
    pub fn unloaded(owner: Identity, name: impl Into<String>) -> Self {
        Self {
            owner,
            name: name.into(),
            elements: Arc::new(VersionedCell::empty(owner)),
        }
    }

    pub fn owner(&self) -> Identity {
        self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_loaded(&self) -> bool {
        self.elements.is_materialized()
    }

    pub fn elements(&self) -> &Arc<VersionedCell<RelationElements>> {
        &self.elements
    }

    /// Installs members read from storage as the committed version.
    pub fn load<I>(&self, members: I, tx: u64) -> Result<()>
    where
        I: IntoIterator<Item = Identity>,
    {
        let snapshot = StateSnapshot::pending(self.owner, members.into_iter().collect());
        self.elements.persistent_load(snapshot, tx)?;
        Ok(())
    }

    pub fn contains(&self, tx: &Transaction, member: &Identity) -> Result<bool> {
        tx.get(&self.elements, |elements| elements.contains(member))
    }

    pub fn len(&self, tx: &Transaction) -> Result<usize> {
        tx.get(&self.elements, RelationElements::len)
    }

    pub fn to_vec(&self, tx: &Transaction) -> Result<Vec<Identity>> {
        tx.get(&self.elements, |elements| elements.iter().copied().collect())
    }

    /// Returns `false` if `member` was already present.
    pub fn add(&self, tx: &Transaction, member: Identity) -> Result<bool> {
        tx.update(&self.elements, |elements| elements.insert(member))
    }

    /// Returns `false` if `member` was absent.
    pub fn remove(&self, tx: &Transaction, member: &Identity) -> Result<bool> {
        tx.update(&self.elements, |elements| elements.remove(member))
    }
}

impl std::fmt::Debug for RelationList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelationList")
            .field("owner", &self.owner)
            .field("name", &self.name)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}
