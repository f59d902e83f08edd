// ============================================================================
// Lazy Relation Registry
// ============================================================================
//
// Maps relation names to derived collections that are built on first access.
//
// Readers load the current entry sequence (an immutable `im::Vector`) and
// scan it without locking. On a miss the creator takes the creation mutex,
// scans only what was appended since its optimistic read, and either returns
// the entry another thread installed meanwhile or builds and publishes a new
// sequence. At most one handle per name is ever installed.
//
// ============================================================================

use crate::core::Result;
use arc_swap::ArcSwap;
use im::Vector;
use log::debug;
use std::sync::{Arc, Mutex};

struct RelationEntry<H> {
    name: Arc<str>,
    handle: Arc<H>,
}

impl<H> Clone for RelationEntry<H> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            handle: Arc::clone(&self.handle),
        }
    }
}

pub struct LazyRelationRegistry<H> {
    entries: ArcSwap<Vector<RelationEntry<H>>>,
    creation: Mutex<()>,
}

impl<H> LazyRelationRegistry<H> {
    pub fn new() -> Self {
        Self {
            entries: ArcSwap::from_pointee(Vector::new()),
            creation: Mutex::new(()),
        }
    }

    fn find(entries: &Vector<RelationEntry<H>>, from: usize, name: &str) -> Option<Arc<H>> {
        entries
            .iter()
            .skip(from)
            .find(|entry| &*entry.name == name)
            .map(|entry| Arc::clone(&entry.handle))
    }

    /// Handle already installed under `name`, if any. Never locks.
    pub fn get(&self, name: &str) -> Option<Arc<H>> {
        Self::find(&self.entries.load(), 0, name)
    }

    /// Returns the handle for `name`, building it with `factory` on first
    /// access.
    ///
    /// Concurrent callers for the same name all receive the same handle. A
    /// failing factory installs nothing and its error is returned.
    pub fn get_or_create<F>(&self, name: &str, factory: F) -> Result<Arc<H>>
    where
        F: FnOnce() -> Result<H>,
    {
        let seen = self.entries.load_full();
        if let Some(handle) = Self::find(&seen, 0, name) {
            return Ok(handle);
        }

        let _creation = self.creation.lock()?;
        let current = self.entries.load_full();
        if !Arc::ptr_eq(&current, &seen)
            && let Some(handle) = Self::find(&current, seen.len(), name)
        {
            return Ok(handle);
        }

        let handle = Arc::new(factory()?);
        let mut next = (*current).clone();
        next.push_back(RelationEntry {
            name: Arc::from(name),
            handle: Arc::clone(&handle),
        });
        self.entries.store(Arc::new(next));
        debug!("relation handle installed: name='{}'", name);

        Ok(handle)
    }

    pub fn len(&self) -> usize {
        self.entries.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Installed names in creation order.
    pub fn names(&self) -> Vec<String> {
        self.entries
            .load()
            .iter()
            .map(|entry| entry.name.to_string())
            .collect()
    }
}

impl<H> Default for LazyRelationRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}
