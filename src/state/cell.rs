// ============================================================================
// Versioned Cell
// ============================================================================
//
// Holds the head of one entity's version chain:
//
// ```text
//   head (Pending, writers=[t2,t3]) ──base──> committed v1
// ```
//
// - `read` returns the committed version visible to a transaction
// - `write_for` copies a committed head into a pending clone (copy-on-write)
//   and installs it with compare-and-swap; losers adopt the winner's clone
// - `validate`/`seal`/`commit` are the conflict hook called by a transaction
//   manager: a snapshot commits only for a transaction that is its sole
//   writer, and only while it is still the head
// - `revert` puts the committed base back when a transaction rolls back;
//   a fresh entity's written initial snapshot is replaced by a new one
//
// Only the latest committed version is retained. A committed clone drops
// its base link, so the chain is at most two snapshots long.
//
// ============================================================================

use super::snapshot::{EntityState, SnapshotStatus, StateSnapshot};
use crate::core::{Identity, Invariant, Result, StateError};
use arc_swap::ArcSwapOption;
use log::debug;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub struct VersionedCell<S: EntityState> {
    identity: Identity,
    head: ArcSwapOption<StateSnapshot<S>>,
    /// State a fresh entity starts from, reinstalled when its uncommitted
    /// initial snapshot is rolled back. `None` for materialized entities.
    genesis: Option<S>,
}

/// Point-in-time view of a cell's head, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellInfo {
    pub identity: Identity,
    pub materialized: bool,
    pub head_status: Option<SnapshotStatus>,
    pub head_version: u64,
    pub writers: Vec<u64>,
    pub chain_len: usize,
}

fn same_head<S: EntityState>(
    a: &Option<Arc<StateSnapshot<S>>>,
    b: &Option<Arc<StateSnapshot<S>>>,
) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

impl<S: EntityState> VersionedCell<S> {
    /// Cell of a freshly created entity, holding a pending default state.
    pub fn new(identity: Identity) -> Self {
        Self::with_state(identity, S::default())
    }

    pub fn with_state(identity: Identity, state: S) -> Self {
        Self {
            identity,
            head: ArcSwapOption::from_pointee(StateSnapshot::pending(identity, state.clone())),
            genesis: Some(state),
        }
    }

    /// Cell of an entity being materialized; unusable until
    /// [`persistent_load`](Self::persistent_load).
    pub fn empty(identity: Identity) -> Self {
        Self {
            identity,
            head: ArcSwapOption::empty(),
            genesis: None,
        }
    }

    pub fn identity(&self) -> Identity {
        self.identity
    }

    pub fn is_materialized(&self) -> bool {
        (*self.head.load()).is_some()
    }

    pub fn head(&self) -> Option<Arc<StateSnapshot<S>>> {
        self.head.load_full()
    }

    fn is_head(&self, snapshot: &Arc<StateSnapshot<S>>) -> bool {
        let head = self.head.load();
        matches!(&*head, Some(h) if Arc::ptr_eq(h, snapshot))
    }

    fn load_head(&self) -> Result<Arc<StateSnapshot<S>>> {
        self.head
            .load_full()
            .ok_or_else(|| StateError::invariant(self.identity, Invariant::NotMaterialized))
    }

    /// Snapshot visible to transaction `tx`.
    ///
    /// A committed head is visible to everyone. A pending head is visible to
    /// its own writers; other transactions see the committed version it was
    /// cloned from. A pending head without a base belongs to an entity that
    /// was never committed and is returned as is.
    pub fn read(&self, tx: u64) -> Result<Arc<StateSnapshot<S>>> {
        let head = self.load_head()?;
        if head.is_committed() || head.is_written_by(tx)? {
            return Ok(head);
        }
        Ok(head.base().unwrap_or(head))
    }

    /// Snapshot that transaction `tx` may mutate.
    pub fn write_for(&self, tx: u64) -> Result<Arc<StateSnapshot<S>>> {
        loop {
            let current = self.head.load_full();
            let Some(head) = current.as_ref() else {
                return Err(StateError::invariant(
                    self.identity,
                    Invariant::NotMaterialized,
                ));
            };

            match head.status() {
                SnapshotStatus::Pending => {
                    // Refused if the head was sealed or committed after the
                    // status check.
                    if head.register_writer(tx)? {
                        return Ok(Arc::clone(head));
                    }
                }
                SnapshotStatus::Committed => {
                    let clone = Arc::new(head.fork(tx)?);
                    let previous = self
                        .head
                        .compare_and_swap(&current, Some(Arc::clone(&clone)));
                    if same_head(&*previous, &current) {
                        return Ok(clone);
                    }
                    debug!(
                        "copy-on-write lost head race: identity={} tx={}",
                        self.identity, tx
                    );
                }
                // A commit or rollback is in flight and settles the head.
                SnapshotStatus::Sealed | SnapshotStatus::Discarded => std::thread::yield_now(),
            }
        }
    }

    /// Marks `snapshot` committed. Publishing twice is a no-op.
    pub fn publish(&self, snapshot: &StateSnapshot<S>) -> Result<()> {
        snapshot.mark_committed(None)?;
        Ok(())
    }

    /// Installs a snapshot read from storage as the committed head.
    ///
    /// A committed head is replaced (refresh); a pending head means a local
    /// write raced materialization and is rejected.
    pub fn persistent_load(
        &self,
        snapshot: StateSnapshot<S>,
        tx: u64,
    ) -> Result<Arc<StateSnapshot<S>>> {
        if snapshot.is_discarded() {
            return Err(StateError::invariant(self.identity, Invariant::LoadDiscarded));
        }
        snapshot.mark_committed(Some(tx))?;
        let loaded = Arc::new(snapshot);

        loop {
            let current = self.head.load_full();
            if let Some(head) = current.as_ref()
                && !head.is_committed()
            {
                return Err(StateError::invariant(
                    self.identity,
                    Invariant::UncommittedHeadOnLoad,
                ));
            }
            let previous = self
                .head
                .compare_and_swap(&current, Some(Arc::clone(&loaded)));
            if same_head(&*previous, &current) {
                return Ok(loaded);
            }
        }
    }

    fn conflict(&self, tx: u64) -> StateError {
        StateError::WriteConflict {
            identity: self.identity,
            tx,
        }
    }

    /// Conflict hook: fails with `WriteConflict` unless `snapshot` is still
    /// the head and `tx` may commit it.
    ///
    /// A pending snapshot may be committed only by its sole writer; once
    /// committed it stays valid for the transaction that committed it.
    pub fn validate(&self, snapshot: &Arc<StateSnapshot<S>>, tx: u64) -> Result<()> {
        if !self.is_head(snapshot) {
            return Err(self.conflict(tx));
        }

        match snapshot.status() {
            SnapshotStatus::Pending | SnapshotStatus::Sealed if snapshot.is_exclusive_to(tx)? => {
                Ok(())
            }
            SnapshotStatus::Committed if snapshot.version() == tx => Ok(()),
            _ => Err(self.conflict(tx)),
        }
    }

    /// Validates `snapshot` for `tx` and freezes it: no other writer can join
    /// until it is published or [`release`](Self::release)d.
    pub fn seal(&self, snapshot: &Arc<StateSnapshot<S>>, tx: u64) -> Result<()> {
        if !self.is_head(snapshot) {
            return Err(self.conflict(tx));
        }
        snapshot.seal(tx)
    }

    /// Withdraws `tx` from a snapshot it will not commit, undoing its
    /// [`seal`](Self::seal) if it had one.
    pub fn release(&self, snapshot: &StateSnapshot<S>, tx: u64) -> Result<()> {
        snapshot.release(tx)
    }

    /// Validates and publishes on behalf of `tx`, returning the commit
    /// version. Committing again for the same transaction returns the same
    /// version.
    pub fn commit(&self, snapshot: &Arc<StateSnapshot<S>>, tx: u64) -> Result<u64> {
        if snapshot.is_committed() {
            return if snapshot.version() == tx {
                Ok(tx)
            } else {
                Err(self.conflict(tx))
            };
        }
        self.seal(snapshot, tx)?;
        snapshot.mark_committed(Some(tx))?;
        Ok(tx)
    }

    /// Rollback path: unlinks a pending clone and restores its base.
    ///
    /// A fresh entity's initial snapshot has no base; it is discarded and
    /// replaced by a new pending snapshot of the initial state, so writers
    /// that shared it fail at commit with `WriteConflict`.
    ///
    /// Returns `false` when there was nothing to undo: the snapshot was
    /// already committed or is no longer the head.
    pub fn revert(&self, snapshot: &Arc<StateSnapshot<S>>) -> Result<bool> {
        let replacement = match (snapshot.base(), self.genesis.as_ref()) {
            (Some(base), _) => base,
            (None, Some(initial)) => {
                Arc::new(StateSnapshot::pending(self.identity, initial.clone()))
            }
            (None, None) => return Ok(false),
        };
        let current = Some(Arc::clone(snapshot));
        if !self.is_head(snapshot) || !snapshot.discard()? {
            return Ok(false);
        }

        // A discarded head cannot be replaced by anyone else: `write_for`
        // waits on it and `persistent_load` rejects it.
        let previous = self.head.compare_and_swap(&current, Some(replacement));
        Ok(same_head(&*previous, &current))
    }

    /// Head first, then its committed base if it has one.
    pub fn chain(&self) -> Vec<Arc<StateSnapshot<S>>> {
        let mut chain = Vec::with_capacity(2);
        let mut next = self.head.load_full();
        while let Some(snapshot) = next {
            next = snapshot.base();
            chain.push(snapshot);
        }
        chain
    }

    pub fn info(&self) -> Result<CellInfo> {
        let head = self.head.load_full();
        let (head_status, head_version, writers) = match head.as_ref() {
            Some(h) => (Some(h.status()), h.version(), h.writers()?),
            None => (None, 0, Vec::new()),
        };
        Ok(CellInfo {
            identity: self.identity,
            materialized: head.is_some(),
            head_status,
            head_version,
            writers,
            chain_len: self.chain().len(),
        })
    }
}
