// ============================================================================
// State Snapshot
// ============================================================================
//
// One version of an entity's full field set.
//
// ```text
// Pending ──seal──> Sealed ──publish──> Committed
//    │  <─release──   │
//    └──── discard ───┴──> Discarded
// ```
//
// A Pending snapshot collects mutations from the transactions that obtained
// it through `write_for`. Sealing freezes it for one committing transaction:
// no writer can join and no mutation can start until it is published or
// released.
//
// Status transitions hold the field write lock and then the writer list, so
// a commit waits for any in-flight mutation and writer registration can
// never interleave with a transition.
//
// ============================================================================

use crate::core::{Identity, Invariant, Result, StateError};
use arc_swap::ArcSwapOption;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Fixed-shape state record of one entity type.
///
/// Deep copy is the type's `Clone`; a fresh entity starts from `Default`.
pub trait EntityState: Clone + Default + Send + Sync + 'static {}

impl<T> EntityState for T where T: Clone + Default + Send + Sync + 'static {}

const PENDING: u8 = 0;
const COMMITTED: u8 = 1;
const DISCARDED: u8 = 2;
const SEALED: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnapshotStatus {
    Pending,
    /// Frozen by a committing transaction.
    Sealed,
    Committed,
    Discarded,
}

impl SnapshotStatus {
    fn from_raw(raw: u8) -> Self {
        match raw {
            COMMITTED => Self::Committed,
            DISCARDED => Self::Discarded,
            SEALED => Self::Sealed,
            _ => Self::Pending,
        }
    }
}

pub struct StateSnapshot<S: EntityState> {
    identity: Identity,
    fields: RwLock<S>,
    status: AtomicU8,
    /// Number of the transaction that committed or loaded this version.
    version: AtomicU64,
    /// Committed version this one was cloned from; released on commit.
    base: ArcSwapOption<StateSnapshot<S>>,
    writers: Mutex<Vec<u64>>,
}

impl<S: EntityState> StateSnapshot<S> {
    /// A writable snapshot that no transaction has committed yet.
    pub fn pending(identity: Identity, state: S) -> Self {
        Self {
            identity,
            fields: RwLock::new(state),
            status: AtomicU8::new(PENDING),
            version: AtomicU64::new(0),
            base: ArcSwapOption::empty(),
            writers: Mutex::new(Vec::new()),
        }
    }

    /// A snapshot read back from storage, committed at `version`.
    pub fn loaded(identity: Identity, state: S, version: u64) -> Self {
        let snapshot = Self::pending(identity, state);
        snapshot.version.store(version, Ordering::Relaxed);
        snapshot.status.store(COMMITTED, Ordering::Release);
        snapshot
    }

    pub fn identity(&self) -> Identity {
        self.identity
    }

    pub fn status(&self) -> SnapshotStatus {
        SnapshotStatus::from_raw(self.status.load(Ordering::Acquire))
    }

    pub fn is_committed(&self) -> bool {
        self.status() == SnapshotStatus::Committed
    }

    pub fn is_pending(&self) -> bool {
        self.status() == SnapshotStatus::Pending
    }

    pub fn is_discarded(&self) -> bool {
        self.status() == SnapshotStatus::Discarded
    }

    /// Commit version, or 0 while the snapshot is pending.
    pub fn version(&self) -> u64 {
        if self.is_committed() {
            self.version.load(Ordering::Acquire)
        } else {
            0
        }
    }

    pub fn base(&self) -> Option<Arc<StateSnapshot<S>>> {
        self.base.load_full()
    }

    pub fn fields(&self) -> Result<RwLockReadGuard<'_, S>> {
        Ok(self.fields.read()?)
    }

    /// Opens the record for mutation.
    ///
    /// Fails with [`Invariant::CommittedMutation`] once the snapshot is no
    /// longer pending.
    pub fn fields_mut(&self) -> Result<RwLockWriteGuard<'_, S>> {
        let guard = self.fields.write()?;
        if self.status.load(Ordering::Acquire) != PENDING {
            return Err(StateError::invariant(
                self.identity,
                Invariant::CommittedMutation,
            ));
        }
        Ok(guard)
    }

    /// Field-wise deep copy. The copy is always pending and unlinked.
    pub fn clone_pending(&self) -> Result<Self> {
        let state = self.fields.read()?.clone();
        Ok(Self::pending(self.identity, state))
    }

    /// Copy-on-write clone of a committed snapshot, owned by `writer`.
    pub(crate) fn fork(self: &Arc<Self>, writer: u64) -> Result<Self> {
        let clone = self.clone_pending()?;
        clone.base.store(Some(Arc::clone(self)));
        clone.writers.lock()?.push(writer);
        Ok(clone)
    }

    pub fn writers(&self) -> Result<Vec<u64>> {
        Ok(self.writers.lock()?.clone())
    }

    pub fn is_written_by(&self, tx: u64) -> Result<bool> {
        Ok(self.writers.lock()?.contains(&tx))
    }

    /// True when no transaction other than `tx` has written this snapshot.
    pub fn is_exclusive_to(&self, tx: u64) -> Result<bool> {
        Ok(self.writers.lock()?.iter().all(|writer| *writer == tx))
    }

    /// Adds `tx` to the writers. Returns `false` when the snapshot is no
    /// longer pending and cannot take writers.
    pub(crate) fn register_writer(&self, tx: u64) -> Result<bool> {
        let mut writers = self.writers.lock()?;
        if self.status.load(Ordering::Acquire) != PENDING {
            return Ok(false);
        }
        if !writers.contains(&tx) {
            writers.push(tx);
        }
        Ok(true)
    }

    /// Pending -> Sealed on behalf of `tx`.
    ///
    /// Fails with `WriteConflict` if another transaction also wrote this
    /// snapshot, or if it is already committed or discarded.
    pub(crate) fn seal(&self, tx: u64) -> Result<()> {
        let _guard = self.fields.write()?;
        let writers = self.writers.lock()?;
        let exclusive = writers.iter().all(|writer| *writer == tx);
        match self.status.load(Ordering::Acquire) {
            PENDING if exclusive => {
                self.status.store(SEALED, Ordering::Release);
                Ok(())
            }
            SEALED if exclusive => Ok(()),
            _ => Err(StateError::WriteConflict {
                identity: self.identity,
                tx,
            }),
        }
    }

    /// Drops `tx` from the writers of a snapshot it did not commit. A
    /// snapshot sealed by `tx` goes back to Pending.
    pub(crate) fn release(&self, tx: u64) -> Result<()> {
        let _guard = self.fields.write()?;
        let mut writers = self.writers.lock()?;
        writers.retain(|writer| *writer != tx);
        if writers.is_empty() {
            let _ = self.status.compare_exchange(
                SEALED,
                PENDING,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        }
        Ok(())
    }

    /// Pending or Sealed -> Committed.
    ///
    /// Returns `Ok(true)` when this call performed the transition and
    /// `Ok(false)` when the snapshot was already committed. Without an
    /// explicit version the most recent writer's number is used.
    pub fn mark_committed(&self, version: Option<u64>) -> Result<bool> {
        let _guard = self.fields.write()?;
        let writers = self.writers.lock()?;
        match self.status.load(Ordering::Acquire) {
            COMMITTED => Ok(false),
            DISCARDED => Err(StateError::invariant(
                self.identity,
                Invariant::PublishDiscarded,
            )),
            _ => {
                let version =
                    version.unwrap_or_else(|| writers.iter().copied().max().unwrap_or(0));
                self.version.store(version, Ordering::Release);
                self.status.store(COMMITTED, Ordering::Release);
                self.base.store(None);
                Ok(true)
            }
        }
    }

    /// Pending or Sealed -> Discarded. Returns `Ok(false)` if the snapshot
    /// was already committed.
    pub(crate) fn discard(&self) -> Result<bool> {
        let _guard = self.fields.write()?;
        let _writers = self.writers.lock()?;
        match self.status.load(Ordering::Acquire) {
            COMMITTED => Ok(false),
            DISCARDED => Ok(true),
            _ => {
                self.status.store(DISCARDED, Ordering::Release);
                Ok(true)
            }
        }
    }
}

impl<S: EntityState + std::fmt::Debug> std::fmt::Debug for StateSnapshot<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut out = f.debug_struct("StateSnapshot");
        out.field("identity", &self.identity)
            .field("status", &self.status())
            .field("version", &self.version());
        match self.fields.try_read() {
            Ok(fields) => out.field("fields", &*fields),
            Err(_) => out.field("fields", &"<locked>"),
        };
        out.finish()
    }
}
