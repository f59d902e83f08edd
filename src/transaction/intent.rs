use crate::core::{Identity, Result};
use crate::state::{EntityState, StateSnapshot, VersionedCell};
use std::sync::Arc;

/// A snapshot written by a transaction, type-erased over the entity state.
pub(crate) trait WriteIntent: Send + Sync {
    fn identity(&self) -> Identity;

    fn targets(&self, snapshot: *const ()) -> bool;

    /// Validates and freezes the written snapshot for `tx`.
    fn seal(&self, tx: u64) -> Result<()>;

    /// Withdraws `tx` from the written snapshot after an abort.
    fn release(&self, tx: u64) -> Result<()>;

    fn publish(&self, tx: u64) -> Result<u64>;

    fn revert(&self) -> Result<bool>;
}

pub(crate) struct CellWrite<S: EntityState> {
    cell: Arc<VersionedCell<S>>,
    snapshot: Arc<StateSnapshot<S>>,
}

impl<S: EntityState> CellWrite<S> {
    pub(crate) fn new(cell: Arc<VersionedCell<S>>, snapshot: Arc<StateSnapshot<S>>) -> Self {
        Self { cell, snapshot }
    }
}

impl<S: EntityState> WriteIntent for CellWrite<S> {
    fn identity(&self) -> Identity {
        self.cell.identity()
    }

    fn targets(&self, snapshot: *const ()) -> bool {
        std::ptr::eq(Arc::as_ptr(&self.snapshot) as *const (), snapshot)
    }

    fn seal(&self, tx: u64) -> Result<()> {
        self.cell.seal(&self.snapshot, tx)
    }

    fn release(&self, tx: u64) -> Result<()> {
        self.cell.release(&self.snapshot, tx)
    }

    fn publish(&self, tx: u64) -> Result<u64> {
        self.cell.commit(&self.snapshot, tx)
    }

    fn revert(&self) -> Result<bool> {
        self.cell.revert(&self.snapshot)
    }
}
