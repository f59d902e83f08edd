// ============================================================================
// Transaction State Management
// ============================================================================
//
// Each transaction moves through defined states: Active -> Committed/Aborted
//
// A `Transaction` is a cheap, cloneable handle. It carries the explicit
// transaction number every cell operation takes, and records one write
// intent per snapshot obtained through `write`, so the manager can validate
// and publish them at commit or revert them at rollback.
//
// ============================================================================

use super::intent::{CellWrite, WriteIntent};
use crate::core::{Invariant, Result, StateError};
use crate::state::{EntityState, StateSnapshot, VersionedCell};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Transaction state following the State Pattern
///
/// State transitions:
/// ```text
/// Active ──commit──> Committed
///   │
///   └──rollback / conflict──> Aborted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionState {
    /// Transaction is active and can execute operations
    Active,

    /// Transaction has been successfully committed
    Committed,

    /// Transaction has been aborted/rolled back
    Aborted,
}

impl TransactionState {
    /// Check if transaction can execute operations
    pub fn is_active(&self) -> bool {
        matches!(self, TransactionState::Active)
    }

    /// Check if transaction is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionState::Committed | TransactionState::Aborted
        )
    }

    fn as_raw(self) -> u8 {
        match self {
            TransactionState::Active => 0,
            TransactionState::Committed => 1,
            TransactionState::Aborted => 2,
        }
    }

    fn from_raw(raw: u8) -> Self {
        match raw {
            1 => TransactionState::Committed,
            2 => TransactionState::Aborted,
            _ => TransactionState::Active,
        }
    }
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionState::Active => write!(f, "ACTIVE"),
            TransactionState::Committed => write!(f, "COMMITTED"),
            TransactionState::Aborted => write!(f, "ABORTED"),
        }
    }
}

struct TransactionInner {
    number: u64,
    read_only: bool,
    state: AtomicU8,
    intents: Mutex<Vec<Box<dyn WriteIntent>>>,
    start_time: Instant,
}

/// Handle to one in-flight transaction.
///
/// Clones share the same transaction.
#[derive(Clone)]
pub struct Transaction {
    inner: Arc<TransactionInner>,
}

/// Diagnostics snapshot of a transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionInfo {
    pub number: u64,
    pub state: TransactionState,
    pub read_only: bool,
    pub change_count: usize,
    pub duration: Duration,
}

impl Transaction {
    pub(crate) fn new(number: u64, read_only: bool) -> Self {
        Self {
            inner: Arc::new(TransactionInner {
                number,
                read_only,
                state: AtomicU8::new(TransactionState::Active.as_raw()),
                intents: Mutex::new(Vec::new()),
                start_time: Instant::now(),
            }),
        }
    }

    /// The transaction number passed to every cell operation.
    pub fn number(&self) -> u64 {
        self.inner.number
    }

    pub fn is_read_only(&self) -> bool {
        self.inner.read_only
    }

    pub fn state(&self) -> TransactionState {
        TransactionState::from_raw(self.inner.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: TransactionState) {
        self.inner.state.store(state.as_raw(), Ordering::Release);
    }

    pub fn duration(&self) -> Duration {
        self.inner.start_time.elapsed()
    }

    /// Number of distinct snapshots written so far.
    pub fn change_count(&self) -> Result<usize> {
        Ok(self.inner.intents.lock()?.len())
    }

    pub fn info(&self) -> Result<TransactionInfo> {
        Ok(TransactionInfo {
            number: self.number(),
            state: self.state(),
            read_only: self.is_read_only(),
            change_count: self.change_count()?,
            duration: self.duration(),
        })
    }

    fn ensure_active(&self) -> Result<()> {
        if !self.state().is_active() {
            return Err(StateError::TransactionNotActive(self.number()));
        }
        Ok(())
    }

    /// Snapshot of `cell` visible to this transaction.
    pub fn read<S: EntityState>(&self, cell: &VersionedCell<S>) -> Result<Arc<StateSnapshot<S>>> {
        self.ensure_active()?;
        cell.read(self.number())
    }

    /// Snapshot of `cell` this transaction may mutate; recorded for commit.
    pub fn write<S: EntityState>(
        &self,
        cell: &Arc<VersionedCell<S>>,
    ) -> Result<Arc<StateSnapshot<S>>> {
        self.ensure_active()?;
        if self.is_read_only() {
            return Err(StateError::ReadOnlyTransaction(self.number()));
        }

        let snapshot = cell.write_for(self.number())?;
        let mut intents = self.inner.intents.lock()?;
        let target = Arc::as_ptr(&snapshot) as *const ();
        if !intents.iter().any(|intent| intent.targets(target)) {
            intents.push(Box::new(CellWrite::new(
                Arc::clone(cell),
                Arc::clone(&snapshot),
            )));
        }
        Ok(snapshot)
    }

    /// Reads `cell` through `f`.
    pub fn get<S, R, F>(&self, cell: &VersionedCell<S>, f: F) -> Result<R>
    where
        S: EntityState,
        F: FnOnce(&S) -> R,
    {
        let snapshot = self.read(cell)?;
        let fields = snapshot.fields()?;
        Ok(f(&fields))
    }

    /// Mutates `cell` through `f`, copying on write as needed.
    pub fn update<S, R, F>(&self, cell: &Arc<VersionedCell<S>>, f: F) -> Result<R>
    where
        S: EntityState,
        F: FnOnce(&mut S) -> R,
    {
        let snapshot = self.write(cell)?;
        // Another transaction committed or rolled back the shared clone in
        // between: the head moved under this transaction.
        let mut fields = snapshot.fields_mut().map_err(|err| match err.invariant_kind() {
            Some(Invariant::CommittedMutation) => StateError::WriteConflict {
                identity: cell.identity(),
                tx: self.number(),
            },
            _ => err,
        })?;
        Ok(f(&mut fields))
    }

    #[cfg(test)]
    pub(crate) fn record_intent(&self, intent: Box<dyn WriteIntent>) -> Result<()> {
        self.inner.intents.lock()?.push(intent);
        Ok(())
    }

    pub(crate) fn take_intents(&self) -> Result<Vec<Box<dyn WriteIntent>>> {
        Ok(std::mem::take(&mut *self.inner.intents.lock()?))
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("number", &self.number())
            .field("state", &self.state())
            .field("read_only", &self.is_read_only())
            .finish()
    }
}

impl std::fmt::Display for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "txn_{}", self.number())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Identity;

    #[derive(Debug, Clone, Default)]
    struct Counter {
        value: i64,
    }

    fn cell() -> Arc<VersionedCell<Counter>> {
        Arc::new(VersionedCell::new(Identity::new(1, 1)))
    }

    #[test]
    fn test_transaction_lifecycle() {
        let txn = Transaction::new(1, false);

        assert_eq!(txn.state(), TransactionState::Active);
        assert!(txn.state().is_active());
        assert!(!txn.state().is_terminal());

        txn.set_state(TransactionState::Committed);
        assert_eq!(txn.state(), TransactionState::Committed);
        assert!(txn.state().is_terminal());
        assert_eq!(txn.to_string(), "txn_1");
    }

    #[test]
    fn test_write_records_one_intent_per_snapshot() {
        let txn = Transaction::new(1, false);
        let cell = cell();

        txn.update(&cell, |c| c.value += 1).unwrap();
        txn.update(&cell, |c| c.value += 1).unwrap();
        assert_eq!(txn.change_count().unwrap(), 1);
        assert_eq!(txn.get(&cell, |c| c.value).unwrap(), 2);
    }

    #[test]
    fn test_read_only_transaction_refuses_writes() {
        let txn = Transaction::new(4, true);
        let err = txn.write(&cell()).unwrap_err();
        assert!(matches!(err, StateError::ReadOnlyTransaction(4)));
    }

    #[test]
    fn test_cannot_write_after_commit() {
        let txn = Transaction::new(2, false);
        txn.set_state(TransactionState::Committed);
        let err = txn.write(&cell()).unwrap_err();
        assert!(matches!(err, StateError::TransactionNotActive(2)));
    }

    #[test]
    fn test_clones_share_write_set() {
        let txn = Transaction::new(3, false);
        let other = txn.clone();
        other.update(&cell(), |c| c.value = 1).unwrap();
        assert_eq!(txn.change_count().unwrap(), 1);
        assert_eq!(txn.info().unwrap().change_count, 1);
    }
}
