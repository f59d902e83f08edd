// ============================================================================
// Transaction Manager
// ============================================================================
//
// In-process reference manager driving the cell conflict hooks:
//
// ```text
// begin ──> read / write (copy-on-write) ──> commit
//                                              │
//             seal every intent ───────────────┤ conflict ──> revert all, Aborted
//             publish every intent  ───────────┘ ok ────────> Committed
// ```
//
// Sealing validates a written snapshot and keeps other writers out of it
// until it is published, so a commit either publishes all of its writes or
// none. Commits and rollbacks run under one commit lock.
//
// ============================================================================

use super::intent::WriteIntent;
use super::{Transaction, TransactionConfig, TransactionState};
use crate::core::{Invariant, Result, StateError};
use log::warn;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{Level, event, info_span};

pub struct TransactionManager {
    /// Next transaction number. Monotonically increasing.
    next_number: AtomicU64,

    /// Serializes seal + publish and revert.
    commit_lock: Mutex<()>,

    config: TransactionConfig,

    begun: AtomicU64,
    committed: AtomicU64,
    aborted: AtomicU64,
    conflicts: AtomicU64,
}

/// Counters since the manager was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TransactionStats {
    pub begun: u64,
    pub committed: u64,
    pub aborted: u64,
    pub conflicts: u64,
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionManager {
    pub fn new() -> Self {
        Self::with_config(TransactionConfig::default())
    }

    pub fn with_config(config: TransactionConfig) -> Self {
        Self {
            next_number: AtomicU64::new(config.first_number),
            commit_lock: Mutex::new(()),
            config,
            begun: AtomicU64::new(0),
            committed: AtomicU64::new(0),
            aborted: AtomicU64::new(0),
            conflicts: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &TransactionConfig {
        &self.config
    }

    /// Number the next transaction will receive.
    pub fn current_number(&self) -> u64 {
        self.next_number.load(Ordering::SeqCst)
    }

    pub fn begin(&self) -> Transaction {
        self.begin_with(false)
    }

    pub fn begin_read_only(&self) -> Transaction {
        self.begin_with(true)
    }

    fn begin_with(&self, read_only: bool) -> Transaction {
        let number = self.next_number.fetch_add(1, Ordering::SeqCst);
        self.begun.fetch_add(1, Ordering::Relaxed);
        event!(Level::TRACE, tx = number, read_only, "transaction begin");
        Transaction::new(number, read_only)
    }

    /// Commits `txn`, returning its number as the commit version.
    ///
    /// On a write conflict every snapshot the transaction wrote is reverted,
    /// the transaction is marked aborted and `WriteConflict` is returned; the
    /// caller is expected to re-run the whole transaction.
    ///
    /// If publishing fails after some writes were already published, the
    /// unpublished ones are reverted and
    /// [`Invariant::PartialPublish`] is returned.
    pub fn commit(&self, txn: &Transaction) -> Result<u64> {
        let number = txn.number();
        if !txn.state().is_active() {
            return Err(StateError::TransactionNotActive(number));
        }

        let span = info_span!("transaction.commit", tx = number);
        let _enter = span.enter();

        let _commit_guard = self.commit_lock.lock()?;
        let intents = txn.take_intents()?;

        if let Some(err) = intents.iter().find_map(|intent| intent.seal(number).err()) {
            self.undo(&intents, number)?;
            txn.set_state(TransactionState::Aborted);
            self.aborted.fetch_add(1, Ordering::Relaxed);
            if err.is_retryable() {
                self.conflicts.fetch_add(1, Ordering::Relaxed);
            }
            event!(Level::DEBUG, error = %err, "transaction commit rejected");
            return Err(err);
        }

        // Publishing a sealed snapshot fails only on a poisoned lock.
        for (published, intent) in intents.iter().enumerate() {
            if let Err(err) = intent.publish(number) {
                // Sealed snapshots would block writers for good.
                self.undo(&intents[published..], number)?;
                txn.set_state(TransactionState::Aborted);
                self.aborted.fetch_add(1, Ordering::Relaxed);
                event!(
                    Level::ERROR,
                    identity = %intent.identity(),
                    published,
                    error = %err,
                    "publish failed after validation"
                );
                if published == 0 {
                    return Err(err);
                }
                return Err(StateError::invariant(
                    intent.identity(),
                    Invariant::PartialPublish,
                ));
            }
        }

        txn.set_state(TransactionState::Committed);
        self.committed.fetch_add(1, Ordering::Relaxed);
        event!(Level::DEBUG, writes = intents.len(), "transaction committed");
        Ok(number)
    }

    /// Discards every snapshot `txn` wrote. A finished transaction is left
    /// untouched.
    pub fn rollback(&self, txn: &Transaction) -> Result<()> {
        if !txn.state().is_active() {
            return Ok(());
        }

        let span = info_span!("transaction.rollback", tx = txn.number());
        let _enter = span.enter();

        let _commit_guard = self.commit_lock.lock()?;
        let intents = txn.take_intents()?;
        self.undo(&intents, txn.number())?;
        txn.set_state(TransactionState::Aborted);
        self.aborted.fetch_add(1, Ordering::Relaxed);
        event!(Level::DEBUG, writes = intents.len(), "transaction rolled back");
        Ok(())
    }

    /// Restores the committed base of every write, or a fresh entity's
    /// initial state, and withdraws `tx` from the written snapshots.
    fn undo(&self, intents: &[Box<dyn WriteIntent>], tx: u64) -> Result<()> {
        for intent in intents {
            intent.revert()?;
            intent.release(tx)?;
        }
        Ok(())
    }

    /// Runs `op` in a fresh transaction and commits it.
    ///
    /// Retryable failures (write conflicts) re-run `op` from the beginning in
    /// a new transaction, following the configured retry policy. Any other
    /// error rolls back and is returned.
    ///
    /// ```
    /// # use std::sync::Arc;
    /// # use vstate::{Identity, TransactionManager, VersionedCell};
    /// # tokio_test::block_on(async {
    /// let manager = TransactionManager::new();
    /// let hits = Arc::new(VersionedCell::<u64>::new(Identity::new(1, 1)));
    ///
    /// let seen = manager
    ///     .with_transaction(|txn| {
    ///         let hits = Arc::clone(&hits);
    ///         async move {
    ///             txn.update(&hits, |n| {
    ///                 *n += 1;
    ///                 *n
    ///             })
    ///         }
    ///     })
    ///     .await
    ///     .unwrap();
    /// assert_eq!(seen, 1);
    /// # });
    /// ```
    pub async fn with_transaction<F, Fut, T>(&self, mut op: F) -> Result<T>
    where
        F: FnMut(Transaction) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let retry = &self.config.retry;
        let mut attempt = 1usize;
        loop {
            let txn = self.begin();
            let outcome = match op(txn.clone()).await {
                Ok(value) => self.commit(&txn).map(|_| value),
                Err(err) => {
                    self.rollback(&txn)?;
                    if err.is_retryable() {
                        self.conflicts.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(err)
                }
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if !err.is_retryable() || !retry.should_retry(attempt) {
                        return Err(err);
                    }

                    let backoff_ms = retry.jittered_backoff_ms(attempt, txn.number());
                    warn!(
                        "transaction {} retry on conflict (attempt {} of {}): {} (backoff={}ms)",
                        txn,
                        attempt,
                        retry.max_attempts.max(1),
                        err,
                        backoff_ms
                    );
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Runs `op` inside the caller's transaction without nesting.
    ///
    /// Nothing is begun or committed here and errors are returned as is; the
    /// code that began `txn` decides whether to commit or roll back.
    pub async fn with_transaction_in<F, Fut, T>(&self, txn: &Transaction, op: F) -> Result<T>
    where
        F: FnOnce(Transaction) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if !txn.state().is_active() {
            return Err(StateError::TransactionNotActive(txn.number()));
        }
        event!(Level::TRACE, tx = txn.number(), "joining enclosing transaction");
        op(txn.clone()).await
    }

    pub fn stats(&self) -> TransactionStats {
        TransactionStats {
            begun: self.begun.load(Ordering::Relaxed),
            committed: self.committed.load(Ordering::Relaxed),
            aborted: self.aborted.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
        }
    }
}
