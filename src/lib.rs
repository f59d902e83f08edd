// ============================================================================
// vstate Library
// ============================================================================

//! Versioned entity state with optimistic concurrency.
//!
//! ```
//! use vstate::{Entity, EntityType, SequentialAllocator, TransactionManager};
//!
//! #[derive(Debug, Clone, Default)]
//! struct AccountState {
//!     balance: i64,
//! }
//!
//! struct Account;
//!
//! impl EntityType for Account {
//!     type State = AccountState;
//!     const KIND_NAME: &'static str = "Account";
//!     const KIND_ID: u16 = 1;
//! }
//!
//! # fn main() -> vstate::Result<()> {
//! let allocator = SequentialAllocator::new();
//! let manager = TransactionManager::new();
//! let account = Entity::<Account>::create(&allocator)?;
//!
//! let txn = manager.begin();
//! account.update(&txn, |s| s.balance += 100)?;
//! manager.commit(&txn)?;
//!
//! let reader = manager.begin_read_only();
//! assert_eq!(account.get(&reader, |s| s.balance)?, 100);
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod entity;
pub mod relation;
pub mod state;
pub mod transaction;

// Re-export main types for convenience
pub use core::{
    Identity, IdentityAllocator, Invariant, Result, SequentialAllocator, StateError,
};
pub use entity::{
    DocumentLoader, Entity, EntityPhase, EntityType, LoaderError, RelationSpec, StateLoader,
};
pub use relation::{LazyRelationRegistry, RelationElements, RelationList};
pub use state::{CellInfo, EntityState, SnapshotStatus, StateSnapshot, VersionedCell};
pub use transaction::{
    RetryPolicy, Transaction, TransactionConfig, TransactionInfo, TransactionManager,
    TransactionState, TransactionStats,
};
