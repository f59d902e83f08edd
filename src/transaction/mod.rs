// ============================================================================
// Transaction Management Module
// ============================================================================
//
// Optimistic transactions over versioned cells.
//
// Design Patterns Used:
// - State Pattern: Transaction state management (Active, Committed, Aborted)
// - Command Pattern: recorded write intents, published on commit or
//   reverted on rollback
// - First-committer-wins: conflicting transactions are re-run whole
//
// ============================================================================

pub mod config;
mod intent;
pub mod manager;
pub mod state;

pub use config::{RetryPolicy, TransactionConfig};
pub use manager::{TransactionManager, TransactionStats};
pub use state::{Transaction, TransactionInfo, TransactionState};
