// ============================================================================
// Transaction Management Module
// ============================================================================
//
// Multi-document transactions for the in-memory engine.
//
// - State Pattern: transaction lifecycle (Active, Committed, Aborted)
// - Command Pattern: recorded document writes replayed on commit
// - Optimistic concurrency: version check at commit, first writer wins
//
// ============================================================================

pub mod change;
pub mod manager;
pub mod state;

pub use change::Change;
pub use manager::TransactionManager;
pub use state::{PendingDocument, Transaction, TransactionId, TransactionState};
