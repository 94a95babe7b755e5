// ============================================================================
// Transaction Manager
// ============================================================================

use super::{Transaction, TransactionId};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use tracing::{debug, info};

/// Store-wide transaction bookkeeping.
///
/// Workspaces live in their sessions; the manager hands out identifiers,
/// tracks which transactions are running and issues document versions.
/// Every method is synchronous so a session can settle its transaction from
/// `Drop`.
pub struct TransactionManager {
    active_ids: RwLock<HashSet<TransactionId>>,
    committed: AtomicU64,
    aborted: AtomicU64,
    // Monotonic document version source, bumped on every committed write.
    global_version: AtomicU64,
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionManager {
    pub fn new() -> Self {
        Self {
            active_ids: RwLock::new(HashSet::new()),
            committed: AtomicU64::new(0),
            aborted: AtomicU64::new(0),
            global_version: AtomicU64::new(0),
        }
    }

    pub fn begin(&self) -> Transaction {
        let transaction = Transaction::new(TransactionId::new());
        self.active_ids
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(transaction.id());
        info!(transaction = %transaction.id(), "transaction started");
        transaction
    }

    pub fn finish_commit(&self, transaction: &Transaction) {
        if self.deactivate(transaction.id()) {
            self.committed.fetch_add(1, Ordering::SeqCst);
            info!(
                transaction = %transaction.id(),
                elapsed_ms = transaction.duration().as_millis() as u64,
                "transaction committed"
            );
        }
    }

    /// `discarded` is the change count reported by `Transaction::rollback`.
    pub fn finish_abort(&self, transaction: &Transaction, discarded: usize) {
        if self.deactivate(transaction.id()) {
            self.aborted.fetch_add(1, Ordering::SeqCst);
            info!(
                transaction = %transaction.id(),
                discarded,
                "transaction aborted"
            );
        }
    }

    fn deactivate(&self, id: TransactionId) -> bool {
        let removed = self
            .active_ids
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        if !removed {
            debug!(transaction = %id, "transaction already settled");
        }
        removed
    }

    pub fn is_active(&self, id: TransactionId) -> bool {
        self.active_ids
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&id)
    }

    pub fn next_version(&self) -> u64 {
        self.global_version.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn active_count(&self) -> u64 {
        self.active_ids
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len() as u64
    }

    pub fn committed_count(&self) -> u64 {
        self.committed.load(Ordering::SeqCst)
    }

    pub fn aborted_count(&self) -> u64 {
        self.aborted.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_and_commit() {
        let manager = TransactionManager::new();
        let mut txn = manager.begin();
        assert!(manager.is_active(txn.id()));
        assert_eq!(manager.active_count(), 1);

        txn.commit().unwrap();
        manager.finish_commit(&txn);
        assert!(!manager.is_active(txn.id()));
        assert_eq!(manager.committed_count(), 1);
        assert_eq!(manager.aborted_count(), 0);
    }

    #[test]
    fn test_settles_once() {
        let manager = TransactionManager::new();
        let txn = manager.begin();
        manager.finish_abort(&txn, 0);
        manager.finish_abort(&txn, 0);
        manager.finish_commit(&txn);
        assert_eq!(manager.aborted_count(), 1);
        assert_eq!(manager.committed_count(), 0);
    }

    #[test]
    fn test_versions_increase() {
        let manager = TransactionManager::new();
        let a = manager.next_version();
        let b = manager.next_version();
        assert!(b > a);
    }
}
