// ============================================================================
// Transaction State Management
// ============================================================================
//
// Each transaction moves through Active -> Committed/Aborted.
//
// Isolation: read-committed plus own writes.
// - Reads see committed data merged with the transaction's pending writes
// - Writes stay in the transaction's workspace until commit
// - The first time a document is touched its committed version is recorded;
//   commit fails if any recorded version has moved (first writer wins)
//
// ============================================================================

use super::Change;
use crate::core::{ObjectId, RepoError, Result};
use crate::storage::Namespace;
use crate::store::RawDocument;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

/// Global transaction ID counter
static NEXT_TXN_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(pub u64);

impl TransactionId {
    pub fn new() -> Self {
        TransactionId(NEXT_TXN_ID.fetch_add(1, Ordering::SeqCst))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "txn_{}", self.0)
    }
}

/// State transitions:
/// ```text
/// Active ──commit──> Committed
///   │
///   └──rollback──> Aborted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    Aborted,
}

impl TransactionState {
    pub fn is_active(&self) -> bool {
        matches!(self, TransactionState::Active)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionState::Committed | TransactionState::Aborted
        )
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

/// Pending state of one document inside a transaction: `Some` is the body
/// the transaction will write, `None` a pending delete.
pub type PendingDocument = Option<RawDocument>;

/// A multi-document transaction owned by one session.
#[derive(Debug)]
pub struct Transaction {
    id: TransactionId,

    state: TransactionState,

    /// Latest pending state per touched document
    overlay: HashMap<Namespace, BTreeMap<ObjectId, PendingDocument>>,

    /// Committed version observed when each document was first touched
    /// (`None` if it did not exist)
    observed: HashMap<(Namespace, ObjectId), Option<u64>>,

    /// Changes in execution order, replayed on commit
    changes: Vec<Change>,

    start_time: std::time::Instant,
}

impl Transaction {
    pub fn new(id: TransactionId) -> Self {
        Self {
            id,
            state: TransactionState::Active,
            overlay: HashMap::new(),
            observed: HashMap::new(),
            changes: Vec::new(),
            start_time: std::time::Instant::now(),
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    pub fn change_count(&self) -> usize {
        self.changes.len()
    }

    pub fn duration(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }

    /// Pending writes for one collection, ordered by identity.
    pub fn pending(&self, namespace: &Namespace) -> Option<&BTreeMap<ObjectId, PendingDocument>> {
        self.overlay.get(namespace)
    }

    /// Pending state of a single document, if the transaction touched it.
    pub fn pending_document(&self, namespace: &Namespace, id: &ObjectId) -> Option<&PendingDocument> {
        self.overlay.get(namespace).and_then(|docs| docs.get(id))
    }

    /// Records the committed version of a document the first time the
    /// transaction touches it; later calls keep the first observation.
    pub fn observe(&mut self, namespace: &Namespace, id: ObjectId, version: Option<u64>) {
        self.observed
            .entry((namespace.clone(), id))
            .or_insert(version);
    }

    pub fn observed_versions(&self) -> impl Iterator<Item = (&Namespace, &ObjectId, Option<u64>)> {
        self.observed
            .iter()
            .map(|((namespace, id), version)| (namespace, id, *version))
    }

    /// Record a change in this transaction
    ///
    /// # Errors
    /// Returns `InvalidState` if the transaction is not active
    pub fn record_change(&mut self, change: Change) -> Result<()> {
        if !self.state.is_active() {
            return Err(RepoError::invalid_state(format!(
                "Cannot record change: transaction {} is {}",
                self.id, self.state
            )));
        }

        self.overlay
            .entry(change.namespace().clone())
            .or_default()
            .insert(change.document_id(), change.document().cloned());
        self.changes.push(change);
        Ok(())
    }

    /// Mark transaction as committed and hand back its change log
    ///
    /// # Errors
    /// Returns `InvalidState` if the transaction is not active
    pub fn commit(&mut self) -> Result<Vec<Change>> {
        if !self.state.is_active() {
            return Err(RepoError::invalid_state(format!(
                "Cannot commit: transaction {} is already {}",
                self.id, self.state
            )));
        }

        self.state = TransactionState::Committed;
        self.overlay.clear();
        self.observed.clear();
        Ok(std::mem::take(&mut self.changes))
    }

    /// Mark transaction as aborted and discard changes, returning how many
    /// were discarded
    ///
    /// # Errors
    /// Returns `InvalidState` if the transaction is not active
    pub fn rollback(&mut self) -> Result<usize> {
        if !self.state.is_active() {
            return Err(RepoError::invalid_state(format!(
                "Cannot rollback: transaction {} is already {}",
                self.id, self.state
            )));
        }

        let discarded = self.changes.len();
        self.changes.clear();
        self.overlay.clear();
        self.observed.clear();
        self.state = TransactionState::Aborted;
        Ok(discarded)
    }
}
