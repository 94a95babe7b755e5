use super::collection::{Collection, Namespace};
use super::memory::StoreInner;
use crate::core::{RepoError, Result};
use crate::store::StoreSession;
use crate::transaction::{Change, Transaction};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Client session of the in-memory engine.
///
/// Hosts at most one transaction at a time. Dropping the session aborts a
/// transaction that is still running and releases the session exactly once.
pub struct MemorySession {
    id: u64,
    inner: Arc<StoreInner>,
    workspace: Mutex<Option<Transaction>>,
    in_transaction: AtomicBool,
}

impl MemorySession {
    pub(crate) fn new(inner: Arc<StoreInner>) -> Self {
        inner.session_opened();
        Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::SeqCst),
            inner,
            workspace: Mutex::new(None),
            in_transaction: AtomicBool::new(false),
        }
    }

    pub(crate) fn belongs_to(&self, inner: &Arc<StoreInner>) -> bool {
        Arc::ptr_eq(&self.inner, inner)
    }

    pub(crate) async fn lock_workspace(&self) -> MutexGuard<'_, Option<Transaction>> {
        self.workspace.lock().await
    }

    /// Number of writes recorded by the running transaction.
    pub async fn pending_changes(&self) -> usize {
        self.workspace
            .lock()
            .await
            .as_ref()
            .map(Transaction::change_count)
            .unwrap_or(0)
    }
}

#[async_trait]
impl StoreSession for MemorySession {
    fn id(&self) -> u64 {
        self.id
    }

    fn is_in_transaction(&self) -> bool {
        self.in_transaction.load(Ordering::SeqCst)
    }

    async fn start_transaction(&self) -> Result<()> {
        let mut workspace = self.workspace.lock().await;
        if let Some(existing) = workspace.as_ref() {
            return Err(RepoError::invalid_state(format!(
                "session {} already runs transaction {}",
                self.id,
                existing.id()
            )));
        }

        *workspace = Some(self.inner.transactions.begin());
        self.in_transaction.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn commit_transaction(&self) -> Result<()> {
        // Lock order: data, then workspace.
        let mut data = self.inner.data.write().await;
        let mut workspace = self.workspace.lock().await;
        let mut transaction = workspace.take().ok_or_else(|| {
            RepoError::invalid_state(format!("session {} has no transaction to commit", self.id))
        })?;
        self.in_transaction.store(false, Ordering::SeqCst);

        let conflict = transaction.observed_versions().find_map(|(namespace, id, observed)| {
            let current = data.get(namespace).and_then(|c| c.version_of(id));
            (current != observed).then(|| (namespace.clone(), *id))
        });

        if let Some((namespace, id)) = conflict {
            let discarded = transaction.rollback()?;
            self.inner.transactions.finish_abort(&transaction, discarded);
            warn!(
                transaction = %transaction.id(),
                namespace = %namespace,
                document = %id,
                "write conflict, transaction aborted"
            );
            return Err(RepoError::conflict(format!(
                "document {} in {} was modified by another transaction",
                id, namespace
            )));
        }

        let changes = transaction.commit()?;
        for change in changes {
            apply_change(&mut data, change, self.inner.transactions.next_version());
        }
        self.inner.transactions.finish_commit(&transaction);
        Ok(())
    }

    async fn abort_transaction(&self) -> Result<()> {
        let mut workspace = self.workspace.lock().await;
        let mut transaction = workspace.take().ok_or_else(|| {
            RepoError::invalid_state(format!("session {} has no transaction to abort", self.id))
        })?;
        self.in_transaction.store(false, Ordering::SeqCst);

        let discarded = transaction.rollback()?;
        self.inner.transactions.finish_abort(&transaction, discarded);
        Ok(())
    }
}

fn apply_change(
    data: &mut HashMap<Namespace, Collection>,
    change: Change,
    version: u64,
) {
    match change {
        Change::Insert {
            namespace,
            id,
            document,
        }
        | Change::Replace {
            namespace,
            id,
            document,
        } => data.entry(namespace).or_default().put(id, document, version),
        Change::Delete { namespace, id } => {
            if let Some(collection) = data.get_mut(&namespace) {
                collection.remove(&id);
            }
        }
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        if let Some(mut transaction) = self.workspace.get_mut().take() {
            if let Ok(discarded) = transaction.rollback() {
                self.inner.transactions.finish_abort(&transaction, discarded);
            }
            debug!(session = self.id, "session dropped with a running transaction");
        }
        self.inner.session_closed();
    }
}

impl std::fmt::Debug for MemorySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySession")
            .field("id", &self.id)
            .field("in_transaction", &self.is_in_transaction())
            .finish()
    }
}
