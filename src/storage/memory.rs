use super::collection::{Collection, Namespace, validate_database_name};
use super::session::MemorySession;
use crate::core::{ID_FIELD, ObjectId, RepoError, Result};
use crate::query::pipeline::saturating_usize;
use crate::query::{Filter, Pipeline};
use crate::store::{
    DeleteOutcome, DocumentDatabase, DocumentStore, FindOptions, RawDocument, UpdateOutcome,
};
use crate::transaction::{Change, Transaction, TransactionManager};
use crate::update::UpdateDefinition;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{MutexGuard, RwLock};
use tracing::trace;

/// Shared state behind every handle of one in-memory store.
pub(crate) struct StoreInner {
    /// Committed documents per namespace
    pub(crate) data: RwLock<HashMap<Namespace, Collection>>,
    pub(crate) transactions: TransactionManager,
    open_sessions: AtomicU64,
}

impl StoreInner {
    pub(crate) fn session_opened(&self) {
        self.open_sessions.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn session_closed(&self) {
        self.open_sessions.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Point-in-time counters of a store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub open_sessions: u64,
    pub active_transactions: u64,
    pub committed_transactions: u64,
    pub aborted_transactions: u64,
}

/// In-process document store with sessions and multi-document transactions.
///
/// Cloning is cheap; clones share the same data.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<StoreInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(StoreInner {
                data: RwLock::new(HashMap::new()),
                transactions: TransactionManager::new(),
                open_sessions: AtomicU64::new(0),
            }),
        }
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            open_sessions: self.inner.open_sessions.load(Ordering::SeqCst),
            active_transactions: self.inner.transactions.active_count(),
            committed_transactions: self.inner.transactions.committed_count(),
            aborted_transactions: self.inner.transactions.aborted_count(),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("stats", &self.stats())
            .finish()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    type Session = MemorySession;
    type Database = MemoryDatabase;

    async fn start_session(&self) -> Result<MemorySession> {
        Ok(MemorySession::new(Arc::clone(&self.inner)))
    }

    fn database(&self, name: &str) -> Result<MemoryDatabase> {
        validate_database_name(name)?;
        Ok(MemoryDatabase {
            name: name.to_string(),
            inner: Arc::clone(&self.inner),
        })
    }
}

/// Handle to one database of a [`MemoryStore`].
#[derive(Clone)]
pub struct MemoryDatabase {
    name: String,
    inner: Arc<StoreInner>,
}

type Workspace<'a> = MutexGuard<'a, Option<Transaction>>;

impl MemoryDatabase {
    fn namespace(&self, collection: &str) -> Namespace {
        Namespace::new(self.name.as_str(), collection)
    }

    /// Locks the session's workspace. Callers hold the data lock already.
    async fn workspace<'s>(&self, session: Option<&'s MemorySession>) -> Result<Option<Workspace<'s>>> {
        match session {
            None => Ok(None),
            Some(session) if !session.belongs_to(&self.inner) => Err(RepoError::invalid_state(
                "session was started by a different store",
            )),
            Some(session) => Ok(Some(session.lock_workspace().await)),
        }
    }

    /// Committed documents merged with the transaction's pending writes.
    fn visible(
        data: &HashMap<Namespace, Collection>,
        namespace: &Namespace,
        transaction: Option<&Transaction>,
    ) -> BTreeMap<ObjectId, RawDocument> {
        let mut view: BTreeMap<ObjectId, RawDocument> = data
            .get(namespace)
            .map(|c| c.iter().map(|(id, doc)| (*id, doc.body.clone())).collect())
            .unwrap_or_default();

        if let Some(pending) = transaction.and_then(|t| t.pending(namespace)) {
            for (id, doc) in pending {
                match doc {
                    Some(body) => {
                        view.insert(*id, body.clone());
                    }
                    None => {
                        view.remove(id);
                    }
                }
            }
        }
        view
    }

    async fn view(
        &self,
        session: Option<&MemorySession>,
        namespace: &Namespace,
    ) -> Result<BTreeMap<ObjectId, RawDocument>> {
        let data = self.inner.data.read().await;
        let workspace = self.workspace(session).await?;
        let transaction = workspace.as_deref().and_then(Option::as_ref);
        Ok(Self::visible(&data, namespace, transaction))
    }

    /// Names of the collections holding committed documents.
    pub async fn collection_names(&self) -> Vec<String> {
        let data = self.inner.data.read().await;
        let mut names: Vec<String> = data
            .iter()
            .filter(|(ns, c)| ns.database == self.name && !c.is_empty())
            .map(|(ns, _)| ns.collection.clone())
            .collect();
        names.sort();
        names
    }
}

fn document_id(document: &RawDocument) -> Result<ObjectId> {
    match document.get(ID_FIELD) {
        Some(JsonValue::String(hex)) => ObjectId::parse_str(hex),
        Some(other) => Err(RepoError::invalid_query(format!(
            "_id must be an object id string, got {}",
            other
        ))),
        None => Err(RepoError::invalid_query("document is missing _id")),
    }
}

#[async_trait]
impl DocumentDatabase<MemorySession> for MemoryDatabase {
    fn name(&self) -> &str {
        &self.name
    }

    async fn count_documents(
        &self,
        session: Option<&MemorySession>,
        collection: &str,
        filter: &Filter,
    ) -> Result<u64> {
        let view = self.view(session, &self.namespace(collection)).await?;
        Ok(view.values().filter(|doc| filter.matches(doc)).count() as u64)
    }

    async fn find(
        &self,
        session: Option<&MemorySession>,
        collection: &str,
        options: &FindOptions,
    ) -> Result<Vec<RawDocument>> {
        let view = self.view(session, &self.namespace(collection)).await?;

        let mut docs: Vec<RawDocument> = view
            .into_values()
            .filter(|doc| options.filter.matches(doc))
            .collect();
        options.sort.sort(&mut docs);

        let limit = options.limit.map(saturating_usize).unwrap_or(usize::MAX);
        let docs = docs
            .into_iter()
            .skip(saturating_usize(options.skip))
            .take(limit);

        Ok(match &options.projection {
            Some(projection) => docs.map(|doc| projection.apply(&doc)).collect(),
            None => docs.collect(),
        })
    }

    async fn insert_many(
        &self,
        session: Option<&MemorySession>,
        collection: &str,
        documents: Vec<RawDocument>,
    ) -> Result<()> {
        let namespace = self.namespace(collection);

        let mut batch = Vec::with_capacity(documents.len());
        let mut seen = HashSet::with_capacity(documents.len());
        for document in documents {
            let id = document_id(&document)?;
            if !seen.insert(id) {
                return Err(RepoError::conflict(format!(
                    "duplicate _id {} in insert batch for {}",
                    id, namespace
                )));
            }
            batch.push((id, document));
        }

        let mut data = self.inner.data.write().await;
        let mut workspace = self.workspace(session).await?;

        match workspace.as_deref_mut().and_then(Option::as_mut) {
            Some(transaction) => {
                let view = Self::visible(&data, &namespace, Some(&*transaction));
                if let Some((id, _)) = batch.iter().find(|(id, _)| view.contains_key(id)) {
                    return Err(RepoError::conflict(format!(
                        "document {} already exists in {}",
                        id, namespace
                    )));
                }
                for (id, document) in batch {
                    let version = data.get(&namespace).and_then(|c| c.version_of(&id));
                    transaction.observe(&namespace, id, version);
                    transaction.record_change(Change::Insert {
                        namespace: namespace.clone(),
                        id,
                        document,
                    })?;
                }
            }
            None => {
                let target = data.entry(namespace.clone()).or_default();
                if let Some((id, _)) = batch.iter().find(|(id, _)| target.contains(id)) {
                    return Err(RepoError::conflict(format!(
                        "document {} already exists in {}",
                        id, namespace
                    )));
                }
                for (id, document) in batch {
                    target.put(id, document, self.inner.transactions.next_version());
                }
            }
        }

        trace!(namespace = %namespace, "insert_many applied");
        Ok(())
    }

    async fn update_one(
        &self,
        session: Option<&MemorySession>,
        collection: &str,
        id: &ObjectId,
        update: &UpdateDefinition,
    ) -> Result<UpdateOutcome> {
        if update.contains(ID_FIELD) {
            return Err(RepoError::invalid_query("_id cannot be updated"));
        }
        let namespace = self.namespace(collection);

        let mut data = self.inner.data.write().await;
        let mut workspace = self.workspace(session).await?;

        match workspace.as_deref_mut().and_then(Option::as_mut) {
            Some(transaction) => {
                let committed = data.get(&namespace).and_then(|c| c.get(id));
                let current = match transaction.pending_document(&namespace, id) {
                    Some(pending) => pending.clone(),
                    None => committed.map(|doc| doc.body.clone()),
                };
                let Some(mut body) = current else {
                    return Ok(UpdateOutcome::default());
                };
                if !update.apply(&mut body) {
                    return Ok(UpdateOutcome {
                        matched: 1,
                        modified: 0,
                    });
                }

                transaction.observe(&namespace, *id, committed.map(|doc| doc.version));
                transaction.record_change(Change::Replace {
                    namespace,
                    id: *id,
                    document: body,
                })?;
            }
            None => {
                let version = self.inner.transactions.next_version();
                let Some(target) = data.get_mut(&namespace) else {
                    return Ok(UpdateOutcome::default());
                };
                let Some(stored) = target.get(id) else {
                    return Ok(UpdateOutcome::default());
                };
                let mut body = stored.body.clone();
                if !update.apply(&mut body) {
                    return Ok(UpdateOutcome {
                        matched: 1,
                        modified: 0,
                    });
                }
                target.put(*id, body, version);
            }
        }

        Ok(UpdateOutcome {
            matched: 1,
            modified: 1,
        })
    }

    async fn delete_one(
        &self,
        session: Option<&MemorySession>,
        collection: &str,
        filter: &Filter,
    ) -> Result<DeleteOutcome> {
        let namespace = self.namespace(collection);

        let mut data = self.inner.data.write().await;
        let mut workspace = self.workspace(session).await?;
        let transaction = workspace.as_deref_mut().and_then(Option::as_mut);

        let view = Self::visible(&data, &namespace, transaction.as_deref());
        let Some(id) = view
            .iter()
            .find(|(_, doc)| filter.matches(doc))
            .map(|(id, _)| *id)
        else {
            return Ok(DeleteOutcome::default());
        };

        match transaction {
            Some(transaction) => {
                let version = data.get(&namespace).and_then(|c| c.version_of(&id));
                transaction.observe(&namespace, id, version);
                transaction.record_change(Change::Delete { namespace, id })?;
            }
            None => {
                if let Some(target) = data.get_mut(&namespace) {
                    target.remove(&id);
                }
            }
        }

        Ok(DeleteOutcome { deleted: 1 })
    }

    async fn aggregate(
        &self,
        session: Option<&MemorySession>,
        collection: &str,
        pipeline: &Pipeline,
    ) -> Result<Vec<RawDocument>> {
        let view = self.view(session, &self.namespace(collection)).await?;
        Ok(pipeline.execute(view.into_values().collect()))
    }
}
