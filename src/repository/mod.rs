// ============================================================================
// Generic Repository
// ============================================================================
//
// One repository type serves every entity. Each operation reads the context
// once through `ambient_session`: a live transaction routes the store call
// through its session, otherwise the call runs autocommit.
//
// ============================================================================

pub mod traits;

pub use traits::{CommandRepository, QueryRepository};

use crate::context::DbContext;
use crate::core::{CREATED_AT_FIELD, Document, ObjectId, RepoError, Result};
use crate::query::{Filter, Pipeline, Projection, SortSpec};
use crate::storage::{MemoryStore, validate_collection_name};
use crate::store::{DocumentDatabase, DocumentStore, FindOptions, RawDocument, StoreSession};
use crate::update::build_update;
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::debug;

pub struct Repository<T: Document, D: DocumentStore = MemoryStore> {
    ctx: Arc<DbContext<D>>,
    collection: &'static str,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Document, D: DocumentStore> Clone for Repository<T, D> {
    fn clone(&self) -> Self {
        Self {
            ctx: Arc::clone(&self.ctx),
            collection: self.collection,
            _entity: PhantomData,
        }
    }
}

impl<T: Document, D: DocumentStore> Repository<T, D> {
    /// # Errors
    /// `Configuration` when the entity's collection name is invalid.
    pub fn new(ctx: Arc<DbContext<D>>) -> Result<Self> {
        validate_collection_name(T::COLLECTION)?;
        Ok(Self {
            ctx,
            collection: T::COLLECTION,
            _entity: PhantomData,
        })
    }

    pub fn collection_name(&self) -> &'static str {
        self.collection
    }

    pub fn context(&self) -> &Arc<DbContext<D>> {
        &self.ctx
    }

    /// The live session when a transaction is active; `None` means the
    /// store call runs autocommit.
    fn ambient_session(&self) -> Option<Arc<D::Session>> {
        self.ctx
            .current_transaction()
            .filter(|session| session.is_in_transaction())
    }

    async fn bounded<R>(
        &self,
        operation: &'static str,
        in_transaction: bool,
        call: impl Future<Output = Result<R>> + Send,
    ) -> Result<R> {
        debug!(
            collection = self.collection,
            operation,
            in_transaction,
            "store call"
        );
        match self.ctx.config().operation_timeout {
            Some(limit) => tokio::time::timeout(limit, call).await.map_err(|_| {
                RepoError::transient(format!(
                    "{} on '{}' timed out after {:?}",
                    operation, self.collection, limit
                ))
            })?,
            None => call.await,
        }
    }

    async fn find_raw(&self, operation: &'static str, options: FindOptions) -> Result<Vec<RawDocument>> {
        options.validate()?;
        let session = self.ambient_session();
        self.bounded(
            operation,
            session.is_some(),
            self.ctx
                .database()
                .find(session.as_deref(), self.collection, &options),
        )
        .await
    }
}

/// Insert form of an entity. `createdAt` is written once, from the id, so
/// filters, sorts and groups can address it.
fn encode_new<T: Document>(entity: &T) -> Result<RawDocument> {
    let mut document = encode(entity)?;
    if let Some(created_at) = entity.created_at() {
        document.insert(
            CREATED_AT_FIELD.to_string(),
            serde_json::to_value(created_at)?,
        );
    }
    Ok(document)
}

fn encode<E: Serialize>(entity: &E) -> Result<RawDocument> {
    match serde_json::to_value(entity)? {
        JsonValue::Object(map) => Ok(map),
        other => Err(RepoError::Serialization(format!(
            "entity must serialize to an object, got {}",
            other
        ))),
    }
}

fn decode<R: DeserializeOwned>(document: RawDocument) -> Result<R> {
    Ok(serde_json::from_value(JsonValue::Object(document))?)
}

fn decode_all<R: DeserializeOwned>(documents: Vec<RawDocument>) -> Result<Vec<R>> {
    documents.into_iter().map(decode).collect()
}

#[async_trait]
impl<T: Document, D: DocumentStore> QueryRepository<T> for Repository<T, D> {
    async fn count(&self, filter: &Filter) -> Result<u64> {
        filter.validate()?;
        let session = self.ambient_session();
        self.bounded(
            "count",
            session.is_some(),
            self.ctx
                .database()
                .count_documents(session.as_deref(), self.collection, filter),
        )
        .await
    }

    async fn filter_by(&self, filter: &Filter) -> Result<Vec<T>> {
        let docs = self
            .find_raw("filter_by", FindOptions::new(filter.clone()))
            .await?;
        decode_all(docs)
    }

    async fn filter_by_projected<P>(&self, filter: &Filter, projection: &Projection) -> Result<Vec<P>>
    where
        P: DeserializeOwned + Send + 'static,
    {
        let options = FindOptions::new(filter.clone()).projection(projection.clone());
        decode_all(self.find_raw("filter_by_projected", options).await?)
    }

    async fn find_by_id(&self, id: &ObjectId) -> Result<T> {
        // A limit of 2 tells one match apart from several.
        let options = FindOptions::new(Filter::id_eq(id)).limit(2);
        let docs = self.find_raw("find_by_id", options).await?;
        let found = docs.len();

        let mut docs = docs.into_iter();
        match (docs.next(), docs.next()) {
            (Some(doc), None) => decode(doc),
            _ => Err(RepoError::not_found(format!(
                "expected exactly one document with _id {} in '{}', found {}",
                id, self.collection, found
            ))),
        }
    }

    async fn find_one(&self, filter: &Filter) -> Result<Option<T>> {
        let options = FindOptions::new(filter.clone()).limit(1);
        let docs = self.find_raw("find_one", options).await?;
        docs.into_iter().next().map(decode).transpose()
    }

    async fn find_one_projected<P>(&self, filter: &Filter, projection: &Projection) -> Result<Option<P>>
    where
        P: DeserializeOwned + Send + 'static,
    {
        let options = FindOptions::new(filter.clone())
            .limit(1)
            .projection(projection.clone());
        let docs = self.find_raw("find_one_projected", options).await?;
        docs.into_iter().next().map(decode).transpose()
    }

    async fn paginate(
        &self,
        filter: &Filter,
        sort: &SortSpec,
        page_size: u64,
        offset: u64,
    ) -> Result<Vec<T>> {
        filter.validate()?;
        sort.validate()?;
        if page_size == 0 {
            return Ok(Vec::new());
        }
        let options = FindOptions::new(filter.clone())
            .sort(sort.clone())
            .skip(offset)
            .limit(page_size);
        decode_all(self.find_raw("paginate", options).await?)
    }

    async fn paginate_projected<P>(
        &self,
        filter: &Filter,
        sort: &SortSpec,
        projection: &Projection,
        page_size: u64,
        offset: u64,
    ) -> Result<Vec<P>>
    where
        P: DeserializeOwned + Send + 'static,
    {
        filter.validate()?;
        sort.validate()?;
        projection.validate()?;
        if page_size == 0 {
            return Ok(Vec::new());
        }
        let options = FindOptions::new(filter.clone())
            .sort(sort.clone())
            .skip(offset)
            .limit(page_size)
            .projection(projection.clone());
        decode_all(self.find_raw("paginate_projected", options).await?)
    }

    async fn aggregate<R>(&self, pipeline: &Pipeline) -> Result<Vec<R>>
    where
        R: DeserializeOwned + Send + 'static,
    {
        pipeline.validate()?;
        let session = self.ambient_session();
        let docs = self
            .bounded(
                "aggregate",
                session.is_some(),
                self.ctx
                    .database()
                    .aggregate(session.as_deref(), self.collection, pipeline),
            )
            .await?;
        decode_all(docs)
    }
}

#[async_trait]
impl<T: Document, D: DocumentStore> CommandRepository<T> for Repository<T, D> {
    async fn insert_one(&self, entity: &mut T) -> Result<()> {
        self.insert_many(std::slice::from_mut(entity)).await
    }

    async fn insert_many(&self, entities: &mut [T]) -> Result<()> {
        if entities.is_empty() {
            return Ok(());
        }

        for entity in entities.iter_mut() {
            if entity.id().is_none() {
                entity.base_mut().assign_id(ObjectId::new());
            }
        }
        let documents = entities
            .iter()
            .map(encode_new)
            .collect::<Result<Vec<_>>>()?;

        let session = self.ambient_session();
        self.bounded(
            "insert_many",
            session.is_some(),
            self.ctx
                .database()
                .insert_many(session.as_deref(), self.collection, documents),
        )
        .await
    }

    async fn update_one(&self, entity: &T) -> Result<u64> {
        let Some(id) = entity.id() else {
            debug!(collection = self.collection, "update_one without an id matches nothing");
            return Ok(0);
        };
        let update = build_update(entity)?;

        let session = self.ambient_session();
        let outcome = self
            .bounded(
                "update_one",
                session.is_some(),
                self.ctx
                    .database()
                    .update_one(session.as_deref(), self.collection, &id, &update),
            )
            .await?;
        Ok(outcome.modified)
    }

    async fn delete_by_id(&self, id: &ObjectId) -> Result<u64> {
        let session = self.ambient_session();
        let filter = Filter::id_eq(id);
        let outcome = self
            .bounded(
                "delete_by_id",
                session.is_some(),
                self.ctx
                    .database()
                    .delete_one(session.as_deref(), self.collection, &filter),
            )
            .await?;
        Ok(outcome.deleted)
    }
}

impl<T: Document, D: DocumentStore> std::fmt::Debug for Repository<T, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("collection", &self.collection)
            .field("context", &self.ctx)
            .finish()
    }
}
