// ============================================================================
// Store Driver Interface
// ============================================================================
//
// The repository layer programs against these traits. Every data operation
// takes `Option<&Session>`: `Some` runs it inside that session's transaction,
// `None` runs it autocommit.
//
// ============================================================================

use crate::core::{ObjectId, Result};
use crate::query::{Filter, Pipeline, Projection, SortSpec};
use crate::update::UpdateDefinition;
use async_trait::async_trait;
use serde_json::{Map, Value as JsonValue};
use std::any::Any;

pub type RawDocument = Map<String, JsonValue>;

/// Options for a `find` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    pub filter: Filter,
    pub sort: SortSpec,
    pub skip: u64,
    pub limit: Option<u64>,
    pub projection: Option<Projection>,
}

impl FindOptions {
    pub fn new(filter: Filter) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }

    pub fn sort(mut self, sort: SortSpec) -> Self {
        self.sort = sort;
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = skip;
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn projection(mut self, projection: Projection) -> Self {
        self.projection = Some(projection);
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.filter.validate()?;
        self.sort.validate()?;
        match &self.projection {
            Some(projection) => projection.validate(),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOutcome {
    pub matched: u64,
    pub modified: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub deleted: u64,
}

/// A client session able to host one transaction at a time.
#[async_trait]
pub trait StoreSession: Send + Sync + 'static {
    fn id(&self) -> u64;

    fn is_in_transaction(&self) -> bool;

    /// Fails with `InvalidState` if a transaction is already running.
    async fn start_transaction(&self) -> Result<()>;

    /// Fails with `InvalidState` if no transaction is running, with
    /// `Conflict` if the transaction lost a write race (it is aborted).
    async fn commit_transaction(&self) -> Result<()>;

    async fn abort_transaction(&self) -> Result<()>;
}

/// A logical database: a set of named collections.
#[async_trait]
pub trait DocumentDatabase<S: StoreSession>: Any + Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn count_documents(
        &self,
        session: Option<&S>,
        collection: &str,
        filter: &Filter,
    ) -> Result<u64>;

    async fn find(
        &self,
        session: Option<&S>,
        collection: &str,
        options: &FindOptions,
    ) -> Result<Vec<RawDocument>>;

    /// Inserts all documents or none. Every document must carry `_id`.
    async fn insert_many(
        &self,
        session: Option<&S>,
        collection: &str,
        documents: Vec<RawDocument>,
    ) -> Result<()>;

    /// Applies `update` to the document with identity `id`. Never upserts.
    async fn update_one(
        &self,
        session: Option<&S>,
        collection: &str,
        id: &ObjectId,
        update: &UpdateDefinition,
    ) -> Result<UpdateOutcome>;

    async fn delete_one(
        &self,
        session: Option<&S>,
        collection: &str,
        filter: &Filter,
    ) -> Result<DeleteOutcome>;

    async fn aggregate(
        &self,
        session: Option<&S>,
        collection: &str,
        pipeline: &Pipeline,
    ) -> Result<Vec<RawDocument>>;
}

/// Entry point of a driver: hands out sessions and database handles.
#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    type Session: StoreSession;
    type Database: DocumentDatabase<Self::Session>;

    async fn start_session(&self) -> Result<Self::Session>;

    fn database(&self, name: &str) -> Result<Self::Database>;
}
