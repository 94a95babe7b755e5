use crate::core::{Document, ObjectId, Result};
use crate::query::{Filter, Pipeline, Projection, SortSpec};
use async_trait::async_trait;
use serde::de::DeserializeOwned;

/// Read side of a repository.
///
/// Every call joins the context's ambient transaction when one is active
/// and runs autocommit otherwise.
#[async_trait]
pub trait QueryRepository<T: Document>: Send + Sync {
    /// Number of documents matching `filter`.
    async fn count(&self, filter: &Filter) -> Result<u64>;

    async fn filter_by(&self, filter: &Filter) -> Result<Vec<T>>;

    async fn filter_by_projected<P>(&self, filter: &Filter, projection: &Projection) -> Result<Vec<P>>
    where
        P: DeserializeOwned + Send + 'static;

    /// The document with identity `id`.
    ///
    /// # Errors
    /// `NotFound` when no document, or more than one, matches.
    async fn find_by_id(&self, id: &ObjectId) -> Result<T>;

    /// First match in identifier order.
    async fn find_one(&self, filter: &Filter) -> Result<Option<T>>;

    async fn find_one_projected<P>(&self, filter: &Filter, projection: &Projection) -> Result<Option<P>>
    where
        P: DeserializeOwned + Send + 'static;

    /// At most `page_size` matches starting at `offset`, in `sort` order.
    async fn paginate(
        &self,
        filter: &Filter,
        sort: &SortSpec,
        page_size: u64,
        offset: u64,
    ) -> Result<Vec<T>>;

    async fn paginate_projected<P>(
        &self,
        filter: &Filter,
        sort: &SortSpec,
        projection: &Projection,
        page_size: u64,
        offset: u64,
    ) -> Result<Vec<P>>
    where
        P: DeserializeOwned + Send + 'static;

    async fn aggregate<R>(&self, pipeline: &Pipeline) -> Result<Vec<R>>
    where
        R: DeserializeOwned + Send + 'static;
}

/// Write side of a repository.
#[async_trait]
pub trait CommandRepository<T: Document>: Send + Sync {
    /// Persists `entity`, assigning a fresh identity when it has none.
    ///
    /// # Errors
    /// `Conflict` when the identity already exists.
    async fn insert_one(&self, entity: &mut T) -> Result<()>;

    /// Persists all entities or none.
    async fn insert_many(&self, entities: &mut [T]) -> Result<()>;

    /// Writes the entity's non-null fields and a fresh `modifiedAt` to the
    /// stored document with the same identity. Never inserts.
    ///
    /// Returns the number of modified documents (0 or 1).
    async fn update_one(&self, entity: &T) -> Result<u64>;

    /// Returns the number of deleted documents (0 or 1).
    async fn delete_by_id(&self, id: &ObjectId) -> Result<u64>;
}
