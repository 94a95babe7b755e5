// ============================================================================
// docrepo Library
// ============================================================================
//
// Transactional document repositories:
// - `DbContext`: unit of work owning at most one ambient session
// - `Repository<T>`: generic CRUD that joins the ambient transaction
// - `build_update`: sparse `$set` updates derived from a mutated entity
//
// ============================================================================

//! Document repositories with an ambient unit-of-work transaction.
//!
//! ```
//! use docrepo::prelude::dx::*;
//! use serde::{Deserialize, Serialize};
//! use std::sync::Arc;
//!
//! #[derive(Debug, Serialize, Deserialize, Document)]
//! #[document(collection = "users")]
//! #[serde(rename_all = "camelCase")]
//! struct User {
//!     #[document(base)]
//!     #[serde(flatten)]
//!     base: DocumentBase,
//!     display_name: Option<String>,
//! }
//!
//! # tokio_test::block_on(async {
//! let ctx = Arc::new(DbContext::connect(ContextConfig::memory("app"))?);
//! let users: Repository<User> = Repository::new(ctx.clone())?;
//!
//! let boundary = TransactionBoundary::new(ctx);
//! boundary
//!     .run(TransactionMode::Required, || async {
//!         let mut user = User { base: DocumentBase::new(), display_name: Some("Ada".into()) };
//!         users.insert_one(&mut user).await
//!     })
//!     .await?;
//!
//! assert_eq!(users.count(&Filter::all()).await?, 1);
//! # Ok::<(), RepoError>(())
//! # }).unwrap();
//! ```

extern crate self as docrepo;

pub mod boundary;
pub mod context;
pub mod core;
pub mod identity;
pub mod logging;
pub mod prelude;
pub mod query;
pub mod repository;
pub mod response;
pub mod storage;
pub mod store;
pub mod transaction;
pub mod update;

pub use boundary::{TransactionBoundary, TransactionMode};
pub use context::{ContextConfig, DbContext};
pub use core::{
    CREATED_AT_FIELD, CREATED_BY_FIELD, Document, DocumentBase, FieldErrors, FieldValue,
    ID_FIELD, MODIFIED_AT_FIELD, MODIFIED_BY_FIELD, ObjectId, RepoError, Result,
};
pub use docrepo_derive::Document;
pub use identity::{IdentityProvider, StaticIdentity};
pub use logging::{ErrorEvent, EventLogger, TracingEventLogger};
pub use query::{Filter, Pipeline, Projection, SortSpec};
pub use repository::{CommandRepository, QueryRepository, Repository};
pub use response::{ErrorReporter, ErrorResponse, Page, RequestInfo};
pub use storage::{MemoryDatabase, MemorySession, MemoryStore};
pub use store::{DocumentDatabase, DocumentStore, StoreSession};
pub use update::{UpdateDefinition, build_update, build_update_at};

#[doc(hidden)]
pub mod __private {
    pub use serde_json;
}
