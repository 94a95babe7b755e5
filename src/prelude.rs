//! Recommended imports grouped by abstraction level.
//!
//! `dx` covers application code working through repositories.
//! `advanced` exposes the driver seam for custom stores.

pub mod dx {
    //! Entities, the unit-of-work context and repositories.
    pub use crate::{
        CommandRepository, ContextConfig, DbContext, Document, DocumentBase, Filter, ObjectId,
        Page, Projection, QueryRepository, RepoError, Repository, SortSpec, TransactionBoundary,
        TransactionMode,
    };
}

pub mod advanced {
    //! Driver seam and the bundled in-memory engine.
    pub use crate::query::{GroupStage, Stage};
    pub use crate::storage::{MemoryDatabase, MemorySession, MemoryStore, StoreStats};
    pub use crate::store::{
        DeleteOutcome, DocumentDatabase, DocumentStore, FindOptions, RawDocument, StoreSession,
        UpdateOutcome,
    };
    pub use crate::update::{UpdateDefinition, build_update, build_update_at};
}
