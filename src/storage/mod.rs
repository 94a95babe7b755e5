// ============================================================================
// In-memory document engine
// ============================================================================
//
// Databases -> collections -> documents ordered by ObjectId. Autocommit
// writes apply under the engine lock; transactional writes go through the
// session workspace and are replayed on commit.
//
// ============================================================================

pub mod collection;
pub mod memory;
pub mod session;

pub use collection::{
    Collection, Namespace, StoredDocument, validate_collection_name, validate_database_name,
};
pub use memory::{MemoryDatabase, MemoryStore, StoreStats};
pub use session::MemorySession;
