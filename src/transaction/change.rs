// ============================================================================
// Transaction Change Tracking
// ============================================================================
//
// Each Change is one document write recorded during a transaction. The log
// is replayed in order against committed data on COMMIT and dropped on
// ROLLBACK.
//
// ============================================================================

use crate::core::ObjectId;
use crate::storage::Namespace;
use crate::store::RawDocument;

#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    /// Insert a new document
    Insert {
        namespace: Namespace,
        id: ObjectId,
        document: RawDocument,
    },

    /// Replace an existing document with its updated body
    Replace {
        namespace: Namespace,
        id: ObjectId,
        document: RawDocument,
    },

    /// Delete an existing document
    Delete { namespace: Namespace, id: ObjectId },
}

impl Change {
    pub fn namespace(&self) -> &Namespace {
        match self {
            Change::Insert { namespace, .. }
            | Change::Replace { namespace, .. }
            | Change::Delete { namespace, .. } => namespace,
        }
    }

    pub fn document_id(&self) -> ObjectId {
        match self {
            Change::Insert { id, .. } | Change::Replace { id, .. } | Change::Delete { id, .. } => {
                *id
            }
        }
    }

    /// Body visible after this change, `None` for a delete.
    pub fn document(&self) -> Option<&RawDocument> {
        match self {
            Change::Insert { document, .. } | Change::Replace { document, .. } => Some(document),
            Change::Delete { .. } => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Change::Insert { .. } => "insert",
            Change::Replace { .. } => "replace",
            Change::Delete { .. } => "delete",
        }
    }
}
