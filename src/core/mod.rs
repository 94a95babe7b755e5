pub mod document;
pub mod error;
pub mod object_id;

pub use document::{
    CREATED_AT_FIELD, CREATED_BY_FIELD, Document, DocumentBase, FieldValue, ID_FIELD,
    IMMUTABLE_FIELDS, MODIFIED_AT_FIELD, MODIFIED_BY_FIELD,
};
pub use error::{FieldErrors, RepoError, Result};
pub use object_id::ObjectId;
