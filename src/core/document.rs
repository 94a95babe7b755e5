//! Base shape of every stored document.

use super::error::Result;
use super::object_id::ObjectId;
use crate::identity::IdentityProvider;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

pub const ID_FIELD: &str = "_id";
pub const CREATED_AT_FIELD: &str = "createdAt";
pub const CREATED_BY_FIELD: &str = "createdBy";
pub const MODIFIED_AT_FIELD: &str = "modifiedAt";
pub const MODIFIED_BY_FIELD: &str = "modifiedBy";

/// Fields that are fixed once a document has been created.
pub const IMMUTABLE_FIELDS: [&str; 3] = [ID_FIELD, CREATED_AT_FIELD, CREATED_BY_FIELD];

/// Identity and audit fields shared by every entity.
///
/// Embed it in an entity with `#[serde(flatten)]` and mark the field with
/// `#[document(base)]`:
///
/// ```ignore
/// #[derive(Serialize, Deserialize, Document)]
/// #[document(collection = "customers")]
/// struct Customer {
///     #[serde(flatten)]
///     #[document(base)]
///     base: DocumentBase,
///     name: Option<String>,
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentBase {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    id: Option<ObjectId>,

    #[serde(rename = "createdBy", default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,

    #[serde(rename = "modifiedAt", default, skip_serializing_if = "Option::is_none")]
    modified_at: Option<DateTime<Utc>>,

    #[serde(rename = "modifiedBy", default, skip_serializing_if = "Option::is_none")]
    pub modified_by: Option<String>,
}

impl DocumentBase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Base for an already persisted document, used to address updates.
    pub fn with_id(id: ObjectId) -> Self {
        Self {
            id: Some(id),
            ..Self::default()
        }
    }

    pub fn id(&self) -> Option<ObjectId> {
        self.id
    }

    /// Derived from the identity; `None` until the document is persisted.
    /// The repository also writes it to storage on insert so queries can
    /// filter and sort on `createdAt`.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.id.map(|id| id.timestamp())
    }

    pub fn modified_at(&self) -> Option<DateTime<Utc>> {
        self.modified_at
    }

    pub fn stamp_creator(&mut self, identity: &dyn IdentityProvider) {
        self.created_by = identity.user_id();
    }

    pub fn stamp_modifier(&mut self, identity: &dyn IdentityProvider) {
        self.modified_by = identity.user_id();
    }

    pub(crate) fn assign_id(&mut self, id: ObjectId) {
        self.id = Some(id);
    }
}

/// Field descriptor produced for the partial-update builder.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldValue {
    /// Serialized (storage) name of the field.
    pub name: &'static str,
    pub value: JsonValue,
}

impl FieldValue {
    pub fn new(name: &'static str, value: JsonValue) -> Self {
        Self { name, value }
    }

    pub fn is_null(&self) -> bool {
        self.value.is_null()
    }
}

/// A type stored as a document in exactly one named collection.
///
/// Implement it with `#[derive(Document)]`; the derive generates the
/// collection constant, the base accessors and one descriptor per entity
/// field.
pub trait Document: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Backing collection name.
    const COLLECTION: &'static str;

    fn base(&self) -> &DocumentBase;

    fn base_mut(&mut self) -> &mut DocumentBase;

    /// Current values of the entity's own fields plus `modifiedBy`, keyed
    /// by storage name.
    fn field_values(&self) -> Result<Vec<FieldValue>>;

    fn id(&self) -> Option<ObjectId> {
        self.base().id()
    }

    fn created_at(&self) -> Option<DateTime<Utc>> {
        self.base().created_at()
    }

    fn modified_at(&self) -> Option<DateTime<Utc>> {
        self.base().modified_at()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::StaticIdentity;
    use serde_json::json;

    #[test]
    fn test_unpersisted_base_has_no_identity() {
        let base = DocumentBase::new();
        assert!(base.id().is_none());
        assert!(base.created_at().is_none());
        assert_eq!(serde_json::to_value(&base).unwrap(), json!({}));
    }

    #[test]
    fn test_created_at_follows_identity() {
        let id = ObjectId::with_timestamp(1_650_000_000);
        let base = DocumentBase::with_id(id);
        assert_eq!(base.created_at(), Some(id.timestamp()));
    }

    #[test]
    fn test_storage_names() {
        let mut base = DocumentBase::with_id(ObjectId::from_bytes([1; 12]));
        base.created_by = Some("alice".into());
        let value = serde_json::to_value(&base).unwrap();
        assert_eq!(
            value,
            json!({"_id": "010101010101010101010101", "createdBy": "alice"})
        );
    }

    #[test]
    fn test_stamp_from_identity() {
        let identity = StaticIdentity::new("u-1", "alice");
        let mut base = DocumentBase::new();
        base.stamp_creator(&identity);
        base.stamp_modifier(&identity);
        assert_eq!(base.created_by.as_deref(), Some("u-1"));
        assert_eq!(base.modified_by.as_deref(), Some("u-1"));
    }
}
