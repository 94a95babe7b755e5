use crate::core::{ObjectId, RepoError, Result};
use crate::store::RawDocument;
use std::collections::BTreeMap;
use std::fmt;

/// Fully qualified collection: `database.collection`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Namespace {
    pub database: String,
    pub collection: String,
}

impl Namespace {
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.collection)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub body: RawDocument,
    /// Store-wide version of the last committed write.
    pub version: u64,
}

/// Committed documents of one collection, in identifier order.
#[derive(Debug, Default)]
pub struct Collection {
    documents: BTreeMap<ObjectId, StoredDocument>,
}

impl Collection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &ObjectId) -> Option<&StoredDocument> {
        self.documents.get(id)
    }

    pub fn version_of(&self, id: &ObjectId) -> Option<u64> {
        self.documents.get(id).map(|doc| doc.version)
    }

    pub fn contains(&self, id: &ObjectId) -> bool {
        self.documents.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ObjectId, &StoredDocument)> {
        self.documents.iter()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Writes a document body. Inserts and replacements share this path.
    pub fn put(&mut self, id: ObjectId, body: RawDocument, version: u64) {
        self.documents.insert(id, StoredDocument { body, version });
    }

    pub fn remove(&mut self, id: &ObjectId) -> bool {
        self.documents.remove(id).is_some()
    }
}

/// Collection names: a letter or underscore first, then letters, digits,
/// `_`, `-` and `.` with no empty dot segment; at most 64 characters. Names
/// under `system.` are reserved.
pub fn validate_collection_name(name: &str) -> Result<()> {
    let Some(first) = name.chars().next() else {
        return Err(RepoError::configuration("Collection name cannot be empty"));
    };

    if !first.is_alphabetic() && first != '_' {
        return Err(RepoError::configuration(format!(
            "Collection name '{}' must start with a letter or underscore",
            name
        )));
    }

    if !name
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        return Err(RepoError::configuration(format!(
            "Collection name '{}' can only contain letters, numbers, '_', '-' and '.'",
            name
        )));
    }

    if name.split('.').any(str::is_empty) {
        return Err(RepoError::configuration(format!(
            "Collection name '{}' has an empty '.' segment",
            name
        )));
    }

    if name.len() > 64 {
        return Err(RepoError::configuration(format!(
            "Collection name '{}' too long (max 64 characters)",
            name
        )));
    }

    if name.starts_with("system.") {
        return Err(RepoError::configuration(format!(
            "Collection name '{}' uses the reserved 'system.' prefix",
            name
        )));
    }

    Ok(())
}

pub fn validate_database_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(RepoError::configuration("Database name cannot be empty"));
    }

    if name.len() > 64 {
        return Err(RepoError::configuration(format!(
            "Database name '{}' too long (max 64 characters)",
            name
        )));
    }

    if let Some(bad) = name
        .chars()
        .find(|c| c.is_whitespace() || matches!(c, '/' | '\\' | '.' | '"' | '$' | '\0'))
    {
        return Err(RepoError::configuration(format!(
            "Database name '{}' cannot contain '{}'",
            name, bad
        )));
    }

    Ok(())
}
