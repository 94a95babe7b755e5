// ============================================================================
// Update-Diff Builder
// ============================================================================
//
// Derives a sparse `$set` update from a mutated entity:
// - every non-null updatable field is written at its current value
// - null fields are omitted and stay untouched in storage
// - `modifiedAt` is always written
// - identity, creation timestamp and creator are never written
//
// ============================================================================

use crate::core::{Document, IMMUTABLE_FIELDS, MODIFIED_AT_FIELD, Result};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value as JsonValue};

/// Ordered set of field assignments produced for one `update_one` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateDefinition {
    sets: Vec<(String, JsonValue)>,
}

impl UpdateDefinition {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the assignment for `field`, keeping first-seen order.
    pub fn set(&mut self, field: impl Into<String>, value: JsonValue) -> &mut Self {
        let field = field.into();
        match self.sets.iter_mut().find(|(name, _)| *name == field) {
            Some(slot) => slot.1 = value,
            None => self.sets.push((field, value)),
        }
        self
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.sets.iter().map(|(name, _)| name.as_str())
    }

    pub fn get(&self, field: &str) -> Option<&JsonValue> {
        self.sets
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.get(field).is_some()
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    /// Writes the assignments into `target`. Returns true if any stored value
    /// changed.
    pub fn apply(&self, target: &mut Map<String, JsonValue>) -> bool {
        let mut changed = false;
        for (field, value) in &self.sets {
            if target.get(field) != Some(value) {
                target.insert(field.clone(), value.clone());
                changed = true;
            }
        }
        changed
    }

    /// Mongo-style `{"$set": {...}}` rendering, for logging and drivers that
    /// speak the document form.
    pub fn to_document(&self) -> JsonValue {
        let set: Map<String, JsonValue> = self.sets.iter().cloned().collect();
        serde_json::json!({ "$set": set })
    }
}

/// Builds the update for `entity`, stamping `modifiedAt` with the current
/// instant.
pub fn build_update<T: Document>(entity: &T) -> Result<UpdateDefinition> {
    build_update_at(entity, Utc::now())
}

pub fn build_update_at<T: Document>(entity: &T, now: DateTime<Utc>) -> Result<UpdateDefinition> {
    let mut update = UpdateDefinition::new();

    for field in entity.field_values()? {
        if field.is_null() || IMMUTABLE_FIELDS.contains(&field.name) {
            continue;
        }
        update.set(field.name, field.value);
    }

    update.set(MODIFIED_AT_FIELD, serde_json::to_value(now)?);

    Ok(update)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_keeps_first_order_and_replaces() {
        let mut update = UpdateDefinition::new();
        update.set("b", json!(1)).set("a", json!(2)).set("b", json!(3));

        assert_eq!(update.fields().collect::<Vec<_>>(), vec!["b", "a"]);
        assert_eq!(update.get("b"), Some(&json!(3)));
        assert_eq!(update.len(), 2);
    }

    #[test]
    fn test_apply_reports_changes() {
        let mut update = UpdateDefinition::new();
        update.set("name", json!("x"));

        let mut doc = Map::new();
        doc.insert("name".into(), json!("x"));
        assert!(!update.apply(&mut doc));

        update.set("age", json!(4));
        assert!(update.apply(&mut doc));
        assert_eq!(doc.get("age"), Some(&json!(4)));
    }

    #[test]
    fn test_to_document() {
        let mut update = UpdateDefinition::new();
        update.set("name", json!("x"));
        assert_eq!(update.to_document(), json!({"$set": {"name": "x"}}));
    }
}
