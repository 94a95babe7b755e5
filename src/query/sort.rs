// ============================================================================
// Sorting
// ============================================================================
//
// - Multi-key sorting ("name asc, age desc")
// - Stable sort: documents with equal keys keep their natural order
// - Missing fields order like null, before every other value
//
// ============================================================================

use super::value::{compare_values, lookup, validate_path};
use crate::core::{RepoError, Result};
use serde_json::{Map, Value as JsonValue};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// A single sort key (one field of the sort specification).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub path: String,
    pub direction: SortDirection,
}

impl SortKey {
    pub fn asc(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            direction: SortDirection::Ascending,
        }
    }

    pub fn desc(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            direction: SortDirection::Descending,
        }
    }

    fn compare(&self, a: &Map<String, JsonValue>, b: &Map<String, JsonValue>) -> Ordering {
        let ordering = compare_values(lookup(a, &self.path), lookup(b, &self.path));
        match self.direction {
            SortDirection::Ascending => ordering,
            SortDirection::Descending => ordering.reverse(),
        }
    }
}

/// Ordered list of sort keys. An empty specification keeps natural order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SortSpec {
    keys: Vec<SortKey>,
}

impl SortSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn asc(mut self, path: impl Into<String>) -> Self {
        self.keys.push(SortKey::asc(path));
        self
    }

    pub fn desc(mut self, path: impl Into<String>) -> Self {
        self.keys.push(SortKey::desc(path));
        self
    }

    pub fn keys(&self) -> &[SortKey] {
        &self.keys
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Parses the textual form: comma-separated `field [asc|desc]` items.
    pub fn parse(text: &str) -> Result<Self> {
        let mut spec = SortSpec::new();
        if text.trim().is_empty() {
            return Ok(spec);
        }

        for item in text.split(',') {
            let mut parts = item.split_whitespace();
            let path = parts
                .next()
                .ok_or_else(|| RepoError::invalid_query(format!("empty sort key in '{}'", text)))?;
            let direction = match parts.next().map(str::to_ascii_lowercase).as_deref() {
                None | Some("asc") | Some("ascending") => SortDirection::Ascending,
                Some("desc") | Some("descending") => SortDirection::Descending,
                Some(other) => {
                    return Err(RepoError::invalid_query(format!(
                        "unknown sort direction '{}' for '{}'",
                        other, path
                    )));
                }
            };
            if parts.next().is_some() {
                return Err(RepoError::invalid_query(format!(
                    "unexpected tokens in sort key '{}'",
                    item.trim()
                )));
            }
            validate_path(path)?;
            spec.keys.push(SortKey {
                path: path.to_string(),
                direction,
            });
        }
        Ok(spec)
    }

    /// Parses the document form `{"name": 1, "age": -1}`.
    pub fn from_json(value: &JsonValue) -> Result<Self> {
        let object = value.as_object().ok_or_else(|| {
            RepoError::invalid_query(format!("sort must be an object, got {}", value))
        })?;

        let mut spec = SortSpec::new();
        for (path, direction) in object {
            validate_path(path)?;
            let direction = match direction.as_i64() {
                Some(1) => SortDirection::Ascending,
                Some(-1) => SortDirection::Descending,
                _ => {
                    return Err(RepoError::invalid_query(format!(
                        "sort direction for '{}' must be 1 or -1, got {}",
                        path, direction
                    )));
                }
            };
            spec.keys.push(SortKey {
                path: path.clone(),
                direction,
            });
        }
        Ok(spec)
    }

    pub fn validate(&self) -> Result<()> {
        self.keys.iter().try_for_each(|key| validate_path(&key.path))
    }

    pub fn compare(&self, a: &Map<String, JsonValue>, b: &Map<String, JsonValue>) -> Ordering {
        for key in &self.keys {
            let ordering = key.compare(a, b);
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }

    /// Stable in-place sort.
    pub fn sort(&self, docs: &mut [Map<String, JsonValue>]) {
        if self.keys.is_empty() {
            return;
        }
        docs.sort_by(|a, b| self.compare(a, b));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn docs(values: Vec<JsonValue>) -> Vec<Map<String, JsonValue>> {
        values
            .into_iter()
            .map(|v| v.as_object().cloned().unwrap())
            .collect()
    }

    fn names(docs: &[Map<String, JsonValue>]) -> Vec<&str> {
        docs.iter()
            .map(|d| d.get("name").and_then(JsonValue::as_str).unwrap_or("-"))
            .collect()
    }

    #[test]
    fn test_parse_text() {
        let spec = SortSpec::parse("name asc, age DESC, city").unwrap();
        assert_eq!(
            spec.keys(),
            &[SortKey::asc("name"), SortKey::desc("age"), SortKey::asc("city")]
        );
        assert!(SortSpec::parse("").unwrap().is_empty());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(SortSpec::parse("name sideways").is_err());
        assert!(SortSpec::parse("name asc,").is_err());
        assert!(SortSpec::parse("name asc extra").is_err());
        assert!(SortSpec::from_json(&json!({"name": 2})).is_err());
        assert!(SortSpec::from_json(&json!(["name"])).is_err());
        assert!(SortSpec::parse("a..b desc").is_err());
        assert!(SortSpec::from_json(&json!({"": 1})).is_err());
    }

    #[test]
    fn test_validate_built_spec() {
        assert!(SortSpec::new().asc("name").desc("address.city").validate().is_ok());
        assert!(SortSpec::new().validate().is_ok());
        assert!(SortSpec::new().asc("").validate().is_err());
        assert!(SortSpec::new().asc("name").desc("a..b").validate().is_err());
    }

    #[test]
    fn test_multi_key_sort() {
        let mut rows = docs(vec![
            json!({"name": "b", "age": 1}),
            json!({"name": "a", "age": 1}),
            json!({"name": "c", "age": 2}),
        ]);
        SortSpec::new().desc("age").asc("name").sort(&mut rows);
        assert_eq!(names(&rows), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_missing_fields_sort_first_ascending() {
        let mut rows = docs(vec![json!({"name": "a", "age": 3}), json!({"name": "b"})]);
        SortSpec::parse("age").unwrap().sort(&mut rows);
        assert_eq!(names(&rows), vec!["b", "a"]);

        SortSpec::parse("age desc").unwrap().sort(&mut rows);
        assert_eq!(names(&rows), vec!["a", "b"]);
    }

    #[test]
    fn test_stable_for_ties() {
        let mut rows = docs(vec![
            json!({"name": "x", "group": 1}),
            json!({"name": "y", "group": 1}),
            json!({"name": "z", "group": 0}),
        ]);
        SortSpec::from_json(&json!({"group": 1})).unwrap().sort(&mut rows);
        assert_eq!(names(&rows), vec!["z", "x", "y"]);
    }
}
