//! Result reshaping: keep only the listed fields, or drop them.

use super::value::{insert_path, lookup, validate_path};
use crate::core::{ID_FIELD, RepoError, Result};
use serde_json::{Map, Value as JsonValue};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Projection {
    /// Keep the listed paths. `_id` is kept unless `exclude_id` is set.
    Include { fields: Vec<String>, exclude_id: bool },
    /// Drop the listed paths.
    Exclude(Vec<String>),
}

impl Projection {
    pub fn include<S: Into<String>>(fields: impl IntoIterator<Item = S>) -> Self {
        Projection::Include {
            fields: fields.into_iter().map(Into::into).collect(),
            exclude_id: false,
        }
    }

    pub fn exclude<S: Into<String>>(fields: impl IntoIterator<Item = S>) -> Self {
        Projection::Exclude(fields.into_iter().map(Into::into).collect())
    }

    pub fn without_id(self) -> Self {
        match self {
            Projection::Include { fields, .. } => Projection::Include {
                fields,
                exclude_id: true,
            },
            Projection::Exclude(mut fields) => {
                if !fields.iter().any(|f| f == ID_FIELD) {
                    fields.push(ID_FIELD.to_string());
                }
                Projection::Exclude(fields)
            }
        }
    }

    /// Parses `{"name": 1, "age": 1}` or `{"secret": 0}`. Inclusion and
    /// exclusion cannot be mixed, except for `"_id": 0`.
    pub fn from_json(value: &JsonValue) -> Result<Self> {
        let object = value.as_object().ok_or_else(|| {
            RepoError::invalid_query(format!("projection must be an object, got {}", value))
        })?;

        let mut included = Vec::new();
        let mut excluded = Vec::new();
        let mut exclude_id = false;

        for (path, flag) in object {
            validate_path(path)?;
            let keep = match flag {
                JsonValue::Bool(b) => *b,
                JsonValue::Number(n) => n.as_f64().is_some_and(|v| v != 0.0),
                other => {
                    return Err(RepoError::invalid_query(format!(
                        "projection flag for '{}' must be 0/1 or a boolean, got {}",
                        path, other
                    )));
                }
            };
            match (path.as_str(), keep) {
                (ID_FIELD, false) => exclude_id = true,
                (_, true) => included.push(path.clone()),
                (_, false) => excluded.push(path.clone()),
            }
        }

        match (included.is_empty(), excluded.is_empty()) {
            (false, false) => Err(RepoError::invalid_query(
                "projection cannot mix inclusion and exclusion",
            )),
            (false, true) => Ok(Projection::Include {
                fields: included,
                exclude_id,
            }),
            (true, _) => {
                if exclude_id {
                    excluded.push(ID_FIELD.to_string());
                }
                Ok(Projection::Exclude(excluded))
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        let fields = match self {
            Projection::Include { fields, .. } | Projection::Exclude(fields) => fields,
        };
        fields.iter().try_for_each(|path| validate_path(path))
    }

    pub fn apply(&self, doc: &Map<String, JsonValue>) -> Map<String, JsonValue> {
        match self {
            Projection::Include { fields, exclude_id } => {
                let mut out = Map::new();
                if !exclude_id {
                    if let Some(id) = doc.get(ID_FIELD) {
                        out.insert(ID_FIELD.to_string(), id.clone());
                    }
                }
                for path in fields {
                    if let Some(value) = lookup(doc, path) {
                        insert_path(&mut out, path, value.clone());
                    }
                }
                out
            }
            Projection::Exclude(fields) => {
                let mut out = doc.clone();
                for path in fields {
                    remove_path(&mut out, path);
                }
                out
            }
        }
    }
}

fn remove_path(doc: &mut Map<String, JsonValue>, path: &str) {
    match path.split_once('.') {
        None => {
            doc.remove(path);
        }
        Some((head, rest)) => {
            if let Some(JsonValue::Object(child)) = doc.get_mut(head) {
                remove_path(child, rest);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc() -> Map<String, JsonValue> {
        json!({
            "_id": "abc",
            "name": "bob",
            "age": 4,
            "address": {"city": "Lima", "zip": "15001"}
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    #[test]
    fn test_include_keeps_id() {
        let out = Projection::include(["name", "address.city"]).apply(&doc());
        assert_eq!(
            JsonValue::Object(out),
            json!({"_id": "abc", "name": "bob", "address": {"city": "Lima"}})
        );
    }

    #[test]
    fn test_include_without_id() {
        let out = Projection::include(["name"]).without_id().apply(&doc());
        assert_eq!(JsonValue::Object(out), json!({"name": "bob"}));
    }

    #[test]
    fn test_exclude() {
        let out = Projection::exclude(["age", "address.zip"]).apply(&doc());
        assert_eq!(
            JsonValue::Object(out),
            json!({"_id": "abc", "name": "bob", "address": {"city": "Lima"}})
        );
    }

    #[test]
    fn test_from_json() {
        assert_eq!(
            Projection::from_json(&json!({"name": 1, "_id": 0})).unwrap(),
            Projection::include(["name"]).without_id()
        );
        assert_eq!(
            Projection::from_json(&json!({"age": false})).unwrap(),
            Projection::exclude(["age"])
        );
        assert!(Projection::from_json(&json!({"name": 1, "age": 0})).is_err());
        assert!(Projection::from_json(&json!({"name": "yes"})).is_err());
        assert!(Projection::from_json(&json!({"address..city": 1})).is_err());
    }

    #[test]
    fn test_validate_built_projection() {
        assert!(Projection::include(["name", "address.city"]).validate().is_ok());
        assert!(Projection::include([""]).validate().is_err());
        assert!(Projection::exclude(["a."]).without_id().validate().is_err());
    }
}
