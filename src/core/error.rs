use http::StatusCode;
use std::collections::BTreeMap;
use thiserror::Error;

/// Validation messages keyed by field name.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

#[derive(Error, Debug)]
pub enum RepoError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Transient store error: {0}")]
    TransientStore(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Validation failed: {}", summarize(.0))]
    Validation(FieldErrors),
}

fn summarize(errors: &FieldErrors) -> String {
    errors
        .iter()
        .map(|(field, messages)| format!("{}: {}", field, messages.join(", ")))
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T> = std::result::Result<T, RepoError>;

impl RepoError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::TransientStore(message.into())
    }

    pub fn invalid_query(message: impl Into<String>) -> Self {
        Self::InvalidQuery(message.into())
    }

    /// A single-field validation failure; chain more with `with_field_error`.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation(FieldErrors::new()).with_field_error(field, message)
    }

    /// Adds a message to a `Validation` error; other variants are returned
    /// unchanged.
    pub fn with_field_error(mut self, field: impl Into<String>, message: impl Into<String>) -> Self {
        if let RepoError::Validation(errors) = &mut self {
            errors.entry(field.into()).or_default().push(message.into());
        }
        self
    }

    pub fn field_errors(&self) -> Option<&FieldErrors> {
        match self {
            RepoError::Validation(errors) => Some(errors),
            _ => None,
        }
    }

    /// Short title shown next to the message in error responses.
    pub fn title(&self) -> &'static str {
        match self {
            RepoError::NotFound(_) => "Not Found",
            RepoError::Conflict(_) => "Conflict",
            RepoError::InvalidQuery(_) => "Bad Request",
            RepoError::Validation(_) => "Unprocessable Entity",
            RepoError::TransientStore(_) => "Service Unavailable",
            RepoError::Configuration(_)
            | RepoError::InvalidState(_)
            | RepoError::Serialization(_) => "Server Error",
        }
    }

    /// HTTP-equivalent status for the outer error-translation layer.
    pub fn status_code(&self) -> StatusCode {
        match self {
            RepoError::NotFound(_) => StatusCode::NOT_FOUND,
            RepoError::Conflict(_) => StatusCode::CONFLICT,
            RepoError::InvalidQuery(_) => StatusCode::BAD_REQUEST,
            RepoError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            RepoError::TransientStore(_) => StatusCode::SERVICE_UNAVAILABLE,
            RepoError::Configuration(_)
            | RepoError::InvalidState(_)
            | RepoError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, RepoError::TransientStore(_))
    }
}

impl From<serde_json::Error> for RepoError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for RepoError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        Self::TransientStore(format!("operation timed out: {}", err))
    }
}

impl<T> From<std::sync::PoisonError<T>> for RepoError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::InvalidState(format!("lock poisoned: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(RepoError::not_found("x").status_code(), StatusCode::NOT_FOUND);
        assert_eq!(RepoError::conflict("x").status_code(), StatusCode::CONFLICT);
        assert_eq!(RepoError::invalid_query("x").status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            RepoError::invalid_state("x").status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            RepoError::transient("x").status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_serde_errors_convert() {
        let err = serde_json::from_str::<u32>("\"nope\"").unwrap_err();
        let err: RepoError = err.into();
        assert!(matches!(err, RepoError::Serialization(_)));
    }

    #[test]
    fn test_display() {
        let err = RepoError::not_found("document 42");
        assert_eq!(err.to_string(), "Not found: document 42");
        assert!(RepoError::transient("socket closed").is_transient());
    }

    #[test]
    fn test_validation_collects_field_errors() {
        let err = RepoError::validation("name", "required")
            .with_field_error("name", "too short")
            .with_field_error("age", "must be positive");
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err.title(), "Unprocessable Entity");
        assert_eq!(
            err.to_string(),
            "Validation failed: age: must be positive; name: required, too short"
        );
        let errors = err.field_errors().unwrap();
        assert_eq!(errors["name"], vec!["required", "too short"]);

        let other = RepoError::conflict("x").with_field_error("name", "ignored");
        assert!(other.field_errors().is_none());
    }
}
