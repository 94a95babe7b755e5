//! Response models for the outer API layer.

use crate::core::{Document, RepoError, Result};
use crate::logging::{ErrorEvent, EventLogger};
use crate::query::{Filter, SortSpec};
use crate::repository::QueryRepository;
use http::Method;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Body returned to clients when a request fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_id: Option<String>,
    pub message: String,
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<BTreeMap<String, Vec<String>>>,
}

impl ErrorResponse {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            error_id: None,
            message: message.into(),
            status,
            title: None,
            errors: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_error_id(mut self, error_id: Option<String>) -> Self {
        self.error_id = error_id;
        self
    }

    /// Adds a per-field validation message.
    pub fn with_field_error(mut self, field: impl Into<String>, message: impl Into<String>) -> Self {
        self.errors
            .get_or_insert_with(BTreeMap::new)
            .entry(field.into())
            .or_default()
            .push(message.into());
        self
    }

    /// Client errors keep their message; server errors are replaced by a
    /// generic one naming the request method.
    pub fn from_error(error: &RepoError, method: &Method) -> Self {
        let status = error.status_code();
        let message = if status.is_server_error() {
            format!("An error occurred while processing the {} request", method)
        } else {
            error.to_string()
        };
        let mut response = Self::new(status.as_u16(), message).with_title(error.title());
        response.errors = error.field_errors().cloned();
        response
    }

    pub fn is_server_error(&self) -> bool {
        self.status >= 500
    }
}

/// Request details attached to reported errors.
#[derive(Debug, Clone, Default)]
pub struct RequestInfo {
    pub method: Method,
    pub actor: Option<String>,
    pub user_agent: Option<String>,
}

impl RequestInfo {
    pub fn new(method: Method) -> Self {
        Self {
            method,
            ..Self::default()
        }
    }

    pub fn actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }
}

/// Turns errors into responses, logging server errors.
pub struct ErrorReporter {
    logger: Arc<dyn EventLogger>,
}

impl ErrorReporter {
    pub fn new(logger: Arc<dyn EventLogger>) -> Self {
        Self { logger }
    }

    pub async fn report(&self, error: &RepoError, request: &RequestInfo) -> ErrorResponse {
        let response = ErrorResponse::from_error(error, &request.method);
        if !response.is_server_error() {
            return response;
        }

        let event = ErrorEvent::new(error.to_string())
            .with_trace(format!("{:?}", error))
            .with_actor(request.actor.clone())
            .with_user_agent(request.user_agent.clone());
        let event_id = self.logger.error(event).await;
        response.with_error_id(event_id)
    }
}

impl std::fmt::Debug for ErrorReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorReporter").finish_non_exhaustive()
    }
}

/// One page of results with the total match count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub start: u64,
    /// Number of records in `data`.
    pub page_size: u64,
    pub total: u64,
    pub data: Vec<T>,
}

impl<T> Page<T> {
    pub fn new(start: u64, total: u64, data: Vec<T>) -> Self {
        Self {
            start,
            page_size: data.len() as u64,
            total,
            data,
        }
    }

    /// Counts and paginates through `repository`; both calls join the
    /// ambient transaction when one is live.
    pub async fn fetch<R>(
        repository: &R,
        filter: &Filter,
        sort: &SortSpec,
        page_size: u64,
        offset: u64,
    ) -> Result<Self>
    where
        T: Document,
        R: QueryRepository<T>,
    {
        let total = repository.count(filter).await?;
        let data = repository.paginate(filter, sort, page_size, offset).await?;
        Ok(Self::new(offset, total, data))
    }

    pub fn has_more(&self) -> bool {
        self.start + self.page_size < self.total
    }
}
