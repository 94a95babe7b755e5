//! Event-logging collaborator.
//!
//! The repository layer never logs through it; the error reporter does.

use async_trait::async_trait;
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEvent {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl ErrorEvent {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn with_trace(mut self, trace: impl Into<String>) -> Self {
        self.trace = Some(trace.into());
        self
    }

    pub fn with_actor(mut self, actor: Option<String>) -> Self {
        self.actor = actor.filter(|a| !a.is_empty());
        self
    }

    pub fn with_user_agent(mut self, user_agent: Option<String>) -> Self {
        self.user_agent = user_agent.filter(|ua| !ua.is_empty());
        self
    }
}

/// Records events and returns an opaque id for each, or `None` if the
/// event could not be recorded.
#[async_trait]
pub trait EventLogger: Send + Sync {
    async fn error(&self, event: ErrorEvent) -> Option<String>;

    async fn warning(&self, message: &str, actor: Option<&str>) -> Option<String>;

    async fn information(&self, message: &str, actor: Option<&str>) -> Option<String>;
}

/// Emits events through `tracing`, tagged with a fresh UUID.
#[derive(Debug, Clone)]
pub struct TracingEventLogger {
    source: String,
}

impl TracingEventLogger {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

impl Default for TracingEventLogger {
    fn default() -> Self {
        Self::new(env!("CARGO_PKG_NAME"))
    }
}

#[async_trait]
impl EventLogger for TracingEventLogger {
    async fn error(&self, event: ErrorEvent) -> Option<String> {
        let id = Uuid::new_v4().to_string();
        error!(
            event_id = %id,
            source = %self.source,
            actor = event.actor.as_deref().unwrap_or(""),
            user_agent = event.user_agent.as_deref().unwrap_or(""),
            trace = event.trace.as_deref().unwrap_or(""),
            "{}",
            event.message
        );
        Some(id)
    }

    async fn warning(&self, message: &str, actor: Option<&str>) -> Option<String> {
        let id = Uuid::new_v4().to_string();
        warn!(event_id = %id, source = %self.source, actor = actor.unwrap_or(""), "{}", message);
        Some(id)
    }

    async fn information(&self, message: &str, actor: Option<&str>) -> Option<String> {
        let id = Uuid::new_v4().to_string();
        info!(event_id = %id, source = %self.source, actor = actor.unwrap_or(""), "{}", message);
        Some(id)
    }
}
