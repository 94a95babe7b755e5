// ============================================================================
// Unit-of-Work Context
// ============================================================================
//
// Owns the store handle, the database handle and at most one ambient
// session. Repositories read the ambient session through
// `current_transaction` / `has_active_transaction`; only the owner of the
// unit of work begins, commits or aborts.
//
// ============================================================================

pub mod config;

pub use config::{ContextConfig, MEMORY_SCHEME};

use crate::core::{RepoError, Result};
use crate::storage::MemoryStore;
use crate::store::{DocumentStore, StoreSession};
use std::any::{Any, type_name};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};

pub struct DbContext<D: DocumentStore = MemoryStore> {
    store: Arc<D>,
    database: D::Database,
    // Never held across an await.
    current: RwLock<Option<Arc<D::Session>>>,
    config: ContextConfig,
}

impl DbContext<MemoryStore> {
    /// Context over a fresh in-memory store. The connection string must use
    /// the `memory` scheme.
    pub fn connect(config: ContextConfig) -> Result<Self> {
        config.validate()?;
        if config.scheme() != Some(MEMORY_SCHEME) {
            return Err(RepoError::configuration(format!(
                "no bundled driver for '{}'; use DbContext::with_store",
                config.to_url()
            )));
        }
        Self::with_store(Arc::new(MemoryStore::new()), config)
    }
}

impl<D: DocumentStore> DbContext<D> {
    pub fn with_store(store: Arc<D>, config: ContextConfig) -> Result<Self> {
        config.validate()?;
        let database = store.database(&config.database)?;
        debug!(url = %config.to_url(), database = %config.database, "context created");
        Ok(Self {
            store,
            database,
            current: RwLock::new(None),
            config,
        })
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<D> {
        &self.store
    }

    pub fn database(&self) -> &D::Database {
        &self.database
    }

    /// Starts a session and a transaction unless one is already live.
    ///
    /// Returns the new session, or `None` when a session is already live;
    /// the existing session is never replaced.
    pub async fn begin_transaction(&self) -> Result<Option<Arc<D::Session>>> {
        if let Some(live) = self.current_transaction() {
            warn!(session = live.id(), "transaction already active, begin ignored");
            return Ok(None);
        }

        let session = self.store.start_session().await?;
        session.start_transaction().await?;
        let session = Arc::new(session);

        let mut slot = self.current.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(live) = slot.as_ref() {
            // Lost a race with a concurrent begin; the new session aborts
            // when dropped.
            warn!(session = live.id(), "transaction already active, begin ignored");
            return Ok(None);
        }
        *slot = Some(Arc::clone(&session));
        drop(slot);

        info!(session = session.id(), database = %self.config.database, "unit of work transaction begun");
        Ok(Some(session))
    }

    /// Commits the live transaction. `session` must be the live session.
    ///
    /// The live slot is cleared whether or not the store commit succeeds.
    pub async fn commit_transaction(&self, session: &D::Session) -> Result<()> {
        let live = self.take_live(session, "commit")?;
        let result = live.commit_transaction().await;
        match &result {
            Ok(()) => info!(session = live.id(), "unit of work transaction committed"),
            Err(err) => warn!(session = live.id(), error = %err, "unit of work commit failed"),
        }
        result
    }

    /// Aborts the live transaction. `session` must be the live session.
    pub async fn abort_transaction(&self, session: &D::Session) -> Result<()> {
        let live = self.take_live(session, "abort")?;
        let result = live.abort_transaction().await;
        info!(session = live.id(), "unit of work transaction aborted");
        result
    }

    /// Releases the live session, aborting its transaction if it is still
    /// running. A no-op when nothing is live.
    pub async fn end(&self) -> Result<()> {
        let live = self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match live {
            Some(session) if session.is_in_transaction() => {
                debug!(session = session.id(), "ending unit of work with a live transaction");
                session.abort_transaction().await
            }
            _ => Ok(()),
        }
    }

    pub fn has_active_transaction(&self) -> bool {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|session| session.is_in_transaction())
    }

    /// The live session, if any. Never begins one.
    pub fn current_transaction(&self) -> Option<Arc<D::Session>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The database handle as the driver's concrete type.
    pub fn get_database<T: Any>(&self) -> Result<&T> {
        let handle: &dyn Any = &self.database;
        handle.downcast_ref::<T>().ok_or_else(|| {
            RepoError::configuration(format!(
                "database handle is {}, not {}",
                type_name::<D::Database>(),
                type_name::<T>()
            ))
        })
    }

    /// Clears the live slot without awaiting the store; the session settles
    /// its transaction when the last handle drops.
    pub(crate) fn detach(&self, session_id: u64) -> Option<Arc<D::Session>> {
        let mut slot = self.current.write().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|live| live.id() == session_id) {
            slot.take()
        } else {
            None
        }
    }

    fn take_live(&self, session: &D::Session, action: &str) -> Result<Arc<D::Session>> {
        let mut slot = self.current.write().unwrap_or_else(PoisonError::into_inner);
        match slot.as_ref() {
            Some(live) if live.id() == session.id() => slot.take().ok_or_else(|| {
                RepoError::invalid_state(format!("no live transaction to {}", action))
            }),
            Some(live) => Err(RepoError::invalid_state(format!(
                "cannot {} session {}: the live session is {}",
                action,
                session.id(),
                live.id()
            ))),
            None => Err(RepoError::invalid_state(format!(
                "cannot {} session {}: no transaction is live",
                action,
                session.id()
            ))),
        }
    }
}

impl<D: DocumentStore> Drop for DbContext<D> {
    fn drop(&mut self) {
        let live = self
            .current
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(session) = live {
            debug!(session = session.id(), "context dropped with a live session");
        }
    }
}

impl<D: DocumentStore> std::fmt::Debug for DbContext<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbContext")
            .field("url", &self.config.to_url())
            .field("database", &self.config.database)
            .field("active_transaction", &self.has_active_transaction())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryDatabase;

    fn context() -> DbContext {
        DbContext::connect(ContextConfig::memory("unit")).unwrap()
    }

    #[tokio::test]
    async fn test_begin_is_idempotent() {
        let ctx = context();
        let first = ctx.begin_transaction().await.unwrap();
        assert!(first.is_some());
        assert!(ctx.begin_transaction().await.unwrap().is_none());
        assert_eq!(ctx.store().stats().open_sessions, 1);
    }

    #[tokio::test]
    async fn test_commit_requires_live_session() {
        let ctx = context();
        let stray = ctx.store().start_session().await.unwrap();
        let err = ctx.commit_transaction(&stray).await.unwrap_err();
        assert!(matches!(err, RepoError::InvalidState(_)));

        let session = ctx.begin_transaction().await.unwrap().unwrap();
        let err = ctx.abort_transaction(&stray).await.unwrap_err();
        assert!(matches!(err, RepoError::InvalidState(_)));
        assert!(ctx.has_active_transaction());

        ctx.commit_transaction(&session).await.unwrap();
        assert!(!ctx.has_active_transaction());
        assert!(ctx.current_transaction().is_none());
    }

    #[test]
    fn test_get_database_downcast() {
        let ctx = context();
        assert!(ctx.get_database::<MemoryDatabase>().is_ok());
        assert!(matches!(
            ctx.get_database::<String>(),
            Err(RepoError::Configuration(_))
        ));
    }

    #[test]
    fn test_connect_rejects_foreign_scheme() {
        let config = ContextConfig::new("mongodb://localhost/app", "app");
        assert!(matches!(
            DbContext::connect(config),
            Err(RepoError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_end_releases_session() {
        let ctx = context();
        ctx.begin_transaction().await.unwrap();
        ctx.end().await.unwrap();
        assert!(!ctx.has_active_transaction());
        let stats = ctx.store().stats();
        assert_eq!(stats.open_sessions, 0);
        assert_eq!(stats.aborted_transactions, 1);

        ctx.end().await.unwrap();
    }
}
