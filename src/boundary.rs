//! Runs a unit of work inside the context's ambient transaction.

use crate::context::DbContext;
use crate::core::RepoError;
use crate::storage::MemoryStore;
use crate::store::{DocumentStore, StoreSession};
use futures::FutureExt;
use http::Method;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionMode {
    /// Run the work as is; store calls run autocommit unless an outer
    /// transaction is live.
    #[default]
    None,
    /// Run the work in a transaction, joining a live one if present.
    Required,
}

/// Begins a transaction before a unit of work and settles it after: commit
/// on `Ok`, abort on `Err` or panic.
pub struct TransactionBoundary<D: DocumentStore = MemoryStore> {
    ctx: Arc<DbContext<D>>,
}

impl<D: DocumentStore> Clone for TransactionBoundary<D> {
    fn clone(&self) -> Self {
        Self {
            ctx: Arc::clone(&self.ctx),
        }
    }
}

impl<D: DocumentStore> TransactionBoundary<D> {
    pub fn new(ctx: Arc<DbContext<D>>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &Arc<DbContext<D>> {
        &self.ctx
    }

    pub async fn run<F, Fut, R, E>(&self, mode: TransactionMode, work: F) -> Result<R, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<R, E>>,
        E: From<RepoError>,
    {
        if mode == TransactionMode::None {
            return work().await;
        }
        if self.ctx.has_active_transaction() {
            debug!("joining the live transaction");
            return work().await;
        }

        let Some(session) = self.ctx.begin_transaction().await? else {
            return work().await;
        };
        let mut guard = SettleGuard {
            ctx: &self.ctx,
            session_id: session.id(),
            armed: true,
        };

        let outcome = AssertUnwindSafe(work()).catch_unwind().await;
        guard.armed = false;

        match outcome {
            Ok(Ok(value)) => {
                self.ctx.commit_transaction(&session).await?;
                Ok(value)
            }
            Ok(Err(err)) => {
                if let Err(abort_err) = self.ctx.abort_transaction(&session).await {
                    warn!(error = %abort_err, "abort after failed unit of work also failed");
                }
                Err(err)
            }
            Err(panic) => {
                if let Err(abort_err) = self.ctx.abort_transaction(&session).await {
                    warn!(error = %abort_err, "abort after panicked unit of work failed");
                }
                std::panic::resume_unwind(panic)
            }
        }
    }

    /// Request-scoped variant: safe methods (GET, HEAD, OPTIONS, TRACE)
    /// never begin a transaction.
    pub async fn run_for_request<F, Fut, R, E>(
        &self,
        method: &Method,
        transactional: bool,
        work: F,
    ) -> Result<R, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<R, E>>,
        E: From<RepoError>,
    {
        let mode = if transactional && !method.is_safe() {
            TransactionMode::Required
        } else {
            TransactionMode::None
        };
        self.run(mode, work).await
    }
}

/// Releases the session if the boundary future is dropped mid-work.
struct SettleGuard<'a, D: DocumentStore> {
    ctx: &'a DbContext<D>,
    session_id: u64,
    armed: bool,
}

impl<D: DocumentStore> Drop for SettleGuard<'_, D> {
    fn drop(&mut self) {
        if self.armed && self.ctx.detach(self.session_id).is_some() {
            debug!(session = self.session_id, "unit of work cancelled, session released");
        }
    }
}
