use anyhow::Result;
use async_trait::async_trait;
use docrepo::prelude::advanced::*;
use docrepo::prelude::dx::*;
use docrepo::query::Pipeline;
use http::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
struct Faults {
    fail_writes: AtomicBool,
    read_delay_ms: AtomicU64,
    duplicate_reads: AtomicBool,
}

/// Delegates to the in-memory engine, failing or stalling on demand.
struct FlakyStore {
    inner: MemoryStore,
    faults: Arc<Faults>,
}

struct FlakyDatabase {
    inner: MemoryDatabase,
    faults: Arc<Faults>,
}

impl FlakyDatabase {
    fn check_write(&self) -> docrepo::Result<()> {
        if self.faults.fail_writes.load(Ordering::SeqCst) {
            return Err(RepoError::transient("primary stepped down"));
        }
        Ok(())
    }

    async fn stall(&self) {
        let delay = self.faults.read_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
    }
}

#[async_trait]
impl DocumentStore for FlakyStore {
    type Session = MemorySession;
    type Database = FlakyDatabase;

    async fn start_session(&self) -> docrepo::Result<MemorySession> {
        self.inner.start_session().await
    }

    fn database(&self, name: &str) -> docrepo::Result<FlakyDatabase> {
        Ok(FlakyDatabase {
            inner: self.inner.database(name)?,
            faults: Arc::clone(&self.faults),
        })
    }
}

#[async_trait]
impl DocumentDatabase<MemorySession> for FlakyDatabase {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn count_documents(
        &self,
        session: Option<&MemorySession>,
        collection: &str,
        filter: &Filter,
    ) -> docrepo::Result<u64> {
        self.stall().await;
        self.inner.count_documents(session, collection, filter).await
    }

    async fn find(
        &self,
        session: Option<&MemorySession>,
        collection: &str,
        options: &FindOptions,
    ) -> docrepo::Result<Vec<RawDocument>> {
        self.stall().await;
        let mut docs = self.inner.find(session, collection, options).await?;
        // A driver that ignores the unique _id index.
        if self.faults.duplicate_reads.load(Ordering::SeqCst) {
            if let Some(first) = docs.first().cloned() {
                docs.push(first);
            }
        }
        Ok(docs)
    }

    async fn insert_many(
        &self,
        session: Option<&MemorySession>,
        collection: &str,
        documents: Vec<RawDocument>,
    ) -> docrepo::Result<()> {
        self.check_write()?;
        self.inner.insert_many(session, collection, documents).await
    }

    async fn update_one(
        &self,
        session: Option<&MemorySession>,
        collection: &str,
        id: &ObjectId,
        update: &UpdateDefinition,
    ) -> docrepo::Result<UpdateOutcome> {
        self.check_write()?;
        self.inner.update_one(session, collection, id, update).await
    }

    async fn delete_one(
        &self,
        session: Option<&MemorySession>,
        collection: &str,
        filter: &Filter,
    ) -> docrepo::Result<DeleteOutcome> {
        self.check_write()?;
        self.inner.delete_one(session, collection, filter).await
    }

    async fn aggregate(
        &self,
        session: Option<&MemorySession>,
        collection: &str,
        pipeline: &Pipeline,
    ) -> docrepo::Result<Vec<RawDocument>> {
        self.stall().await;
        self.inner.aggregate(session, collection, pipeline).await
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Document)]
#[document(collection = "invoices")]
struct Invoice {
    #[document(base)]
    #[serde(flatten)]
    base: DocumentBase,
    number: Option<String>,
}

impl Invoice {
    fn numbered(number: &str) -> Self {
        Self {
            number: Some(number.to_string()),
            ..Self::default()
        }
    }
}

fn setup(
    config: ContextConfig,
) -> Result<(Arc<Faults>, Arc<DbContext<FlakyStore>>, Repository<Invoice, FlakyStore>)> {
    let faults = Arc::new(Faults::default());
    let store = Arc::new(FlakyStore {
        inner: MemoryStore::new(),
        faults: Arc::clone(&faults),
    });
    let ctx = Arc::new(DbContext::with_store(store, config)?);
    let invoices = Repository::new(ctx.clone())?;
    Ok((faults, ctx, invoices))
}

#[tokio::test]
async fn test_transient_write_failure_propagates() -> Result<()> {
    let (faults, _ctx, invoices) = setup(ContextConfig::memory("billing"))?;
    faults.fail_writes.store(true, Ordering::SeqCst);

    let mut invoice = Invoice::numbered("INV-1");
    let err = invoices.insert_one(&mut invoice).await.unwrap_err();
    assert!(err.is_transient());
    assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);

    // The id assigned before the failed call is kept, so a retry reuses it.
    let assigned = invoice.id();
    assert!(assigned.is_some());
    faults.fail_writes.store(false, Ordering::SeqCst);
    invoices.insert_one(&mut invoice).await?;
    assert_eq!(invoice.id(), assigned);
    assert_eq!(invoices.count(&Filter::all()).await?, 1);
    Ok(())
}

#[tokio::test]
async fn test_failure_inside_boundary_rolls_back() -> Result<()> {
    let (faults, ctx, invoices) = setup(ContextConfig::memory("billing"))?;
    let boundary = TransactionBoundary::new(ctx.clone());

    let outcome = boundary
        .run(TransactionMode::Required, || async {
            let mut first = Invoice::numbered("INV-1");
            invoices.insert_one(&mut first).await?;
            faults.fail_writes.store(true, Ordering::SeqCst);
            let mut second = Invoice::numbered("INV-2");
            invoices.insert_one(&mut second).await
        })
        .await;

    assert!(matches!(outcome, Err(RepoError::TransientStore(_))));
    assert!(!ctx.has_active_transaction());
    assert_eq!(invoices.count(&Filter::all()).await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_slow_store_call_times_out() -> Result<()> {
    let config = ContextConfig::memory("billing").operation_timeout(Duration::from_millis(20));
    let (faults, _ctx, invoices) = setup(config)?;

    let mut invoice = Invoice::numbered("INV-9");
    invoices.insert_one(&mut invoice).await?;

    faults.read_delay_ms.store(500, Ordering::SeqCst);
    let err = invoices.find_by_id(&invoice.id().unwrap()).await.unwrap_err();
    assert!(matches!(err, RepoError::TransientStore(_)));

    faults.read_delay_ms.store(0, Ordering::SeqCst);
    let found = invoices.find_by_id(&invoice.id().unwrap()).await?;
    assert_eq!(found.number.as_deref(), Some("INV-9"));
    Ok(())
}

#[tokio::test]
async fn test_find_by_id_with_several_matches_is_not_found() -> Result<()> {
    let (faults, _ctx, invoices) = setup(ContextConfig::memory("billing"))?;
    let mut invoice = Invoice::numbered("INV-3");
    invoices.insert_one(&mut invoice).await?;
    let id = invoice.id().unwrap();
    assert!(invoices.find_by_id(&id).await.is_ok());

    faults.duplicate_reads.store(true, Ordering::SeqCst);
    let err = invoices.find_by_id(&id).await.unwrap_err();
    assert!(matches!(err, RepoError::NotFound(_)));
    assert!(err.to_string().contains("found 2"));
    Ok(())
}

#[tokio::test]
async fn test_malformed_query_never_reaches_the_driver() -> Result<()> {
    // Any store read would stall past the timeout and surface as transient.
    let config = ContextConfig::memory("billing").operation_timeout(Duration::from_millis(20));
    let (faults, _ctx, invoices) = setup(config)?;
    faults.read_delay_ms.store(500, Ordering::SeqCst);

    let err = invoices.count(&Filter::eq("number..x", "INV-1")).await.unwrap_err();
    assert!(matches!(err, RepoError::InvalidQuery(_)));

    let err = invoices
        .paginate(&Filter::all(), &SortSpec::new().asc(""), 10, 0)
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::InvalidQuery(_)));

    let err = invoices
        .aggregate::<serde_json::Value>(&Pipeline::new().matching(Filter::eq("", 1)))
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::InvalidQuery(_)));
    Ok(())
}

#[test]
fn test_database_downcast_through_custom_driver() -> Result<()> {
    let (_faults, ctx, _invoices) = setup(ContextConfig::memory("billing"))?;
    assert!(ctx.get_database::<FlakyDatabase>().is_ok());
    assert!(ctx.get_database::<MemoryDatabase>().is_err());
    Ok(())
}
