use anyhow::{Result, anyhow};
use docrepo::prelude::dx::*;
use docrepo::{MemoryStore, StoreSession};
use futures::FutureExt;
use http::Method;
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize, Document)]
#[document(collection = "orders")]
#[serde(rename_all = "camelCase")]
struct Order {
    #[document(base)]
    #[serde(flatten)]
    base: DocumentBase,
    sku: Option<String>,
    quantity: Option<u32>,
}

impl Order {
    fn of(sku: &str, quantity: u32) -> Self {
        Self {
            sku: Some(sku.to_string()),
            quantity: Some(quantity),
            ..Self::default()
        }
    }
}

struct Fixture {
    store: Arc<MemoryStore>,
    ctx: Arc<DbContext>,
    orders: Repository<Order>,
    boundary: TransactionBoundary,
}

fn fixture() -> Result<Fixture> {
    let store = Arc::new(MemoryStore::new());
    let ctx = Arc::new(DbContext::with_store(store.clone(), ContextConfig::memory("shop"))?);
    Ok(Fixture {
        store,
        orders: Repository::new(ctx.clone())?,
        boundary: TransactionBoundary::new(ctx.clone()),
        ctx,
    })
}

#[tokio::test]
async fn test_required_commits_on_success() -> Result<()> {
    let f = fixture()?;

    let id = f
        .boundary
        .run(TransactionMode::Required, || async {
            assert!(f.ctx.has_active_transaction());
            let mut order = Order::of("apple", 3);
            f.orders.insert_one(&mut order).await?;
            let mut second = Order::of("pear", 1);
            f.orders.insert_one(&mut second).await?;
            Ok::<_, anyhow::Error>(order.id())
        })
        .await?;

    assert!(!f.ctx.has_active_transaction());
    assert!(id.is_some());
    assert_eq!(f.orders.count(&Filter::all()).await?, 2);
    assert_eq!(f.store.stats().committed_transactions, 1);
    Ok(())
}

#[tokio::test]
async fn test_required_aborts_on_error() -> Result<()> {
    let f = fixture()?;

    let outcome: Result<()> = f
        .boundary
        .run(TransactionMode::Required, || async {
            let mut order = Order::of("apple", 3);
            f.orders.insert_one(&mut order).await?;
            Err(anyhow!("payment declined"))
        })
        .await;

    assert_eq!(outcome.unwrap_err().to_string(), "payment declined");
    assert!(!f.ctx.has_active_transaction());
    assert_eq!(f.orders.count(&Filter::all()).await?, 0);

    let stats = f.store.stats();
    assert_eq!(stats.aborted_transactions, 1);
    assert_eq!(stats.open_sessions, 0);
    Ok(())
}

#[tokio::test]
async fn test_required_aborts_on_panic() -> Result<()> {
    let f = fixture()?;

    let outcome = AssertUnwindSafe(f.boundary.run(TransactionMode::Required, || async {
        let mut order = Order::of("apple", 3);
        f.orders.insert_one(&mut order).await?;
        if order.quantity == Some(3) {
            panic!("inventory service exploded");
        }
        Ok::<_, RepoError>(())
    }))
    .catch_unwind()
    .await;

    assert!(outcome.is_err());
    assert!(!f.ctx.has_active_transaction());
    assert_eq!(f.orders.count(&Filter::all()).await?, 0);
    assert_eq!(f.store.stats().aborted_transactions, 1);
    Ok(())
}

#[tokio::test]
async fn test_nested_boundaries_share_one_transaction() -> Result<()> {
    let f = fixture()?;

    f.boundary
        .run(TransactionMode::Required, || async {
            let outer = f.ctx.current_transaction().map(|s| s.id());
            f.boundary
                .run(TransactionMode::Required, || async {
                    assert_eq!(f.ctx.current_transaction().map(|s| s.id()), outer);
                    let mut order = Order::of("fig", 1);
                    f.orders.insert_one(&mut order).await
                })
                .await?;
            // Still open after the inner boundary returns.
            assert!(f.ctx.has_active_transaction());
            Ok::<_, RepoError>(())
        })
        .await?;

    assert_eq!(f.store.stats().committed_transactions, 1);
    assert_eq!(f.orders.count(&Filter::all()).await?, 1);
    Ok(())
}

#[tokio::test]
async fn test_mode_none_runs_autocommit() -> Result<()> {
    let f = fixture()?;

    let outcome: Result<()> = f
        .boundary
        .run(TransactionMode::None, || async {
            assert!(!f.ctx.has_active_transaction());
            let mut order = Order::of("kiwi", 2);
            f.orders.insert_one(&mut order).await?;
            Err(anyhow!("late failure"))
        })
        .await;

    assert!(outcome.is_err());
    // The write already committed on its own.
    assert_eq!(f.orders.count(&Filter::all()).await?, 1);
    assert_eq!(f.store.stats().committed_transactions, 0);
    Ok(())
}

#[tokio::test]
async fn test_safe_methods_never_open_a_transaction() -> Result<()> {
    let f = fixture()?;

    f.boundary
        .run_for_request(&Method::GET, true, || async {
            assert!(!f.ctx.has_active_transaction());
            Ok::<_, RepoError>(())
        })
        .await?;

    f.boundary
        .run_for_request(&Method::POST, true, || async {
            assert!(f.ctx.has_active_transaction());
            Ok::<_, RepoError>(())
        })
        .await?;

    f.boundary
        .run_for_request(&Method::DELETE, false, || async {
            assert!(!f.ctx.has_active_transaction());
            Ok::<_, RepoError>(())
        })
        .await?;

    assert_eq!(f.store.stats().committed_transactions, 1);
    Ok(())
}

#[tokio::test]
async fn test_cancelled_unit_of_work_releases_session() -> Result<()> {
    let f = fixture()?;

    let cancelled = tokio::time::timeout(
        Duration::from_millis(20),
        f.boundary.run(TransactionMode::Required, || async {
            let mut order = Order::of("plum", 9);
            f.orders.insert_one(&mut order).await?;
            std::future::pending::<()>().await;
            Ok::<_, RepoError>(())
        }),
    )
    .await;

    assert!(cancelled.is_err());
    assert!(!f.ctx.has_active_transaction());
    assert!(f.ctx.current_transaction().is_none());

    let stats = f.store.stats();
    assert_eq!(stats.open_sessions, 0);
    assert_eq!(stats.active_transactions, 0);
    assert_eq!(stats.aborted_transactions, 1);
    assert_eq!(f.orders.count(&Filter::all()).await?, 0);

    // The context is usable again.
    f.boundary
        .run(TransactionMode::Required, || async {
            let mut order = Order::of("plum", 1);
            f.orders.insert_one(&mut order).await
        })
        .await?;
    assert_eq!(f.orders.count(&Filter::all()).await?, 1);
    Ok(())
}
