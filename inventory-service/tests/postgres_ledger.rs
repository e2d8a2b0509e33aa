//! Reservation protocol against PostgreSQL.
//!
//! Starts one shared container; each test works in its own database.
//!
//! ```bash
//! cargo test -p inventory-service --test postgres_ledger
//! ```

use bigdecimal::BigDecimal;
use diesel::{Connection, PgConnection, RunQueryDsl};
use inventory_service::db::{connect_pool, run_migrations};
use inventory_service::models::UpsertStockRequest;
use inventory_service::{LedgerError, PgStockLedger, StockLedger};
use shared::ReserveLine;
use std::str::FromStr;
use std::sync::Arc;
use testcontainers::{runners::AsyncRunner, ContainerAsync};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;
use uuid::Uuid;

struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    server_url: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();
            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();
            Arc::new(ContainerInfo {
                container,
                server_url: format!("postgres://postgres:postgres@{}:{}", host, port),
            })
        })
        .await
        .clone()
}

/// A ledger over a freshly created and migrated database.
async fn fresh_ledger() -> PgStockLedger {
    let info = container_info().await;
    let name = format!("inventory_{}", Uuid::new_v4().simple());
    let admin_url = format!("{}/postgres", info.server_url);
    let database_url = format!("{}/{}", info.server_url, name);

    let migrate_url = database_url.clone();
    tokio::task::spawn_blocking(move || {
        let mut conn = PgConnection::establish(&admin_url).unwrap();
        diesel::sql_query(format!("CREATE DATABASE {}", name))
            .execute(&mut conn)
            .unwrap();
        run_migrations(&migrate_url).unwrap();
    })
    .await
    .unwrap();

    PgStockLedger::new(connect_pool(&database_url).await.unwrap())
}

async fn stock(ledger: &PgStockLedger, tenant: Uuid, sku: &str, quantity: i32) {
    ledger
        .upsert(
            tenant,
            UpsertStockRequest {
                sku: sku.to_string(),
                name: None,
                quantity,
                unit_price: BigDecimal::from_str("6.50").unwrap(),
            },
        )
        .await
        .unwrap();
}

async fn quantity_of(ledger: &PgStockLedger, tenant: Uuid, sku: &str) -> i32 {
    ledger
        .list(tenant)
        .await
        .unwrap()
        .into_iter()
        .find(|item| item.sku == sku)
        .map(|item| item.quantity)
        .unwrap()
}

#[tokio::test]
async fn concurrent_reservations_never_oversell() {
    let ledger = fresh_ledger().await;
    let tenant = Uuid::new_v4();
    stock(&ledger, tenant, "X", 10).await;

    let lines = [ReserveLine::new("X", 6)];
    let (a, b) = tokio::join!(
        ledger.reserve(tenant, Some("order-a"), &lines),
        ledger.reserve(tenant, Some("order-b"), &lines),
    );

    let (ok, err) = match (a, b) {
        (Ok(ok), Err(err)) | (Err(err), Ok(ok)) => (ok, err),
        other => panic!("expected exactly one success, got {:?}", other),
    };
    assert_eq!(ok[0].quantity, 6);
    assert!(matches!(
        err,
        LedgerError::InsufficientQuantity { available: 4, .. }
    ));
    assert_eq!(quantity_of(&ledger, tenant, "X").await, 4);
}

#[tokio::test]
async fn replayed_key_returns_stored_snapshot_without_decrementing() {
    let ledger = fresh_ledger().await;
    let tenant = Uuid::new_v4();
    stock(&ledger, tenant, "X", 10).await;

    let first = ledger
        .reserve(tenant, Some("req-1"), &[ReserveLine::new("x", 4)])
        .await
        .unwrap();
    let replay = ledger
        .reserve(tenant, Some("req-1"), &[ReserveLine::new("X", 9)])
        .await
        .unwrap();

    assert_eq!(first, replay);
    assert_eq!(replay[0].quantity, 4);
    assert_eq!(quantity_of(&ledger, tenant, "X").await, 6);
}

#[tokio::test]
async fn concurrent_calls_with_one_key_reserve_once() {
    let ledger = fresh_ledger().await;
    let tenant = Uuid::new_v4();
    stock(&ledger, tenant, "X", 10).await;

    let lines = [ReserveLine::new("X", 3)];
    let (a, b) = tokio::join!(
        ledger.reserve(tenant, Some("same"), &lines),
        ledger.reserve(tenant, Some("same"), &lines),
    );

    assert_eq!(a.unwrap(), b.unwrap());
    assert_eq!(quantity_of(&ledger, tenant, "X").await, 7);
}

#[tokio::test]
async fn keys_are_scoped_per_tenant() {
    let ledger = fresh_ledger().await;
    let (first, second) = (Uuid::new_v4(), Uuid::new_v4());
    stock(&ledger, first, "X", 5).await;
    stock(&ledger, second, "X", 5).await;

    let lines = [ReserveLine::new("X", 2)];
    ledger.reserve(first, Some("k"), &lines).await.unwrap();
    ledger.reserve(second, Some("k"), &lines).await.unwrap();

    assert_eq!(quantity_of(&ledger, first, "X").await, 3);
    assert_eq!(quantity_of(&ledger, second, "X").await, 3);
}

#[tokio::test]
async fn failed_line_leaves_every_row_untouched() {
    let ledger = fresh_ledger().await;
    let tenant = Uuid::new_v4();
    stock(&ledger, tenant, "A", 5).await;
    stock(&ledger, tenant, "B", 1).await;

    let err = ledger
        .reserve(
            tenant,
            Some("k"),
            &[ReserveLine::new("A", 2), ReserveLine::new("B", 2)],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::InsufficientQuantity { .. }));
    assert_eq!(quantity_of(&ledger, tenant, "A").await, 5);

    // The key was rolled back with the rest, so it can be used again.
    let lines = ledger
        .reserve(tenant, Some("k"), &[ReserveLine::new("A", 2)])
        .await
        .unwrap();
    assert_eq!(lines[0].quantity, 2);
    assert_eq!(quantity_of(&ledger, tenant, "A").await, 3);
}

#[tokio::test]
async fn opposite_line_orders_do_not_deadlock() {
    let ledger = fresh_ledger().await;
    let tenant = Uuid::new_v4();
    stock(&ledger, tenant, "A", 100).await;
    stock(&ledger, tenant, "B", 100).await;

    let forward = [ReserveLine::new("A", 1), ReserveLine::new("B", 1)];
    let backward = [ReserveLine::new("B", 1), ReserveLine::new("A", 1)];
    for _ in 0..10 {
        let (a, b) = tokio::join!(
            ledger.reserve(tenant, None, &forward),
            ledger.reserve(tenant, None, &backward),
        );
        a.unwrap();
        b.unwrap();
    }

    assert_eq!(quantity_of(&ledger, tenant, "A").await, 80);
    assert_eq!(quantity_of(&ledger, tenant, "B").await, 80);
}
