//! Reservation protocol against the in-memory ledger.

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use bigdecimal::BigDecimal;
use inventory_service::api::{create_router, AppState};
use inventory_service::{InMemoryStockLedger, LedgerError, StockLedger};
use shared::{ReserveConflict, ReserveLine, ReserveResponse};
use std::str::FromStr;
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

fn price(s: &str) -> BigDecimal {
    BigDecimal::from_str(s).unwrap()
}

async fn ledger_with(tenant: Uuid, sku: &str, quantity: i32) -> InMemoryStockLedger {
    let ledger = InMemoryStockLedger::new();
    ledger
        .put_item(tenant, sku, "Golden Ale", quantity, price("6.50"))
        .await;
    ledger
}

#[tokio::test]
async fn duplicate_lines_within_stock_succeed() {
    let tenant = Uuid::new_v4();
    let ledger = ledger_with(tenant, "X", 5).await;

    let lines = ledger
        .reserve(tenant, None, &[ReserveLine::new("x", 3)])
        .await
        .unwrap();

    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].quantity, 3);
    assert_eq!(ledger.quantity_of(tenant, "X").await, Some(2));
}

#[tokio::test]
async fn duplicate_lines_are_summed_before_checking() {
    let tenant = Uuid::new_v4();
    let ledger = ledger_with(tenant, "X", 5).await;

    let err = ledger
        .reserve(
            tenant,
            None,
            &[ReserveLine::new("X", 5), ReserveLine::new(" x", 5)],
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        LedgerError::InsufficientQuantity {
            requested: 10,
            available: 5,
            ..
        }
    ));
    assert_eq!(ledger.quantity_of(tenant, "X").await, Some(5));
}

#[tokio::test]
async fn replayed_request_key_decrements_once() {
    let tenant = Uuid::new_v4();
    let ledger = ledger_with(tenant, "X", 10).await;
    let lines = [ReserveLine::new("X", 4)];

    let first = ledger.reserve(tenant, Some("req-1"), &lines).await.unwrap();
    let second = ledger.reserve(tenant, Some("req-1"), &lines).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(ledger.quantity_of(tenant, "X").await, Some(6));
    assert_eq!(ledger.reservation_count().await, 1);
}

#[tokio::test]
async fn request_keys_are_scoped_per_tenant() {
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    let ledger = ledger_with(a, "X", 10).await;
    ledger.put_item(b, "X", "Golden Ale", 10, price("6.50")).await;

    ledger.reserve(a, Some("k"), &[ReserveLine::new("X", 3)]).await.unwrap();
    ledger.reserve(b, Some("k"), &[ReserveLine::new("X", 3)]).await.unwrap();

    assert_eq!(ledger.quantity_of(a, "X").await, Some(7));
    assert_eq!(ledger.quantity_of(b, "X").await, Some(7));
}

#[tokio::test]
async fn no_partial_reservation_when_one_line_fails() {
    let tenant = Uuid::new_v4();
    let ledger = ledger_with(tenant, "X", 10).await;
    ledger.put_item(tenant, "Y", "Stout", 1, price("7")).await;

    let err = ledger
        .reserve(
            tenant,
            Some("k"),
            &[ReserveLine::new("X", 2), ReserveLine::new("Y", 2)],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::InsufficientQuantity { .. }));

    let missing = ledger
        .reserve(tenant, None, &[ReserveLine::new("X", 2), ReserveLine::new("Z", 1)])
        .await
        .unwrap_err();
    assert!(matches!(missing, LedgerError::OutOfStock { ref sku } if sku == "Z"));

    assert_eq!(ledger.quantity_of(tenant, "X").await, Some(10));
    assert_eq!(ledger.quantity_of(tenant, "Y").await, Some(1));

    // The failed key was not recorded, so it can still be used.
    ledger
        .reserve(tenant, Some("k"), &[ReserveLine::new("X", 2)])
        .await
        .unwrap();
    assert_eq!(ledger.quantity_of(tenant, "X").await, Some(8));
}

#[tokio::test]
async fn concurrent_reservations_never_oversell() {
    let tenant = Uuid::new_v4();
    let ledger = ledger_with(tenant, "X", 10).await;

    let first = {
        let ledger = ledger.clone();
        tokio::spawn(async move {
            ledger
                .reserve(tenant, Some("a"), &[ReserveLine::new("X", 6)])
                .await
        })
    };
    let second = {
        let ledger = ledger.clone();
        tokio::spawn(async move {
            ledger
                .reserve(tenant, Some("b"), &[ReserveLine::new("X", 6)])
                .await
        })
    };

    let results = [first.await.unwrap(), second.await.unwrap()];
    let succeeded = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(succeeded, 1);

    let conflict = results
        .iter()
        .find_map(|r| r.as_ref().err())
        .and_then(LedgerError::conflict)
        .unwrap();
    assert_eq!(conflict.available, Some(4));
    assert_eq!(ledger.quantity_of(tenant, "X").await, Some(4));
}

fn reserve_request(tenant: Uuid, body: serde_json::Value) -> Request<Body> {
    Request::post("/api/inventory/reserve")
        .header("content-type", "application/json")
        .header("x-tenant-id", tenant.to_string())
        .header("x-correlation-id", "corr-1")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn reserve_endpoint_returns_snapshot() {
    let tenant = Uuid::new_v4();
    let ledger = ledger_with(tenant, "X", 10).await;
    let app = create_router(AppState {
        ledger: Arc::new(ledger),
    });

    let response = app
        .oneshot(reserve_request(
            tenant,
            serde_json::json!({ "request_key": "r1", "lines": [{ "sku": "x", "quantity": 2 }] }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-correlation-id"], "corr-1");
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let parsed: ReserveResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(parsed.lines[0].sku, "X");
    assert_eq!(parsed.lines[0].name, "Golden Ale");
    assert_eq!(parsed.lines[0].unit_price, price("6.5"));
}

#[tokio::test]
async fn reserve_endpoint_maps_conflict_and_validation() {
    let tenant = Uuid::new_v4();
    let ledger = ledger_with(tenant, "X", 4).await;
    let app = create_router(AppState {
        ledger: Arc::new(ledger),
    });

    let conflict = app
        .clone()
        .oneshot(reserve_request(
            tenant,
            serde_json::json!({ "lines": [{ "sku": "X", "quantity": 2 }, { "sku": "X", "quantity": 3 }] }),
        ))
        .await
        .unwrap();
    assert_eq!(conflict.status(), StatusCode::CONFLICT);
    let body = to_bytes(conflict.into_body(), usize::MAX).await.unwrap();
    let parsed: ReserveConflict = serde_json::from_slice(&body).unwrap();
    assert_eq!(parsed.available, Some(4));

    let invalid = app
        .clone()
        .oneshot(reserve_request(
            tenant,
            serde_json::json!({ "lines": [{ "sku": "", "quantity": 1 }] }),
        ))
        .await
        .unwrap();
    assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);

    let anonymous = app
        .oneshot(
            Request::post("/api/inventory/reserve")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"lines":[]}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn only_privileged_roles_upsert_stock() {
    let tenant = Uuid::new_v4();
    let app = create_router(AppState {
        ledger: Arc::new(InMemoryStockLedger::new()),
    });
    let upsert = |role: &str| {
        Request::put("/api/inventory")
            .header("content-type", "application/json")
            .header("x-tenant-id", tenant.to_string())
            .header("x-role", role)
            .body(Body::from(
                r#"{"sku":" pils ","name":"Pilsner","quantity":12,"unit_price":"5.00"}"#,
            ))
            .unwrap()
    };

    let denied = app.clone().oneshot(upsert("Staff")).await.unwrap();
    assert_eq!(denied.status(), StatusCode::FORBIDDEN);

    let accepted = app.oneshot(upsert("PubOwner")).await.unwrap();
    assert_eq!(accepted.status(), StatusCode::OK);
    let body = to_bytes(accepted.into_body(), usize::MAX).await.unwrap();
    let item: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(item["sku"], "PILS");
    assert_eq!(item["quantity"], 12);
}
