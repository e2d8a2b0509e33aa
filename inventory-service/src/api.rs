use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde_json::json;
use shared::{context::propagate_correlation_id, CorrelationId, ReserveRequest, ReserveResponse, TenantContext};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, info_span, warn, Instrument};

use crate::ledger::{LedgerError, StockLedger};
use crate::models::{StockItem, UpsertStockRequest};

#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<dyn StockLedger>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/inventory", get(list_stock).put(upsert_stock))
        .route("/api/inventory/reserve", post(reserve_stock))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(axum::middleware::from_fn(propagate_correlation_id))
        .layer(TraceLayer::new_for_http())
}

impl IntoResponse for LedgerError {
    fn into_response(self) -> Response {
        if let Some(conflict) = self.conflict() {
            return (StatusCode::CONFLICT, Json(conflict)).into_response();
        }
        let status = match &self {
            LedgerError::Invalid(_) | LedgerError::InvalidItem(_) => StatusCode::BAD_REQUEST,
            _ => {
                tracing::error!(error = %self, "Stock ledger failure");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub async fn reserve_stock(
    State(state): State<AppState>,
    tenant: TenantContext,
    correlation_id: CorrelationId,
    Json(request): Json<ReserveRequest>,
) -> Result<Json<ReserveResponse>, LedgerError> {
    let span = info_span!(
        "reserve",
        tenant_id = %tenant.tenant_id,
        correlation_id = %correlation_id,
    );

    async move {
        let result = state
            .ledger
            .reserve(tenant.tenant_id, request.request_key.as_deref(), &request.lines)
            .await;
        match &result {
            Ok(lines) => info!(lines = lines.len(), "Reservation accepted"),
            Err(e) => warn!(error = %e, "Reservation refused"),
        }
        result.map(|lines| Json(ReserveResponse { lines }))
    }
    .instrument(span)
    .await
}

pub async fn list_stock(
    State(state): State<AppState>,
    tenant: TenantContext,
) -> Result<Json<Vec<StockItem>>, LedgerError> {
    Ok(Json(state.ledger.list(tenant.tenant_id).await?))
}

pub async fn upsert_stock(
    State(state): State<AppState>,
    tenant: TenantContext,
    Json(request): Json<UpsertStockRequest>,
) -> Response {
    if !tenant.role.can_manage_stock() {
        return (
            StatusCode::FORBIDDEN,
            Json(json!({ "error": "role may not manage stock" })),
        )
            .into_response();
    }
    match state.ledger.upsert(tenant.tenant_id, request).await {
        Ok(item) => Json(item).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn health_check() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}
