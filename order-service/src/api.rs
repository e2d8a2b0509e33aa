use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, patch, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use shared::{context::propagate_correlation_id, CorrelationId, TenantContext};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info_span, Instrument};
use uuid::Uuid;

use crate::handlers::{CreateOrderError, CreateOrderHandler};
use crate::models::CreateOrderRequest;
use crate::order::{Order, OrderStatus, StatusError};
use crate::store::{OrderStore, StoreError};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn OrderStore>,
    pub orders: Arc<CreateOrderHandler>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/orders", post(create_order))
        .route("/api/orders/:id", get(get_order))
        .route("/api/orders/:id/status", patch(update_status))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(axum::middleware::from_fn(propagate_correlation_id))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

impl IntoResponse for CreateOrderError {
    fn into_response(self) -> Response {
        let code = self.code();
        let (status, body) = match &self {
            CreateOrderError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                json!({ "error": msg, "code": code }),
            ),
            CreateOrderError::Conflict(conflict) => (
                StatusCode::CONFLICT,
                json!({
                    "error": conflict.error,
                    "code": code,
                    "sku": conflict.sku,
                    "available": conflict.available,
                }),
            ),
            CreateOrderError::ReservationMismatch {
                sku,
                requested,
                reserved,
            } => (
                StatusCode::CONFLICT,
                json!({
                    "error": self.to_string(),
                    "code": code,
                    "sku": sku,
                    "requested": requested,
                    "reserved": reserved,
                }),
            ),
            CreateOrderError::UpstreamTimeout(_)
            | CreateOrderError::UpstreamUnreachable(_)
            | CreateOrderError::UpstreamBadGateway(_)
            | CreateOrderError::UpstreamInconsistent { .. } => (
                StatusCode::BAD_GATEWAY,
                json!({
                    "error": self.to_string(),
                    "code": code,
                    "retryable": self.is_retryable(),
                }),
            ),
            CreateOrderError::Persistence(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": "failed to persist order", "code": code, "retryable": true }),
            ),
        };
        (status, Json(body)).into_response()
    }
}

impl IntoResponse for StoreError {
    fn into_response(self) -> Response {
        let status = match &self {
            StoreError::NotFound => StatusCode::NOT_FOUND,
            StoreError::Status(StatusError::Unknown(_)) => StatusCode::BAD_REQUEST,
            StoreError::Status(StatusError::InvalidTransition { .. }) => StatusCode::CONFLICT,
            _ => {
                tracing::error!(error = %self, "Order store failure");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub async fn create_order(
    State(state): State<AppState>,
    tenant: TenantContext,
    correlation_id: CorrelationId,
    Json(request): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<Order>), CreateOrderError> {
    let span = info_span!(
        "create_order",
        tenant_id = %tenant.tenant_id,
        correlation_id = %correlation_id,
    );

    let order = state
        .orders
        .handle(&tenant, &correlation_id, request)
        .instrument(span)
        .await?;
    Ok((StatusCode::CREATED, Json(order)))
}

pub async fn get_order(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(order_id): Path<Uuid>,
) -> Result<Json<Order>, StoreError> {
    state
        .store
        .find(tenant.tenant_id, order_id)
        .await?
        .map(Json)
        .ok_or(StoreError::NotFound)
}

pub async fn update_status(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(order_id): Path<Uuid>,
    Json(request): Json<UpdateStatusRequest>,
) -> Response {
    if !tenant.role.can_manage_orders() {
        return (
            StatusCode::FORBIDDEN,
            Json(json!({ "error": "role may not manage orders" })),
        )
            .into_response();
    }
    let status: OrderStatus = match request.status.parse() {
        Ok(status) => status,
        Err(e) => return StoreError::Status(e).into_response(),
    };
    match state.orders.update_status(&tenant, order_id, status).await {
        Ok(order) => Json(order).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn health_check() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}
