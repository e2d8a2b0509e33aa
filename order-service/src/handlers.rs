use chrono::Utc;
use shared::{CorrelationId, ReserveConflict, ReserveLine, ReserveRequest, ReservedLine, TenantContext};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::models::{CreateOrderRequest, OutboxMessage};
use crate::order::{Order, OrderLine, OrderStatus};
use crate::reservation::{ReservationClient, ReservationError};
use crate::store::{OrderStore, StoreError};

#[derive(Debug, Clone, Error)]
pub enum CreateOrderError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not enough stock: {0}")]
    Conflict(ReserveConflict),

    #[error("inventory reserve timed out: {0}")]
    UpstreamTimeout(String),

    #[error("inventory service unreachable: {0}")]
    UpstreamUnreachable(String),

    #[error("inventory reserve failed: {0}")]
    UpstreamBadGateway(String),

    #[error("inventory reserve response is missing sku {sku}")]
    UpstreamInconsistent { sku: String },

    #[error("request id was already used to reserve {reserved} of {sku}, not {requested}")]
    ReservationMismatch {
        sku: String,
        requested: i32,
        reserved: i32,
    },

    #[error("failed to persist order: {0}")]
    Persistence(String),
}

impl CreateOrderError {
    pub fn code(&self) -> &'static str {
        match self {
            CreateOrderError::Validation(_) => "validation_failed",
            CreateOrderError::Conflict(_) => "inventory_conflict",
            CreateOrderError::UpstreamTimeout(_) => "inventory_timeout",
            CreateOrderError::UpstreamUnreachable(_) => "inventory_unreachable",
            CreateOrderError::UpstreamBadGateway(_) => "inventory_bad_gateway",
            CreateOrderError::UpstreamInconsistent { .. } => "inventory_missing_sku",
            CreateOrderError::ReservationMismatch { .. } => "reservation_mismatch",
            CreateOrderError::Persistence(_) => "persistence_failed",
        }
    }

    /// Whether resubmitting the same request (same request id) is safe and useful.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CreateOrderError::UpstreamTimeout(_)
                | CreateOrderError::UpstreamUnreachable(_)
                | CreateOrderError::Persistence(_)
        )
    }
}

impl From<ReservationError> for CreateOrderError {
    fn from(e: ReservationError) -> Self {
        match e {
            ReservationError::Validation(msg) => CreateOrderError::Validation(msg),
            ReservationError::Conflict(conflict) => CreateOrderError::Conflict(conflict),
            ReservationError::Timeout(msg) => CreateOrderError::UpstreamTimeout(msg),
            ReservationError::Unreachable(msg) => CreateOrderError::UpstreamUnreachable(msg),
            ReservationError::BadGateway(msg) => CreateOrderError::UpstreamBadGateway(msg),
        }
    }
}

fn persistence(e: StoreError) -> CreateOrderError {
    CreateOrderError::Persistence(e.to_string())
}

/// Entry point of the order saga: reserve stock, then commit the order and
/// its `order.created` outbox message together.
pub struct CreateOrderHandler {
    store: Arc<dyn OrderStore>,
    reservations: Arc<dyn ReservationClient>,
}

impl CreateOrderHandler {
    pub fn new(store: Arc<dyn OrderStore>, reservations: Arc<dyn ReservationClient>) -> Self {
        Self {
            store,
            reservations,
        }
    }

    pub async fn handle(
        &self,
        tenant: &TenantContext,
        correlation_id: &CorrelationId,
        request: CreateOrderRequest,
    ) -> Result<Order, CreateOrderError> {
        shared::validate_lines(&request.items)
            .map_err(|e| CreateOrderError::Validation(e.to_string()))?;

        let request_id = request
            .request_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string);

        if let Some(request_id) = &request_id {
            let existing = self
                .store
                .find_by_request_id(tenant.tenant_id, request_id)
                .await
                .map_err(persistence)?;
            if let Some(order) = existing {
                info!(order_id = %order.id, %request_id, "Returning previously created order");
                return Ok(order);
            }
        }

        let lines = shared::merge_lines(&request.items);
        let reserve = ReserveRequest {
            request_key: Some(
                request_id
                    .clone()
                    .unwrap_or_else(|| Uuid::new_v4().to_string()),
            ),
            lines,
        };

        let reserved = self
            .reservations
            .reserve(tenant, correlation_id, &reserve)
            .await
            .map_err(|e| {
                warn!(error = %e, "Stock reservation failed");
                CreateOrderError::from(e)
            })?;

        let items = snapshot_lines(&reserve.lines, &reserved.lines)?;
        let order = Order::new(tenant.tenant_id, request_id.clone(), items, Utc::now());
        let message = OutboxMessage::order_created(&order, correlation_id)
            .map_err(|e| CreateOrderError::Persistence(e.to_string()))?;

        match self.store.create_with_outbox(order, message).await {
            Ok(order) => {
                info!(
                    order_id = %order.id,
                    display_number = order.display_number,
                    total = %order.total,
                    "Order created"
                );
                Ok(order)
            }
            Err(StoreError::DuplicateRequest) => {
                // Lost a race with a concurrent call carrying the same request id.
                let request_id = request_id.unwrap_or_default();
                self.store
                    .find_by_request_id(tenant.tenant_id, &request_id)
                    .await
                    .map_err(persistence)?
                    .ok_or_else(|| persistence(StoreError::DuplicateRequest))
            }
            Err(e) => {
                error!(error = %e, "Failed to persist order");
                Err(persistence(e))
            }
        }
    }

    pub async fn update_status(
        &self,
        tenant: &TenantContext,
        order_id: Uuid,
        status: OrderStatus,
    ) -> Result<Order, StoreError> {
        let order = self
            .store
            .transition_status(tenant.tenant_id, order_id, status)
            .await?;
        info!(order_id = %order.id, status = %order.status, "Order status updated");
        Ok(order)
    }
}

/// Builds order lines from the ledger's snapshot, never from client input.
///
/// A replayed request key returns the quantities stored with the first
/// reservation; any difference from the current request means the order
/// would not be covered by reserved stock.
pub fn snapshot_lines(
    requested: &[ReserveLine],
    reserved: &[ReservedLine],
) -> Result<Vec<OrderLine>, CreateOrderError> {
    let by_sku: HashMap<String, &ReservedLine> = reserved
        .iter()
        .map(|r| (shared::normalize_sku(&r.sku), r))
        .collect();

    if let Some(extra) = by_sku
        .iter()
        .find(|(sku, _)| !requested.iter().any(|line| &line.sku == *sku))
    {
        warn!(sku = %extra.0, "Reservation holds a sku the request does not ask for");
        return Err(CreateOrderError::ReservationMismatch {
            sku: extra.0.clone(),
            requested: 0,
            reserved: extra.1.quantity,
        });
    }

    requested
        .iter()
        .map(|line| {
            let snapshot = by_sku.get(&line.sku).ok_or_else(|| {
                error!(sku = %line.sku, "Inventory reserve response is missing a requested sku");
                CreateOrderError::UpstreamInconsistent {
                    sku: line.sku.clone(),
                }
            })?;
            if snapshot.quantity != line.quantity {
                warn!(
                    sku = %line.sku,
                    requested = line.quantity,
                    reserved = snapshot.quantity,
                    "Reserved quantity differs from the request"
                );
                return Err(CreateOrderError::ReservationMismatch {
                    sku: line.sku.clone(),
                    requested: line.quantity,
                    reserved: snapshot.quantity,
                });
            }
            Ok(OrderLine {
                sku: line.sku.clone(),
                name: snapshot.name.trim().to_string(),
                quantity: snapshot.quantity,
                unit_price: snapshot.unit_price.clone(),
            })
        })
        .collect()
}
