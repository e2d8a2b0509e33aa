use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel_async::pooled_connection::PoolError;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{DeliveryState, OutboxMessage};
use crate::order::{Order, OrderStatus, StatusError};

/// Name of the partial unique index on `(tenant_id, client_request_id)`.
pub const ORDER_REQUEST_ID_INDEX: &str = "orders_tenant_client_request_id";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("an order with this request id already exists")]
    DuplicateRequest,

    #[error("order not found")]
    NotFound,

    #[error(transparent)]
    Status(#[from] StatusError),

    #[error("database error: {0}")]
    Database(DieselError),

    #[error("connection pool error: {0}")]
    Pool(String),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl From<DieselError> for StoreError {
    fn from(e: DieselError) -> Self {
        match &e {
            DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info)
                if info.constraint_name() == Some(ORDER_REQUEST_ID_INDEX) =>
            {
                StoreError::DuplicateRequest
            }
            _ => StoreError::Database(e),
        }
    }
}

impl From<bb8::RunError<PoolError>> for StoreError {
    fn from(e: bb8::RunError<PoolError>) -> Self {
        StoreError::Pool(e.to_string())
    }
}

/// Persistence of orders together with the outbox rows announcing them.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Commits the order, its lines and the outbox message atomically and
    /// returns the order with its display number assigned.
    async fn create_with_outbox(
        &self,
        order: Order,
        message: OutboxMessage,
    ) -> Result<Order, StoreError>;

    async fn find(&self, tenant_id: Uuid, id: Uuid) -> Result<Option<Order>, StoreError>;

    async fn find_by_request_id(
        &self,
        tenant_id: Uuid,
        request_id: &str,
    ) -> Result<Option<Order>, StoreError>;

    /// Validates and applies a status change under a row lock.
    async fn transition_status(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        next: OrderStatus,
    ) -> Result<Order, StoreError>;
}

/// Publisher-side view of the outbox.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Claims up to `limit` due messages, oldest first, pushing their
    /// `next_attempt_at` out by `lease` so no other publisher picks them up.
    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        max_attempts: i32,
        lease: Duration,
    ) -> Result<Vec<OutboxMessage>, StoreError>;

    /// Writes the delivery state of a whole batch in one transaction.
    async fn record_deliveries(&self, updates: Vec<(Uuid, DeliveryState)>) -> Result<(), StoreError>;
}
