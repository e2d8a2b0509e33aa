use async_trait::async_trait;
use bigdecimal::BigDecimal;
use diesel_async::pooled_connection::PoolError;
use num_traits::Zero;
use shared::{LineError, ReserveConflict, ReserveLine, ReservedLine};
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{StockItem, UpsertStockRequest};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("invalid reservation: {0}")]
    Invalid(#[from] LineError),

    #[error("invalid stock item: {0}")]
    InvalidItem(String),

    #[error("out of stock: {sku}")]
    OutOfStock { sku: String },

    #[error("insufficient quantity for {sku}: requested {requested}, available {available}")]
    InsufficientQuantity {
        sku: String,
        requested: i32,
        available: i32,
    },

    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("connection pool error: {0}")]
    Pool(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LedgerError {
    /// Wire body for the conflict variants.
    pub fn conflict(&self) -> Option<ReserveConflict> {
        match self {
            LedgerError::OutOfStock { sku } => Some(ReserveConflict {
                error: "out of stock".to_string(),
                sku: sku.clone(),
                available: None,
            }),
            LedgerError::InsufficientQuantity { sku, available, .. } => Some(ReserveConflict {
                error: "insufficient quantity".to_string(),
                sku: sku.clone(),
                available: Some(*available),
            }),
            _ => None,
        }
    }
}

impl From<bb8::RunError<PoolError>> for LedgerError {
    fn from(e: bb8::RunError<PoolError>) -> Self {
        LedgerError::Pool(e.to_string())
    }
}

/// Per-tenant quantity and price store.
#[async_trait]
pub trait StockLedger: Send + Sync {
    /// Reserves all lines or none.
    ///
    /// With a `request_key` already seen for the tenant, returns the stored
    /// snapshot and leaves stock untouched.
    async fn reserve(
        &self,
        tenant_id: Uuid,
        request_key: Option<&str>,
        lines: &[ReserveLine],
    ) -> Result<Vec<ReservedLine>, LedgerError>;

    async fn upsert(
        &self,
        tenant_id: Uuid,
        request: UpsertStockRequest,
    ) -> Result<StockItem, LedgerError>;

    /// Items of one tenant ordered by name.
    async fn list(&self, tenant_id: Uuid) -> Result<Vec<StockItem>, LedgerError>;
}

/// Validation and SKU merging; runs before any storage access.
pub fn prepare_lines(lines: &[ReserveLine]) -> Result<Vec<ReserveLine>, LedgerError> {
    shared::validate_lines(lines)?;
    Ok(shared::merge_lines(lines))
}

/// Checks every merged line against loaded stock and builds the snapshot.
///
/// Nothing is mutated here; a single failing line fails the whole plan.
pub fn plan_reservation(
    merged: &[ReserveLine],
    stock: &[StockItem],
) -> Result<Vec<ReservedLine>, LedgerError> {
    let by_sku: HashMap<&str, &StockItem> = stock.iter().map(|i| (i.sku.as_str(), i)).collect();

    merged
        .iter()
        .map(|line| {
            let item = by_sku
                .get(line.sku.as_str())
                .ok_or_else(|| LedgerError::OutOfStock {
                    sku: line.sku.clone(),
                })?;
            if item.quantity < line.quantity {
                return Err(LedgerError::InsufficientQuantity {
                    sku: line.sku.clone(),
                    requested: line.quantity,
                    available: item.quantity,
                });
            }
            Ok(ReservedLine {
                sku: item.sku.clone(),
                name: item.name.clone(),
                unit_price: item.unit_price.clone(),
                quantity: line.quantity,
            })
        })
        .collect()
}

/// Validated upsert fields: normalized sku, name defaulting to the sku.
pub(crate) struct StockUpsert {
    pub sku: String,
    pub name: String,
    pub quantity: i32,
    pub unit_price: BigDecimal,
}

pub(crate) fn prepare_upsert(request: UpsertStockRequest) -> Result<StockUpsert, LedgerError> {
    let sku = shared::normalize_sku(&request.sku);
    if sku.is_empty() {
        return Err(LedgerError::InvalidItem("sku is required".to_string()));
    }
    if request.quantity < 0 {
        return Err(LedgerError::InvalidItem(format!(
            "quantity must not be negative, got {}",
            request.quantity
        )));
    }
    if request.unit_price < BigDecimal::zero() {
        return Err(LedgerError::InvalidItem(
            "unit price must not be negative".to_string(),
        ));
    }
    let name = match request.name.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => sku.clone(),
    };
    Ok(StockUpsert {
        sku,
        name,
        quantity: request.quantity,
        unit_price: request.unit_price,
    })
}
