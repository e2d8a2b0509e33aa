pub mod context;

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub use context::{CorrelationId, Role, TenantContext};

/// Routing tag of the event announced when an order is committed.
pub const ORDER_CREATED: &str = "order.created";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveLine {
    pub sku: String,
    pub quantity: i32,
}

impl ReserveLine {
    pub fn new(sku: impl Into<String>, quantity: i32) -> Self {
        Self {
            sku: sku.into(),
            quantity,
        }
    }
}

/// Order service -> stock ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReserveRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_key: Option<String>,
    pub lines: Vec<ReserveLine>,
}

/// Price and name snapshot for one reserved line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservedLine {
    pub sku: String,
    pub name: String,
    pub unit_price: BigDecimal,
    pub quantity: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveResponse {
    pub lines: Vec<ReservedLine>,
}

/// Body of a 409 answer from the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveConflict {
    pub error: String,
    pub sku: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available: Option<i32>,
}

impl fmt::Display for ReserveConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.available {
            Some(available) => write!(f, "{}: {} (available {})", self.error, self.sku, available),
            None => write!(f, "{}: {}", self.error, self.sku),
        }
    }
}

/// Payload of the `order.created` outbox message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCreatedEvent {
    pub order_id: Uuid,
    pub tenant_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub total: BigDecimal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineError {
    NoLines,
    BlankSku { index: usize },
    NonPositiveQuantity { sku: String, quantity: i32 },
}

impl fmt::Display for LineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LineError::NoLines => write!(f, "at least one line is required"),
            LineError::BlankSku { index } => write!(f, "line {} has an empty sku", index),
            LineError::NonPositiveQuantity { sku, quantity } => {
                write!(f, "invalid quantity {} for {}", quantity, sku)
            }
        }
    }
}

impl std::error::Error for LineError {}

/// Trims and upper-cases a SKU.
pub fn normalize_sku(sku: &str) -> String {
    sku.trim().to_uppercase()
}

/// Rejects the whole request if any line is malformed.
pub fn validate_lines(lines: &[ReserveLine]) -> Result<(), LineError> {
    if lines.is_empty() {
        return Err(LineError::NoLines);
    }
    for (index, line) in lines.iter().enumerate() {
        if line.sku.trim().is_empty() {
            return Err(LineError::BlankSku { index });
        }
        if line.quantity <= 0 {
            return Err(LineError::NonPositiveQuantity {
                sku: normalize_sku(&line.sku),
                quantity: line.quantity,
            });
        }
    }
    Ok(())
}

/// Normalizes SKUs and sums quantities of repeated SKUs, keeping first-seen order.
///
/// Callers validate first; overflowing sums saturate so the availability
/// check rejects them.
pub fn merge_lines(lines: &[ReserveLine]) -> Vec<ReserveLine> {
    let mut merged: Vec<ReserveLine> = Vec::with_capacity(lines.len());
    for line in lines {
        let sku = normalize_sku(&line.sku);
        match merged.iter_mut().find(|m| m.sku == sku) {
            Some(existing) => existing.quantity = existing.quantity.saturating_add(line.quantity),
            None => merged.push(ReserveLine {
                sku,
                quantity: line.quantity,
            }),
        }
    }
    merged
}
