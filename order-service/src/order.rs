use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use num_traits::Zero;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    InProgress,
    Ready,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StatusError {
    #[error("invalid status: {0}")]
    Unknown(String),

    #[error("cannot move order from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },
}

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "Pending",
            OrderStatus::InProgress => "InProgress",
            OrderStatus::Ready => "Ready",
            OrderStatus::Cancelled => "Cancelled",
        }
    }

    /// Pending -> InProgress -> Ready, or Pending -> Cancelled.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        matches!(
            (self, next),
            (OrderStatus::Pending, OrderStatus::InProgress)
                | (OrderStatus::InProgress, OrderStatus::Ready)
                | (OrderStatus::Pending, OrderStatus::Cancelled)
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = StatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let folded: String = s
            .trim()
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect::<String>()
            .to_ascii_lowercase();
        match folded.as_str() {
            "pending" => Ok(OrderStatus::Pending),
            "inprogress" => Ok(OrderStatus::InProgress),
            "ready" => Ok(OrderStatus::Ready),
            "cancelled" => Ok(OrderStatus::Cancelled),
            _ => Err(StatusError::Unknown(s.to_string())),
        }
    }
}

/// Line with the name and price the ledger reported at reservation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub sku: String,
    pub name: String,
    pub quantity: i32,
    pub unit_price: BigDecimal,
}

impl OrderLine {
    pub fn line_total(&self) -> BigDecimal {
        &self.unit_price * BigDecimal::from(self.quantity)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub display_number: i64,
    pub tenant_id: Uuid,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub total: BigDecimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_request_id: Option<String>,
    pub items: Vec<OrderLine>,
}

impl Order {
    /// New pending order; the display number is assigned by the store.
    pub fn new(
        tenant_id: Uuid,
        client_request_id: Option<String>,
        items: Vec<OrderLine>,
        created_at: DateTime<Utc>,
    ) -> Self {
        let total = items
            .iter()
            .fold(BigDecimal::zero(), |acc, line| acc + line.line_total());
        Self {
            id: Uuid::new_v4(),
            display_number: 0,
            tenant_id,
            status: OrderStatus::Pending,
            created_at,
            total,
            client_request_id,
            items,
        }
    }

    /// Applies a requested status. Returns `false` when the order already
    /// has it; leaves the order untouched on error.
    pub fn transition(&mut self, next: OrderStatus) -> Result<bool, StatusError> {
        if self.status == next {
            return Ok(false);
        }
        if !self.status.can_transition_to(next) {
            return Err(StatusError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(true)
    }
}
