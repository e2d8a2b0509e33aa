use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::Deserialize;
use shared::{CorrelationId, OrderCreatedEvent, ORDER_CREATED};
use std::str::FromStr;
use uuid::Uuid;

use crate::order::{Order, OrderLine, OrderStatus, StatusError};

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = crate::schema::orders)]
pub struct OrderRow {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub display_number: i64,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub total: BigDecimal,
    pub client_request_id: Option<String>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::orders)]
pub struct NewOrder {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub total: BigDecimal,
    pub client_request_id: Option<String>,
}

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = crate::schema::order_lines)]
pub struct OrderLineRow {
    pub id: Uuid,
    pub order_id: Uuid,
    pub line_no: i32,
    pub sku: String,
    pub name: String,
    pub quantity: i32,
    pub unit_price: BigDecimal,
}

impl From<&Order> for NewOrder {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id,
            tenant_id: order.tenant_id,
            status: order.status.as_str().to_string(),
            created_at: order.created_at,
            total: order.total.clone(),
            client_request_id: order.client_request_id.clone(),
        }
    }
}

impl OrderLineRow {
    pub fn rows_for(order: &Order) -> Vec<OrderLineRow> {
        order
            .items
            .iter()
            .enumerate()
            .map(|(line_no, line)| OrderLineRow {
                id: Uuid::new_v4(),
                order_id: order.id,
                line_no: line_no as i32,
                sku: line.sku.clone(),
                name: line.name.clone(),
                quantity: line.quantity,
                unit_price: line.unit_price.clone(),
            })
            .collect()
    }
}

impl OrderRow {
    pub fn into_order(self, lines: Vec<OrderLineRow>) -> Result<Order, StatusError> {
        Ok(Order {
            id: self.id,
            display_number: self.display_number,
            tenant_id: self.tenant_id,
            status: OrderStatus::from_str(&self.status)?,
            created_at: self.created_at,
            total: self.total,
            client_request_id: self.client_request_id,
            items: lines
                .into_iter()
                .map(|l| OrderLine {
                    sku: l.sku,
                    name: l.name,
                    quantity: l.quantity,
                    unit_price: l.unit_price,
                })
                .collect(),
        })
    }
}

/// Outbox row. Delivery columns are written only by the publisher.
#[derive(Debug, Clone, PartialEq, Queryable, Insertable)]
#[diesel(table_name = crate::schema::outbox_messages)]
pub struct OutboxMessage {
    pub id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub message_type: String,
    pub payload: String,
    pub correlation_id: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub attempts: i32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub dead_lettered_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl OutboxMessage {
    pub fn new(
        message_type: &str,
        payload: String,
        correlation_id: Option<String>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            occurred_at,
            message_type: message_type.to_string(),
            payload,
            correlation_id,
            published_at: None,
            attempts: 0,
            next_attempt_at: None,
            dead_lettered_at: None,
            last_error: None,
        }
    }

    pub fn order_created(
        order: &Order,
        correlation_id: &CorrelationId,
    ) -> Result<Self, serde_json::Error> {
        let event = OrderCreatedEvent {
            order_id: order.id,
            tenant_id: order.tenant_id,
            created_at: order.created_at,
            total: order.total.clone(),
        };
        Ok(Self::new(
            ORDER_CREATED,
            serde_json::to_string(&event)?,
            Some(correlation_id.to_string()),
            order.created_at,
        ))
    }

    pub fn delivery_state(&self) -> DeliveryState {
        DeliveryState {
            published_at: self.published_at,
            attempts: self.attempts,
            next_attempt_at: self.next_attempt_at,
            dead_lettered_at: self.dead_lettered_at,
            last_error: self.last_error.clone(),
        }
    }

    pub fn apply(&mut self, state: DeliveryState) {
        self.published_at = state.published_at;
        self.attempts = state.attempts;
        self.next_attempt_at = state.next_attempt_at;
        self.dead_lettered_at = state.dead_lettered_at;
        self.last_error = state.last_error;
    }
}

/// Full set of publisher-owned columns; `None` is written as NULL.
#[derive(Debug, Clone, PartialEq, AsChangeset)]
#[diesel(table_name = crate::schema::outbox_messages, treat_none_as_null = true)]
pub struct DeliveryState {
    pub published_at: Option<DateTime<Utc>>,
    pub attempts: i32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub dead_lettered_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Client body of `POST /api/orders`.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateOrderRequest {
    #[serde(default)]
    pub items: Vec<shared::ReserveLine>,
    #[serde(default)]
    pub request_id: Option<String>,
}
