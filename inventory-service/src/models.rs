use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Queryable, Identifiable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::stock_items)]
pub struct StockItem {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub sku: String,
    pub name: String,
    pub quantity: i32,
    pub unit_price: BigDecimal,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::stock_items)]
pub struct NewStockItem {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub sku: String,
    pub name: String,
    pub quantity: i32,
    pub unit_price: BigDecimal,
    pub updated_at: DateTime<Utc>,
}

/// Idempotency record; `lines` holds the snapshot returned to the caller.
#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = crate::schema::reservations)]
pub struct Reservation {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub request_key: Option<String>,
    pub lines: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Stock upsert as submitted by a privileged caller.
#[derive(Debug, Clone, Deserialize)]
pub struct UpsertStockRequest {
    pub sku: String,
    #[serde(default)]
    pub name: Option<String>,
    pub quantity: i32,
    pub unit_price: BigDecimal,
}
