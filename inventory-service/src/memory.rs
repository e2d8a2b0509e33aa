use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::Utc;
use shared::{ReserveLine, ReservedLine};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::ledger::{plan_reservation, prepare_lines, prepare_upsert, LedgerError, StockLedger};
use crate::models::{StockItem, UpsertStockRequest};

#[derive(Default)]
struct LedgerState {
    items: HashMap<(Uuid, String), StockItem>,
    reservations: HashMap<(Uuid, String), Vec<ReservedLine>>,
    reservation_count: usize,
}

/// In-memory stock ledger for tests and local runs.
///
/// One mutex guards the whole state, so each reservation is serialized the
/// same way row locks serialize it in PostgreSQL.
#[derive(Clone, Default)]
pub struct InMemoryStockLedger {
    state: Arc<Mutex<LedgerState>>,
}

impl InMemoryStockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds or replaces one item.
    pub async fn put_item(
        &self,
        tenant_id: Uuid,
        sku: &str,
        name: &str,
        quantity: i32,
        unit_price: BigDecimal,
    ) {
        let sku = shared::normalize_sku(sku);
        let item = StockItem {
            id: Uuid::new_v4(),
            tenant_id,
            sku: sku.clone(),
            name: name.to_string(),
            quantity,
            unit_price,
            updated_at: Utc::now(),
        };
        self.state.lock().await.items.insert((tenant_id, sku), item);
    }

    pub async fn quantity_of(&self, tenant_id: Uuid, sku: &str) -> Option<i32> {
        let state = self.state.lock().await;
        state
            .items
            .get(&(tenant_id, shared::normalize_sku(sku)))
            .map(|i| i.quantity)
    }

    /// Number of reservations that actually decremented stock.
    pub async fn reservation_count(&self) -> usize {
        self.state.lock().await.reservation_count
    }
}

#[async_trait]
impl StockLedger for InMemoryStockLedger {
    async fn reserve(
        &self,
        tenant_id: Uuid,
        request_key: Option<&str>,
        lines: &[ReserveLine],
    ) -> Result<Vec<ReservedLine>, LedgerError> {
        let merged = prepare_lines(lines)?;
        let mut state = self.state.lock().await;

        if let Some(key) = request_key {
            if let Some(previous) = state.reservations.get(&(tenant_id, key.to_string())) {
                return Ok(previous.clone());
            }
        }

        let stock: Vec<StockItem> = merged
            .iter()
            .filter_map(|l| state.items.get(&(tenant_id, l.sku.clone())).cloned())
            .collect();
        let reserved = plan_reservation(&merged, &stock)?;

        let now = Utc::now();
        for line in &merged {
            if let Some(item) = state.items.get_mut(&(tenant_id, line.sku.clone())) {
                item.quantity -= line.quantity;
                item.updated_at = now;
            }
        }
        if let Some(key) = request_key {
            state
                .reservations
                .insert((tenant_id, key.to_string()), reserved.clone());
        }
        state.reservation_count += 1;

        Ok(reserved)
    }

    async fn upsert(
        &self,
        tenant_id: Uuid,
        request: UpsertStockRequest,
    ) -> Result<StockItem, LedgerError> {
        let upsert = prepare_upsert(request)?;
        let mut state = self.state.lock().await;
        let now = Utc::now();

        let item = state
            .items
            .entry((tenant_id, upsert.sku.clone()))
            .and_modify(|item| {
                item.name = upsert.name.clone();
                item.quantity = upsert.quantity;
                item.unit_price = upsert.unit_price.clone();
                item.updated_at = now;
            })
            .or_insert_with(|| StockItem {
                id: Uuid::new_v4(),
                tenant_id,
                sku: upsert.sku.clone(),
                name: upsert.name.clone(),
                quantity: upsert.quantity,
                unit_price: upsert.unit_price.clone(),
                updated_at: now,
            });
        Ok(item.clone())
    }

    async fn list(&self, tenant_id: Uuid) -> Result<Vec<StockItem>, LedgerError> {
        let state = self.state.lock().await;
        let mut items: Vec<StockItem> = state
            .items
            .values()
            .filter(|i| i.tenant_id == tenant_id)
            .cloned()
            .collect();
        items.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(items)
    }
}
