use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::{DeliveryState, OutboxMessage};
use crate::order::{Order, OrderStatus};
use crate::outbox::select_due;
use crate::store::{OrderStore, OutboxStore, StoreError};

#[derive(Default)]
struct StoreState {
    orders: Vec<Order>,
    outbox: Vec<OutboxMessage>,
    last_display_number: i64,
}

/// In-memory order and outbox store.
///
/// `fail_outbox_writes` makes creations fail at the outbox insert. The order
/// row written just before is rolled back along with its display number.
#[derive(Clone, Default)]
pub struct InMemoryOrderStore {
    state: Arc<Mutex<StoreState>>,
    fail_outbox_writes: Arc<AtomicBool>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_outbox_writes(&self, fail: bool) {
        self.fail_outbox_writes.store(fail, Ordering::SeqCst);
    }

    pub async fn order_count(&self) -> usize {
        self.state.lock().await.orders.len()
    }

    pub async fn outbox_messages(&self) -> Vec<OutboxMessage> {
        self.state.lock().await.outbox.clone()
    }

    pub async fn outbox_message(&self, id: Uuid) -> Option<OutboxMessage> {
        let state = self.state.lock().await;
        state.outbox.iter().find(|m| m.id == id).cloned()
    }

    /// Appends a message directly, as a committed order would.
    pub async fn push_outbox(&self, message: OutboxMessage) {
        self.state.lock().await.outbox.push(message);
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn create_with_outbox(
        &self,
        mut order: Order,
        message: OutboxMessage,
    ) -> Result<Order, StoreError> {
        let mut state = self.state.lock().await;

        if let Some(request_id) = &order.client_request_id {
            let taken = state.orders.iter().any(|o| {
                o.tenant_id == order.tenant_id && o.client_request_id.as_ref() == Some(request_id)
            });
            if taken {
                return Err(StoreError::DuplicateRequest);
            }
        }

        let checkpoint = (state.orders.len(), state.last_display_number);
        state.last_display_number += 1;
        order.display_number = state.last_display_number;
        state.orders.push(order.clone());

        if self.fail_outbox_writes.load(Ordering::SeqCst) {
            state.orders.truncate(checkpoint.0);
            state.last_display_number = checkpoint.1;
            return Err(StoreError::Unavailable(
                "outbox insert failed".to_string(),
            ));
        }

        state.outbox.push(message);
        Ok(order)
    }

    async fn find(&self, tenant_id: Uuid, id: Uuid) -> Result<Option<Order>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .orders
            .iter()
            .find(|o| o.id == id && o.tenant_id == tenant_id)
            .cloned())
    }

    async fn find_by_request_id(
        &self,
        tenant_id: Uuid,
        request_id: &str,
    ) -> Result<Option<Order>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .orders
            .iter()
            .find(|o| o.tenant_id == tenant_id && o.client_request_id.as_deref() == Some(request_id))
            .cloned())
    }

    async fn transition_status(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        next: OrderStatus,
    ) -> Result<Order, StoreError> {
        let mut state = self.state.lock().await;
        let order = state
            .orders
            .iter_mut()
            .find(|o| o.id == id && o.tenant_id == tenant_id)
            .ok_or(StoreError::NotFound)?;
        order.transition(next)?;
        Ok(order.clone())
    }
}

#[async_trait]
impl OutboxStore for InMemoryOrderStore {
    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        max_attempts: i32,
        lease: Duration,
    ) -> Result<Vec<OutboxMessage>, StoreError> {
        let mut state = self.state.lock().await;
        let ids: Vec<Uuid> = select_due(&state.outbox, now, max_attempts, limit)
            .into_iter()
            .map(|m| m.id)
            .collect();

        let mut claimed = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(message) = state.outbox.iter_mut().find(|m| m.id == id) {
                claimed.push(message.clone());
                message.next_attempt_at = Some(now + lease);
            }
        }
        Ok(claimed)
    }

    async fn record_deliveries(&self, updates: Vec<(Uuid, DeliveryState)>) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        for (id, delivery) in updates {
            if let Some(message) = state.outbox.iter_mut().find(|m| m.id == id) {
                message.apply(delivery);
            }
        }
        Ok(())
    }
}
