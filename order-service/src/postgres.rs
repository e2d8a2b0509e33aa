use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use diesel::prelude::*;
use diesel_async::{pooled_connection::bb8::Pool, AsyncConnection, AsyncPgConnection, RunQueryDsl};
use tracing::debug;
use uuid::Uuid;

use crate::models::*;
use crate::order::{Order, OrderStatus};
use crate::schema::*;
use crate::store::{OrderStore, OutboxStore, StoreError};

pub type DbPool = Pool<AsyncPgConnection>;

#[derive(Clone)]
pub struct PgOrderStore {
    pool: DbPool,
}

impl PgOrderStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

async fn load_lines(conn: &mut AsyncPgConnection, order: OrderRow) -> Result<Order, StoreError> {
    let lines = order_lines::table
        .filter(order_lines::order_id.eq(order.id))
        .order(order_lines::line_no.asc())
        .load::<OrderLineRow>(conn)
        .await?;
    Ok(order.into_order(lines)?)
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn create_with_outbox(
        &self,
        mut order: Order,
        message: OutboxMessage,
    ) -> Result<Order, StoreError> {
        let mut conn = self.pool.get().await?;

        conn.transaction::<_, StoreError, _>(|conn| {
            Box::pin(async move {
                let display_number = diesel::insert_into(orders::table)
                    .values(&NewOrder::from(&order))
                    .returning(orders::display_number)
                    .get_result::<i64>(conn)
                    .await?;

                diesel::insert_into(order_lines::table)
                    .values(&OrderLineRow::rows_for(&order))
                    .execute(conn)
                    .await?;

                diesel::insert_into(outbox_messages::table)
                    .values(&message)
                    .execute(conn)
                    .await?;

                order.display_number = display_number;
                debug!(order_id = %order.id, outbox_id = %message.id, "Order and outbox message committed");
                Ok(order)
            })
        })
        .await
    }

    async fn find(&self, tenant_id: Uuid, id: Uuid) -> Result<Option<Order>, StoreError> {
        let mut conn = self.pool.get().await?;
        let row = orders::table
            .filter(orders::id.eq(id))
            .filter(orders::tenant_id.eq(tenant_id))
            .first::<OrderRow>(&mut conn)
            .await
            .optional()?;
        match row {
            Some(row) => Ok(Some(load_lines(&mut conn, row).await?)),
            None => Ok(None),
        }
    }

    async fn find_by_request_id(
        &self,
        tenant_id: Uuid,
        request_id: &str,
    ) -> Result<Option<Order>, StoreError> {
        let mut conn = self.pool.get().await?;
        let row = orders::table
            .filter(orders::tenant_id.eq(tenant_id))
            .filter(orders::client_request_id.eq(request_id))
            .first::<OrderRow>(&mut conn)
            .await
            .optional()?;
        match row {
            Some(row) => Ok(Some(load_lines(&mut conn, row).await?)),
            None => Ok(None),
        }
    }

    async fn transition_status(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        next: OrderStatus,
    ) -> Result<Order, StoreError> {
        let mut conn = self.pool.get().await?;

        conn.transaction::<_, StoreError, _>(|conn| {
            Box::pin(async move {
                let row = orders::table
                    .filter(orders::id.eq(id))
                    .filter(orders::tenant_id.eq(tenant_id))
                    .for_update()
                    .first::<OrderRow>(conn)
                    .await
                    .optional()?
                    .ok_or(StoreError::NotFound)?;

                let mut order = load_lines(conn, row).await?;
                if order.transition(next)? {
                    diesel::update(orders::table.filter(orders::id.eq(id)))
                        .set(orders::status.eq(next.as_str()))
                        .execute(conn)
                        .await?;
                }
                Ok(order)
            })
        })
        .await
    }
}

#[async_trait]
impl OutboxStore for PgOrderStore {
    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        max_attempts: i32,
        lease: Duration,
    ) -> Result<Vec<OutboxMessage>, StoreError> {
        let mut conn = self.pool.get().await?;
        let lease_until = now + lease;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        conn.transaction::<_, StoreError, _>(|conn| {
            Box::pin(async move {
                let ids = outbox_messages::table
                    .select(outbox_messages::id)
                    .filter(outbox_messages::published_at.is_null())
                    .filter(outbox_messages::dead_lettered_at.is_null())
                    .filter(outbox_messages::attempts.lt(max_attempts))
                    .filter(
                        outbox_messages::next_attempt_at
                            .is_null()
                            .or(outbox_messages::next_attempt_at.le(now)),
                    )
                    .order(outbox_messages::occurred_at.asc())
                    .limit(limit)
                    .for_update()
                    .skip_locked()
                    .load::<Uuid>(conn)
                    .await?;

                if ids.is_empty() {
                    return Ok(Vec::new());
                }

                diesel::update(outbox_messages::table.filter(outbox_messages::id.eq_any(&ids)))
                    .set(outbox_messages::next_attempt_at.eq(lease_until))
                    .execute(conn)
                    .await?;

                let messages = outbox_messages::table
                    .filter(outbox_messages::id.eq_any(&ids))
                    .order(outbox_messages::occurred_at.asc())
                    .load::<OutboxMessage>(conn)
                    .await?;
                Ok(messages)
            })
        })
        .await
    }

    async fn record_deliveries(&self, updates: Vec<(Uuid, DeliveryState)>) -> Result<(), StoreError> {
        if updates.is_empty() {
            return Ok(());
        }
        let mut conn = self.pool.get().await?;

        conn.transaction::<_, StoreError, _>(|conn| {
            Box::pin(async move {
                for (id, state) in &updates {
                    diesel::update(outbox_messages::table.find(*id))
                        .set(state)
                        .execute(conn)
                        .await?;
                }
                Ok(())
            })
        })
        .await
    }
}
