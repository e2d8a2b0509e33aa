use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel::upsert::excluded;
use diesel_async::{pooled_connection::bb8::Pool, AsyncConnection, AsyncPgConnection, RunQueryDsl};
use shared::{ReserveLine, ReservedLine};
use tracing::{debug, info};
use uuid::Uuid;

use crate::ledger::{plan_reservation, prepare_lines, prepare_upsert, LedgerError, StockLedger};
use crate::models::*;
use crate::schema::*;

pub type DbPool = Pool<AsyncPgConnection>;

/// Stock ledger backed by PostgreSQL.
///
/// A reservation runs in one transaction: the idempotency row is inserted
/// first so concurrent callers with the same key queue on the unique index,
/// then the touched stock rows are read `FOR UPDATE` before decrementing.
#[derive(Clone)]
pub struct PgStockLedger {
    pool: DbPool,
}

impl PgStockLedger {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StockLedger for PgStockLedger {
    async fn reserve(
        &self,
        tenant: Uuid,
        request_key: Option<&str>,
        lines: &[ReserveLine],
    ) -> Result<Vec<ReservedLine>, LedgerError> {
        let merged = prepare_lines(lines)?;
        let request_key = request_key.map(str::to_string);
        let mut conn = self.pool.get().await?;

        conn.transaction::<_, LedgerError, _>(|conn| {
            Box::pin(async move {
                let now = Utc::now();
                let reservation = Reservation {
                    id: Uuid::new_v4(),
                    tenant_id: tenant,
                    request_key: request_key.clone(),
                    lines: serde_json::Value::Array(Vec::new()),
                    created_at: now,
                };

                if let Some(key) = &request_key {
                    let inserted = diesel::insert_into(reservations::table)
                        .values(&reservation)
                        .on_conflict_do_nothing()
                        .execute(conn)
                        .await?;

                    if inserted == 0 {
                        let existing = reservations::table
                            .filter(reservations::tenant_id.eq(tenant))
                            .filter(reservations::request_key.eq(key))
                            .first::<Reservation>(conn)
                            .await?;
                        info!(request_key = %key, "Replaying reservation");
                        return Ok(serde_json::from_value(existing.lines)?);
                    }
                }

                let skus: Vec<String> = merged.iter().map(|l| l.sku.clone()).collect();
                let items = stock_items::table
                    .filter(stock_items::tenant_id.eq(tenant))
                    .filter(stock_items::sku.eq_any(&skus))
                    .order(stock_items::sku.asc())
                    .for_update()
                    .load::<StockItem>(conn)
                    .await?;

                let reserved = plan_reservation(&merged, &items)?;

                for line in &merged {
                    diesel::update(
                        stock_items::table
                            .filter(stock_items::tenant_id.eq(tenant))
                            .filter(stock_items::sku.eq(&line.sku)),
                    )
                    .set((
                        stock_items::quantity.eq(stock_items::quantity - line.quantity),
                        stock_items::updated_at.eq(now),
                    ))
                    .execute(conn)
                    .await?;
                }

                let snapshot = serde_json::to_value(&reserved)?;
                if request_key.is_some() {
                    diesel::update(reservations::table.filter(reservations::id.eq(reservation.id)))
                        .set(reservations::lines.eq(snapshot))
                        .execute(conn)
                        .await?;
                } else {
                    diesel::insert_into(reservations::table)
                        .values(&Reservation {
                            lines: snapshot,
                            ..reservation
                        })
                        .execute(conn)
                        .await?;
                }

                debug!(lines = reserved.len(), "Stock reserved");
                Ok(reserved)
            })
        })
        .await
    }

    async fn upsert(
        &self,
        tenant: Uuid,
        request: UpsertStockRequest,
    ) -> Result<StockItem, LedgerError> {
        let upsert = prepare_upsert(request)?;
        let mut conn = self.pool.get().await?;

        let new_item = NewStockItem {
            id: Uuid::new_v4(),
            tenant_id: tenant,
            sku: upsert.sku,
            name: upsert.name,
            quantity: upsert.quantity,
            unit_price: upsert.unit_price,
            updated_at: Utc::now(),
        };

        let item = diesel::insert_into(stock_items::table)
            .values(&new_item)
            .on_conflict((stock_items::tenant_id, stock_items::sku))
            .do_update()
            .set((
                stock_items::name.eq(excluded(stock_items::name)),
                stock_items::quantity.eq(excluded(stock_items::quantity)),
                stock_items::unit_price.eq(excluded(stock_items::unit_price)),
                stock_items::updated_at.eq(excluded(stock_items::updated_at)),
            ))
            .get_result::<StockItem>(&mut conn)
            .await?;

        info!(sku = %item.sku, quantity = item.quantity, "Stock item upserted");
        Ok(item)
    }

    async fn list(&self, tenant: Uuid) -> Result<Vec<StockItem>, LedgerError> {
        let mut conn = self.pool.get().await?;
        let items = stock_items::table
            .filter(stock_items::tenant_id.eq(tenant))
            .order(stock_items::name.asc())
            .load::<StockItem>(&mut conn)
            .await?;
        Ok(items)
    }
}
