use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use uuid::Uuid;

use super::{quantities_by_product, settlement_event, CommitOutcome, InventoryStore, ReservationBatch};
use crate::error::StoreError;
use crate::models::*;
use crate::schema::*;
use crate::{ledger, records};

pub type DbPool = bb8::Pool<AsyncDieselConnectionManager<AsyncPgConnection>>;

type PooledConn<'a> = bb8::PooledConnection<'a, AsyncDieselConnectionManager<AsyncPgConnection>>;

/// Rolls a reservation transaction back, either because the database failed
/// or because a guarded ledger update did not match.
enum CommitError {
    Conflict(Uuid),
    Store(StoreError),
}

impl From<diesel::result::Error> for CommitError {
    fn from(err: diesel::result::Error) -> Self {
        CommitError::Store(StoreError::Database(err))
    }
}

pub struct PgInventoryStore {
    pool: DbPool,
}

impl PgInventoryStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_size: u32) -> Result<Self, StoreError> {
        let config = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
        let pool = bb8::Pool::builder()
            .max_size(max_size)
            .build(config)
            .await
            .map_err(|e| StoreError::Pool(e.to_string()))?;
        Ok(Self::new(pool))
    }

    async fn conn(&self) -> Result<PooledConn<'_>, StoreError> {
        self.pool.get().await.map_err(|e| StoreError::Pool(e.to_string()))
    }
}

#[async_trait]
impl InventoryStore for PgInventoryStore {
    async fn product_stock(&self, product_id: Uuid) -> Result<Option<ProductStock>, StoreError> {
        let mut conn = self.conn().await?;

        let row = products::table
            .inner_join(stock_ledger::table)
            .filter(products::id.eq(product_id))
            .first::<(Product, StockLedgerEntry)>(&mut conn)
            .await
            .optional()?;

        Ok(row.map(|(product, entry)| ProductStock {
            stock: entry.level(),
            product,
        }))
    }

    async fn product_stocks(&self, product_ids: &[Uuid]) -> Result<Vec<ProductStock>, StoreError> {
        if product_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn().await?;

        let rows = products::table
            .inner_join(stock_ledger::table)
            .filter(products::id.eq_any(product_ids.to_vec()))
            .load::<(Product, StockLedgerEntry)>(&mut conn)
            .await?;

        Ok(rows
            .into_iter()
            .map(|(product, entry)| ProductStock {
                stock: entry.level(),
                product,
            })
            .collect())
    }

    async fn commit_reservation(&self, batch: ReservationBatch) -> Result<CommitOutcome, StoreError> {
        let mut pooled = self.conn().await?;
        let conn: &mut AsyncPgConnection = &mut pooled;
        let outbox_event = NewOutboxEvent::from_event(&batch.event)?;
        let items = batch.items;

        let result = conn
            .transaction::<_, CommitError, _>(|conn| {
                Box::pin(async move {
                    let per_product =
                        quantities_by_product(items.iter().map(|i| (i.product_id, i.quantity)));

                    for (product_id, quantity) in per_product {
                        if !ledger::increase_reserved(conn, product_id, quantity).await? {
                            return Err(CommitError::Conflict(product_id));
                        }
                    }

                    records::insert_batch(conn, &items).await?;

                    diesel::insert_into(outbox_events::table)
                        .values(&outbox_event)
                        .execute(conn)
                        .await?;

                    Ok(())
                })
            })
            .await;

        match result {
            Ok(()) => Ok(CommitOutcome::Committed),
            Err(CommitError::Conflict(product_id)) => Ok(CommitOutcome::Conflict { product_id }),
            Err(CommitError::Store(e)) => Err(e),
        }
    }

    async fn find_active_by_reservation_id(&self, reservation_id: &str) -> Result<Vec<LineItem>, StoreError> {
        let mut conn = self.conn().await?;
        Ok(records::find_active_by_reservation_id(&mut conn, reservation_id).await?)
    }

    async fn find_by_reservation_id(&self, reservation_id: &str) -> Result<Vec<LineItem>, StoreError> {
        let mut conn = self.conn().await?;
        Ok(records::find_by_reservation_id(&mut conn, reservation_id).await?)
    }

    async fn find_expired(&self, before: DateTime<Utc>, limit: i64) -> Result<Vec<LineItem>, StoreError> {
        let mut conn = self.conn().await?;
        Ok(records::find_expired(&mut conn, before, limit).await?)
    }

    async fn settle(
        &self,
        reservation_id: &str,
        line_ids: &[Uuid],
        status: LineStatus,
    ) -> Result<Vec<LineItem>, StoreError> {
        let mut pooled = self.conn().await?;
        let conn: &mut AsyncPgConnection = &mut pooled;
        let reservation_id = reservation_id.to_string();
        let line_ids = line_ids.to_vec();

        conn.transaction::<_, StoreError, _>(|conn| {
            Box::pin(async move {
                let settled = records::mark_status(conn, &line_ids, status).await?;

                let per_product =
                    quantities_by_product(settled.iter().map(|l| (l.product_id, l.quantity)));
                for (product_id, quantity) in per_product {
                    ledger::decrease_reserved(conn, product_id, quantity).await?;
                }

                if let Some(event) = settlement_event(&reservation_id, status, &settled, Utc::now()) {
                    diesel::insert_into(outbox_events::table)
                        .values(&NewOutboxEvent::from_event(&event)?)
                        .execute(conn)
                        .await?;
                }

                Ok(settled)
            })
        })
        .await
    }

    async fn pending_events(&self, limit: i64) -> Result<Vec<DbOutboxEvent>, StoreError> {
        let mut conn = self.conn().await?;

        let events = outbox_events::table
            .filter(outbox_events::processed.eq(false))
            .order(outbox_events::created_at.asc())
            .limit(limit)
            .load::<DbOutboxEvent>(&mut conn)
            .await?;

        Ok(events)
    }

    async fn mark_event_processed(&self, event_id: Uuid) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;

        diesel::update(outbox_events::table.filter(outbox_events::id.eq(event_id)))
            .set(outbox_events::processed.eq(true))
            .execute(&mut conn)
            .await?;

        Ok(())
    }
}
