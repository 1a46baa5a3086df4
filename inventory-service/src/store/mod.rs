//! Storage seam between the coordinator and the database.
//!
//! Every method that mutates state is atomic on its own: a reservation
//! batch, a settlement and the outbox event describing it land together or
//! not at all.

mod memory;
mod postgres;
#[cfg(test)]
pub(crate) mod testing;

pub use memory::MemoryInventoryStore;
pub use postgres::{DbPool, PgInventoryStore};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::{InventoryEvent, ReservationItemData};
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{DbOutboxEvent, LineItem, LineStatus, NewLineItem, ProductStock};

/// Line items staged by one Reserve call, plus the event announcing them.
#[derive(Debug, Clone)]
pub struct ReservationBatch {
    pub reservation_id: String,
    pub items: Vec<NewLineItem>,
    pub event: InventoryEvent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    /// The guarded ledger update found less stock than the batch needs.
    /// Nothing was written.
    Conflict { product_id: Uuid },
}

#[async_trait]
pub trait InventoryStore: Send + Sync {
    async fn product_stock(&self, product_id: Uuid) -> Result<Option<ProductStock>, StoreError>;

    /// Unknown ids are left out of the result.
    async fn product_stocks(&self, product_ids: &[Uuid]) -> Result<Vec<ProductStock>, StoreError>;

    async fn commit_reservation(&self, batch: ReservationBatch) -> Result<CommitOutcome, StoreError>;

    async fn find_active_by_reservation_id(&self, reservation_id: &str) -> Result<Vec<LineItem>, StoreError>;

    async fn find_by_reservation_id(&self, reservation_id: &str) -> Result<Vec<LineItem>, StoreError>;

    async fn find_expired(&self, before: DateTime<Utc>, limit: i64) -> Result<Vec<LineItem>, StoreError>;

    /// Moves still-active line items to a terminal status and gives their
    /// quantity back to the ledger. Returns the rows that actually changed.
    async fn settle(
        &self,
        reservation_id: &str,
        line_ids: &[Uuid],
        status: LineStatus,
    ) -> Result<Vec<LineItem>, StoreError>;

    async fn pending_events(&self, limit: i64) -> Result<Vec<DbOutboxEvent>, StoreError>;

    async fn mark_event_processed(&self, event_id: Uuid) -> Result<(), StoreError>;
}

/// Event describing a settlement, or `None` when nothing changed.
pub(crate) fn settlement_event(
    reservation_id: &str,
    status: LineStatus,
    settled: &[LineItem],
    now: DateTime<Utc>,
) -> Option<InventoryEvent> {
    if settled.is_empty() {
        return None;
    }
    let items = settled
        .iter()
        .map(|line| ReservationItemData {
            product_id: line.product_id,
            quantity: line.quantity,
        })
        .collect();
    let reservation_id = reservation_id.to_string();

    match status {
        LineStatus::Released => Some(InventoryEvent::ReservationReleased {
            reservation_id,
            items,
            occurred_at: now,
        }),
        LineStatus::Expired => Some(InventoryEvent::ReservationExpired {
            reservation_id,
            items,
            occurred_at: now,
        }),
        LineStatus::Active => None,
    }
}

/// Quantities per product, summed and ordered by product id so that ledger
/// rows are always locked in the same order.
pub(crate) fn quantities_by_product<I>(lines: I) -> std::collections::BTreeMap<Uuid, i32>
where
    I: IntoIterator<Item = (Uuid, i32)>,
{
    let mut totals = std::collections::BTreeMap::new();
    for (product_id, quantity) in lines {
        *totals.entry(product_id).or_insert(0) += quantity;
    }
    totals
}
