use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{CommitOutcome, InventoryStore, MemoryInventoryStore, ReservationBatch};
use crate::error::StoreError;
use crate::models::{DbOutboxEvent, LineItem, LineStatus, ProductStock};

/// Memory store that can be told to lose commit races or fail reads and
/// settlements.
#[derive(Default)]
pub(crate) struct FaultyStore {
    pub inner: MemoryInventoryStore,
    conflicts: AtomicU32,
    find_expired_failures: AtomicU32,
    failing_settlement: Option<String>,
}

impl FaultyStore {
    pub fn new(inner: MemoryInventoryStore) -> Self {
        Self {
            inner,
            ..Default::default()
        }
    }

    /// The next `n` commits report a conflict without writing anything.
    pub fn with_conflicts(self, n: u32) -> Self {
        self.conflicts.store(n, Ordering::SeqCst);
        self
    }

    /// The next `n` expired scans fail.
    pub fn with_find_expired_failures(self, n: u32) -> Self {
        self.find_expired_failures.store(n, Ordering::SeqCst);
        self
    }

    /// Every settlement of `reservation_id` fails.
    pub fn with_failing_settlement(mut self, reservation_id: &str) -> Self {
        self.failing_settlement = Some(reservation_id.to_string());
        self
    }

    fn take(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl InventoryStore for FaultyStore {
    async fn product_stock(&self, id: Uuid) -> Result<Option<ProductStock>, StoreError> {
        self.inner.product_stock(id).await
    }

    async fn product_stocks(&self, ids: &[Uuid]) -> Result<Vec<ProductStock>, StoreError> {
        self.inner.product_stocks(ids).await
    }

    async fn commit_reservation(&self, batch: ReservationBatch) -> Result<CommitOutcome, StoreError> {
        if Self::take(&self.conflicts) {
            return Ok(CommitOutcome::Conflict {
                product_id: batch.items[0].product_id,
            });
        }
        self.inner.commit_reservation(batch).await
    }

    async fn find_active_by_reservation_id(&self, id: &str) -> Result<Vec<LineItem>, StoreError> {
        self.inner.find_active_by_reservation_id(id).await
    }

    async fn find_by_reservation_id(&self, id: &str) -> Result<Vec<LineItem>, StoreError> {
        self.inner.find_by_reservation_id(id).await
    }

    async fn find_expired(&self, before: DateTime<Utc>, limit: i64) -> Result<Vec<LineItem>, StoreError> {
        if Self::take(&self.find_expired_failures) {
            return Err(StoreError::Pool("connection reset".to_string()));
        }
        self.inner.find_expired(before, limit).await
    }

    async fn settle(&self, id: &str, lines: &[Uuid], status: LineStatus) -> Result<Vec<LineItem>, StoreError> {
        if self.failing_settlement.as_deref() == Some(id) {
            return Err(StoreError::Pool("connection reset".to_string()));
        }
        self.inner.settle(id, lines, status).await
    }

    async fn pending_events(&self, limit: i64) -> Result<Vec<DbOutboxEvent>, StoreError> {
        self.inner.pending_events(limit).await
    }

    async fn mark_event_processed(&self, id: Uuid) -> Result<(), StoreError> {
        self.inner.mark_event_processed(id).await
    }
}
