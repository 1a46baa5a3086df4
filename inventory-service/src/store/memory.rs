use std::collections::HashMap;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{quantities_by_product, settlement_event, CommitOutcome, InventoryStore, ReservationBatch};
use crate::error::StoreError;
use crate::ledger::clamped_release;
use crate::models::*;

#[derive(Default)]
struct MemoryState {
    products: HashMap<Uuid, Product>,
    ledger: HashMap<Uuid, StockLedgerEntry>,
    lines: Vec<LineItem>,
    outbox: Vec<DbOutboxEvent>,
}

impl MemoryState {
    fn product_stock(&self, product_id: &Uuid) -> Option<ProductStock> {
        let product = self.products.get(product_id)?;
        let entry = self.ledger.get(product_id)?;
        Some(ProductStock {
            product: product.clone(),
            stock: entry.level(),
        })
    }

    fn push_event(&mut self, event: &shared::InventoryEvent, now: DateTime<Utc>) -> Result<(), StoreError> {
        let new = NewOutboxEvent::from_event(event)?;
        self.outbox.push(DbOutboxEvent {
            id: new.id,
            aggregate_id: new.aggregate_id,
            event_type: new.event_type,
            event_data: new.event_data,
            processed: Some(false),
            created_at: Some(now),
        });
        Ok(())
    }
}

/// Process-local [`InventoryStore`] with the same atomicity as the Postgres
/// store. Meant for tests and for running the service without a database;
/// state is lost on restart.
#[derive(Default)]
pub struct MemoryInventoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryInventoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an active catalog product with `total` units of stock and
    /// returns its id.
    pub async fn add_product(&self, name: &str, total: i32) -> Uuid {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let product = Product {
            id,
            name: name.to_string(),
            description: None,
            price: BigDecimal::from(0),
            sku: None,
            is_active: true,
            created_at: Some(now),
            updated_at: Some(now),
        };
        self.insert_product(product, total, 0).await;
        id
    }

    pub async fn insert_product(&self, product: Product, total: i32, reserved: i32) {
        let mut state = self.state.lock().await;
        state.ledger.insert(
            product.id,
            StockLedgerEntry {
                product_id: product.id,
                total_quantity: total,
                reserved_quantity: reserved,
                updated_at: Some(Utc::now()),
            },
        );
        state.products.insert(product.id, product);
    }

    pub async fn set_active(&self, product_id: Uuid, is_active: bool) {
        let mut state = self.state.lock().await;
        if let Some(product) = state.products.get_mut(&product_id) {
            product.is_active = is_active;
        }
    }

    /// Overwrites a product's total stock, the way a catalog adjustment
    /// outside the reservation path would.
    pub async fn set_total(&self, product_id: Uuid, total: i32) {
        let mut state = self.state.lock().await;
        if let Some(entry) = state.ledger.get_mut(&product_id) {
            entry.total_quantity = total;
        }
    }

    pub async fn stock_level(&self, product_id: Uuid) -> Option<StockLevel> {
        let state = self.state.lock().await;
        state.ledger.get(&product_id).map(|e| e.level())
    }

    pub async fn outbox(&self) -> Vec<DbOutboxEvent> {
        self.state.lock().await.outbox.clone()
    }
}

#[async_trait]
impl InventoryStore for MemoryInventoryStore {
    async fn product_stock(&self, product_id: Uuid) -> Result<Option<ProductStock>, StoreError> {
        Ok(self.state.lock().await.product_stock(&product_id))
    }

    async fn product_stocks(&self, product_ids: &[Uuid]) -> Result<Vec<ProductStock>, StoreError> {
        let state = self.state.lock().await;
        Ok(product_ids.iter().filter_map(|id| state.product_stock(id)).collect())
    }

    async fn commit_reservation(&self, batch: ReservationBatch) -> Result<CommitOutcome, StoreError> {
        let mut state = self.state.lock().await;
        let per_product = quantities_by_product(batch.items.iter().map(|i| (i.product_id, i.quantity)));

        for (product_id, quantity) in &per_product {
            let fits = state
                .ledger
                .get(product_id)
                .map(|e| e.total_quantity - e.reserved_quantity >= *quantity)
                .unwrap_or(false);
            if !fits {
                return Ok(CommitOutcome::Conflict { product_id: *product_id });
            }
        }

        let now = Utc::now();
        for (product_id, quantity) in per_product {
            if let Some(entry) = state.ledger.get_mut(&product_id) {
                entry.reserved_quantity += quantity;
                entry.updated_at = Some(now);
            }
        }
        state.push_event(&batch.event, now)?;
        state
            .lines
            .extend(batch.items.into_iter().map(|item| item.into_line_item(now)));

        Ok(CommitOutcome::Committed)
    }

    async fn find_active_by_reservation_id(&self, reservation_id: &str) -> Result<Vec<LineItem>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .lines
            .iter()
            .filter(|l| l.reservation_id == reservation_id && l.is_active())
            .cloned()
            .collect())
    }

    async fn find_by_reservation_id(&self, reservation_id: &str) -> Result<Vec<LineItem>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .lines
            .iter()
            .filter(|l| l.reservation_id == reservation_id)
            .cloned()
            .collect())
    }

    async fn find_expired(&self, before: DateTime<Utc>, limit: i64) -> Result<Vec<LineItem>, StoreError> {
        let state = self.state.lock().await;
        let mut expired: Vec<LineItem> = state
            .lines
            .iter()
            .filter(|l| l.is_active() && l.expires_at < before)
            .cloned()
            .collect();
        expired.sort_by_key(|l| l.expires_at);
        expired.truncate(limit.max(0) as usize);
        Ok(expired)
    }

    async fn settle(
        &self,
        reservation_id: &str,
        line_ids: &[Uuid],
        status: LineStatus,
    ) -> Result<Vec<LineItem>, StoreError> {
        let mut state = self.state.lock().await;
        let now = Utc::now();

        let mut settled = Vec::new();
        for line in state.lines.iter_mut() {
            if line_ids.contains(&line.id) && line.is_active() {
                line.status = status.as_str().to_string();
                line.updated_at = Some(now);
                settled.push(line.clone());
            }
        }

        let per_product = quantities_by_product(settled.iter().map(|l| (l.product_id, l.quantity)));
        for (product_id, quantity) in per_product {
            if let Some(entry) = state.ledger.get_mut(&product_id) {
                entry.reserved_quantity = clamped_release(product_id, entry.reserved_quantity, quantity);
                entry.updated_at = Some(now);
            }
        }

        if let Some(event) = settlement_event(reservation_id, status, &settled, now) {
            state.push_event(&event, now)?;
        }

        Ok(settled)
    }

    async fn pending_events(&self, limit: i64) -> Result<Vec<DbOutboxEvent>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .outbox
            .iter()
            .filter(|e| e.processed != Some(true))
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn mark_event_processed(&self, event_id: Uuid) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if let Some(event) = state.outbox.iter_mut().find(|e| e.id == event_id) {
            event.processed = Some(true);
        }
        Ok(())
    }
}
