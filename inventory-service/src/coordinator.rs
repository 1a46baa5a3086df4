//! Reservation coordinator: the only writer of reserved stock.
//!
//! Reserve, Release and each expiry group run under one process-wide async
//! lock, so the read-check-commit sequence never interleaves inside a
//! process. The store's guarded ledger update covers other processes that
//! share the same database; a lost race there is retried a bounded number of
//! times.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use shared::{InventoryEvent, ReservationItemData};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::ReservationError;
use crate::models::{LineItem, LineStatus, NewLineItem, ProductStock};
use crate::store::{quantities_by_product, CommitOutcome, InventoryStore, ReservationBatch};

pub const DEFAULT_REASON: &str = "ORDER";

#[derive(Debug, Clone)]
pub struct ReservationSettings {
    pub ttl: Duration,
    pub max_conflict_retries: u32,
    pub sweep_batch_size: i64,
}

impl Default for ReservationSettings {
    fn default() -> Self {
        Self {
            ttl: Duration::minutes(15),
            max_conflict_retries: 3,
            sweep_batch_size: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveItem {
    pub product_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReserveRequest {
    #[serde(default)]
    pub reservation_id: Option<String>,
    pub items: Vec<ReserveItem>,
    #[serde(default)]
    pub reserved_by: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub reference_id: Option<String>,
}

/// Why a single item could not be reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ItemFailure {
    NotFound,
    Inactive,
    InsufficientStock { available: i32, requested: i32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemResult {
    pub product_id: Uuid,
    pub success: bool,
    pub reserved_quantity: i32,
    pub message: String,
    pub failure: Option<ItemFailure>,
}

impl ItemResult {
    fn reserved(product_id: Uuid, quantity: i32, message: &str) -> Self {
        Self {
            product_id,
            success: true,
            reserved_quantity: quantity,
            message: message.to_string(),
            failure: None,
        }
    }

    fn failed(product_id: Uuid, failure: ItemFailure) -> Self {
        let message = match failure {
            ItemFailure::NotFound => format!("Product {} not found", product_id),
            ItemFailure::Inactive => format!("Product {} is not active", product_id),
            ItemFailure::InsufficientStock { available, requested } => {
                format!("Insufficient stock. Available: {}, Requested: {}", available, requested)
            }
        };
        Self {
            product_id,
            success: false,
            reserved_quantity: 0,
            message,
            failure: Some(failure),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveOutcome {
    pub all_reserved: bool,
    pub results: Vec<ItemResult>,
    pub reservation_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseOutcome {
    pub success: bool,
    pub message: String,
}

impl ReleaseOutcome {
    fn not_found(reservation_id: &str) -> Self {
        Self {
            success: false,
            message: format!("Reservation {} not found or already released/expired", reservation_id),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub reservations_expired: usize,
    pub lines_expired: usize,
    pub failures: usize,
}

impl fmt::Display for SweepReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} reservations ({} line items) expired, {} failures",
            self.reservations_expired, self.lines_expired, self.failures
        )
    }
}

/// Outcome of checking a request against current stock.
struct Evaluation {
    results: Vec<ItemResult>,
    all_ok: bool,
}

pub struct ReservationCoordinator {
    store: Arc<dyn InventoryStore>,
    settings: ReservationSettings,
    lock: Mutex<()>,
}

impl ReservationCoordinator {
    pub fn new(store: Arc<dyn InventoryStore>, settings: ReservationSettings) -> Self {
        Self {
            store,
            settings,
            lock: Mutex::new(()),
        }
    }

    pub fn settings(&self) -> &ReservationSettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<dyn InventoryStore> {
        &self.store
    }

    pub async fn get_product(&self, product_id: Uuid) -> Result<ProductStock, ReservationError> {
        self.store
            .product_stock(product_id)
            .await?
            .ok_or_else(|| ReservationError::not_found("Product not found"))
    }

    pub async fn get_products(&self, product_ids: &[Uuid]) -> Result<Vec<ProductStock>, ReservationError> {
        Ok(self.store.product_stocks(product_ids).await?)
    }

    /// All line items of a reservation regardless of status.
    pub async fn inspect(&self, reservation_id: &str) -> Result<Vec<LineItem>, ReservationError> {
        let lines = self.store.find_by_reservation_id(reservation_id).await?;
        if lines.is_empty() {
            return Err(ReservationError::not_found(format!(
                "Reservation {} not found",
                reservation_id
            )));
        }
        Ok(lines)
    }

    /// Reserves every item or none of them.
    pub async fn reserve(&self, request: ReserveRequest) -> Result<ReserveOutcome, ReservationError> {
        validate_items(&request.items)?;

        let reservation_id = request
            .reservation_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let _guard = self.lock.lock().await;

        let existing = self.store.find_active_by_reservation_id(&reservation_id).await?;
        if !existing.is_empty() {
            if existing.iter().any(|line| line.expires_at <= Utc::now()) {
                // past its deadline but not yet swept; expire it now and reserve afresh
                let ids: Vec<Uuid> = existing.iter().map(|l| l.id).collect();
                let settled = self.store.settle(&reservation_id, &ids, LineStatus::Expired).await?;
                info!(%reservation_id, lines = settled.len(), "Expired stale reservation before reserving again");
            } else if same_items(&existing, &request.items) {
                info!(%reservation_id, lines = existing.len(), "Reservation already active, returning existing line items");
                return Ok(ReserveOutcome {
                    all_reserved: true,
                    results: existing
                        .iter()
                        .map(|line| ItemResult::reserved(line.product_id, line.quantity, "Already reserved"))
                        .collect(),
                    reservation_id,
                });
            } else {
                warn!(%reservation_id, "Reservation id reused with different items");
                return Err(ReservationError::validation(format!(
                    "Reservation {} is already active with different items",
                    reservation_id
                )));
            }
        }

        let max_attempts = self.settings.max_conflict_retries + 1;
        let mut attempt = 0;

        loop {
            attempt += 1;

            let evaluation = self.evaluate(&request.items).await?;
            if !evaluation.all_ok {
                info!(
                    %reservation_id,
                    failed = evaluation.results.iter().filter(|r| !r.success).count(),
                    "Reservation rejected, nothing committed"
                );
                return Ok(ReserveOutcome {
                    all_reserved: false,
                    results: evaluation.results,
                    reservation_id,
                });
            }

            let batch = self.stage(&reservation_id, &request, Utc::now());

            match self.store.commit_reservation(batch).await? {
                CommitOutcome::Committed => {
                    info!(%reservation_id, items = request.items.len(), "Reserved products");
                    return Ok(ReserveOutcome {
                        all_reserved: true,
                        results: evaluation.results,
                        reservation_id,
                    });
                }
                CommitOutcome::Conflict { product_id } if attempt < max_attempts => {
                    warn!(%reservation_id, %product_id, attempt, "Stock changed during reservation, retrying");
                }
                CommitOutcome::Conflict { product_id } => {
                    error!(%reservation_id, %product_id, attempt, "Giving up on reservation after repeated conflicts");
                    return Err(ReservationError::Conflict {
                        reservation_id,
                        product_id,
                        attempts: attempt,
                    });
                }
            }
        }
    }

    /// Gives every active line item of the reservation back to stock.
    /// A reservation that is unknown or already settled is reported as
    /// `success = false`, not as an error.
    pub async fn release(&self, reservation_id: &str) -> Result<ReleaseOutcome, ReservationError> {
        let reservation_id = reservation_id.trim();
        if reservation_id.is_empty() {
            return Err(ReservationError::validation("Reservation ID is required"));
        }

        let _guard = self.lock.lock().await;

        let active = self.store.find_active_by_reservation_id(reservation_id).await?;
        if active.is_empty() {
            debug!(%reservation_id, "Nothing to release");
            return Ok(ReleaseOutcome::not_found(reservation_id));
        }

        let ids: Vec<Uuid> = active.iter().map(|l| l.id).collect();
        let settled = self.store.settle(reservation_id, &ids, LineStatus::Released).await?;
        if settled.is_empty() {
            return Ok(ReleaseOutcome::not_found(reservation_id));
        }

        info!(%reservation_id, lines = settled.len(), "Released reservation");
        Ok(ReleaseOutcome {
            success: true,
            message: "Reservation released successfully".to_string(),
        })
    }

    /// Expires every active line item whose deadline is before `now`.
    /// Failures on one reservation are logged and do not stop the others.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<SweepReport, ReservationError> {
        let expired = self
            .store
            .find_expired(now, self.settings.sweep_batch_size)
            .await?;

        let mut groups: BTreeMap<String, Vec<Uuid>> = BTreeMap::new();
        for line in expired {
            groups.entry(line.reservation_id).or_default().push(line.id);
        }

        let mut report = SweepReport::default();
        for (reservation_id, ids) in groups {
            let _guard = self.lock.lock().await;
            match self.store.settle(&reservation_id, &ids, LineStatus::Expired).await {
                Ok(settled) if settled.is_empty() => {}
                Ok(settled) => {
                    info!(%reservation_id, lines = settled.len(), "Expired reservation");
                    report.reservations_expired += 1;
                    report.lines_expired += settled.len();
                }
                Err(e) => {
                    error!(%reservation_id, error = %e, "Failed to expire reservation");
                    report.failures += 1;
                }
            }
        }

        Ok(report)
    }

    async fn evaluate(&self, items: &[ReserveItem]) -> Result<Evaluation, ReservationError> {
        let mut ids: Vec<Uuid> = items.iter().map(|i| i.product_id).collect();
        ids.sort();
        ids.dedup();

        let stocks: HashMap<Uuid, ProductStock> = self
            .store
            .product_stocks(&ids)
            .await?
            .into_iter()
            .map(|s| (s.product.id, s))
            .collect();

        let mut staged: HashMap<Uuid, i32> = HashMap::new();
        let mut results = Vec::with_capacity(items.len());
        let mut all_ok = true;

        for item in items {
            let result = match stocks.get(&item.product_id) {
                None => ItemResult::failed(item.product_id, ItemFailure::NotFound),
                Some(stock) if !stock.product.is_active => {
                    ItemResult::failed(item.product_id, ItemFailure::Inactive)
                }
                Some(stock) => {
                    let already = staged.get(&item.product_id).copied().unwrap_or(0);
                    let available = (stock.stock.available - already).max(0);
                    if available < item.quantity {
                        ItemResult::failed(
                            item.product_id,
                            ItemFailure::InsufficientStock {
                                available,
                                requested: item.quantity,
                            },
                        )
                    } else {
                        *staged.entry(item.product_id).or_insert(0) += item.quantity;
                        ItemResult::reserved(item.product_id, item.quantity, "Successfully reserved")
                    }
                }
            };
            all_ok &= result.success;
            results.push(result);
        }

        Ok(Evaluation { results, all_ok })
    }

    fn stage(&self, reservation_id: &str, request: &ReserveRequest, now: DateTime<Utc>) -> ReservationBatch {
        let expires_at = now + self.settings.ttl;
        let reason = request
            .reason
            .clone()
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_REASON.to_string());

        let items: Vec<NewLineItem> = request
            .items
            .iter()
            .map(|item| NewLineItem {
                id: Uuid::new_v4(),
                reservation_id: reservation_id.to_string(),
                product_id: item.product_id,
                quantity: item.quantity,
                status: LineStatus::Active.as_str().to_string(),
                expires_at,
                reserved_by: request.reserved_by.clone(),
                reason: reason.clone(),
                reference_id: request.reference_id.clone(),
            })
            .collect();

        let event = InventoryEvent::ReservationCreated {
            reservation_id: reservation_id.to_string(),
            items: request
                .items
                .iter()
                .map(|i| ReservationItemData {
                    product_id: i.product_id,
                    quantity: i.quantity,
                })
                .collect(),
            expires_at,
            reserved_by: request.reserved_by.clone(),
            reference_id: request.reference_id.clone(),
            occurred_at: now,
        };

        ReservationBatch {
            reservation_id: reservation_id.to_string(),
            items,
            event,
        }
    }
}

/// Whether the active lines hold exactly the requested quantity per product.
fn same_items(lines: &[LineItem], items: &[ReserveItem]) -> bool {
    quantities_by_product(lines.iter().map(|l| (l.product_id, l.quantity)))
        == quantities_by_product(items.iter().map(|i| (i.product_id, i.quantity)))
}

fn validate_items(items: &[ReserveItem]) -> Result<(), ReservationError> {
    if items.is_empty() {
        return Err(ReservationError::validation("At least one product is required"));
    }
    if let Some(item) = items.iter().find(|i| i.quantity <= 0) {
        return Err(ReservationError::validation(format!(
            "Quantity for product {} must be positive, got {}",
            item.product_id, item.quantity
        )));
    }
    Ok(())
}
