use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Queryable, Identifiable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::products)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub price: bigdecimal::BigDecimal,
    pub sku: Option<String>,
    pub is_active: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Queryable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::stock_ledger)]
pub struct StockLedgerEntry {
    pub product_id: Uuid,
    pub total_quantity: i32,
    pub reserved_quantity: i32,
    pub updated_at: Option<DateTime<Utc>>,
}

impl StockLedgerEntry {
    pub fn level(&self) -> StockLevel {
        StockLevel::new(self.total_quantity, self.reserved_quantity)
    }
}

/// Point-in-time view of a product's stock counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevel {
    pub total: i32,
    pub reserved: i32,
    pub available: i32,
}

impl StockLevel {
    pub fn new(total: i32, reserved: i32) -> Self {
        Self {
            total,
            reserved,
            available: (total - reserved).max(0),
        }
    }
}

/// A catalog product joined with its ledger row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductStock {
    pub product: Product,
    pub stock: StockLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LineStatus {
    Active,
    Released,
    Expired,
}

impl LineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineStatus::Active => "ACTIVE",
            LineStatus::Released => "RELEASED",
            LineStatus::Expired => "EXPIRED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, LineStatus::Active)
    }
}

impl fmt::Display for LineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LineStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(LineStatus::Active),
            "RELEASED" => Ok(LineStatus::Released),
            "EXPIRED" => Ok(LineStatus::Expired),
            other => Err(format!("unknown reservation status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Queryable, Identifiable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::reservation_line_items)]
pub struct LineItem {
    pub id: Uuid,
    pub reservation_id: String,
    pub product_id: Uuid,
    pub quantity: i32,
    pub status: String,
    pub expires_at: DateTime<Utc>,
    pub reserved_by: Option<String>,
    pub reason: String,
    pub reference_id: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl LineItem {
    /// Rows written by anything other than this service could carry an
    /// unexpected status; those are treated as terminal.
    pub fn line_status(&self) -> LineStatus {
        self.status.parse().unwrap_or(LineStatus::Expired)
    }

    pub fn is_active(&self) -> bool {
        self.line_status() == LineStatus::Active
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::reservation_line_items)]
pub struct NewLineItem {
    pub id: Uuid,
    pub reservation_id: String,
    pub product_id: Uuid,
    pub quantity: i32,
    pub status: String,
    pub expires_at: DateTime<Utc>,
    pub reserved_by: Option<String>,
    pub reason: String,
    pub reference_id: Option<String>,
}

impl NewLineItem {
    pub fn into_line_item(self, now: DateTime<Utc>) -> LineItem {
        LineItem {
            id: self.id,
            reservation_id: self.reservation_id,
            product_id: self.product_id,
            quantity: self.quantity,
            status: self.status,
            expires_at: self.expires_at,
            reserved_by: self.reserved_by,
            reason: self.reason,
            reference_id: self.reference_id,
            created_at: Some(now),
            updated_at: Some(now),
        }
    }
}

#[derive(Debug, Clone, Queryable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::outbox_events)]
pub struct DbOutboxEvent {
    pub id: Uuid,
    pub aggregate_id: String,
    pub event_type: String,
    pub event_data: serde_json::Value,
    pub processed: Option<bool>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::outbox_events)]
pub struct NewOutboxEvent {
    pub id: Uuid,
    pub aggregate_id: String,
    pub event_type: String,
    pub event_data: serde_json::Value,
}

impl NewOutboxEvent {
    pub fn from_event(event: &shared::InventoryEvent) -> serde_json::Result<Self> {
        Ok(Self {
            id: Uuid::new_v4(),
            aggregate_id: event.reservation_id().to_string(),
            event_type: event.event_type().to_string(),
            event_data: serde_json::to_value(event)?,
        })
    }
}
