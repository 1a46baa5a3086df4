use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};

pub const INVENTORY_COMMAND_TOPIC: &str = "inventory-service-commands";
pub const INVENTORY_REPLY_TOPIC: &str = "inventory-replies";
pub const INVENTORY_EVENT_TOPIC: &str = "inventory-events";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    pub id: Uuid,
    pub correlation_id: Uuid,
    pub command_type: CommandType,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CommandType {
    ReserveProducts,
    ReleaseReservation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandReply {
    pub id: Uuid,
    pub command_id: Uuid,
    pub correlation_id: Uuid,
    pub status: CommandStatus,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CommandStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReservationItemData {
    pub product_id: Uuid,
    pub quantity: i32,
}

/// Payload of a `ReserveProducts` command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReserveProductsData {
    #[serde(default)]
    pub reservation_id: Option<String>,
    pub items: Vec<ReservationItemData>,
    #[serde(default)]
    pub reserved_by: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub reference_id: Option<String>,
}

/// Payload of a `ReleaseReservation` command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseReservationData {
    pub reservation_id: String,
}

/// Events published on [`INVENTORY_EVENT_TOPIC`], keyed by reservation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum InventoryEvent {
    ReservationCreated {
        reservation_id: String,
        items: Vec<ReservationItemData>,
        expires_at: DateTime<Utc>,
        reserved_by: Option<String>,
        reference_id: Option<String>,
        occurred_at: DateTime<Utc>,
    },
    ReservationReleased {
        reservation_id: String,
        items: Vec<ReservationItemData>,
        occurred_at: DateTime<Utc>,
    },
    ReservationExpired {
        reservation_id: String,
        items: Vec<ReservationItemData>,
        occurred_at: DateTime<Utc>,
    },
}

impl InventoryEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            InventoryEvent::ReservationCreated { .. } => "ReservationCreated",
            InventoryEvent::ReservationReleased { .. } => "ReservationReleased",
            InventoryEvent::ReservationExpired { .. } => "ReservationExpired",
        }
    }

    pub fn reservation_id(&self) -> &str {
        match self {
            InventoryEvent::ReservationCreated { reservation_id, .. }
            | InventoryEvent::ReservationReleased { reservation_id, .. }
            | InventoryEvent::ReservationExpired { reservation_id, .. } => reservation_id,
        }
    }
}

impl Command {
    pub fn new(correlation_id: Uuid, command_type: CommandType, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            correlation_id,
            command_type,
            payload,
            created_at: Utc::now(),
        }
    }
}

impl CommandReply {
    pub fn success(command_id: Uuid, correlation_id: Uuid, result: Option<serde_json::Value>) -> Self {
        Self {
            id: Uuid::new_v4(),
            command_id,
            correlation_id,
            status: CommandStatus::Success,
            result,
            error: None,
            created_at: Utc::now(),
        }
    }

    pub fn failed(command_id: Uuid, correlation_id: Uuid, error: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            command_id,
            correlation_id,
            status: CommandStatus::Failed,
            result: None,
            error: Some(error),
            created_at: Utc::now(),
        }
    }
}
