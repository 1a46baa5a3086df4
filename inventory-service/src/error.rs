use thiserror::Error;
use uuid::Uuid;

/// Failures raised by an [`InventoryStore`](crate::store::InventoryStore).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("connection pool error: {0}")]
    Pool(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ReservationError {
    #[error("invalid argument: {0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("reservation {reservation_id} kept conflicting on product {product_id} after {attempts} attempts")]
    Conflict {
        reservation_id: String,
        product_id: Uuid,
        attempts: u32,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ReservationError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn grpc_code(&self) -> tonic::Code {
        match self {
            ReservationError::Validation(_) => tonic::Code::InvalidArgument,
            ReservationError::NotFound(_) => tonic::Code::NotFound,
            ReservationError::Conflict { .. } | ReservationError::Store(_) => tonic::Code::Internal,
        }
    }

    pub fn http_status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            ReservationError::Validation(_) => StatusCode::BAD_REQUEST,
            ReservationError::NotFound(_) => StatusCode::NOT_FOUND,
            ReservationError::Conflict { .. } | ReservationError::Store(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message safe to hand back to callers. Internal failures are logged
    /// where they happen and replaced by a generic text.
    pub fn public_message(&self) -> String {
        match self {
            ReservationError::Validation(_) | ReservationError::NotFound(_) => self.to_string(),
            ReservationError::Conflict { .. } | ReservationError::Store(_) => {
                "Internal error occurred".to_string()
            }
        }
    }
}

impl From<ReservationError> for tonic::Status {
    fn from(err: ReservationError) -> Self {
        tonic::Status::new(err.grpc_code(), err.public_message())
    }
}
