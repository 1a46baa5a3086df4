pub mod api;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod grpc;
pub mod handlers;
pub mod ledger;
pub mod models;
pub mod outbox;
pub mod records;
pub mod schema;
pub mod shutdown;
pub mod store;
pub mod sweeper;

pub use coordinator::{ReservationCoordinator, ReservationSettings};
pub use error::{ReservationError, StoreError};
