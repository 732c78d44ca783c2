//! Infrastructure layer: storage, the reservation engine, notification dispatch.

pub mod engine;
pub mod notify;
pub mod store;

pub use engine::{DeletedEvent, EngineConfig, ReservationEngine, ReservationError};
