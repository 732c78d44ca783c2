//! Event and booking storage boundary.
//!
//! Two repositories (events, bookings) plus a [`Ledger`] that commits writes to
//! both atomically under optimistic version checks.

pub mod in_memory;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryLedger;
#[cfg(feature = "postgres")]
pub use postgres::PostgresLedger;
pub use r#trait::{BookingRepository, Changeset, Committed, EventRepository, Ledger, StoreError};
