//! `classbook-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, record versioning for optimistic concurrency, and the shared
//! domain error model.

pub mod entity;
pub mod error;
pub mod id;
pub mod record;
pub mod value_object;

pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{BookingId, EventId};
pub use record::{ExpectedVersion, Record};
pub use value_object::ValueObject;
