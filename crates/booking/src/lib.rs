//! Booking domain module.
//!
//! This crate contains the business rules for class bookings, implemented purely
//! as deterministic domain logic (no IO, no HTTP, no storage): events and their
//! seat counters, customers, bookings, the cancellation window, the
//! validate-then-apply seat planning used by the reservation engine, read views
//! and the notification payloads handed to outbound collaborators.

pub mod booking;
pub mod customer;
pub mod error;
pub mod event;
pub mod notification;
pub mod plan;
pub mod policy;
pub mod views;

pub use booking::Booking;
pub use customer::{Customer, Email};
pub use error::BookingError;
pub use event::{Event, EventPatch, NewEvent, PatchOutcome};
pub use notification::Notification;
pub use plan::{AppliedSeats, EventIndex, SeatChanges};
pub use policy::{CancellationPolicy, remaining_cancellation_hours};
