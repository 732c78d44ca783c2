use thiserror::Error;

use classbook_booking::BookingError;
use classbook_core::{BookingId, EventId};

use crate::store::StoreError;

/// Failure of a reservation engine operation.
///
/// Booking-rule variants mirror [`BookingError`] one to one; the last two are
/// infrastructure outcomes. Only `Conflict` is ever retried (internally, before
/// it reaches the caller).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ReservationError {
    #[error("a booking already exists for this e-mail address; modify the existing booking instead")]
    DuplicateCustomer,

    #[error("booking {0} not found")]
    BookingNotFound(BookingId),

    #[error("event {0} not found")]
    EventNotFound(EventId),

    #[error("event \"{title}\" is fully booked")]
    EventFull { event_id: EventId, title: String },

    #[error(
        "cancellation of \"{title}\" is no longer possible: it starts in {hours_remaining:.1} hours"
    )]
    CancellationWindowExpired {
        event_id: EventId,
        title: String,
        hours_remaining: f64,
    },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Concurrent writers kept winning; retry budget exhausted.
    #[error("concurrent modification: {0}")]
    Conflict(String),
}

impl From<BookingError> for ReservationError {
    fn from(value: BookingError) -> Self {
        match value {
            BookingError::DuplicateCustomer => ReservationError::DuplicateCustomer,
            BookingError::BookingNotFound(id) => ReservationError::BookingNotFound(id),
            BookingError::EventNotFound(id) => ReservationError::EventNotFound(id),
            BookingError::EventFull { event_id, title } => {
                ReservationError::EventFull { event_id, title }
            }
            BookingError::CancellationWindowExpired {
                event_id,
                title,
                hours_remaining,
            } => ReservationError::CancellationWindowExpired {
                event_id,
                title,
                hours_remaining,
            },
            BookingError::Validation(msg) => ReservationError::Validation(msg),
        }
    }
}

impl From<StoreError> for ReservationError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Concurrency(msg) => ReservationError::Conflict(msg),
            StoreError::Unavailable(msg) => ReservationError::StorageUnavailable(msg),
            StoreError::Corrupt(msg) => ReservationError::StorageUnavailable(format!("corrupt record: {msg}")),
        }
    }
}
