use thiserror::Error;

use classbook_core::{BookingId, DomainError, EventId};

/// Booking-domain failure.
///
/// Every variant is deterministic and carries enough context for a presentation
/// layer to render a specific message (event titles are the display names).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BookingError {
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
}

impl BookingError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn event_full(event: &crate::Event) -> Self {
        Self::EventFull {
            event_id: event.id,
            title: event.title.clone(),
        }
    }
}

impl From<DomainError> for BookingError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg)
            | DomainError::InvalidId(msg)
            | DomainError::Conflict(msg) => BookingError::Validation(msg),
        }
    }
}
