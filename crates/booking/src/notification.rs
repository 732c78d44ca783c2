//! Notification payloads handed to outbound collaborators (e-mail, push, webhooks).
//!
//! These are facts about committed changes. Publishing them is best-effort:
//! the mutation they describe is already durable when they are built.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use classbook_events::Message;

use crate::booking::Booking;
use crate::customer::Customer;
use crate::event::Event;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    BookingCreated {
        booking: Booking,
        events: Vec<Event>,
        occurred_at: DateTime<Utc>,
    },
    BookingUpdated {
        booking: Booking,
        added: Vec<Event>,
        removed: Vec<Event>,
        occurred_at: DateTime<Utc>,
    },
    EventCancelled {
        event: Event,
        affected_bookings: Vec<Booking>,
        occurred_at: DateTime<Utc>,
    },
    EventRescheduled {
        event: Event,
        affected_bookings: Vec<Booking>,
        occurred_at: DateTime<Utc>,
    },
    BookingCancelledByAdmin {
        booking: Booking,
        cancelled_event: Event,
        remaining_events: Vec<Event>,
        occurred_at: DateTime<Utc>,
    },
    BookingReminderRequested {
        booking: Booking,
        occurred_at: DateTime<Utc>,
    },
}

impl Notification {
    /// Customers who should hear about this notification.
    pub fn recipients(&self) -> Vec<&Customer> {
        match self {
            Notification::BookingCreated { booking, .. }
            | Notification::BookingUpdated { booking, .. }
            | Notification::BookingCancelledByAdmin { booking, .. }
            | Notification::BookingReminderRequested { booking, .. } => vec![&booking.customer],
            Notification::EventCancelled {
                affected_bookings, ..
            }
            | Notification::EventRescheduled {
                affected_bookings, ..
            } => affected_bookings.iter().map(|b| &b.customer).collect(),
        }
    }
}

impl Message for Notification {
    fn topic(&self) -> &'static str {
        match self {
            Notification::BookingCreated { .. } => "booking.created",
            Notification::BookingUpdated { .. } => "booking.updated",
            Notification::EventCancelled { .. } => "event.cancelled",
            Notification::EventRescheduled { .. } => "event.rescheduled",
            Notification::BookingCancelledByAdmin { .. } => "booking.cancelled_by_admin",
            Notification::BookingReminderRequested { .. } => "booking.reminder_requested",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            Notification::BookingCreated { occurred_at, .. }
            | Notification::BookingUpdated { occurred_at, .. }
            | Notification::EventCancelled { occurred_at, .. }
            | Notification::EventRescheduled { occurred_at, .. }
            | Notification::BookingCancelledByAdmin { occurred_at, .. }
            | Notification::BookingReminderRequested { occurred_at, .. } => *occurred_at,
        }
    }
}
