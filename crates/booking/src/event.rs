use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use classbook_core::{Entity, EventId, Record};

use crate::error::BookingError;

/// A scheduled class/session with a finite number of seats.
///
/// `booked_capacity` is a materialized counter: it is only ever moved by the
/// reservation engine, one seat at a time, and must stay within
/// `0..=total_capacity`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub date: DateTime<Utc>,
    pub title: String,
    pub location: String,
    /// Display-only grouping (drives styling, never booking rules).
    pub category: String,
    pub total_capacity: u32,
    pub booked_capacity: u32,
    #[serde(default)]
    pub version: u64,
}

/// Admin input for creating an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEvent {
    pub date: DateTime<Utc>,
    pub title: String,
    pub location: String,
    pub category: String,
    pub total_capacity: u32,
}

/// Partial admin edit. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventPatch {
    pub date: Option<DateTime<Utc>>,
    pub title: Option<String>,
    pub location: Option<String>,
    pub category: Option<String>,
    pub total_capacity: Option<u32>,
}

/// What an applied patch changed, as far as participants are concerned.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PatchOutcome {
    /// Date or location moved; booked customers should be told.
    pub schedule_changed: bool,
}

impl Event {
    /// Build a fresh, unbooked event from admin input.
    pub fn create(id: EventId, input: NewEvent) -> Result<Self, BookingError> {
        let title = input.title.trim().to_string();
        if title.is_empty() {
            return Err(BookingError::validation("title cannot be empty"));
        }
        if input.total_capacity == 0 {
            return Err(BookingError::validation("total_capacity must be at least 1"));
        }

        Ok(Self {
            id,
            date: input.date,
            title,
            location: input.location.trim().to_string(),
            category: input.category.trim().to_string(),
            total_capacity: input.total_capacity,
            booked_capacity: 0,
            version: 0,
        })
    }

    pub fn is_full(&self) -> bool {
        self.booked_capacity >= self.total_capacity
    }

    pub fn remaining_seats(&self) -> u32 {
        self.total_capacity.saturating_sub(self.booked_capacity)
    }

    /// Whether the event has already started at `now`.
    pub fn is_past(&self, now: DateTime<Utc>) -> bool {
        self.date < now
    }

    /// Take one seat. Fails with `EventFull` when no seat is left.
    pub fn reserve_seat(&mut self) -> Result<(), BookingError> {
        if self.is_full() {
            return Err(BookingError::event_full(self));
        }
        self.booked_capacity += 1;
        Ok(())
    }

    /// Release one seat, flooring at zero.
    ///
    /// Returns `true` when the counter was already zero, i.e. the release had
    /// nothing to take back and the counter disagrees with the bookings.
    pub fn release_seat(&mut self) -> bool {
        if self.booked_capacity == 0 {
            return true;
        }
        self.booked_capacity -= 1;
        false
    }

    /// Apply an admin edit. Capacity can never be lowered below the seats already taken.
    pub fn apply_patch(&mut self, patch: EventPatch) -> Result<PatchOutcome, BookingError> {
        if let Some(total) = patch.total_capacity {
            if total == 0 {
                return Err(BookingError::validation("total_capacity must be at least 1"));
            }
            if total < self.booked_capacity {
                return Err(BookingError::validation(format!(
                    "total_capacity {total} is below the {} seats already booked",
                    self.booked_capacity
                )));
            }
        }
        if let Some(title) = &patch.title {
            if title.trim().is_empty() {
                return Err(BookingError::validation("title cannot be empty"));
            }
        }

        let mut schedule_changed = false;

        if let Some(date) = patch.date {
            schedule_changed |= date != self.date;
            self.date = date;
        }
        if let Some(location) = patch.location {
            let location = location.trim().to_string();
            schedule_changed |= location != self.location;
            self.location = location;
        }
        if let Some(title) = patch.title {
            self.title = title.trim().to_string();
        }
        if let Some(category) = patch.category {
            self.category = category.trim().to_string();
        }
        if let Some(total) = patch.total_capacity {
            self.total_capacity = total;
        }

        Ok(PatchOutcome { schedule_changed })
    }
}

impl Entity for Event {
    type Id = EventId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl Record for Event {
    fn version(&self) -> u64 {
        self.version
    }
}
