use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use classbook_core::{BookingId, Entity, EventId, Record};

use crate::customer::Customer;

/// A customer's standing reservation across one or more events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub booking_id: BookingId,
    pub customer: Customer,
    pub booked_event_ids: BTreeSet<EventId>,
    #[serde(default)]
    pub version: u64,
}

impl Booking {
    pub fn new(booking_id: BookingId, customer: Customer, event_ids: BTreeSet<EventId>) -> Self {
        Self {
            booking_id,
            customer,
            booked_event_ids: event_ids,
            version: 0,
        }
    }

    pub fn holds(&self, event_id: &EventId) -> bool {
        self.booked_event_ids.contains(event_id)
    }

    /// Ids requested now but not held yet.
    pub fn added_ids(&self, requested: &BTreeSet<EventId>) -> BTreeSet<EventId> {
        requested.difference(&self.booked_event_ids).copied().collect()
    }

    /// Ids held now but no longer requested.
    pub fn removed_ids(&self, requested: &BTreeSet<EventId>) -> BTreeSet<EventId> {
        self.booked_event_ids.difference(requested).copied().collect()
    }

    /// Drop a reference. Returns whether the booking held it.
    pub fn sever(&mut self, event_id: &EventId) -> bool {
        self.booked_event_ids.remove(event_id)
    }
}

impl Entity for Booking {
    type Id = BookingId;

    fn id(&self) -> &Self::Id {
        &self.booking_id
    }
}

impl Record for Booking {
    fn version(&self) -> u64 {
        self.version
    }
}
