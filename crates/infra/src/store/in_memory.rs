use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use classbook_booking::{Booking, Email, Event};
use classbook_core::{BookingId, EventId, ExpectedVersion};

use super::r#trait::{BookingRepository, Changeset, Committed, EventRepository, Ledger, StoreError};

#[derive(Debug, Default)]
struct LedgerState {
    events: HashMap<EventId, Event>,
    bookings: HashMap<BookingId, Booking>,
    /// Normalized e-mail -> owning booking.
    emails: HashMap<String, BookingId>,
}

impl LedgerState {
    fn event_version(&self, id: &EventId) -> u64 {
        self.events.get(id).map(|e| e.version).unwrap_or(0)
    }

    fn booking_version(&self, id: &BookingId) -> u64 {
        self.bookings.get(id).map(|b| b.version).unwrap_or(0)
    }

    fn check(&self, changes: &Changeset) -> Result<(), StoreError> {
        for (event, expected) in &changes.event_writes {
            let current = self.event_version(&event.id);
            if !expected.matches(current) {
                return Err(StoreError::Concurrency(format!(
                    "event {}: expected {expected:?}, found {current}",
                    event.id
                )));
            }
        }

        for (event_id, expected) in &changes.event_deletes {
            let current = self.event_version(event_id);
            if !expected.matches(current) {
                return Err(StoreError::Concurrency(format!(
                    "event {event_id}: expected {expected:?}, found {current}"
                )));
            }
        }

        let mut claimed = HashSet::new();
        for (booking, expected) in &changes.booking_writes {
            let current = self.booking_version(&booking.booking_id);
            if !expected.matches(current) {
                return Err(StoreError::Concurrency(format!(
                    "booking {}: expected {expected:?}, found {current}",
                    booking.booking_id
                )));
            }

            let email = booking.customer.email.normalized();
            let taken_by_other = self
                .emails
                .get(&email)
                .is_some_and(|owner| *owner != booking.booking_id);
            if taken_by_other || !claimed.insert(email.clone()) {
                return Err(StoreError::Concurrency(format!(
                    "customer e-mail {email} is already registered"
                )));
            }
        }

        Ok(())
    }

    fn apply(&mut self, changes: Changeset) -> Committed {
        let mut committed = Committed::default();

        for (event_id, _) in changes.event_deletes {
            if self.events.remove(&event_id).is_some() {
                committed.deleted_events.push(event_id);
            }
        }

        for (mut event, _) in changes.event_writes {
            event.version = self.event_version(&event.id) + 1;
            self.events.insert(event.id, event.clone());
            committed.events.push(event);
        }

        for (mut booking, _) in changes.booking_writes {
            if let Some(previous) = self.bookings.get(&booking.booking_id) {
                self.emails.remove(&previous.customer.email.normalized());
            }
            booking.version = self.booking_version(&booking.booking_id) + 1;
            self.emails
                .insert(booking.customer.email.normalized(), booking.booking_id);
            self.bookings.insert(booking.booking_id, booking.clone());
            committed.bookings.push(booking);
        }

        committed
    }
}

/// In-memory ledger holding events and bookings under a single lock.
///
/// Intended for tests/dev and single-process deployments. Every commit checks
/// all versions under the write lock, so concurrent check-then-act sequences
/// serialize on it.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    state: RwLock<LedgerState>,
    outage: AtomicBool,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with `StoreError::Unavailable` (tests).
    pub fn simulate_outage(&self, down: bool) {
        self.outage.store(down, Ordering::SeqCst);
    }

    fn available(&self) -> Result<(), StoreError> {
        if self.outage.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory ledger is offline".to_string()));
        }
        Ok(())
    }

    fn read<T>(&self, f: impl FnOnce(&LedgerState) -> T) -> Result<T, StoreError> {
        self.available()?;
        let state = self
            .state
            .read()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))?;
        Ok(f(&state))
    }
}

#[async_trait::async_trait]
impl EventRepository for InMemoryLedger {
    async fn get_event(&self, event_id: EventId) -> Result<Option<Event>, StoreError> {
        self.read(|s| s.events.get(&event_id).cloned())
    }

    async fn list_events(&self) -> Result<Vec<Event>, StoreError> {
        let mut events = self.read(|s| s.events.values().cloned().collect::<Vec<_>>())?;
        events.sort_by_key(|e| (e.date, e.id));
        Ok(events)
    }

    async fn put_event(&self, event: Event, expected: ExpectedVersion) -> Result<Event, StoreError> {
        let event_id = event.id;
        let committed = self.commit(Changeset::new().put_event(event, expected)).await?;
        committed
            .event(event_id)
            .cloned()
            .ok_or_else(|| StoreError::Corrupt(format!("event {event_id} missing after commit")))
    }

    async fn delete_event(&self, event_id: EventId, expected: ExpectedVersion) -> Result<bool, StoreError> {
        if self.get_event(event_id).await?.is_none() {
            return Ok(false);
        }
        let committed = self.commit(Changeset::new().delete_event(event_id, expected)).await?;
        Ok(committed.deleted_events.contains(&event_id))
    }
}

#[async_trait::async_trait]
impl BookingRepository for InMemoryLedger {
    async fn get_booking(&self, booking_id: BookingId) -> Result<Option<Booking>, StoreError> {
        self.read(|s| s.bookings.get(&booking_id).cloned())
    }

    async fn find_by_customer_email(&self, email: &Email) -> Result<Option<Booking>, StoreError> {
        let key = email.normalized();
        self.read(|s| s.emails.get(&key).and_then(|id| s.bookings.get(id)).cloned())
    }

    async fn list_bookings(&self) -> Result<Vec<Booking>, StoreError> {
        let mut bookings = self.read(|s| s.bookings.values().cloned().collect::<Vec<_>>())?;
        bookings.sort_by_key(|b| b.booking_id);
        Ok(bookings)
    }

    async fn put_booking(&self, booking: Booking, expected: ExpectedVersion) -> Result<Booking, StoreError> {
        let booking_id = booking.booking_id;
        let committed = self.commit(Changeset::new().put_booking(booking, expected)).await?;
        committed
            .booking(booking_id)
            .cloned()
            .ok_or_else(|| StoreError::Corrupt(format!("booking {booking_id} missing after commit")))
    }
}

#[async_trait::async_trait]
impl Ledger for InMemoryLedger {
    async fn commit(&self, changes: Changeset) -> Result<Committed, StoreError> {
        self.available()?;
        if changes.is_empty() {
            return Ok(Committed::default());
        }

        let mut state = self
            .state
            .write()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))?;

        state.check(&changes)?;
        Ok(state.apply(changes))
    }
}
