use std::sync::Arc;

use thiserror::Error;

use classbook_booking::{Booking, Email, Event};
use classbook_core::{BookingId, EventId, ExpectedVersion};

/// Storage operation error.
///
/// These are **infrastructure errors** as opposed to booking rule failures:
///
/// - **Concurrency**: a version check or the e-mail uniqueness guard failed;
///   the caller may re-read and retry
/// - **Unavailable**: the backend could not be reached or refused the operation
/// - **Corrupt**: a stored record could not be decoded
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// A batch of writes committed all-or-nothing.
///
/// Every write carries the version the caller read; the ledger rejects the
/// whole batch if any record moved in the meantime.
#[derive(Debug, Clone, Default)]
pub struct Changeset {
    pub event_writes: Vec<(Event, ExpectedVersion)>,
    pub booking_writes: Vec<(Booking, ExpectedVersion)>,
    pub event_deletes: Vec<(EventId, ExpectedVersion)>,
}

impl Changeset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_event(mut self, event: Event, expected: ExpectedVersion) -> Self {
        self.event_writes.push((event, expected));
        self
    }

    pub fn put_booking(mut self, booking: Booking, expected: ExpectedVersion) -> Self {
        self.booking_writes.push((booking, expected));
        self
    }

    pub fn delete_event(mut self, event_id: EventId, expected: ExpectedVersion) -> Self {
        self.event_deletes.push((event_id, expected));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.event_writes.is_empty() && self.booking_writes.is_empty() && self.event_deletes.is_empty()
    }
}

/// Records as they were stored by a commit (versions bumped).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Committed {
    pub events: Vec<Event>,
    pub bookings: Vec<Booking>,
    pub deleted_events: Vec<EventId>,
}

impl Committed {
    pub fn booking(&self, booking_id: BookingId) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.booking_id == booking_id)
    }

    pub fn event(&self, event_id: EventId) -> Option<&Event> {
        self.events.iter().find(|e| e.id == event_id)
    }
}

/// Event records (capacity, schedule, metadata).
#[async_trait::async_trait]
pub trait EventRepository: Send + Sync {
    async fn get_event(&self, event_id: EventId) -> Result<Option<Event>, StoreError>;

    /// All events, ordered by date then id.
    async fn list_events(&self) -> Result<Vec<Event>, StoreError>;

    /// Single-record write; returns the stored copy.
    async fn put_event(&self, event: Event, expected: ExpectedVersion) -> Result<Event, StoreError>;

    /// Returns `false` when the event did not exist.
    async fn delete_event(&self, event_id: EventId, expected: ExpectedVersion) -> Result<bool, StoreError>;
}

/// Booking records, each referencing a customer and a set of events.
#[async_trait::async_trait]
pub trait BookingRepository: Send + Sync {
    async fn get_booking(&self, booking_id: BookingId) -> Result<Option<Booking>, StoreError>;

    /// Case-insensitive lookup on the customer's e-mail.
    async fn find_by_customer_email(&self, email: &Email) -> Result<Option<Booking>, StoreError>;

    async fn list_bookings(&self) -> Result<Vec<Booking>, StoreError>;

    /// Single-record write; returns the stored copy.
    async fn put_booking(&self, booking: Booking, expected: ExpectedVersion) -> Result<Booking, StoreError>;
}

/// Both stores behind one atomic commit.
///
/// Implementations must:
/// - check every expected version before writing anything
/// - keep customer e-mails unique across bookings (a collision is `Concurrency`)
/// - bump the version of every written record by one
/// - apply the whole changeset or none of it
#[async_trait::async_trait]
pub trait Ledger: EventRepository + BookingRepository {
    async fn commit(&self, changes: Changeset) -> Result<Committed, StoreError>;
}

#[async_trait::async_trait]
impl<S> EventRepository for Arc<S>
where
    S: EventRepository + ?Sized,
{
    async fn get_event(&self, event_id: EventId) -> Result<Option<Event>, StoreError> {
        (**self).get_event(event_id).await
    }

    async fn list_events(&self) -> Result<Vec<Event>, StoreError> {
        (**self).list_events().await
    }

    async fn put_event(&self, event: Event, expected: ExpectedVersion) -> Result<Event, StoreError> {
        (**self).put_event(event, expected).await
    }

    async fn delete_event(&self, event_id: EventId, expected: ExpectedVersion) -> Result<bool, StoreError> {
        (**self).delete_event(event_id, expected).await
    }
}

#[async_trait::async_trait]
impl<S> BookingRepository for Arc<S>
where
    S: BookingRepository + ?Sized,
{
    async fn get_booking(&self, booking_id: BookingId) -> Result<Option<Booking>, StoreError> {
        (**self).get_booking(booking_id).await
    }

    async fn find_by_customer_email(&self, email: &Email) -> Result<Option<Booking>, StoreError> {
        (**self).find_by_customer_email(email).await
    }

    async fn list_bookings(&self) -> Result<Vec<Booking>, StoreError> {
        (**self).list_bookings().await
    }

    async fn put_booking(&self, booking: Booking, expected: ExpectedVersion) -> Result<Booking, StoreError> {
        (**self).put_booking(booking, expected).await
    }
}

#[async_trait::async_trait]
impl<S> Ledger for Arc<S>
where
    S: Ledger + ?Sized,
{
    async fn commit(&self, changes: Changeset) -> Result<Committed, StoreError> {
        (**self).commit(changes).await
    }
}
