//! Capacity reconciliation engine.
//!
//! The only component allowed to move seat counters. Every mutating operation
//! follows the same pipeline:
//!
//! ```text
//! 1. Read a snapshot of the bookings/events the request touches
//! 2. Plan the seat changes (pure, see `classbook_booking::plan`)
//! 3. Commit events + bookings in one `Changeset`, guarded by the versions read in 1
//! 4. On a version conflict, start over from 1 (bounded)
//! 5. Publish a notification (best-effort)
//! ```
//!
//! Rule violations (full events, the cancellation window, unknown ids) are
//! never retried; only lost races are.

mod error;
pub mod maintenance;

use std::collections::BTreeSet;
use std::future::Future;

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use classbook_booking::plan::{
    apply_seat_changes, plan_admin_release, plan_modification, plan_new_booking,
};
use classbook_booking::views::{self, BookingOverview, WeekGroup};
use classbook_booking::{
    AppliedSeats, Booking, CancellationPolicy, Customer, Email, Event, EventIndex, EventPatch,
    NewEvent, Notification,
};
use classbook_core::{BookingId, EventId, ExpectedVersion};
use classbook_events::{Envelope, EventBus, Message};

use crate::notify::NotificationEnvelope;
use crate::store::{Changeset, Ledger};

pub use error::ReservationError;
pub use maintenance::{CapacityMismatch, IntegrityReport, PurgeReport, spawn_purge_task};

pub const DEFAULT_MAX_CONFLICT_RETRIES: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineConfig {
    pub policy: CancellationPolicy,
    /// How many times a lost optimistic race is re-run before giving up.
    pub max_conflict_retries: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            policy: CancellationPolicy::default(),
            max_conflict_retries: DEFAULT_MAX_CONFLICT_RETRIES,
        }
    }
}

/// An event removed by an administrator, with the bookings that lost it.
#[derive(Debug, Clone, PartialEq)]
pub struct DeletedEvent {
    pub event: Event,
    pub affected_bookings: Vec<Booking>,
}

pub struct ReservationEngine<L, B> {
    ledger: L,
    bus: B,
    config: EngineConfig,
}

impl<L, B> ReservationEngine<L, B> {
    pub fn new(ledger: L, bus: B, config: EngineConfig) -> Self {
        Self {
            ledger,
            bus,
            config,
        }
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn policy(&self) -> &CancellationPolicy {
        &self.config.policy
    }
}

impl<L, B> ReservationEngine<L, B>
where
    L: Ledger,
    B: EventBus<NotificationEnvelope>,
{
    /// Register a new customer booking and take one seat in every requested event.
    #[instrument(skip(self, customer), fields(events = requested.len()), err)]
    pub async fn create_booking(
        &self,
        customer: Customer,
        requested: BTreeSet<EventId>,
    ) -> Result<Booking, ReservationError> {
        let customer = customer.trimmed();
        let (booking, events) = self
            .retry_conflicts("create_booking", || self.try_create(&customer, &requested))
            .await?;

        info!(booking_id = %booking.booking_id, "booking created");
        self.publish(Notification::BookingCreated {
            booking: booking.clone(),
            events,
            occurred_at: Utc::now(),
        });
        Ok(booking)
    }

    async fn try_create(
        &self,
        customer: &Customer,
        requested: &BTreeSet<EventId>,
    ) -> Result<(Booking, Vec<Event>), ReservationError> {
        let existing = self.ledger.find_by_customer_email(&customer.email).await?;
        let events = self.load_index(requested).await?;

        let changes = plan_new_booking(customer, requested, existing.as_ref(), &events)?;
        let applied = apply_seat_changes(&changes, &events)?;

        let booking = Booking::new(BookingId::new(), customer.clone(), requested.clone());
        let booking_id = booking.booking_id;
        let committed = self
            .ledger
            .commit(seat_changeset(applied).put_booking(booking, ExpectedVersion::absent()))
            .await?;

        let booking = committed
            .booking(booking_id)
            .cloned()
            .ok_or_else(|| ReservationError::StorageUnavailable("booking missing after commit".into()))?;
        Ok((booking, committed.events))
    }

    /// Replace a booking's event set, honouring capacity and the cancellation window.
    ///
    /// All-or-nothing: a single failing event leaves every counter and the
    /// booking untouched. An unchanged set is a no-op.
    #[instrument(skip(self, requested), fields(events = requested.len()), err)]
    pub async fn modify_booking(
        &self,
        booking_id: BookingId,
        requested: BTreeSet<EventId>,
    ) -> Result<Booking, ReservationError> {
        let outcome = self
            .retry_conflicts("modify_booking", || self.try_modify(booking_id, &requested))
            .await?;

        match outcome {
            Modification::Unchanged(booking) => Ok(booking),
            Modification::Applied {
                booking,
                added,
                removed,
            } => {
                info!(
                    booking_id = %booking_id,
                    added = added.len(),
                    removed = removed.len(),
                    "booking modified"
                );
                self.publish(Notification::BookingUpdated {
                    booking: booking.clone(),
                    added,
                    removed,
                    occurred_at: Utc::now(),
                });
                Ok(booking)
            }
        }
    }

    async fn try_modify(
        &self,
        booking_id: BookingId,
        requested: &BTreeSet<EventId>,
    ) -> Result<Modification, ReservationError> {
        let booking = self
            .ledger
            .get_booking(booking_id)
            .await?
            .ok_or(ReservationError::BookingNotFound(booking_id))?;

        if booking.booked_event_ids == *requested {
            return Ok(Modification::Unchanged(booking));
        }

        let touched: BTreeSet<EventId> = booking
            .booked_event_ids
            .union(requested)
            .copied()
            .collect();
        let events = self.load_index(&touched).await?;

        let changes = plan_modification(&booking, requested, &events, &self.config.policy, Utc::now())?;
        let applied = apply_seat_changes(&changes, &events)?;

        let mut updated = booking.clone();
        updated.booked_event_ids = requested.clone();

        let committed = self
            .ledger
            .commit(seat_changeset(applied).put_booking(updated, ExpectedVersion::of(&booking)))
            .await?;

        let booking = committed
            .booking(booking_id)
            .cloned()
            .ok_or_else(|| ReservationError::StorageUnavailable("booking missing after commit".into()))?;
        let pick = |ids: &BTreeSet<EventId>| {
            committed
                .events
                .iter()
                .filter(|e| ids.contains(&e.id))
                .cloned()
                .collect::<Vec<_>>()
        };

        Ok(Modification::Applied {
            added: pick(&changes.reserve),
            removed: pick(&changes.release),
            booking,
        })
    }

    pub async fn lookup_booking(&self, booking_id: BookingId) -> Result<Option<Booking>, ReservationError> {
        Ok(self.ledger.get_booking(booking_id).await?)
    }

    /// The "manage my booking" view; `None` when the id is unknown.
    pub async fn booking_overview(
        &self,
        booking_id: BookingId,
    ) -> Result<Option<BookingOverview>, ReservationError> {
        let Some(booking) = self.ledger.get_booking(booking_id).await? else {
            return Ok(None);
        };
        let events = self.ledger.list_events().await?;
        Ok(Some(views::booking_overview(
            &booking,
            &events,
            Utc::now(),
            &self.config.policy,
        )))
    }

    pub async fn get_event(&self, event_id: EventId) -> Result<Option<Event>, ReservationError> {
        Ok(self.ledger.get_event(event_id).await?)
    }

    /// All events, sorted by date.
    pub async fn list_events(&self) -> Result<Vec<Event>, ReservationError> {
        Ok(self.ledger.list_events().await?)
    }

    pub async fn upcoming_by_week(&self, now: DateTime<Utc>) -> Result<Vec<WeekGroup>, ReservationError> {
        let events = self.ledger.list_events().await?;
        Ok(views::upcoming_by_week(&events, now))
    }

    pub async fn bookable_events(&self, now: DateTime<Utc>) -> Result<Vec<Event>, ReservationError> {
        let events = self.ledger.list_events().await?;
        Ok(views::bookable_events(&events, now))
    }

    #[instrument(skip(self, input), fields(title = %input.title), err)]
    pub async fn admin_create_event(&self, input: NewEvent) -> Result<Event, ReservationError> {
        let event = Event::create(EventId::new(), input)?;
        let stored = self.ledger.put_event(event, ExpectedVersion::absent()).await?;
        info!(event_id = %stored.id, capacity = stored.total_capacity, "event created");
        Ok(stored)
    }

    /// Administrative edit. Only capacity is checked against current bookings.
    #[instrument(skip(self, patch), err)]
    pub async fn admin_update_event(
        &self,
        event_id: EventId,
        patch: EventPatch,
    ) -> Result<Event, ReservationError> {
        let (event, rescheduled) = self
            .retry_conflicts("admin_update_event", || self.try_update_event(event_id, &patch))
            .await?;

        info!(event_id = %event_id, schedule_changed = rescheduled.is_some(), "event updated");

        if let Some(affected) = rescheduled.filter(|b| !b.is_empty()) {
            self.publish(Notification::EventRescheduled {
                event: event.clone(),
                affected_bookings: affected,
                occurred_at: Utc::now(),
            });
        }

        Ok(event)
    }

    /// Remove an event and sever every booking reference to it, in one commit.
    #[instrument(skip(self), err)]
    pub async fn admin_delete_event(&self, event_id: EventId) -> Result<DeletedEvent, ReservationError> {
        let deleted = self
            .retry_conflicts("admin_delete_event", || self.try_delete_event(event_id))
            .await?;

        info!(
            event_id = %event_id,
            affected_bookings = deleted.affected_bookings.len(),
            "event deleted"
        );
        self.publish(Notification::EventCancelled {
            event: deleted.event.clone(),
            affected_bookings: deleted.affected_bookings.clone(),
            occurred_at: Utc::now(),
        });
        Ok(deleted)
    }

    /// Staff removal of one event from a booking; ignores the cancellation window.
    #[instrument(skip(self), err)]
    pub async fn admin_cancel_booking_event(
        &self,
        booking_id: BookingId,
        event_id: EventId,
    ) -> Result<Booking, ReservationError> {
        let (booking, cancelled, remaining) = self
            .retry_conflicts("admin_cancel_booking_event", || {
                self.try_cancel_booking_event(booking_id, event_id)
            })
            .await?;

        info!(booking_id = %booking_id, event_id = %event_id, "event removed from booking by staff");

        self.publish(Notification::BookingCancelledByAdmin {
            booking: booking.clone(),
            cancelled_event: cancelled,
            remaining_events: remaining,
            occurred_at: Utc::now(),
        });
        Ok(booking)
    }

    /// Ask for the booking link to be re-sent.
    ///
    /// Succeeds whether or not a booking exists for `email`.
    #[instrument(skip(self, email), err)]
    pub async fn request_booking_reminder(&self, email: &Email) -> Result<(), ReservationError> {
        match self.ledger.find_by_customer_email(email).await? {
            Some(booking) => self.publish(Notification::BookingReminderRequested {
                booking,
                occurred_at: Utc::now(),
            }),
            None => debug!("reminder requested for unknown e-mail"),
        }
        Ok(())
    }

    async fn try_update_event(
        &self,
        event_id: EventId,
        patch: &EventPatch,
    ) -> Result<(Event, Option<Vec<Booking>>), ReservationError> {
        let current = self
            .ledger
            .get_event(event_id)
            .await?
            .ok_or(ReservationError::EventNotFound(event_id))?;

        let mut edited = current.clone();
        let outcome = edited.apply_patch(patch.clone())?;

        // Participants are read before the write; nothing after the commit may fail.
        let affected = if outcome.schedule_changed {
            let bookings = self.ledger.list_bookings().await?;
            Some(
                views::bookings_referencing(&bookings, &BTreeSet::from([event_id]))
                    .into_iter()
                    .cloned()
                    .collect(),
            )
        } else {
            None
        };

        let stored = self
            .ledger
            .put_event(edited, ExpectedVersion::of(&current))
            .await?;
        Ok((stored, affected))
    }

    async fn try_delete_event(&self, event_id: EventId) -> Result<DeletedEvent, ReservationError> {
        let event = self
            .ledger
            .get_event(event_id)
            .await?
            .ok_or(ReservationError::EventNotFound(event_id))?;
        let bookings = self.ledger.list_bookings().await?;

        let mut changes = Changeset::new().delete_event(event_id, ExpectedVersion::of(&event));
        let mut affected = BTreeSet::new();
        for booking in views::bookings_referencing(&bookings, &BTreeSet::from([event_id])) {
            let mut severed = booking.clone();
            severed.sever(&event_id);
            changes = changes.put_booking(severed, ExpectedVersion::of(booking));
            affected.insert(booking.booking_id);
        }

        let committed = self.ledger.commit(changes).await?;
        Ok(DeletedEvent {
            event,
            affected_bookings: committed
                .bookings
                .into_iter()
                .filter(|b| affected.contains(&b.booking_id))
                .collect(),
        })
    }

    async fn try_cancel_booking_event(
        &self,
        booking_id: BookingId,
        event_id: EventId,
    ) -> Result<(Booking, Event, Vec<Event>), ReservationError> {
        let booking = self
            .ledger
            .get_booking(booking_id)
            .await?
            .ok_or(ReservationError::BookingNotFound(booking_id))?;
        let events = self.load_index(&booking.booked_event_ids).await?;

        let changes = plan_admin_release(&booking, &event_id, &events)?;
        let applied = apply_seat_changes(&changes, &events)?;

        let mut updated = booking.clone();
        updated.sever(&event_id);
        let committed = self
            .ledger
            .commit(seat_changeset(applied).put_booking(updated, ExpectedVersion::of(&booking)))
            .await?;

        let booking = committed
            .booking(booking_id)
            .cloned()
            .ok_or_else(|| ReservationError::StorageUnavailable("booking missing after commit".into()))?;
        let cancelled = committed
            .event(event_id)
            .cloned()
            .ok_or_else(|| ReservationError::StorageUnavailable("event missing after commit".into()))?;
        let remaining = events
            .into_values()
            .filter(|e| booking.holds(&e.id))
            .collect();
        Ok((booking, cancelled, remaining))
    }

    async fn load_index(&self, ids: &BTreeSet<EventId>) -> Result<EventIndex, ReservationError> {
        let mut index = EventIndex::new();
        for id in ids {
            if let Some(event) = self.ledger.get_event(*id).await? {
                index.insert(*id, event);
            }
        }
        Ok(index)
    }

    async fn retry_conflicts<T, F, Fut>(
        &self,
        operation: &'static str,
        mut attempt: F,
    ) -> Result<T, ReservationError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ReservationError>>,
    {
        let mut retries = 0;
        loop {
            match attempt().await {
                Err(ReservationError::Conflict(reason)) if retries < self.config.max_conflict_retries => {
                    retries += 1;
                    debug!(operation, retries, %reason, "optimistic conflict, retrying");
                }
                other => return other,
            }
        }
    }

    fn publish(&self, notification: Notification) {
        let topic = notification.topic();
        if let Err(err) = self.bus.publish(Envelope::wrap(notification)) {
            warn!(topic, error = ?err, "notification publish failed");
        }
    }
}

enum Modification {
    Unchanged(Booking),
    Applied {
        booking: Booking,
        added: Vec<Event>,
        removed: Vec<Event>,
    },
}

/// Event writes for a materialized seat plan, guarded by the snapshot versions.
fn seat_changeset(applied: AppliedSeats) -> Changeset {
    for event_id in &applied.clamped {
        warn!(event_id = %event_id, "seat counter already at zero on release; clamped");
    }
    applied
        .events
        .into_iter()
        .fold(Changeset::new(), |changes, event| {
            let expected = ExpectedVersion::of(&event);
            changes.put_event(event, expected)
        })
}

#[cfg(test)]
mod tests;
