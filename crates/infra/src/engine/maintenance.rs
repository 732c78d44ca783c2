//! Periodic cleanup and capacity integrity checks.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use classbook_booking::views;
use classbook_core::{BookingId, EventId, ExpectedVersion};
use classbook_events::EventBus;

use super::{ReservationEngine, ReservationError};
use crate::notify::NotificationEnvelope;
use crate::store::{Changeset, Ledger};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    pub removed_events: Vec<EventId>,
    pub severed_bookings: Vec<BookingId>,
}

/// An event whose counter disagrees with the bookings referencing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapacityMismatch {
    pub event_id: EventId,
    pub title: String,
    pub recorded: u32,
    /// Seats actually held by bookings.
    pub actual: u32,
    pub total_capacity: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IntegrityReport {
    pub events_checked: usize,
    pub mismatches: Vec<CapacityMismatch>,
    /// Booking references to events that no longer exist.
    pub dangling_references: Vec<(BookingId, EventId)>,
    pub repaired: bool,
}

impl IntegrityReport {
    pub fn is_consistent(&self) -> bool {
        self.mismatches.is_empty() && self.dangling_references.is_empty()
    }
}

impl<L, B> ReservationEngine<L, B>
where
    L: Ledger,
    B: EventBus<NotificationEnvelope>,
{
    /// Delete every event that started before `now`, severing booking references
    /// in the same commit. Sends no notifications.
    #[instrument(skip(self), err)]
    pub async fn purge_expired_events(&self, now: DateTime<Utc>) -> Result<PurgeReport, ReservationError> {
        let report = self
            .retry_conflicts("purge_expired_events", || self.try_purge(now))
            .await?;

        if !report.removed_events.is_empty() {
            info!(
                removed = report.removed_events.len(),
                severed = report.severed_bookings.len(),
                "expired events purged"
            );
        }
        Ok(report)
    }

    async fn try_purge(&self, now: DateTime<Utc>) -> Result<PurgeReport, ReservationError> {
        let expired: Vec<_> = self
            .ledger
            .list_events()
            .await?
            .into_iter()
            .filter(|e| e.is_past(now))
            .collect();
        if expired.is_empty() {
            return Ok(PurgeReport::default());
        }

        let expired_ids: BTreeSet<EventId> = expired.iter().map(|e| e.id).collect();
        let bookings = self.ledger.list_bookings().await?;

        let mut changes = Changeset::new();
        for event in &expired {
            changes = changes.delete_event(event.id, ExpectedVersion::of(event));
        }

        let mut severed_bookings = Vec::new();
        for booking in views::bookings_referencing(&bookings, &expired_ids) {
            let mut severed = booking.clone();
            severed.booked_event_ids.retain(|id| !expired_ids.contains(id));
            changes = changes.put_booking(severed, ExpectedVersion::of(booking));
            severed_bookings.push(booking.booking_id);
        }

        self.ledger.commit(changes).await?;
        Ok(PurgeReport {
            removed_events: expired_ids.into_iter().collect(),
            severed_bookings,
        })
    }

    /// Recount seats from bookings and compare with the stored counters.
    pub async fn verify_capacity(&self) -> Result<IntegrityReport, ReservationError> {
        let events = self.ledger.list_events().await?;
        let bookings = self.ledger.list_bookings().await?;
        let counts = views::count_seats(&bookings);

        let known: BTreeSet<EventId> = events.iter().map(|e| e.id).collect();
        let mut report = IntegrityReport {
            events_checked: events.len(),
            ..IntegrityReport::default()
        };

        for event in &events {
            let actual = counts.get(&event.id).copied().unwrap_or(0);
            if actual != event.booked_capacity {
                report.mismatches.push(CapacityMismatch {
                    event_id: event.id,
                    title: event.title.clone(),
                    recorded: event.booked_capacity,
                    actual,
                    total_capacity: event.total_capacity,
                });
            }
        }

        for booking in &bookings {
            for id in booking.booked_event_ids.difference(&known) {
                report.dangling_references.push((booking.booking_id, *id));
            }
        }

        Ok(report)
    }

    /// Commit recounted seat counters (capped at capacity) for every mismatch.
    #[instrument(skip(self), err)]
    pub async fn repair_capacity(&self) -> Result<IntegrityReport, ReservationError> {
        self.retry_conflicts("repair_capacity", || self.try_repair()).await
    }

    async fn try_repair(&self) -> Result<IntegrityReport, ReservationError> {
        let mut report = self.verify_capacity().await?;
        if report.mismatches.is_empty() {
            return Ok(report);
        }

        let mut changes = Changeset::new();
        for mismatch in &report.mismatches {
            let Some(mut event) = self.ledger.get_event(mismatch.event_id).await? else {
                continue;
            };
            let expected = ExpectedVersion::of(&event);
            event.booked_capacity = mismatch.actual.min(event.total_capacity);
            if mismatch.actual > event.total_capacity {
                error!(
                    event_id = %event.id,
                    actual = mismatch.actual,
                    total = event.total_capacity,
                    "event is overbooked; counter capped at capacity"
                );
            }
            warn!(
                event_id = %event.id,
                recorded = mismatch.recorded,
                corrected = event.booked_capacity,
                "seat counter corrected"
            );
            changes = changes.put_event(event, expected);
        }

        self.ledger.commit(changes).await?;
        report.repaired = true;
        Ok(report)
    }
}

/// Run [`ReservationEngine::purge_expired_events`] every `interval` until aborted.
pub fn spawn_purge_task<L, B>(engine: Arc<ReservationEngine<L, B>>, interval: Duration) -> JoinHandle<()>
where
    L: Ledger + 'static,
    B: EventBus<NotificationEnvelope> + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(err) = engine.purge_expired_events(Utc::now()).await {
                warn!(error = %err, "scheduled purge failed");
            }
        }
    })
}
