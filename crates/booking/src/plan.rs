//! Validate-then-apply seat planning.
//!
//! The reservation engine loads a snapshot of the events a request touches into
//! an [`EventIndex`], asks this module for a [`SeatChanges`] plan (pure
//! validation, nothing is mutated), and only then materializes the plan with
//! [`apply_seat_changes`]. Any failure leaves the snapshot untouched, so a
//! request either reserves/releases every seat it names or none.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};

use classbook_core::EventId;

use crate::booking::Booking;
use crate::customer::Customer;
use crate::error::BookingError;
use crate::event::Event;
use crate::policy::{CancellationPolicy, remaining_cancellation_hours};

/// Snapshot of the events touched by one request, keyed by id.
pub type EventIndex = BTreeMap<EventId, Event>;

/// Seats to take and release, decided before anything is written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeatChanges {
    pub reserve: BTreeSet<EventId>,
    pub release: BTreeSet<EventId>,
}

impl SeatChanges {
    pub fn is_empty(&self) -> bool {
        self.reserve.is_empty() && self.release.is_empty()
    }
}

/// Result of materializing a plan against a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppliedSeats {
    /// Updated copies of every event whose counter moved.
    pub events: Vec<Event>,
    /// Events whose counter was already zero when a seat was released.
    pub clamped: Vec<EventId>,
}

/// Plan a brand-new booking.
///
/// `existing` is the booking already registered under the customer's e-mail, if any.
pub fn plan_new_booking(
    customer: &Customer,
    requested: &BTreeSet<EventId>,
    existing: Option<&Booking>,
    events: &EventIndex,
) -> Result<SeatChanges, BookingError> {
    customer.validate()?;

    if existing.is_some() {
        return Err(BookingError::DuplicateCustomer);
    }
    if requested.is_empty() {
        return Err(BookingError::validation("at least one event must be selected"));
    }

    for id in requested {
        check_bookable(id, events)?;
    }

    Ok(SeatChanges {
        reserve: requested.clone(),
        release: BTreeSet::new(),
    })
}

/// Plan replacing a booking's event set with `requested`.
///
/// Every removal is checked against the cancellation window before any addition
/// is checked for capacity; the first offending event fails the whole plan.
/// Removed events that no longer exist have no seat to give back and are skipped.
pub fn plan_modification(
    booking: &Booking,
    requested: &BTreeSet<EventId>,
    events: &EventIndex,
    policy: &CancellationPolicy,
    now: DateTime<Utc>,
) -> Result<SeatChanges, BookingError> {
    let removed = booking.removed_ids(requested);
    let added = booking.added_ids(requested);

    let mut release = BTreeSet::new();
    for id in &removed {
        let Some(event) = events.get(id) else {
            continue;
        };
        if !policy.allows_removal(event.date, now) {
            return Err(BookingError::CancellationWindowExpired {
                event_id: event.id,
                title: event.title.clone(),
                hours_remaining: remaining_cancellation_hours(event.date, now),
            });
        }
        release.insert(*id);
    }

    for id in &added {
        check_bookable(id, events)?;
    }

    Ok(SeatChanges {
        reserve: added,
        release,
    })
}

/// Plan an administrative release of one event from a booking (no window check).
pub fn plan_admin_release(
    booking: &Booking,
    event_id: &EventId,
    events: &EventIndex,
) -> Result<SeatChanges, BookingError> {
    if !booking.holds(event_id) {
        return Err(BookingError::validation(format!(
            "booking {} does not include event {event_id}",
            booking.booking_id
        )));
    }
    if !events.contains_key(event_id) {
        return Err(BookingError::EventNotFound(*event_id));
    }

    Ok(SeatChanges {
        reserve: BTreeSet::new(),
        release: BTreeSet::from([*event_id]),
    })
}

/// Materialize a validated plan on copies of the snapshot events.
pub fn apply_seat_changes(
    changes: &SeatChanges,
    events: &EventIndex,
) -> Result<AppliedSeats, BookingError> {
    let mut touched: BTreeMap<EventId, Event> = BTreeMap::new();
    let mut clamped = Vec::new();

    for id in &changes.release {
        let event = touched
            .entry(*id)
            .or_insert(events.get(id).ok_or(BookingError::EventNotFound(*id))?.clone());
        if event.release_seat() {
            clamped.push(*id);
        }
    }

    for id in &changes.reserve {
        let event = touched
            .entry(*id)
            .or_insert(events.get(id).ok_or(BookingError::EventNotFound(*id))?.clone());
        event.reserve_seat()?;
    }

    Ok(AppliedSeats {
        events: touched.into_values().collect(),
        clamped,
    })
}

fn check_bookable(id: &EventId, events: &EventIndex) -> Result<(), BookingError> {
    let event = events.get(id).ok_or(BookingError::EventNotFound(*id))?;
    if event.is_full() {
        return Err(BookingError::event_full(event));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use classbook_core::BookingId;

    use crate::customer::Email;

    fn customer() -> Customer {
        Customer {
            name: "Anna".to_string(),
            phone: "0170 1234567".to_string(),
            dog_name: "Bello".to_string(),
            email: Email::parse("anna@example.com").unwrap(),
        }
    }

    fn event(title: &str, starts_in: Duration, total: u32, booked: u32) -> Event {
        Event {
            id: EventId::new(),
            date: Utc::now() + starts_in,
            title: title.to_string(),
            location: "Weites Feld".to_string(),
            category: "White".to_string(),
            total_capacity: total,
            booked_capacity: booked,
            version: 1,
        }
    }

    fn index(events: &[&Event]) -> EventIndex {
        events.iter().map(|e| (e.id, (*e).clone())).collect()
    }

    #[test]
    fn new_booking_reserves_every_requested_event() {
        let a = event("A", Duration::days(2), 5, 0);
        let b = event("B", Duration::days(3), 5, 4);
        let requested = BTreeSet::from([a.id, b.id]);

        let plan = plan_new_booking(&customer(), &requested, None, &index(&[&a, &b])).unwrap();
        assert_eq!(plan.reserve, requested);
        assert!(plan.release.is_empty());
    }

    #[test]
    fn new_booking_fails_on_any_full_event() {
        let a = event("A", Duration::days(2), 5, 0);
        let x = event("X", Duration::days(3), 5, 5);

        let err = plan_new_booking(
            &customer(),
            &BTreeSet::from([a.id, x.id]),
            None,
            &index(&[&a, &x]),
        )
        .unwrap_err();
        assert_eq!(
            err,
            BookingError::EventFull {
                event_id: x.id,
                title: "X".to_string()
            }
        );
    }

    #[test]
    fn new_booking_rejects_existing_customer_and_unknown_events() {
        let a = event("A", Duration::days(2), 5, 0);
        let existing = Booking::new(BookingId::new(), customer(), BTreeSet::new());

        assert_eq!(
            plan_new_booking(&customer(), &BTreeSet::from([a.id]), Some(&existing), &index(&[&a])),
            Err(BookingError::DuplicateCustomer)
        );

        let ghost = EventId::new();
        assert_eq!(
            plan_new_booking(&customer(), &BTreeSet::from([ghost]), None, &index(&[&a])),
            Err(BookingError::EventNotFound(ghost))
        );
    }

    #[test]
    fn new_booking_needs_at_least_one_event() {
        assert!(matches!(
            plan_new_booking(&customer(), &BTreeSet::new(), None, &EventIndex::new()),
            Err(BookingError::Validation(_))
        ));
    }

    #[test]
    fn modification_inside_window_fails_naming_the_event() {
        let a = event("A", Duration::hours(10), 5, 1);
        let b = event("B", Duration::hours(48), 5, 1);
        let booking = Booking::new(BookingId::new(), customer(), BTreeSet::from([a.id, b.id]));

        let err = plan_modification(
            &booking,
            &BTreeSet::from([b.id]),
            &index(&[&a, &b]),
            &CancellationPolicy::default(),
            Utc::now(),
        )
        .unwrap_err();

        match err {
            BookingError::CancellationWindowExpired { event_id, title, .. } => {
                assert_eq!(event_id, a.id);
                assert_eq!(title, "A");
            }
            other => panic!("expected CancellationWindowExpired, got {other:?}"),
        }
    }

    #[test]
    fn window_is_checked_before_capacity() {
        let a = event("A", Duration::hours(10), 5, 1);
        let full = event("Full", Duration::days(4), 3, 3);
        let booking = Booking::new(BookingId::new(), customer(), BTreeSet::from([a.id]));

        let err = plan_modification(
            &booking,
            &BTreeSet::from([full.id]),
            &index(&[&a, &full]),
            &CancellationPolicy::default(),
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, BookingError::CancellationWindowExpired { .. }));
    }

    #[test]
    fn modification_swaps_seats_outside_window() {
        let a = event("A", Duration::hours(72), 5, 1);
        let b = event("B", Duration::hours(48), 5, 1);
        let c = event("C", Duration::hours(96), 5, 0);
        let booking = Booking::new(BookingId::new(), customer(), BTreeSet::from([a.id, b.id]));
        let events = index(&[&a, &b, &c]);

        let plan = plan_modification(
            &booking,
            &BTreeSet::from([b.id, c.id]),
            &events,
            &CancellationPolicy::default(),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(plan.release, BTreeSet::from([a.id]));
        assert_eq!(plan.reserve, BTreeSet::from([c.id]));

        let applied = apply_seat_changes(&plan, &events).unwrap();
        let by_id: BTreeMap<_, _> = applied.events.iter().map(|e| (e.id, e)).collect();
        assert_eq!(by_id[&a.id].booked_capacity, 0);
        assert_eq!(by_id[&c.id].booked_capacity, 1);
        assert!(!by_id.contains_key(&b.id));
        assert!(applied.clamped.is_empty());
    }

    #[test]
    fn removed_events_that_vanished_release_nothing() {
        let b = event("B", Duration::hours(48), 5, 1);
        let gone = EventId::new();
        let booking = Booking::new(BookingId::new(), customer(), BTreeSet::from([gone, b.id]));

        let plan = plan_modification(
            &booking,
            &BTreeSet::from([b.id]),
            &index(&[&b]),
            &CancellationPolicy::default(),
            Utc::now(),
        )
        .unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn apply_reports_clamped_releases() {
        let a = event("A", Duration::days(5), 5, 0);
        let plan = SeatChanges {
            reserve: BTreeSet::new(),
            release: BTreeSet::from([a.id]),
        };
        let applied = apply_seat_changes(&plan, &index(&[&a])).unwrap();
        assert_eq!(applied.clamped, vec![a.id]);
        assert_eq!(applied.events[0].booked_capacity, 0);
    }

    #[test]
    fn admin_release_ignores_the_window() {
        let a = event("A", Duration::hours(1), 5, 1);
        let booking = Booking::new(BookingId::new(), customer(), BTreeSet::from([a.id]));

        let plan = plan_admin_release(&booking, &a.id, &index(&[&a])).unwrap();
        assert_eq!(plan.release, BTreeSet::from([a.id]));

        let other = EventId::new();
        assert!(matches!(
            plan_admin_release(&booking, &other, &index(&[&a])),
            Err(BookingError::Validation(_))
        ));
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 64,
                ..ProptestConfig::default()
            })]

            /// Whatever sequence of plans is attempted, counters stay within 0..=total.
            #[test]
            fn counters_stay_within_capacity(
                totals in prop::collection::vec(1u32..6, 1..5),
                ops in prop::collection::vec((any::<bool>(), 0usize..5), 0..60),
            ) {
                let mut events: EventIndex = totals
                    .iter()
                    .map(|t| {
                        let e = event("E", Duration::days(10), *t, 0);
                        (e.id, e)
                    })
                    .collect();
                let ids: Vec<EventId> = events.keys().copied().collect();

                for (reserve, idx) in ops {
                    let id = ids[idx % ids.len()];
                    let changes = if reserve {
                        SeatChanges { reserve: BTreeSet::from([id]), release: BTreeSet::new() }
                    } else {
                        SeatChanges { reserve: BTreeSet::new(), release: BTreeSet::from([id]) }
                    };
                    if let Ok(applied) = apply_seat_changes(&changes, &events) {
                        for e in applied.events {
                            events.insert(e.id, e);
                        }
                    }
                }

                for e in events.values() {
                    prop_assert!(e.booked_capacity <= e.total_capacity);
                }
            }
        }
    }
}
