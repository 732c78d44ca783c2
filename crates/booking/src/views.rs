//! Read views derived from events and bookings for presentation layers.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Datelike, Utc};
use serde::Serialize;

use classbook_core::{BookingId, EventId};

use crate::booking::Booking;
use crate::customer::Customer;
use crate::event::Event;
use crate::policy::CancellationPolicy;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Availability {
    Available { remaining: u32 },
    Full,
}

pub fn availability(event: &Event) -> Availability {
    if event.is_full() {
        Availability::Full
    } else {
        Availability::Available {
            remaining: event.remaining_seats(),
        }
    }
}

/// Upcoming events of one ISO calendar week.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeekGroup {
    /// `"YYYY-WW"`, sortable.
    pub key: String,
    pub iso_year: i32,
    pub week: u32,
    /// Month and year of the first event in the group, e.g. `"2026-10"`.
    pub month: String,
    pub events: Vec<EventView>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventView {
    #[serde(flatten)]
    pub event: Event,
    pub availability: Availability,
}

impl EventView {
    pub fn new(event: Event) -> Self {
        let availability = availability(&event);
        Self { event, availability }
    }
}

/// Future events (`date >= now`) sorted by date and grouped by ISO week.
pub fn upcoming_by_week(events: &[Event], now: DateTime<Utc>) -> Vec<WeekGroup> {
    let mut upcoming: Vec<&Event> = events.iter().filter(|e| e.date >= now).collect();
    upcoming.sort_by_key(|e| (e.date, e.id));

    let mut groups: BTreeMap<(i32, u32), WeekGroup> = BTreeMap::new();
    for event in upcoming {
        let iso = event.date.iso_week();
        let group = groups
            .entry((iso.year(), iso.week()))
            .or_insert_with(|| WeekGroup {
                key: format!("{}-{:02}", iso.year(), iso.week()),
                iso_year: iso.year(),
                week: iso.week(),
                month: event.date.format("%Y-%m").to_string(),
                events: Vec::new(),
            });
        group.events.push(EventView::new(event.clone()));
    }

    groups.into_values().collect()
}

/// Future events that still have a free seat, sorted by date.
pub fn bookable_events(events: &[Event], now: DateTime<Utc>) -> Vec<Event> {
    let mut out: Vec<Event> = events
        .iter()
        .filter(|e| e.date >= now && !e.is_full())
        .cloned()
        .collect();
    out.sort_by_key(|e| (e.date, e.id));
    out
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BookedEventView {
    #[serde(flatten)]
    pub event: Event,
    pub availability: Availability,
    pub hours_until_start: f64,
    /// Whether removing this event would currently pass the cancellation window.
    pub cancellable: bool,
}

/// A booking as the "manage my booking" screen shows it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BookingOverview {
    pub booking_id: BookingId,
    pub customer: Customer,
    pub events: Vec<BookedEventView>,
    /// Ids still referenced by the booking whose event is gone.
    pub missing_event_ids: Vec<EventId>,
    pub cancellation_window_hours: f64,
}

pub fn booking_overview(
    booking: &Booking,
    events: &[Event],
    now: DateTime<Utc>,
    policy: &CancellationPolicy,
) -> BookingOverview {
    let by_id: BTreeMap<EventId, &Event> = events.iter().map(|e| (e.id, e)).collect();

    let mut booked = Vec::new();
    let mut missing = Vec::new();
    for id in &booking.booked_event_ids {
        match by_id.get(id) {
            Some(event) => booked.push(BookedEventView {
                event: (*event).clone(),
                availability: availability(event),
                hours_until_start: crate::policy::remaining_cancellation_hours(event.date, now),
                cancellable: policy.allows_removal(event.date, now),
            }),
            None => missing.push(*id),
        }
    }
    booked.sort_by_key(|v| (v.event.date, v.event.id));

    BookingOverview {
        booking_id: booking.booking_id,
        customer: booking.customer.clone(),
        events: booked,
        missing_event_ids: missing,
        cancellation_window_hours: policy.window_hours(),
    }
}

/// Recount seats from bookings; the authoritative value for invariant checks.
pub fn count_seats(bookings: &[Booking]) -> BTreeMap<EventId, u32> {
    let mut counts: BTreeMap<EventId, u32> = BTreeMap::new();
    for booking in bookings {
        for id in &booking.booked_event_ids {
            *counts.entry(*id).or_default() += 1;
        }
    }
    counts
}

/// Bookings referencing any of `event_ids`.
pub fn bookings_referencing<'a>(
    bookings: &'a [Booking],
    event_ids: &BTreeSet<EventId>,
) -> Vec<&'a Booking> {
    bookings
        .iter()
        .filter(|b| b.booked_event_ids.iter().any(|id| event_ids.contains(id)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    use crate::customer::Email;

    fn event_at(date: DateTime<Utc>, total: u32, booked: u32) -> Event {
        Event {
            id: EventId::new(),
            date,
            title: "Trainerstunde".to_string(),
            location: "Nach Absprache".to_string(),
            category: "Gold".to_string(),
            total_capacity: total,
            booked_capacity: booked,
            version: 1,
        }
    }

    #[test]
    fn groups_future_events_by_iso_week_in_order() {
        let now = Utc.with_ymd_and_hms(2026, 10, 1, 8, 0, 0).unwrap();
        // Thu 2026-10-01 is ISO week 40; Mon 2026-10-05 starts week 41.
        let past = event_at(now - Duration::days(2), 5, 1);
        let w40_late = event_at(Utc.with_ymd_and_hms(2026, 10, 3, 16, 0, 0).unwrap(), 5, 1);
        let w40_early = event_at(Utc.with_ymd_and_hms(2026, 10, 1, 10, 0, 0).unwrap(), 5, 5);
        let w41 = event_at(Utc.with_ymd_and_hms(2026, 10, 6, 10, 0, 0).unwrap(), 5, 0);

        let groups = upcoming_by_week(
            &[w41.clone(), past, w40_late.clone(), w40_early.clone()],
            now,
        );

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].key, "2026-40");
        assert_eq!(groups[0].month, "2026-10");
        let ids: Vec<_> = groups[0].events.iter().map(|v| v.event.id).collect();
        assert_eq!(ids, vec![w40_early.id, w40_late.id]);
        assert_eq!(groups[0].events[0].availability, Availability::Full);
        assert_eq!(groups[1].key, "2026-41");
        assert_eq!(
            groups[1].events[0].availability,
            Availability::Available { remaining: 5 }
        );
    }

    #[test]
    fn iso_week_keys_cross_year_boundaries() {
        let now = Utc.with_ymd_and_hms(2026, 12, 30, 0, 0, 0).unwrap();
        // 2027-01-01 (Fri) still belongs to ISO week 53 of 2026.
        let ev = event_at(Utc.with_ymd_and_hms(2027, 1, 1, 10, 0, 0).unwrap(), 3, 0);
        let groups = upcoming_by_week(&[ev], now);
        assert_eq!(groups[0].key, "2026-53");
        assert_eq!(groups[0].month, "2027-01");
    }

    #[test]
    fn bookable_excludes_full_and_past() {
        let now = Utc::now();
        let open = event_at(now + Duration::days(1), 4, 1);
        let full = event_at(now + Duration::days(1), 4, 4);
        let past = event_at(now - Duration::days(1), 4, 0);

        let out = bookable_events(&[full, past, open.clone()], now);
        assert_eq!(out, vec![open]);
    }

    #[test]
    fn overview_sorts_by_date_and_flags_cancellable() {
        let now = Utc::now();
        let soon = event_at(now + Duration::hours(10), 5, 1);
        let later = event_at(now + Duration::hours(48), 5, 1);
        let gone = EventId::new();

        let booking = Booking::new(
            BookingId::new(),
            Customer {
                name: "Anna".to_string(),
                phone: "1".to_string(),
                dog_name: "Bello".to_string(),
                email: Email::parse("anna@example.com").unwrap(),
            },
            BTreeSet::from([later.id, soon.id, gone]),
        );

        let overview = booking_overview(
            &booking,
            &[later.clone(), soon.clone()],
            now,
            &CancellationPolicy::default(),
        );

        assert_eq!(overview.events.len(), 2);
        assert_eq!(overview.events[0].event.id, soon.id);
        assert!(!overview.events[0].cancellable);
        assert!(overview.events[1].cancellable);
        assert_eq!(overview.missing_event_ids, vec![gone]);
        assert_eq!(overview.cancellation_window_hours, 24.0);
    }

    #[test]
    fn count_seats_sums_across_bookings() {
        let a = EventId::new();
        let b = EventId::new();
        let customer = Customer {
            name: "A".to_string(),
            phone: "1".to_string(),
            dog_name: "D".to_string(),
            email: Email::parse("a@example.com").unwrap(),
        };
        let bookings = vec![
            Booking::new(BookingId::new(), customer.clone(), BTreeSet::from([a, b])),
            Booking::new(BookingId::new(), customer, BTreeSet::from([a])),
        ];

        let counts = count_seats(&bookings);
        assert_eq!(counts[&a], 2);
        assert_eq!(counts[&b], 1);
        assert_eq!(bookings_referencing(&bookings, &BTreeSet::from([b])).len(), 1);
    }
}
