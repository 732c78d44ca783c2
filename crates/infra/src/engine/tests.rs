use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use chrono::{Duration, Utc};
use proptest::prelude::*;

use classbook_booking::{Booking, Customer, Email, Event, EventPatch, NewEvent, Notification};
use classbook_core::{BookingId, EventId, ExpectedVersion};
use classbook_events::{EventBus, Subscription};

use super::*;
use crate::notify::{NotificationBus, NotificationEnvelope};
use crate::store::{
    BookingRepository, Changeset, Committed, EventRepository, InMemoryLedger, Ledger, StoreError,
};

type TestEngine = ReservationEngine<Arc<InMemoryLedger>, Arc<NotificationBus>>;

struct Harness {
    engine: Arc<TestEngine>,
    ledger: Arc<InMemoryLedger>,
    inbox: Subscription<NotificationEnvelope>,
}

fn harness() -> Harness {
    let ledger = Arc::new(InMemoryLedger::new());
    let bus = Arc::new(NotificationBus::new());
    let inbox = bus.subscribe();
    let engine = Arc::new(ReservationEngine::new(
        ledger.clone(),
        bus,
        EngineConfig::default(),
    ));
    Harness {
        engine,
        ledger,
        inbox,
    }
}

fn customer(email: &str) -> Customer {
    Customer {
        name: "Alex Doe".to_string(),
        phone: "+49 170 000000".to_string(),
        dog_name: "Bruno".to_string(),
        email: Email::parse(email).unwrap(),
    }
}

async fn event_in(h: &Harness, hours: i64, capacity: u32) -> Event {
    h.engine
        .admin_create_event(NewEvent {
            date: Utc::now() + Duration::hours(hours),
            title: format!("Class in {hours}h"),
            location: "Training ground".to_string(),
            category: "basics".to_string(),
            total_capacity: capacity,
        })
        .await
        .unwrap()
}

fn ids(events: &[&Event]) -> BTreeSet<EventId> {
    events.iter().map(|e| e.id).collect()
}

async fn booked(h: &Harness, event: &Event) -> u32 {
    h.ledger.get_event(event.id).await.unwrap().unwrap().booked_capacity
}

fn topics(inbox: &Subscription<NotificationEnvelope>) -> Vec<String> {
    let mut out = Vec::new();
    while let Ok(envelope) = inbox.try_recv() {
        out.push(envelope.topic().to_string());
    }
    out
}

#[tokio::test]
async fn created_booking_can_be_looked_up() {
    let h = harness();
    let a = event_in(&h, 48, 5).await;
    let b = event_in(&h, 72, 5).await;

    let booking = h
        .engine
        .create_booking(customer("alex@example.com"), ids(&[&a, &b]))
        .await
        .unwrap();

    let found = h.engine.lookup_booking(booking.booking_id).await.unwrap().unwrap();
    assert_eq!(found, booking);
    assert_eq!(found.booked_event_ids, ids(&[&a, &b]));
    assert_eq!(booked(&h, &a).await, 1);
    assert_eq!(booked(&h, &b).await, 1);
    assert_eq!(topics(&h.inbox), vec!["booking.created"]);
}

#[tokio::test]
async fn unknown_booking_lookup_is_none() {
    let h = harness();
    assert!(h.engine.lookup_booking(BookingId::new()).await.unwrap().is_none());
    assert!(h.engine.booking_overview(BookingId::new()).await.unwrap().is_none());
}

#[tokio::test]
async fn full_event_rejects_booking_and_names_it() {
    let h = harness();
    let open = event_in(&h, 48, 5).await;
    let full = event_in(&h, 72, 1).await;
    h.engine
        .create_booking(customer("first@example.com"), ids(&[&full]))
        .await
        .unwrap();

    let err = h
        .engine
        .create_booking(customer("second@example.com"), ids(&[&open, &full]))
        .await
        .unwrap_err();

    assert_eq!(
        err,
        ReservationError::EventFull {
            event_id: full.id,
            title: full.title.clone()
        }
    );
    assert_eq!(booked(&h, &open).await, 0);
    assert_eq!(h.ledger.list_bookings().await.unwrap().len(), 1);
}

#[tokio::test]
async fn unknown_event_applies_nothing() {
    let h = harness();
    let a = event_in(&h, 48, 5).await;
    let missing = EventId::new();

    let err = h
        .engine
        .create_booking(customer("alex@example.com"), BTreeSet::from([a.id, missing]))
        .await
        .unwrap_err();

    assert_eq!(err, ReservationError::EventNotFound(missing));
    assert_eq!(booked(&h, &a).await, 0);
}

#[tokio::test]
async fn second_booking_for_same_email_is_rejected() {
    let h = harness();
    let a = event_in(&h, 48, 5).await;
    h.engine
        .create_booking(customer("dog.owner@example.com"), ids(&[&a]))
        .await
        .unwrap();

    let err = h
        .engine
        .create_booking(customer("Dog.Owner@EXAMPLE.com"), ids(&[&a]))
        .await
        .unwrap_err();

    assert_eq!(err, ReservationError::DuplicateCustomer);
    assert_eq!(booked(&h, &a).await, 1);
}

#[tokio::test]
async fn empty_selection_and_blank_fields_are_invalid() {
    let h = harness();
    let a = event_in(&h, 48, 5).await;

    let err = h
        .engine
        .create_booking(customer("alex@example.com"), BTreeSet::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ReservationError::Validation(_)));

    let mut nameless = customer("alex@example.com");
    nameless.name = "   ".to_string();
    let err = h
        .engine
        .create_booking(nameless, ids(&[&a]))
        .await
        .unwrap_err();
    assert!(matches!(err, ReservationError::Validation(_)));
    assert_eq!(booked(&h, &a).await, 0);
}

#[tokio::test]
async fn removing_event_inside_window_fails_and_names_it() {
    let h = harness();
    let a = event_in(&h, 10, 5).await;
    let b = event_in(&h, 48, 5).await;
    let booking = h
        .engine
        .create_booking(customer("alex@example.com"), ids(&[&a, &b]))
        .await
        .unwrap();

    let err = h
        .engine
        .modify_booking(booking.booking_id, ids(&[&b]))
        .await
        .unwrap_err();

    match err {
        ReservationError::CancellationWindowExpired {
            event_id,
            title,
            hours_remaining,
        } => {
            assert_eq!(event_id, a.id);
            assert_eq!(title, a.title);
            assert!(hours_remaining > 9.0 && hours_remaining <= 10.0);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(booked(&h, &a).await, 1);
    assert_eq!(
        h.engine.lookup_booking(booking.booking_id).await.unwrap().unwrap(),
        booking
    );
}

#[tokio::test]
async fn window_failure_blocks_available_additions_too() {
    let h = harness();
    let a = event_in(&h, 10, 5).await;
    let b = event_in(&h, 48, 5).await;
    let c = event_in(&h, 96, 5).await;
    let booking = h
        .engine
        .create_booking(customer("alex@example.com"), ids(&[&a, &b]))
        .await
        .unwrap();
    topics(&h.inbox);

    let err = h
        .engine
        .modify_booking(booking.booking_id, ids(&[&b, &c]))
        .await
        .unwrap_err();

    assert!(matches!(err, ReservationError::CancellationWindowExpired { event_id, .. } if event_id == a.id));
    assert_eq!(booked(&h, &a).await, 1);
    assert_eq!(booked(&h, &c).await, 0);
    assert!(topics(&h.inbox).is_empty());
}

#[tokio::test]
async fn modification_swaps_seats_outside_window() {
    let h = harness();
    let a = event_in(&h, 72, 5).await;
    let b = event_in(&h, 48, 5).await;
    let c = event_in(&h, 96, 5).await;
    let booking = h
        .engine
        .create_booking(customer("alex@example.com"), ids(&[&a, &b]))
        .await
        .unwrap();
    topics(&h.inbox);

    let updated = h
        .engine
        .modify_booking(booking.booking_id, ids(&[&b, &c]))
        .await
        .unwrap();

    assert_eq!(updated.booked_event_ids, ids(&[&b, &c]));
    assert_eq!(booked(&h, &a).await, 0);
    assert_eq!(booked(&h, &b).await, 1);
    assert_eq!(booked(&h, &c).await, 1);
    assert_eq!(topics(&h.inbox), vec!["booking.updated"]);
}

#[tokio::test]
async fn full_addition_leaves_booking_untouched() {
    let h = harness();
    let a = event_in(&h, 72, 5).await;
    let full = event_in(&h, 96, 1).await;
    h.engine
        .create_booking(customer("other@example.com"), ids(&[&full]))
        .await
        .unwrap();
    let booking = h
        .engine
        .create_booking(customer("alex@example.com"), ids(&[&a]))
        .await
        .unwrap();

    let err = h
        .engine
        .modify_booking(booking.booking_id, ids(&[&full]))
        .await
        .unwrap_err();

    assert!(matches!(err, ReservationError::EventFull { event_id, .. } if event_id == full.id));
    assert_eq!(booked(&h, &a).await, 1);
    assert_eq!(booked(&h, &full).await, 1);
}

#[tokio::test]
async fn unchanged_selection_is_a_no_op() {
    let h = harness();
    let a = event_in(&h, 72, 5).await;
    let booking = h
        .engine
        .create_booking(customer("alex@example.com"), ids(&[&a]))
        .await
        .unwrap();
    topics(&h.inbox);

    let same = h
        .engine
        .modify_booking(booking.booking_id, ids(&[&a]))
        .await
        .unwrap();

    assert_eq!(same.version, booking.version);
    assert!(topics(&h.inbox).is_empty());
}

#[tokio::test]
async fn modify_unknown_booking_is_not_found() {
    let h = harness();
    let id = BookingId::new();
    let err = h.engine.modify_booking(id, BTreeSet::new()).await.unwrap_err();
    assert_eq!(err, ReservationError::BookingNotFound(id));
}

#[tokio::test]
async fn concurrent_requests_for_last_seat_have_one_winner() {
    let h = harness();
    let last = event_in(&h, 48, 1).await;

    let first = {
        let engine = h.engine.clone();
        let requested = ids(&[&last]);
        tokio::spawn(async move { engine.create_booking(customer("one@example.com"), requested).await })
    };
    let second = {
        let engine = h.engine.clone();
        let requested = ids(&[&last]);
        tokio::spawn(async move { engine.create_booking(customer("two@example.com"), requested).await })
    };

    let results = [first.await.unwrap(), second.await.unwrap()];
    let wins = results.iter().filter(|r| r.is_ok()).count();
    let full = results
        .iter()
        .filter(|r| matches!(r, Err(ReservationError::EventFull { .. })))
        .count();

    assert_eq!((wins, full), (1, 1));
    assert_eq!(booked(&h, &last).await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_bookings_never_exceed_capacity() {
    let h = harness();
    let event = event_in(&h, 48, 5).await;

    let tasks: Vec<_> = (0..20)
        .map(|i| {
            let engine = h.engine.clone();
            let requested = ids(&[&event]);
            tokio::spawn(async move {
                engine
                    .create_booking(customer(&format!("owner{i}@example.com")), requested)
                    .await
            })
        })
        .collect();

    let mut wins = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => wins += 1,
            Err(ReservationError::EventFull { .. }) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }

    assert_eq!(wins, 5);
    assert_eq!(booked(&h, &event).await, 5);
}

#[tokio::test]
async fn deleting_an_event_severs_references() {
    let h = harness();
    let a = event_in(&h, 48, 5).await;
    let b = event_in(&h, 72, 5).await;
    let booking = h
        .engine
        .create_booking(customer("alex@example.com"), ids(&[&a, &b]))
        .await
        .unwrap();
    topics(&h.inbox);

    let deleted = h.engine.admin_delete_event(a.id).await.unwrap();

    assert_eq!(deleted.event.id, a.id);
    assert_eq!(deleted.affected_bookings.len(), 1);
    let remaining = h.engine.lookup_booking(booking.booking_id).await.unwrap().unwrap();
    assert_eq!(remaining.booked_event_ids, ids(&[&b]));
    assert!(h.ledger.get_event(a.id).await.unwrap().is_none());
    assert_eq!(topics(&h.inbox), vec!["event.cancelled"]);

    let report = h.engine.verify_capacity().await.unwrap();
    assert!(report.is_consistent());
}

#[tokio::test]
async fn deleting_unknown_event_reports_not_found() {
    let h = harness();
    let id = EventId::new();
    assert_eq!(
        h.engine.admin_delete_event(id).await.unwrap_err(),
        ReservationError::EventNotFound(id)
    );
}

#[tokio::test]
async fn capacity_cannot_drop_below_bookings() {
    let h = harness();
    let a = event_in(&h, 48, 3).await;
    for i in 0..2 {
        h.engine
            .create_booking(customer(&format!("o{i}@example.com")), ids(&[&a]))
            .await
            .unwrap();
    }

    let err = h
        .engine
        .admin_update_event(
            a.id,
            EventPatch {
                total_capacity: Some(1),
                ..EventPatch::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ReservationError::Validation(_)));

    let grown = h
        .engine
        .admin_update_event(
            a.id,
            EventPatch {
                total_capacity: Some(10),
                ..EventPatch::default()
            },
        )
        .await
        .unwrap();
    assert_eq!((grown.total_capacity, grown.booked_capacity), (10, 2));
}

#[tokio::test]
async fn rescheduling_a_booked_event_notifies_participants() {
    let h = harness();
    let a = event_in(&h, 48, 3).await;
    let empty = event_in(&h, 72, 3).await;
    h.engine
        .create_booking(customer("alex@example.com"), ids(&[&a]))
        .await
        .unwrap();
    topics(&h.inbox);

    h.engine
        .admin_update_event(
            a.id,
            EventPatch {
                location: Some("Indoor hall".to_string()),
                ..EventPatch::default()
            },
        )
        .await
        .unwrap();
    h.engine
        .admin_update_event(
            empty.id,
            EventPatch {
                date: Some(Utc::now() + Duration::hours(100)),
                ..EventPatch::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(topics(&h.inbox), vec!["event.rescheduled"]);
}

#[tokio::test]
async fn staff_can_cancel_inside_the_window() {
    let h = harness();
    let soon = event_in(&h, 2, 3).await;
    let later = event_in(&h, 48, 3).await;
    let booking = h
        .engine
        .create_booking(customer("alex@example.com"), ids(&[&soon, &later]))
        .await
        .unwrap();
    topics(&h.inbox);

    let updated = h
        .engine
        .admin_cancel_booking_event(booking.booking_id, soon.id)
        .await
        .unwrap();

    assert_eq!(updated.booked_event_ids, ids(&[&later]));
    assert_eq!(booked(&h, &soon).await, 0);
    assert_eq!(topics(&h.inbox), vec!["booking.cancelled_by_admin"]);

    let err = h
        .engine
        .admin_cancel_booking_event(booking.booking_id, soon.id)
        .await
        .unwrap_err();
    assert!(matches!(err, ReservationError::Validation(_)));
}

#[tokio::test]
async fn reminder_does_not_reveal_unknown_customers() {
    let h = harness();
    let a = event_in(&h, 48, 3).await;
    h.engine
        .create_booking(customer("alex@example.com"), ids(&[&a]))
        .await
        .unwrap();
    topics(&h.inbox);

    h.engine
        .request_booking_reminder(&Email::parse("nobody@example.com").unwrap())
        .await
        .unwrap();
    assert!(topics(&h.inbox).is_empty());

    h.engine
        .request_booking_reminder(&Email::parse("ALEX@example.com").unwrap())
        .await
        .unwrap();
    assert_eq!(topics(&h.inbox), vec!["booking.reminder_requested"]);
}

#[tokio::test]
async fn purge_removes_past_events_without_notifying() {
    let h = harness();
    let past = event_in(&h, -5, 3).await;
    let future = event_in(&h, 48, 3).await;
    let booking = h
        .engine
        .create_booking(customer("alex@example.com"), ids(&[&past, &future]))
        .await
        .unwrap();
    topics(&h.inbox);

    let report = h.engine.purge_expired_events(Utc::now()).await.unwrap();

    assert_eq!(report.removed_events, vec![past.id]);
    assert_eq!(report.severed_bookings, vec![booking.booking_id]);
    let remaining = h.engine.lookup_booking(booking.booking_id).await.unwrap().unwrap();
    assert_eq!(remaining.booked_event_ids, ids(&[&future]));
    assert!(topics(&h.inbox).is_empty());

    let again = h.engine.purge_expired_events(Utc::now()).await.unwrap();
    assert_eq!(again, PurgeReport::default());
}

#[tokio::test]
async fn repair_recounts_drifted_counters() {
    let h = harness();
    let a = event_in(&h, 48, 4).await;
    h.engine
        .create_booking(customer("alex@example.com"), ids(&[&a]))
        .await
        .unwrap();

    let mut drifted = h.ledger.get_event(a.id).await.unwrap().unwrap();
    drifted.booked_capacity = 3;
    h.ledger.put_event(drifted, ExpectedVersion::Any).await.unwrap();

    let report = h.engine.verify_capacity().await.unwrap();
    assert_eq!(report.mismatches.len(), 1);
    assert_eq!((report.mismatches[0].recorded, report.mismatches[0].actual), (3, 1));
    assert!(!report.repaired);

    let repaired = h.engine.repair_capacity().await.unwrap();
    assert!(repaired.repaired);
    assert_eq!(booked(&h, &a).await, 1);
    assert!(h.engine.verify_capacity().await.unwrap().is_consistent());
}

#[tokio::test]
async fn outage_maps_to_storage_unavailable() {
    let h = harness();
    let a = event_in(&h, 48, 4).await;
    h.ledger.simulate_outage(true);

    let err = h
        .engine
        .create_booking(customer("alex@example.com"), ids(&[&a]))
        .await
        .unwrap_err();
    assert!(matches!(err, ReservationError::StorageUnavailable(_)));
}

/// Ledger whose commits always lose the race.
struct ContendedLedger {
    inner: InMemoryLedger,
    commits: AtomicU32,
}

#[async_trait::async_trait]
impl EventRepository for ContendedLedger {
    async fn get_event(&self, event_id: EventId) -> Result<Option<Event>, StoreError> {
        self.inner.get_event(event_id).await
    }

    async fn list_events(&self) -> Result<Vec<Event>, StoreError> {
        self.inner.list_events().await
    }

    async fn put_event(&self, event: Event, expected: ExpectedVersion) -> Result<Event, StoreError> {
        self.inner.put_event(event, expected).await
    }

    async fn delete_event(&self, event_id: EventId, expected: ExpectedVersion) -> Result<bool, StoreError> {
        self.inner.delete_event(event_id, expected).await
    }
}

#[async_trait::async_trait]
impl BookingRepository for ContendedLedger {
    async fn get_booking(&self, booking_id: BookingId) -> Result<Option<Booking>, StoreError> {
        self.inner.get_booking(booking_id).await
    }

    async fn find_by_customer_email(&self, email: &Email) -> Result<Option<Booking>, StoreError> {
        self.inner.find_by_customer_email(email).await
    }

    async fn list_bookings(&self) -> Result<Vec<Booking>, StoreError> {
        self.inner.list_bookings().await
    }

    async fn put_booking(&self, booking: Booking, expected: ExpectedVersion) -> Result<Booking, StoreError> {
        self.inner.put_booking(booking, expected).await
    }
}

#[async_trait::async_trait]
impl Ledger for ContendedLedger {
    async fn commit(&self, _changes: Changeset) -> Result<Committed, StoreError> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Concurrency("someone else got there first".to_string()))
    }
}

#[tokio::test]
async fn conflicts_are_retried_then_surfaced() {
    let ledger = Arc::new(ContendedLedger {
        inner: InMemoryLedger::new(),
        commits: AtomicU32::new(0),
    });
    let event = ledger
        .put_event(
            Event::create(
                EventId::new(),
                NewEvent {
                    date: Utc::now() + Duration::hours(48),
                    title: "Recall".to_string(),
                    location: "Park".to_string(),
                    category: "basics".to_string(),
                    total_capacity: 3,
                },
            )
            .unwrap(),
            ExpectedVersion::absent(),
        )
        .await
        .unwrap();
    let engine = ReservationEngine::new(
        ledger.clone(),
        Arc::new(NotificationBus::new()),
        EngineConfig {
            max_conflict_retries: 3,
            ..EngineConfig::default()
        },
    );

    let err = engine
        .create_booking(customer("alex@example.com"), BTreeSet::from([event.id]))
        .await
        .unwrap_err();

    assert!(matches!(err, ReservationError::Conflict(_)));
    assert_eq!(ledger.commits.load(Ordering::SeqCst), 4);
}

/// Reads go to `self.inner`; single-record writes are routed through `commit`.
macro_rules! commit_routed_repositories {
    ($ledger:ty) => {
        #[async_trait::async_trait]
        impl EventRepository for $ledger {
            async fn get_event(&self, event_id: EventId) -> Result<Option<Event>, StoreError> {
                self.inner.get_event(event_id).await
            }

            async fn list_events(&self) -> Result<Vec<Event>, StoreError> {
                self.inner.list_events().await
            }

            async fn put_event(&self, event: Event, expected: ExpectedVersion) -> Result<Event, StoreError> {
                let event_id = event.id;
                self.commit(Changeset::new().put_event(event, expected))
                    .await?
                    .event(event_id)
                    .cloned()
                    .ok_or_else(|| StoreError::Corrupt(format!("event {event_id} missing after commit")))
            }

            async fn delete_event(&self, event_id: EventId, expected: ExpectedVersion) -> Result<bool, StoreError> {
                let committed = self.commit(Changeset::new().delete_event(event_id, expected)).await?;
                Ok(committed.deleted_events.contains(&event_id))
            }
        }

        #[async_trait::async_trait]
        impl BookingRepository for $ledger {
            async fn get_booking(&self, booking_id: BookingId) -> Result<Option<Booking>, StoreError> {
                self.inner.get_booking(booking_id).await
            }

            async fn find_by_customer_email(&self, email: &Email) -> Result<Option<Booking>, StoreError> {
                self.inner.find_by_customer_email(email).await
            }

            async fn list_bookings(&self) -> Result<Vec<Booking>, StoreError> {
                self.inner.list_bookings().await
            }

            async fn put_booking(&self, booking: Booking, expected: ExpectedVersion) -> Result<Booking, StoreError> {
                let booking_id = booking.booking_id;
                self.commit(Changeset::new().put_booking(booking, expected))
                    .await?
                    .booking(booking_id)
                    .cloned()
                    .ok_or_else(|| StoreError::Corrupt(format!("booking {booking_id} missing after commit")))
            }
        }
    };
}

/// Ledger where a rival booking takes the last seat right before the first commit lands.
struct RacingLedger {
    inner: InMemoryLedger,
    rival: Mutex<Option<Booking>>,
    commits: AtomicU32,
}

commit_routed_repositories!(RacingLedger);

#[async_trait::async_trait]
impl Ledger for RacingLedger {
    async fn commit(&self, changes: Changeset) -> Result<Committed, StoreError> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        let rival = self.rival.lock().unwrap().take();
        if let Some(rival) = rival {
            let mut rival_changes = Changeset::new();
            for event_id in &rival.booked_event_ids {
                let mut event = self.inner.get_event(*event_id).await?.unwrap();
                let expected = ExpectedVersion::of(&event);
                event.reserve_seat().unwrap();
                rival_changes = rival_changes.put_event(event, expected);
            }
            self.inner
                .commit(rival_changes.put_booking(rival, ExpectedVersion::absent()))
                .await?;
        }
        self.inner.commit(changes).await
    }
}

#[tokio::test]
async fn losing_the_race_for_the_last_seat_reports_full() {
    let ledger = Arc::new(RacingLedger {
        inner: InMemoryLedger::new(),
        rival: Mutex::new(None),
        commits: AtomicU32::new(0),
    });
    let last = ledger
        .inner
        .put_event(
            Event::create(
                EventId::new(),
                NewEvent {
                    date: Utc::now() + Duration::hours(48),
                    title: "Heelwork".to_string(),
                    location: "Park".to_string(),
                    category: "basics".to_string(),
                    total_capacity: 1,
                },
            )
            .unwrap(),
            ExpectedVersion::absent(),
        )
        .await
        .unwrap();
    *ledger.rival.lock().unwrap() = Some(Booking::new(
        BookingId::new(),
        customer("rival@example.com"),
        BTreeSet::from([last.id]),
    ));
    let engine = ReservationEngine::new(
        ledger.clone(),
        Arc::new(NotificationBus::new()),
        EngineConfig::default(),
    );

    let err = engine
        .create_booking(customer("alex@example.com"), BTreeSet::from([last.id]))
        .await
        .unwrap_err();

    assert_eq!(
        err,
        ReservationError::EventFull {
            event_id: last.id,
            title: "Heelwork".to_string(),
        }
    );
    // one lost commit, then the re-read sees the event full and never commits again
    assert_eq!(ledger.commits.load(Ordering::SeqCst), 1);
    let stored = ledger.inner.get_event(last.id).await.unwrap().unwrap();
    assert_eq!(stored.booked_capacity, stored.total_capacity);
    assert_eq!(ledger.inner.list_bookings().await.unwrap().len(), 1);
}

/// Ledger that goes offline once a commit succeeds, while `fail_after_commit` is set.
struct FlakyLedger {
    inner: InMemoryLedger,
    fail_after_commit: AtomicBool,
}

commit_routed_repositories!(FlakyLedger);

#[async_trait::async_trait]
impl Ledger for FlakyLedger {
    async fn commit(&self, changes: Changeset) -> Result<Committed, StoreError> {
        let committed = self.inner.commit(changes).await?;
        if self.fail_after_commit.load(Ordering::SeqCst) {
            self.inner.simulate_outage(true);
        }
        Ok(committed)
    }
}

#[tokio::test]
async fn admin_changes_that_committed_are_reported_as_success() {
    let ledger = Arc::new(FlakyLedger {
        inner: InMemoryLedger::new(),
        fail_after_commit: AtomicBool::new(false),
    });
    let bus = Arc::new(NotificationBus::new());
    let inbox = bus.subscribe();
    let engine = ReservationEngine::new(ledger.clone(), bus, EngineConfig::default());

    let new_event = |hours: i64| NewEvent {
        date: Utc::now() + Duration::hours(hours),
        title: format!("Class in {hours}h"),
        location: "Training ground".to_string(),
        category: "basics".to_string(),
        total_capacity: 3,
    };
    let a = engine.admin_create_event(new_event(48)).await.unwrap();
    let b = engine.admin_create_event(new_event(72)).await.unwrap();
    let booking = engine
        .create_booking(customer("alex@example.com"), BTreeSet::from([a.id, b.id]))
        .await
        .unwrap();
    topics(&inbox);

    ledger.fail_after_commit.store(true, Ordering::SeqCst);
    let moved = engine
        .admin_update_event(
            a.id,
            EventPatch {
                location: Some("Hall".to_string()),
                ..EventPatch::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(moved.location, "Hall");
    assert_eq!(topics(&inbox), vec!["event.rescheduled"]);

    ledger.inner.simulate_outage(false);
    let updated = engine
        .admin_cancel_booking_event(booking.booking_id, a.id)
        .await
        .unwrap();
    assert_eq!(updated.booked_event_ids, BTreeSet::from([b.id]));

    let envelope = inbox.try_recv().unwrap();
    match envelope.payload() {
        Notification::BookingCancelledByAdmin {
            cancelled_event,
            remaining_events,
            ..
        } => {
            assert_eq!(cancelled_event.id, a.id);
            assert_eq!(remaining_events.iter().map(|e| e.id).collect::<Vec<_>>(), vec![b.id]);
        }
        other => panic!("unexpected notification {other:?}"),
    }

    ledger.inner.simulate_outage(false);
    let stored = ledger.inner.get_event(a.id).await.unwrap().unwrap();
    assert_eq!((stored.location.as_str(), stored.booked_capacity), ("Hall", 0));
}

#[tokio::test]
async fn notifications_carry_the_committed_booking() {
    let h = harness();
    let a = event_in(&h, 48, 4).await;
    let booking = h
        .engine
        .create_booking(customer("alex@example.com"), ids(&[&a]))
        .await
        .unwrap();

    let envelope = h.inbox.try_recv().unwrap();
    match envelope.into_payload() {
        Notification::BookingCreated {
            booking: sent,
            events,
            ..
        } => {
            assert_eq!(sent, booking);
            assert_eq!(events.len(), 1);
            assert_eq!(events[0].booked_capacity, 1);
        }
        other => panic!("unexpected notification: {other:?}"),
    }
}

#[derive(Debug, Clone)]
enum Op {
    Create { customer: u8, events: Vec<u8> },
    Modify { customer: u8, events: Vec<u8> },
    Delete { event: u8 },
    AdminCancel { customer: u8, event: u8 },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    let picks = || prop::collection::vec(0u8..6, 0..4);
    prop_oneof![
        (0u8..8, picks()).prop_map(|(customer, events)| Op::Create { customer, events }),
        (0u8..8, picks()).prop_map(|(customer, events)| Op::Modify { customer, events }),
        (0u8..6).prop_map(|event| Op::Delete { event }),
        (0u8..8, 0u8..6).prop_map(|(customer, event)| Op::AdminCancel { customer, event }),
    ]
}

async fn run_ops(ops: Vec<Op>) -> IntegrityReport {
    let h = harness();
    let mut events = Vec::new();
    for (i, capacity) in [1u32, 2, 3, 1, 2, 4].into_iter().enumerate() {
        // Alternate inside/outside the window so both paths are exercised.
        let hours = if i % 2 == 0 { 6 } else { 60 };
        events.push(event_in(&h, hours, capacity).await.id);
    }
    let mut bookings: Vec<Option<BookingId>> = vec![None; 8];

    let pick = |idx: &[u8]| idx.iter().map(|i| events[*i as usize]).collect::<BTreeSet<_>>();

    for op in ops {
        match op {
            Op::Create { customer: c, events: e } => {
                let email = format!("c{c}@example.com");
                if let Ok(b) = h.engine.create_booking(customer(&email), pick(&e)).await {
                    bookings[c as usize] = Some(b.booking_id);
                }
            }
            Op::Modify { customer: c, events: e } => {
                if let Some(id) = bookings[c as usize] {
                    let _ = h.engine.modify_booking(id, pick(&e)).await;
                }
            }
            Op::Delete { event } => {
                let _ = h.engine.admin_delete_event(events[event as usize]).await;
            }
            Op::AdminCancel { customer: c, event } => {
                if let Some(id) = bookings[c as usize] {
                    let _ = h
                        .engine
                        .admin_cancel_booking_event(id, events[event as usize])
                        .await;
                }
            }
        }
    }

    for event in h.ledger.list_events().await.unwrap() {
        assert!(event.booked_capacity <= event.total_capacity);
    }
    h.engine.verify_capacity().await.unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn counters_match_bookings_after_any_sequence(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let report = runtime.block_on(run_ops(ops));
        prop_assert!(report.is_consistent(), "{report:?}");
    }
}
