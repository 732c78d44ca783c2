//! Postgres-backed ledger.
//!
//! Every commit runs in a `SERIALIZABLE` transaction. Writes are guarded by the
//! version the caller read (`UPDATE ... WHERE version = $n`, `INSERT ... ON
//! CONFLICT DO NOTHING`); a guard that matches no row aborts the transaction.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (serialization failure) | `40001` | `Concurrency` |
//! | Database (unique violation) | `23505` | `Concurrency` |
//! | Database (check violation) | `23514` | `Corrupt` |
//! | Database (other) | any other | `Unavailable` |
//! | PoolClosed / Io / PoolTimedOut / other | N/A | `Unavailable` |
//!
//! Schema: `crates/infra/migrations/0001_init.sql`.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use classbook_booking::{Booking, Customer, Email, Event};
use classbook_core::{BookingId, EventId, ExpectedVersion};

use super::r#trait::{BookingRepository, Changeset, Committed, EventRepository, Ledger, StoreError};

const EVENT_COLUMNS: &str =
    "id, date, title, location, category, total_capacity, booked_capacity, version";

const BOOKING_COLUMNS: &str =
    "booking_id, customer_name, customer_phone, dog_name, email, version";

#[derive(Debug, Clone)]
pub struct PostgresLedger {
    pool: Arc<PgPool>,
}

impl PostgresLedger {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Connect and apply the bundled schema.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        let ledger = Self::new(pool);
        ledger.migrate().await?;
        Ok(ledger)
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(include_str!("../../migrations/0001_init.sql"))
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    async fn load_bookings(&self, rows: Vec<PgRow>) -> Result<Vec<Booking>, StoreError> {
        let ids: Vec<Uuid> = rows
            .iter()
            .map(|r| r.try_get::<Uuid, _>("booking_id"))
            .collect::<Result<_, _>>()
            .map_err(|e| StoreError::Corrupt(format!("booking row: {e}")))?;

        let links = sqlx::query(
            "SELECT booking_id, event_id FROM booking_events WHERE booking_id = ANY($1)",
        )
        .bind(&ids)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_booking_events", e))?;

        let mut held: HashMap<Uuid, BTreeSet<EventId>> = HashMap::new();
        for link in links {
            let booking_id: Uuid = link
                .try_get("booking_id")
                .map_err(|e| StoreError::Corrupt(format!("booking_events row: {e}")))?;
            let event_id: Uuid = link
                .try_get("event_id")
                .map_err(|e| StoreError::Corrupt(format!("booking_events row: {e}")))?;
            held.entry(booking_id).or_default().insert(EventId::from_uuid(event_id));
        }

        rows.iter()
            .map(|row| {
                let mut booking = booking_from_row(row)?;
                if let Some(ids) = held.remove(booking.booking_id.as_uuid()) {
                    booking.booked_event_ids = ids;
                }
                Ok(booking)
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl EventRepository for PostgresLedger {
    #[instrument(skip(self), err)]
    async fn get_event(&self, event_id: EventId) -> Result<Option<Event>, StoreError> {
        let row = sqlx::query(&format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = $1"))
            .bind(event_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_event", e))?;

        row.as_ref().map(event_from_row).transpose()
    }

    async fn list_events(&self) -> Result<Vec<Event>, StoreError> {
        let rows = sqlx::query(&format!("SELECT {EVENT_COLUMNS} FROM events ORDER BY date ASC, id ASC"))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_events", e))?;

        rows.iter().map(event_from_row).collect()
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
impl BookingRepository for PostgresLedger {
    #[instrument(skip(self), err)]
    async fn get_booking(&self, booking_id: BookingId) -> Result<Option<Booking>, StoreError> {
        let rows = sqlx::query(&format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE booking_id = $1"))
            .bind(booking_id.as_uuid())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_booking", e))?;

        Ok(self.load_bookings(rows).await?.into_iter().next())
    }

    async fn find_by_customer_email(&self, email: &Email) -> Result<Option<Booking>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings WHERE email_normalized = $1"
        ))
        .bind(email.normalized())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_by_customer_email", e))?;

        Ok(self.load_bookings(rows).await?.into_iter().next())
    }

    async fn list_bookings(&self) -> Result<Vec<Booking>, StoreError> {
        let rows = sqlx::query(&format!("SELECT {BOOKING_COLUMNS} FROM bookings ORDER BY booking_id ASC"))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_bookings", e))?;

        self.load_bookings(rows).await
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
impl Ledger for PostgresLedger {
    #[instrument(
        skip(self, changes),
        fields(
            event_writes = changes.event_writes.len(),
            booking_writes = changes.booking_writes.len(),
            event_deletes = changes.event_deletes.len()
        ),
        err
    )]
    async fn commit(&self, changes: Changeset) -> Result<Committed, StoreError> {
        if changes.is_empty() {
            return Ok(Committed::default());
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        set_transaction_serializable(&mut tx).await?;

        let mut committed = Committed::default();

        for (event_id, expected) in changes.event_deletes {
            delete_event_row(&mut tx, event_id, expected).await?;
            committed.deleted_events.push(event_id);
        }

        for (event, expected) in changes.event_writes {
            let version = write_event_row(&mut tx, &event, expected).await?;
            committed.events.push(Event { version, ..event });
        }

        for (booking, expected) in changes.booking_writes {
            let version = write_booking_row(&mut tx, &booking, expected).await?;
            committed.bookings.push(Booking { version, ..booking });
        }

        // Dropping `tx` on an early return rolls back.
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(committed)
    }
}

async fn set_transaction_serializable(tx: &mut Transaction<'_, Postgres>) -> Result<(), StoreError> {
    sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("set_isolation", e))?;
    Ok(())
}

async fn delete_event_row(
    tx: &mut Transaction<'_, Postgres>,
    event_id: EventId,
    expected: ExpectedVersion,
) -> Result<(), StoreError> {
    let result = match expected {
        ExpectedVersion::Any => sqlx::query("DELETE FROM events WHERE id = $1")
            .bind(event_id.as_uuid())
            .execute(&mut **tx)
            .await,
        ExpectedVersion::Exact(v) => sqlx::query("DELETE FROM events WHERE id = $1 AND version = $2")
            .bind(event_id.as_uuid())
            .bind(v as i64)
            .execute(&mut **tx)
            .await,
    }
    .map_err(|e| map_sqlx_error("delete_event", e))?;

    if result.rows_affected() == 0 {
        return Err(StoreError::Concurrency(format!(
            "event {event_id}: expected {expected:?}, row missing or moved"
        )));
    }
    Ok(())
}

async fn write_event_row(
    tx: &mut Transaction<'_, Postgres>,
    event: &Event,
    expected: ExpectedVersion,
) -> Result<u64, StoreError> {
    let sql = match expected {
        ExpectedVersion::Exact(0) => {
            "INSERT INTO events (id, date, title, location, category, total_capacity, booked_capacity, version)
             VALUES ($1, $2, $3, $4, $5, $6, $7, 1)
             ON CONFLICT (id) DO NOTHING
             RETURNING version"
        }
        ExpectedVersion::Exact(_) => {
            "UPDATE events
             SET date = $2, title = $3, location = $4, category = $5,
                 total_capacity = $6, booked_capacity = $7, version = version + 1
             WHERE id = $1 AND version = $8
             RETURNING version"
        }
        ExpectedVersion::Any => {
            "INSERT INTO events (id, date, title, location, category, total_capacity, booked_capacity, version)
             VALUES ($1, $2, $3, $4, $5, $6, $7, 1)
             ON CONFLICT (id) DO UPDATE
             SET date = EXCLUDED.date, title = EXCLUDED.title, location = EXCLUDED.location,
                 category = EXCLUDED.category, total_capacity = EXCLUDED.total_capacity,
                 booked_capacity = EXCLUDED.booked_capacity, version = events.version + 1
             RETURNING version"
        }
    };

    let mut query = sqlx::query(sql)
        .bind(event.id.as_uuid())
        .bind(event.date)
        .bind(&event.title)
        .bind(&event.location)
        .bind(&event.category)
        .bind(event.total_capacity as i32)
        .bind(event.booked_capacity as i32);
    if let ExpectedVersion::Exact(v) = expected {
        if v > 0 {
            query = query.bind(v as i64);
        }
    }

    let row = query
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("write_event", e))?;

    let row = row.ok_or_else(|| {
        StoreError::Concurrency(format!("event {}: expected {expected:?}, row moved", event.id))
    })?;
    read_version(&row)
}

async fn write_booking_row(
    tx: &mut Transaction<'_, Postgres>,
    booking: &Booking,
    expected: ExpectedVersion,
) -> Result<u64, StoreError> {
    let sql = match expected {
        ExpectedVersion::Exact(0) => {
            "INSERT INTO bookings (booking_id, customer_name, customer_phone, dog_name, email, email_normalized, version)
             VALUES ($1, $2, $3, $4, $5, $6, 1)
             ON CONFLICT (booking_id) DO NOTHING
             RETURNING version"
        }
        ExpectedVersion::Exact(_) => {
            "UPDATE bookings
             SET customer_name = $2, customer_phone = $3, dog_name = $4,
                 email = $5, email_normalized = $6, version = version + 1
             WHERE booking_id = $1 AND version = $7
             RETURNING version"
        }
        ExpectedVersion::Any => {
            "INSERT INTO bookings (booking_id, customer_name, customer_phone, dog_name, email, email_normalized, version)
             VALUES ($1, $2, $3, $4, $5, $6, 1)
             ON CONFLICT (booking_id) DO UPDATE
             SET customer_name = EXCLUDED.customer_name, customer_phone = EXCLUDED.customer_phone,
                 dog_name = EXCLUDED.dog_name, email = EXCLUDED.email,
                 email_normalized = EXCLUDED.email_normalized, version = bookings.version + 1
             RETURNING version"
        }
    };

    let customer = &booking.customer;
    let mut query = sqlx::query(sql)
        .bind(booking.booking_id.as_uuid())
        .bind(&customer.name)
        .bind(&customer.phone)
        .bind(&customer.dog_name)
        .bind(customer.email.as_str())
        .bind(customer.email.normalized());
    if let ExpectedVersion::Exact(v) = expected {
        if v > 0 {
            query = query.bind(v as i64);
        }
    }

    let row = query
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("write_booking", e))?;

    let row = row.ok_or_else(|| {
        StoreError::Concurrency(format!(
            "booking {}: expected {expected:?}, row moved",
            booking.booking_id
        ))
    })?;
    let version = read_version(&row)?;

    sqlx::query("DELETE FROM booking_events WHERE booking_id = $1")
        .bind(booking.booking_id.as_uuid())
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("clear_booking_events", e))?;

    for event_id in &booking.booked_event_ids {
        sqlx::query("INSERT INTO booking_events (booking_id, event_id) VALUES ($1, $2)")
            .bind(booking.booking_id.as_uuid())
            .bind(event_id.as_uuid())
            .execute(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("insert_booking_event", e))?;
    }

    Ok(version)
}

fn read_version(row: &PgRow) -> Result<u64, StoreError> {
    let version: i64 = row
        .try_get("version")
        .map_err(|e| StoreError::Corrupt(format!("version column: {e}")))?;
    u64::try_from(version).map_err(|_| StoreError::Corrupt(format!("negative version {version}")))
}

fn event_from_row(row: &PgRow) -> Result<Event, StoreError> {
    let corrupt = |e: sqlx::Error| StoreError::Corrupt(format!("event row: {e}"));

    let id: Uuid = row.try_get("id").map_err(corrupt)?;
    let date: DateTime<Utc> = row.try_get("date").map_err(corrupt)?;
    let total: i32 = row.try_get("total_capacity").map_err(corrupt)?;
    let booked: i32 = row.try_get("booked_capacity").map_err(corrupt)?;

    Ok(Event {
        id: EventId::from_uuid(id),
        date,
        title: row.try_get("title").map_err(corrupt)?,
        location: row.try_get("location").map_err(corrupt)?,
        category: row.try_get("category").map_err(corrupt)?,
        total_capacity: u32::try_from(total)
            .map_err(|_| StoreError::Corrupt(format!("event {id}: total_capacity {total}")))?,
        booked_capacity: u32::try_from(booked)
            .map_err(|_| StoreError::Corrupt(format!("event {id}: booked_capacity {booked}")))?,
        version: read_version(row)?,
    })
}

fn booking_from_row(row: &PgRow) -> Result<Booking, StoreError> {
    let corrupt = |e: sqlx::Error| StoreError::Corrupt(format!("booking row: {e}"));

    let booking_id: Uuid = row.try_get("booking_id").map_err(corrupt)?;
    let email: String = row.try_get("email").map_err(corrupt)?;
    let email = Email::parse(&email)
        .map_err(|e| StoreError::Corrupt(format!("booking {booking_id}: {e}")))?;

    Ok(Booking {
        booking_id: BookingId::from_uuid(booking_id),
        customer: Customer {
            name: row.try_get("customer_name").map_err(corrupt)?,
            phone: row.try_get("customer_phone").map_err(corrupt)?,
            dog_name: row.try_get("dog_name").map_err(corrupt)?,
            email,
        },
        booked_event_ids: BTreeSet::new(),
        version: read_version(row)?,
    })
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                // serialization failure / unique violation
                Some("40001") | Some("23505") => StoreError::Concurrency(msg),
                // check violation
                Some("23514") => StoreError::Corrupt(msg),
                _ => StoreError::Unavailable(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Unavailable(format!("connection pool closed in {}", operation))
        }
        _ => StoreError::Unavailable(format!("sqlx error in {}: {}", operation, err)),
    }
}
