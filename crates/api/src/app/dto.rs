use std::collections::BTreeSet;

use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use classbook_booking::{Booking, Customer, Email, Event, EventPatch, NewEvent};
use classbook_core::{BookingId, EventId};

use crate::app::errors;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct CustomerRequest {
    pub name: String,
    pub phone: String,
    pub dog_name: String,
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateBookingRequest {
    pub customer: CustomerRequest,
    pub event_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ModifyBookingRequest {
    pub event_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReminderRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateEventRequest {
    pub date: DateTime<Utc>,
    pub title: String,
    pub location: String,
    #[serde(default)]
    pub category: String,
    pub total_capacity: u32,
}

impl From<CreateEventRequest> for NewEvent {
    fn from(value: CreateEventRequest) -> Self {
        NewEvent {
            date: value.date,
            title: value.title,
            location: value.location,
            category: value.category,
            total_capacity: value.total_capacity,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateEventRequest {
    pub date: Option<DateTime<Utc>>,
    pub title: Option<String>,
    pub location: Option<String>,
    pub category: Option<String>,
    pub total_capacity: Option<u32>,
}

impl From<UpdateEventRequest> for EventPatch {
    fn from(value: UpdateEventRequest) -> Self {
        EventPatch {
            date: value.date,
            title: value.title,
            location: value.location,
            category: value.category,
            total_capacity: value.total_capacity,
        }
    }
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct BookingResponse {
    pub booking_id: String,
    pub customer: Customer,
    pub event_ids: Vec<String>,
}

impl From<Booking> for BookingResponse {
    fn from(value: Booking) -> Self {
        Self {
            booking_id: value.booking_id.to_string(),
            customer: value.customer,
            event_ids: value
                .booked_event_ids
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DeletedEventResponse {
    pub event: Option<Event>,
    pub affected_booking_ids: Vec<String>,
    pub message: String,
}

// -------------------------
// Parsing helpers
// -------------------------

pub fn parse_event_id(raw: &str) -> Result<EventId, axum::response::Response> {
    raw.parse().map_err(|_| {
        errors::json_error(
            StatusCode::BAD_REQUEST,
            "invalid_id",
            format!("'{raw}' is not a valid event id"),
        )
    })
}

pub fn parse_booking_id(raw: &str) -> Result<BookingId, axum::response::Response> {
    raw.parse().map_err(|_| {
        errors::json_error(
            StatusCode::BAD_REQUEST,
            "invalid_id",
            format!("'{raw}' is not a valid booking id"),
        )
    })
}

/// Parse a list of event ids; duplicates collapse into one.
pub fn parse_event_ids(raw: &[String]) -> Result<BTreeSet<EventId>, axum::response::Response> {
    raw.iter().map(|id| parse_event_id(id)).collect()
}

pub fn parse_email(raw: &str) -> Result<Email, axum::response::Response> {
    Email::parse(raw)
        .map_err(|e| errors::json_error(StatusCode::BAD_REQUEST, "validation_error", e.to_string()))
}

pub fn parse_customer(raw: CustomerRequest) -> Result<Customer, axum::response::Response> {
    Ok(Customer {
        name: raw.name,
        phone: raw.phone,
        dog_name: raw.dog_name,
        email: parse_email(&raw.email)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_ids_are_deduplicated() {
        let id = EventId::new();
        let ids = parse_event_ids(&[id.to_string(), id.to_string()]).unwrap();
        assert_eq!(ids, BTreeSet::from([id]));
    }

    #[test]
    fn malformed_input_is_a_bad_request() {
        let err = parse_event_ids(&["nope".to_string()]).unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let err = parse_email("no-at-sign").unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}
