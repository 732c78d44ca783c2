//! Customer-facing booking routes.
//!
//! There is no customer login: the booking id returned on creation is the
//! credential for lookup and modification.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};

use crate::app::{dto, errors, services::AppServices};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_booking))
        .route("/reminder", post(request_reminder))
        .route("/:id", get(get_booking))
        .route("/:id/events", put(modify_booking))
}

/// POST /bookings
pub async fn create_booking(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::CreateBookingRequest>,
) -> axum::response::Response {
    let customer = match dto::parse_customer(body.customer) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let event_ids = match dto::parse_event_ids(&body.event_ids) {
        Ok(ids) => ids,
        Err(resp) => return resp,
    };

    match services.engine.create_booking(customer, event_ids).await {
        Ok(booking) => (StatusCode::CREATED, Json(dto::BookingResponse::from(booking))).into_response(),
        Err(e) => errors::reservation_error_to_response(e),
    }
}

/// GET /bookings/:id - booking with its events and what may still be cancelled
pub async fn get_booking(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let booking_id = match dto::parse_booking_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.engine.booking_overview(booking_id).await {
        Ok(Some(overview)) => Json(overview).into_response(),
        Ok(None) => errors::json_error(StatusCode::NOT_FOUND, "booking_not_found", "booking not found"),
        Err(e) => errors::reservation_error_to_response(e),
    }
}

/// PUT /bookings/:id/events - replace the booked event set
pub async fn modify_booking(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::ModifyBookingRequest>,
) -> axum::response::Response {
    let booking_id = match dto::parse_booking_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let event_ids = match dto::parse_event_ids(&body.event_ids) {
        Ok(ids) => ids,
        Err(resp) => return resp,
    };

    match services.engine.modify_booking(booking_id, event_ids).await {
        Ok(booking) => Json(dto::BookingResponse::from(booking)).into_response(),
        Err(e) => errors::reservation_error_to_response(e),
    }
}

/// POST /bookings/reminder - re-send the booking link
///
/// Always 202 for a well-formed address, whether or not a booking exists.
pub async fn request_reminder(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::ReminderRequest>,
) -> axum::response::Response {
    let email = match dto::parse_email(&body.email) {
        Ok(e) => e,
        Err(resp) => return resp,
    };

    match services.engine.request_booking_reminder(&email).await {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({
                "message": "if a booking exists for this address, a reminder is on its way",
            })),
        )
            .into_response(),
        Err(e) => errors::reservation_error_to_response(e),
    }
}
