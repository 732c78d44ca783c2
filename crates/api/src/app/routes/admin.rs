//! Staff routes: event management, booking overrides and maintenance.
//!
//! Every route here sits behind the bearer-token middleware. Event management
//! is open to both roles; the rest requires `admin`.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, patch, post},
    Json, Router,
};
use chrono::Utc;
use tracing::info;

use classbook_infra::ReservationError;

use crate::app::{dto, errors, services::AppServices};
use crate::authz::require_role;
use crate::context::{StaffContext, StaffRole};

pub fn router() -> Router {
    Router::new()
        .route("/events", post(create_event))
        .route("/events/:id", patch(update_event).delete(delete_event))
        .route("/bookings/:id/events/:event_id", delete(cancel_booking_event))
        .route("/maintenance/purge", post(purge_expired))
        .route("/maintenance/integrity", get(verify_integrity))
        .route("/maintenance/integrity/repair", post(repair_integrity))
}

/// POST /admin/events
pub async fn create_event(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(staff): Extension<StaffContext>,
    Json(body): Json<dto::CreateEventRequest>,
) -> axum::response::Response {
    if let Err(resp) = require_role(&staff, StaffRole::Staff) {
        return resp;
    }

    match services.engine.admin_create_event(body.into()).await {
        Ok(event) => (StatusCode::CREATED, Json(event)).into_response(),
        Err(e) => errors::reservation_error_to_response(e),
    }
}

/// PATCH /admin/events/:id - edit details; capacity may not drop below bookings
pub async fn update_event(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(staff): Extension<StaffContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::UpdateEventRequest>,
) -> axum::response::Response {
    if let Err(resp) = require_role(&staff, StaffRole::Staff) {
        return resp;
    }
    let event_id = match dto::parse_event_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.engine.admin_update_event(event_id, body.into()).await {
        Ok(event) => Json(event).into_response(),
        Err(e) => errors::reservation_error_to_response(e),
    }
}

/// DELETE /admin/events/:id
///
/// Deleting an id that no longer exists succeeds: a repeated delete is
/// reported as "assumed already deleted" rather than 404.
pub async fn delete_event(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(staff): Extension<StaffContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(resp) = require_role(&staff, StaffRole::Staff) {
        return resp;
    }
    let event_id = match dto::parse_event_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.engine.admin_delete_event(event_id).await {
        Ok(deleted) => Json(dto::DeletedEventResponse {
            event: Some(deleted.event),
            affected_booking_ids: deleted
                .affected_bookings
                .iter()
                .map(|b| b.booking_id.to_string())
                .collect(),
            message: "event deleted".to_string(),
        })
        .into_response(),
        Err(ReservationError::EventNotFound(_)) => {
            info!(event_id = %event_id, "delete of unknown event; assumed already deleted");
            Json(dto::DeletedEventResponse {
                event: None,
                affected_booking_ids: Vec::new(),
                message: "event not found; assumed already deleted".to_string(),
            })
            .into_response()
        }
        Err(e) => errors::reservation_error_to_response(e),
    }
}

/// DELETE /admin/bookings/:id/events/:event_id - remove one event, ignoring the window
pub async fn cancel_booking_event(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(staff): Extension<StaffContext>,
    Path((id, event_id)): Path<(String, String)>,
) -> axum::response::Response {
    if let Err(resp) = require_role(&staff, StaffRole::Admin) {
        return resp;
    }
    let booking_id = match dto::parse_booking_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let event_id = match dto::parse_event_id(&event_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services
        .engine
        .admin_cancel_booking_event(booking_id, event_id)
        .await
    {
        Ok(booking) => Json(dto::BookingResponse::from(booking)).into_response(),
        Err(e) => errors::reservation_error_to_response(e),
    }
}

/// POST /admin/maintenance/purge - delete events that already started
pub async fn purge_expired(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(staff): Extension<StaffContext>,
) -> axum::response::Response {
    if let Err(resp) = require_role(&staff, StaffRole::Admin) {
        return resp;
    }

    match services.engine.purge_expired_events(Utc::now()).await {
        Ok(report) => Json(report).into_response(),
        Err(e) => errors::reservation_error_to_response(e),
    }
}

/// GET /admin/maintenance/integrity
pub async fn verify_integrity(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(staff): Extension<StaffContext>,
) -> axum::response::Response {
    if let Err(resp) = require_role(&staff, StaffRole::Admin) {
        return resp;
    }

    match services.engine.verify_capacity().await {
        Ok(report) => Json(serde_json::json!({
            "consistent": report.is_consistent(),
            "report": report,
        }))
        .into_response(),
        Err(e) => errors::reservation_error_to_response(e),
    }
}

/// POST /admin/maintenance/integrity/repair - reset counters to the booked seat count
pub async fn repair_integrity(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(staff): Extension<StaffContext>,
) -> axum::response::Response {
    if let Err(resp) = require_role(&staff, StaffRole::Admin) {
        return resp;
    }

    match services.engine.repair_capacity().await {
        Ok(report) => Json(report).into_response(),
        Err(e) => errors::reservation_error_to_response(e),
    }
}
