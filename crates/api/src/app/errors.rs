use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use classbook_infra::ReservationError;

pub fn reservation_error_to_response(err: ReservationError) -> axum::response::Response {
    let message = err.to_string();
    match err {
        ReservationError::DuplicateCustomer => {
            json_error(StatusCode::CONFLICT, "duplicate_customer", message)
        }
        ReservationError::BookingNotFound(_) => {
            json_error(StatusCode::NOT_FOUND, "booking_not_found", message)
        }
        ReservationError::EventNotFound(_) => json_error(StatusCode::NOT_FOUND, "event_not_found", message),
        ReservationError::EventFull { .. } => json_error(StatusCode::CONFLICT, "event_full", message),
        ReservationError::CancellationWindowExpired { .. } => json_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "cancellation_window_expired",
            message,
        ),
        ReservationError::Validation(_) => json_error(StatusCode::BAD_REQUEST, "validation_error", message),
        ReservationError::Conflict(_) => json_error(StatusCode::CONFLICT, "conflict", message),
        ReservationError::StorageUnavailable(_) => {
            tracing::error!(error = %message, "storage unavailable");
            json_error(StatusCode::SERVICE_UNAVAILABLE, "storage_unavailable", message)
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
