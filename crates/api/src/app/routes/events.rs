//! Public event listings.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::Utc;

use classbook_booking::views::EventView;

use crate::app::{dto, errors, services::AppServices};

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_events))
        .route("/upcoming", get(upcoming_events))
        .route("/bookable", get(bookable_events))
        .route("/:id", get(get_event))
}

/// GET /events - every event, sorted by date
pub async fn list_events(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    match services.engine.list_events().await {
        Ok(events) => {
            let views: Vec<EventView> = events.into_iter().map(EventView::new).collect();
            Json(views).into_response()
        }
        Err(e) => errors::reservation_error_to_response(e),
    }
}

/// GET /events/upcoming - future events grouped by ISO week
pub async fn upcoming_events(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Response {
    match services.engine.upcoming_by_week(Utc::now()).await {
        Ok(weeks) => Json(weeks).into_response(),
        Err(e) => errors::reservation_error_to_response(e),
    }
}

/// GET /events/bookable - future events with seats left
pub async fn bookable_events(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Response {
    match services.engine.bookable_events(Utc::now()).await {
        Ok(events) => Json(events).into_response(),
        Err(e) => errors::reservation_error_to_response(e),
    }
}

/// GET /events/:id
pub async fn get_event(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let event_id = match dto::parse_event_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.engine.get_event(event_id).await {
        Ok(Some(event)) => Json(EventView::new(event)).into_response(),
        Ok(None) => errors::json_error(StatusCode::NOT_FOUND, "event_not_found", "event not found"),
        Err(e) => errors::reservation_error_to_response(e),
    }
}
