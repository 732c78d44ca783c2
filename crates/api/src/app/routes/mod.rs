use axum::{routing::get, Router};

pub mod admin;
pub mod bookings;
pub mod events;
pub mod system;

/// Routes open to customers (no token).
pub fn public_router() -> Router {
    Router::new()
        .route("/health", get(system::health))
        .nest("/events", events::router())
        .nest("/bookings", bookings::router())
}

/// Routes behind the staff bearer token.
pub fn admin_router() -> Router {
    Router::new().nest("/admin", admin::router())
}
