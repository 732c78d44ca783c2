//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: ledger, notification bus, engine and background jobs
//! - `routes/`: HTTP routes + handlers (one file per area)
//! - `dto.rs`: request/response DTOs and parsing helpers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router};
use tower::ServiceBuilder;

use crate::config::AppConfig;
use crate::middleware::{self, StaffTokens};

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub async fn build_app(config: &AppConfig) -> anyhow::Result<Router> {
    let services = Arc::new(services::build_services(config).await?);
    Ok(router(services, config))
}

/// Router over already-built services.
pub fn router(services: Arc<services::AppServices>, config: &AppConfig) -> Router {
    let auth_state = middleware::AuthState {
        tokens: Arc::new(StaffTokens {
            admin: config.admin_token.clone(),
            staff: config.staff_token.clone(),
        }),
    };

    // Staff routes: require a bearer token.
    let protected = routes::admin_router().layer(axum::middleware::from_fn_with_state(
        auth_state,
        middleware::auth_middleware,
    ));

    routes::public_router()
        .merge(protected)
        .layer(ServiceBuilder::new().layer(Extension(services)))
}
