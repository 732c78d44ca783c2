use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};

use crate::context::{StaffContext, StaffRole};

/// Static bearer tokens, one per role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaffTokens {
    pub admin: String,
    pub staff: String,
}

impl StaffTokens {
    pub fn role_for(&self, token: &str) -> Option<StaffRole> {
        if token == self.admin {
            Some(StaffRole::Admin)
        } else if token == self.staff {
            Some(StaffRole::Staff)
        } else {
            None
        }
    }
}

#[derive(Clone)]
pub struct AuthState {
    pub tokens: Arc<StaffTokens>,
}

pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = extract_bearer(req.headers())?;

    let role = state.tokens.role_for(token).ok_or(StatusCode::UNAUTHORIZED)?;

    req.extensions_mut().insert(StaffContext::new(role));

    Ok(next.run(req).await)
}

fn extract_bearer(headers: &HeaderMap) -> Result<&str, StatusCode> {
    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let header = header.to_str().map_err(|_| StatusCode::UNAUTHORIZED)?;

    let header = header
        .strip_prefix("Bearer ")
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let token = header.trim();
    if token.is_empty() {
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(token)
}
