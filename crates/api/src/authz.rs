//! Role checks for staff routes.
//!
//! Authentication (which token, which role) happens in the middleware; handlers
//! call [`require_role`] before touching the engine.

use axum::http::StatusCode;

use crate::app::errors::json_error;
use crate::context::{StaffContext, StaffRole};

pub fn require_role(staff: &StaffContext, required: StaffRole) -> Result<(), axum::response::Response> {
    if staff.role().satisfies(required) {
        Ok(())
    } else {
        Err(json_error(
            StatusCode::FORBIDDEN,
            "forbidden",
            format!(
                "role '{}' may not perform this action; '{}' required",
                staff.role().as_str(),
                required.as_str()
            ),
        ))
    }
}
