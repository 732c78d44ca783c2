/// Role granted by a staff bearer token.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StaffRole {
    /// Manages events (create, edit, delete).
    Staff,
    /// Everything staff can do, plus booking overrides and maintenance.
    Admin,
}

impl StaffRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            StaffRole::Staff => "staff",
            StaffRole::Admin => "admin",
        }
    }

    /// Whether this role includes the permissions of `required`.
    pub fn satisfies(&self, required: StaffRole) -> bool {
        match required {
            StaffRole::Staff => true,
            StaffRole::Admin => *self == StaffRole::Admin,
        }
    }
}

/// Authenticated staff member for a request.
///
/// Inserted by the auth middleware; present on every `/admin` route.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct StaffContext {
    role: StaffRole,
}

impl StaffContext {
    pub fn new(role: StaffRole) -> Self {
        Self { role }
    }

    pub fn role(&self) -> StaffRole {
        self.role
    }
}
