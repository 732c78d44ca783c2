//! Versioned records and optimistic concurrency expectations.

use crate::entity::Entity;
use crate::error::{DomainError, DomainResult};

/// A persisted entity carrying a monotonically increasing version.
///
/// Every committed write bumps the version by one. A record that has never been
/// stored has version `0`.
pub trait Record: Entity {
    fn version(&self) -> u64;
}

/// Optimistic concurrency expectation for a single record.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Skip version checking (administrative repair, migrations).
    Any,
    /// Require the record to be at an exact version. `Exact(0)` means "must not exist yet".
    Exact(u64),
}

impl ExpectedVersion {
    /// Expectation for a record that must not exist yet.
    pub const fn absent() -> Self {
        ExpectedVersion::Exact(0)
    }

    /// Expectation derived from a record read earlier in the same operation.
    pub fn of<R: Record>(record: &R) -> Self {
        ExpectedVersion::Exact(record.version())
    }

    pub fn matches(self, actual: u64) -> bool {
        match self {
            ExpectedVersion::Any => true,
            ExpectedVersion::Exact(v) => v == actual,
        }
    }

    pub fn check(self, actual: u64) -> DomainResult<()> {
        if self.matches(actual) {
            Ok(())
        } else {
            Err(DomainError::conflict(format!(
                "optimistic concurrency check failed (expected: {self:?}, actual: {actual})"
            )))
        }
    }
}
