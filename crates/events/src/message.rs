use chrono::{DateTime, Utc};

/// A domain-agnostic outbound message.
///
/// Messages are:
/// - **immutable** (treat them as facts about committed changes)
/// - **versioned** (schema evolution for downstream consumers)
pub trait Message: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable topic identifier (e.g. "booking.created").
    fn topic(&self) -> &'static str;

    /// Schema version for this message type.
    fn version(&self) -> u32;

    /// When the underlying change happened (business time).
    fn occurred_at(&self) -> DateTime<Utc>;
}
