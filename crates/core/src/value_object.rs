//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects have **no identity**: two instances with the same attribute
/// values are interchangeable (`Email`, `Customer` snapshots). They are
/// immutable; to "change" one, build a new value.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
