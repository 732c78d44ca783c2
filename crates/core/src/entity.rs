//! Identity shared by stored records.

/// A record that keeps its identity while its fields change.
pub trait Entity {
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    fn id(&self) -> &Self::Id;
}
