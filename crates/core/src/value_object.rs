//! Value objects: equality by attributes, no identity.

/// Marker for immutable values compared by their attributes
/// (e.g. [`crate::Money`]). To "change" one, build a new value.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
