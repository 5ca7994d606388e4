//! Entities: objects with identity that live inside an aggregate boundary.

/// An object distinguished by its id rather than its attributes
/// (e.g. a proposed entry inside a transaction).
pub trait Entity {
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    fn id(&self) -> &Self::Id;
}
