//! `ezbooks-core` — pure domain building blocks shared by every bookkeeping crate.

pub mod aggregate;
pub mod entity;
pub mod error;
pub mod id;
pub mod money;
pub mod value_object;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{AggregateId, EntryId, ProposalId, TenantId, UserId};
pub use money::{Currency, Money};
pub use value_object::ValueObject;
