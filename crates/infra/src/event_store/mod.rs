//! Append-only event store boundary.
//!
//! Streams are keyed by `(tenant_id, aggregate_id)`; sequence numbers start
//! at 1 and have no gaps.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};
