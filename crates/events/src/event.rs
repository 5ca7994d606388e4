use chrono::{DateTime, Utc};

/// A recorded fact about a bookkeeping aggregate.
///
/// Events are immutable, append-only and carry a schema version so stored
/// payloads can evolve.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable type name, e.g. `"accounting.transaction.entry_approved"`.
    fn event_type(&self) -> &'static str;

    /// Schema version for this event type.
    fn version(&self) -> u32;

    /// Business time of the fact.
    fn occurred_at(&self) -> DateTime<Utc>;
}
