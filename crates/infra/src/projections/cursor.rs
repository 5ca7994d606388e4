use std::collections::HashMap;
use std::sync::RwLock;

use ezbooks_core::{AggregateId, TenantId};

use super::ProjectionError;

/// Last applied sequence number per (tenant, stream).
///
/// Makes projections idempotent under at-least-once delivery: an envelope at
/// or below the cursor is a redelivery and is skipped.
#[derive(Debug, Default)]
pub struct StreamCursors {
    inner: RwLock<HashMap<(TenantId, AggregateId), u64>>,
}

impl StreamCursors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, tenant_id: TenantId, aggregate_id: AggregateId) -> u64 {
        self.inner
            .read()
            .ok()
            .and_then(|c| c.get(&(tenant_id, aggregate_id)).copied())
            .unwrap_or(0)
    }

    /// `Ok(true)` when `seq` is the next event to apply, `Ok(false)` for a
    /// redelivery. Anything else is a gap; a fresh cursor only takes `1`.
    pub fn admit(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        seq: u64,
    ) -> Result<bool, ProjectionError> {
        let last = self.get(tenant_id, aggregate_id);

        if seq == 0 {
            return Err(ProjectionError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            return Ok(false);
        }
        if seq != last + 1 {
            return Err(ProjectionError::NonMonotonicSequence { last, found: seq });
        }
        Ok(true)
    }

    pub fn advance(&self, tenant_id: TenantId, aggregate_id: AggregateId, seq: u64) {
        if let Ok(mut cursors) = self.inner.write() {
            cursors.insert((tenant_id, aggregate_id), seq);
        }
    }

    pub fn clear_tenant(&self, tenant_id: TenantId) {
        if let Ok(mut cursors) = self.inner.write() {
            cursors.retain(|(t, _), _| *t != tenant_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redelivery_is_skipped_and_gaps_are_errors() {
        let c = StreamCursors::new();
        let (t, a) = (TenantId::new(), AggregateId::new());

        assert!(c.admit(t, a, 1).unwrap());
        c.advance(t, a, 1);
        assert!(!c.admit(t, a, 1).unwrap());
        assert!(c.admit(t, a, 2).unwrap());
        assert!(matches!(
            c.admit(t, a, 4),
            Err(ProjectionError::NonMonotonicSequence { last: 1, found: 4 })
        ));
        assert!(c.admit(t, a, 0).is_err());
    }

    #[test]
    fn fresh_stream_must_start_at_one() {
        let c = StreamCursors::new();
        let (t, a) = (TenantId::new(), AggregateId::new());

        assert!(matches!(
            c.admit(t, a, 2),
            Err(ProjectionError::NonMonotonicSequence { last: 0, found: 2 })
        ));
        assert_eq!(c.get(t, a), 0);
        assert!(c.admit(t, a, 1).unwrap());
    }
}
