//! Per-stream projection cursors.
//!
//! A cursor is the last sequence number a projection applied for one
//! `(tenant, aggregate)` stream. Replays at or below the cursor are dropped,
//! which makes projections safe under at-least-once delivery.

use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::Value as JsonValue;

use branchpos_core::{AggregateId, TenantId};
use branchpos_events::EventEnvelope;

use super::ProjectionError;

type StreamKey = (TenantId, AggregateId);

#[derive(Debug, Default)]
pub struct StreamCursors {
    inner: RwLock<HashMap<StreamKey, u64>>,
}

impl StreamCursors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self, tenant_id: TenantId, aggregate_id: AggregateId) -> u64 {
        self.inner
            .read()
            .ok()
            .and_then(|m| m.get(&(tenant_id, aggregate_id)).copied())
            .unwrap_or(0)
    }

    /// Decide whether `envelope` should be applied.
    ///
    /// `Ok(false)` for a duplicate. A gap is an error, except for the first
    /// envelope a fresh cursor sees (the projection may have started late).
    pub fn admit(&self, envelope: &EventEnvelope<JsonValue>) -> Result<bool, ProjectionError> {
        let seq = envelope.sequence_number();
        let last = self.position(envelope.tenant_id(), envelope.aggregate_id());

        if seq == 0 {
            return Err(ProjectionError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            return Ok(false);
        }
        if last != 0 && seq != last + 1 {
            return Err(ProjectionError::NonMonotonicSequence { last, found: seq });
        }
        Ok(true)
    }

    pub fn advance(&self, envelope: &EventEnvelope<JsonValue>) {
        if let Ok(mut m) = self.inner.write() {
            m.insert(
                (envelope.tenant_id(), envelope.aggregate_id()),
                envelope.sequence_number(),
            );
        }
    }

    pub fn clear_tenant(&self, tenant_id: TenantId) {
        if let Ok(mut m) = self.inner.write() {
            m.retain(|(t, _), _| *t != tenant_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn env(tenant_id: TenantId, aggregate_id: AggregateId, seq: u64) -> EventEnvelope<JsonValue> {
        EventEnvelope::new(Uuid::now_v7(), tenant_id, aggregate_id, "x", seq, JsonValue::Null)
    }

    #[test]
    fn duplicates_are_skipped_and_gaps_rejected() {
        let cursors = StreamCursors::new();
        let (t, a) = (TenantId::new(), AggregateId::new());

        assert!(cursors.admit(&env(t, a, 1)).unwrap());
        cursors.advance(&env(t, a, 1));

        assert!(!cursors.admit(&env(t, a, 1)).unwrap());
        assert!(cursors.admit(&env(t, a, 2)).unwrap());
        assert!(matches!(
            cursors.admit(&env(t, a, 4)),
            Err(ProjectionError::NonMonotonicSequence { last: 1, found: 4 })
        ));
    }

    #[test]
    fn clearing_a_tenant_resets_its_streams_only() {
        let cursors = StreamCursors::new();
        let a = AggregateId::new();
        let (t1, t2) = (TenantId::new(), TenantId::new());
        cursors.advance(&env(t1, a, 3));
        cursors.advance(&env(t2, a, 5));

        cursors.clear_tenant(t1);

        assert_eq!(cursors.position(t1, a), 0);
        assert_eq!(cursors.position(t2, a), 5);
    }
}
