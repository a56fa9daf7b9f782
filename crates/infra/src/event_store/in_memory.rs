use std::collections::BTreeMap;
use std::sync::RwLock;

use branchpos_core::{AggregateId, ExpectedVersion, TenantId};

use super::r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent, single_stream};

type StreamKey = (TenantId, AggregateId);

/// In-memory append-only event store for tests and dev.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    streams: RwLock<BTreeMap<StreamKey, Vec<StoredEvent>>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> EventStoreError {
    EventStoreError::Backend("event store lock poisoned".to_string())
}

impl EventStore for InMemoryEventStore {
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let Some((tenant_id, aggregate_id, aggregate_type)) = single_stream(&events)? else {
            return Ok(vec![]);
        };

        let mut streams = self.streams.write().map_err(|_| poisoned())?;
        let stream = streams.entry((tenant_id, aggregate_id)).or_default();
        let current = stream.last().map(|e| e.sequence_number).unwrap_or(0);

        if !expected_version.matches(current) {
            return Err(EventStoreError::Concurrency(format!(
                "expected {expected_version:?}, found {current}"
            )));
        }

        if let Some(existing) = stream.first() {
            if existing.aggregate_type != aggregate_type {
                return Err(EventStoreError::AggregateTypeMismatch(format!(
                    "stream aggregate_type is '{}', attempted append with '{}'",
                    existing.aggregate_type, aggregate_type
                )));
            }
        }

        let committed: Vec<StoredEvent> = events
            .into_iter()
            .zip(current + 1..)
            .map(|(e, seq)| e.into_stored(seq))
            .collect();
        stream.extend(committed.iter().cloned());

        Ok(committed)
    }

    fn load_stream(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let streams = self.streams.read().map_err(|_| poisoned())?;
        Ok(streams.get(&(tenant_id, aggregate_id)).cloned().unwrap_or_default())
    }

    fn load_all(&self) -> Result<Vec<StoredEvent>, EventStoreError> {
        let streams = self.streams.read().map_err(|_| poisoned())?;
        Ok(streams.values().flatten().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn event(tenant_id: TenantId, aggregate_id: AggregateId, aggregate_type: &str) -> UncommittedEvent {
        UncommittedEvent {
            event_id: Uuid::now_v7(),
            tenant_id,
            aggregate_id,
            aggregate_type: aggregate_type.to_string(),
            event_type: "test.thing.happened".to_string(),
            event_version: 1,
            occurred_at: Utc::now(),
            payload: serde_json::json!({}),
        }
    }

    #[test]
    fn sequence_numbers_continue_across_appends() {
        let store = InMemoryEventStore::new();
        let (t, a) = (TenantId::new(), AggregateId::new());

        let first = store
            .append(vec![event(t, a, "x"), event(t, a, "x")], ExpectedVersion::Exact(0))
            .unwrap();
        let second = store.append(vec![event(t, a, "x")], ExpectedVersion::Exact(2)).unwrap();

        assert_eq!(first.iter().map(|e| e.sequence_number).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(second[0].sequence_number, 3);
        assert_eq!(store.load_stream(t, a).unwrap().len(), 3);
    }

    #[test]
    fn stale_expected_version_is_rejected() {
        let store = InMemoryEventStore::new();
        let (t, a) = (TenantId::new(), AggregateId::new());
        store.append(vec![event(t, a, "x")], ExpectedVersion::Exact(0)).unwrap();

        let err = store.append(vec![event(t, a, "x")], ExpectedVersion::Exact(0)).unwrap_err();
        assert!(matches!(err, EventStoreError::Concurrency(_)));
    }

    #[test]
    fn streams_are_tenant_scoped() {
        let store = InMemoryEventStore::new();
        let a = AggregateId::new();
        let (t1, t2) = (TenantId::new(), TenantId::new());
        store.append(vec![event(t1, a, "x")], ExpectedVersion::Exact(0)).unwrap();

        assert!(store.load_stream(t2, a).unwrap().is_empty());
    }

    #[test]
    fn mixed_tenant_batch_is_rejected() {
        let store = InMemoryEventStore::new();
        let a = AggregateId::new();
        let batch = vec![event(TenantId::new(), a, "x"), event(TenantId::new(), a, "x")];

        let err = store.append(batch, ExpectedVersion::Any).unwrap_err();
        assert!(matches!(err, EventStoreError::TenantIsolation(_)));
    }

    #[test]
    fn aggregate_type_is_stable_per_stream() {
        let store = InMemoryEventStore::new();
        let (t, a) = (TenantId::new(), AggregateId::new());
        store.append(vec![event(t, a, "x")], ExpectedVersion::Any).unwrap();

        let err = store.append(vec![event(t, a, "y")], ExpectedVersion::Any).unwrap_err();
        assert!(matches!(err, EventStoreError::AggregateTypeMismatch(_)));
    }

    #[test]
    fn load_all_returns_every_stream_in_order() {
        let store = InMemoryEventStore::new();
        let t = TenantId::new();
        let (a, b) = (AggregateId::new(), AggregateId::new());
        store.append(vec![event(t, a, "x"), event(t, a, "x")], ExpectedVersion::Any).unwrap();
        store.append(vec![event(t, b, "y")], ExpectedVersion::Any).unwrap();

        let all = store.load_all().unwrap();
        assert_eq!(all.len(), 3);
        let a_seqs: Vec<u64> = all
            .iter()
            .filter(|e| e.aggregate_id == a)
            .map(|e| e.sequence_number)
            .collect();
        assert_eq!(a_seqs, vec![1, 2]);
    }
}
