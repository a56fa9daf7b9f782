//! Command execution pipeline for event-sourced aggregates.
//!
//! ```text
//! command
//!   → load stream (tenant-scoped) → validate stream → rehydrate
//!   → handle (pure decision) → append (optimistic) → publish
//! ```
//!
//! Publication happens only after a successful append. If publishing fails the
//! events are already durable, so delivery is at-least-once and every
//! consumer must be idempotent.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use branchpos_core::{Aggregate, AggregateId, DomainError, ExpectedVersion, TenantId};
use branchpos_events::{Event, EventBus, EventEnvelope};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

#[derive(Debug, Error)]
pub enum DispatchError {
    /// Stale aggregate version, or a domain-level conflict (duplicate id, ...).
    #[error("conflict: {0}")]
    Concurrency(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("not found")]
    NotFound,

    /// Historical payloads no longer deserialize into the aggregate's events.
    #[error("failed to deserialize stored event: {0}")]
    Deserialize(String),

    #[error(transparent)]
    Store(EventStoreError),

    /// Appended but not published; retrying may duplicate deliveries.
    #[error("event publication failed: {0}")]
    Publish(String),
}

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::Concurrency(msg) => DispatchError::Concurrency(msg),
            EventStoreError::TenantIsolation(msg) => DispatchError::TenantIsolation(msg),
            other => DispatchError::Store(other),
        }
    }
}

impl From<DomainError> for DispatchError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => DispatchError::Validation(msg),
            DomainError::InvariantViolation(msg) => DispatchError::InvariantViolation(msg),
            DomainError::Conflict(msg) => DispatchError::Concurrency(msg),
            DomainError::Unauthorized => DispatchError::Unauthorized,
            DomainError::NotFound => DispatchError::NotFound,
            DomainError::InvalidId(msg) => DispatchError::Validation(msg),
        }
    }
}

/// Runs commands against aggregates rebuilt from the event store.
///
/// Generic over the store and bus so the same pipeline runs on in-memory
/// backends in tests and on Postgres in production.
#[derive(Debug)]
pub struct CommandDispatcher<S, B> {
    store: S,
    bus: B,
}

impl<S, B> CommandDispatcher<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self { store, bus }
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S, B> CommandDispatcher<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Handle `command` on the aggregate stored under `aggregate_id` and
    /// return the committed events (empty when the command was a no-op).
    ///
    /// `make_aggregate` builds the empty instance history is replayed into.
    pub fn dispatch<A>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        command: A::Command,
        make_aggregate: impl FnOnce(TenantId, AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: Event + Serialize + DeserializeOwned,
    {
        let aggregate_type = aggregate_type.into();
        let (aggregate, version) = self.rehydrate(tenant_id, aggregate_id, make_aggregate)?;

        let decided = aggregate.handle(&command).map_err(|err| {
            tracing::debug!(
                tenant_id = %tenant_id,
                aggregate_id = %aggregate_id,
                aggregate_type = %aggregate_type,
                error = %err,
                "command rejected"
            );
            DispatchError::from(err)
        })?;
        if decided.is_empty() {
            return Ok(vec![]);
        }

        let uncommitted = decided
            .iter()
            .map(|ev| {
                UncommittedEvent::from_typed(
                    tenant_id,
                    aggregate_id,
                    aggregate_type.clone(),
                    Uuid::now_v7(),
                    ev,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        let committed = self.store.append(uncommitted, ExpectedVersion::Exact(version))?;

        for stored in &committed {
            self.bus
                .publish(stored.to_envelope())
                .map_err(|e| DispatchError::Publish(format!("{e:?}")))?;
        }

        tracing::debug!(
            tenant_id = %tenant_id,
            aggregate_id = %aggregate_id,
            aggregate_type = %aggregate_type,
            events = committed.len(),
            "command committed"
        );
        Ok(committed)
    }

    /// Current state of an aggregate, without handling a command.
    ///
    /// Returns the empty instance when the stream does not exist; callers
    /// check their aggregate's own "created" state.
    pub fn load<A>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        make_aggregate: impl FnOnce(TenantId, AggregateId) -> A,
    ) -> Result<A, DispatchError>
    where
        A: Aggregate,
        A::Event: DeserializeOwned,
    {
        self.rehydrate(tenant_id, aggregate_id, make_aggregate)
            .map(|(aggregate, _)| aggregate)
    }

    fn rehydrate<A>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        make_aggregate: impl FnOnce(TenantId, AggregateId) -> A,
    ) -> Result<(A, u64), DispatchError>
    where
        A: Aggregate,
        A::Event: DeserializeOwned,
    {
        let history = self.store.load_stream(tenant_id, aggregate_id)?;
        let version = validate_loaded_stream(tenant_id, aggregate_id, &history)?;

        let mut aggregate = make_aggregate(tenant_id, aggregate_id);
        for stored in history {
            let ev: A::Event = serde_json::from_value(stored.payload)
                .map_err(|e| DispatchError::Deserialize(e.to_string()))?;
            aggregate.apply(&ev);
        }

        Ok((aggregate, version))
    }
}

/// Check a loaded stream belongs to the requested tenant + aggregate and is
/// strictly increasing from 1. Returns the stream version.
fn validate_loaded_stream(
    tenant_id: TenantId,
    aggregate_id: AggregateId,
    stream: &[StoredEvent],
) -> Result<u64, DispatchError> {
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.tenant_id != tenant_id {
            return Err(DispatchError::TenantIsolation(format!(
                "loaded stream contains wrong tenant_id at index {idx}"
            )));
        }
        if e.aggregate_id != aggregate_id {
            return Err(DispatchError::TenantIsolation(format!(
                "loaded stream contains wrong aggregate_id at index {idx}"
            )));
        }
        if e.sequence_number <= last {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(format!(
                "non-monotonic sequence_number in loaded stream (last={last}, found={})",
                e.sequence_number
            ))));
        }
        last = e.sequence_number;
    }
    Ok(last)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use branchpos_branches::{Branch, BranchCommand, CreateBranch, DeactivateBranch, IsolationMode};
    use branchpos_core::{AggregateRoot, BranchId};
    use branchpos_events::InMemoryEventBus;
    use chrono::Utc;

    use crate::event_store::InMemoryEventStore;

    type Dispatcher = CommandDispatcher<Arc<InMemoryEventStore>, Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>>;

    fn dispatcher() -> Dispatcher {
        CommandDispatcher::new(Arc::new(InMemoryEventStore::new()), Arc::new(InMemoryEventBus::new()))
    }

    fn create(tenant_id: TenantId, branch_id: BranchId) -> BranchCommand {
        BranchCommand::CreateBranch(CreateBranch {
            tenant_id,
            branch_id,
            name: "Kariakoo".to_string(),
            code: "kko".to_string(),
            mode: IsolationMode::Isolated,
            sharing: None,
            occurred_at: Utc::now(),
        })
    }

    fn dispatch(d: &Dispatcher, tenant_id: TenantId, branch_id: BranchId, cmd: BranchCommand) -> Result<Vec<StoredEvent>, DispatchError> {
        d.dispatch::<Branch>(tenant_id, AggregateId::from(branch_id), "branches.branch", cmd, |_, _| {
            Branch::empty(branch_id)
        })
    }

    #[test]
    fn committed_events_are_published_after_append() {
        let d = dispatcher();
        let sub = d.bus.subscribe();
        let (t, b) = (TenantId::new(), BranchId::new());

        let committed = dispatch(&d, t, b, create(t, b)).unwrap();

        assert_eq!(committed.len(), 1);
        let env = sub.try_recv().unwrap();
        assert_eq!(env.aggregate_type(), "branches.branch");
        assert_eq!(env.sequence_number(), 1);
    }

    #[test]
    fn domain_errors_are_mapped() {
        let d = dispatcher();
        let (t, b) = (TenantId::new(), BranchId::new());

        let err = dispatch(
            &d,
            t,
            b,
            BranchCommand::DeactivateBranch(DeactivateBranch {
                tenant_id: t,
                branch_id: b,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap_err();
        assert!(matches!(err, DispatchError::NotFound));

        dispatch(&d, t, b, create(t, b)).unwrap();
        let err = dispatch(&d, t, b, create(t, b)).unwrap_err();
        assert!(matches!(err, DispatchError::Concurrency(_)));
    }

    #[test]
    fn load_rehydrates_current_state() {
        let d = dispatcher();
        let (t, b) = (TenantId::new(), BranchId::new());
        dispatch(&d, t, b, create(t, b)).unwrap();

        let branch: Branch = d.load(t, AggregateId::from(b), |_, _| Branch::empty(b)).unwrap();
        assert_eq!(branch.code(), "KKO");
        assert_eq!(branch.version(), 1);
    }

    #[test]
    fn other_tenants_see_an_empty_stream() {
        let d = dispatcher();
        let (t, b) = (TenantId::new(), BranchId::new());
        dispatch(&d, t, b, create(t, b)).unwrap();

        let other = TenantId::new();
        let branch: Branch = d.load(other, AggregateId::from(b), |_, _| Branch::empty(b)).unwrap();
        assert_eq!(branch.version(), 0);
    }
}
