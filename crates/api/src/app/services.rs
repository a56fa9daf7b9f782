//! Infrastructure wiring behind the HTTP handlers.
//!
//! One dispatcher over either event store, one in-memory bus, and the read
//! models fed from it by a background worker. With persistent stores the read
//! models are rebuilt from the full event history before serving.

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;

use branchpos_branches::{EntityKind, Ownership};
use branchpos_core::{Aggregate, AggregateId, BranchId, DomainError, TenantId};
use branchpos_events::{Event, EventEnvelope, InMemoryEventBus};
use branchpos_infra::{
    command_dispatcher::{CommandDispatcher, DispatchError},
    event_store::{EventStore, EventStoreError, InMemoryEventStore, PostgresEventStore, StoredEvent},
    inventory::InventoryMovements,
    projections::{ProjectionError, ProjectionSet},
    reconciliation::PaymentReconciler,
    scoped_query::BranchScopedQuery,
    transfers::AccountTransfers,
    workers::WorkerHandle,
};

use crate::config::Config;

pub type Store = Arc<dyn EventStore>;
pub type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;
pub type Dispatcher = CommandDispatcher<Store, Bus>;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("event store unavailable: {0}")]
    EventStore(#[from] EventStoreError),

    #[error("read model rebuild failed: {0}")]
    Rebuild(#[from] ProjectionError),

    #[error("failed to start projection worker: {0}")]
    Worker(#[from] std::io::Error),

    #[error("persistent stores need DATABASE_URL")]
    MissingDatabaseUrl,
}

pub struct AppServices {
    dispatcher: Arc<Dispatcher>,
    projections: ProjectionSet,
    reconciler: PaymentReconciler<Store, Bus>,
    inventory: InventoryMovements<Store, Bus>,
    transfers: AccountTransfers<Store, Bus>,
    _worker: WorkerHandle,
}

pub async fn build_services(config: &Config) -> Result<AppServices, StartupError> {
    let projections = ProjectionSet::in_memory();

    let store: Store = if config.use_persistent_stores {
        let url = config
            .database_url
            .as_deref()
            .ok_or(StartupError::MissingDatabaseUrl)?;
        let pg = PostgresEventStore::connect(url).await?;
        pg.ensure_schema().await?;

        let history = pg.fetch_all().await?;
        let events = history.len();
        projections.rebuild(history.iter().map(StoredEvent::to_envelope).collect())?;
        tracing::info!(events, "read models rebuilt from event history");
        Arc::new(pg)
    } else {
        tracing::info!("using in-memory event store");
        Arc::new(InMemoryEventStore::new())
    };

    let bus: Bus = Arc::new(InMemoryEventBus::new());
    let worker = projections.spawn_worker(bus.clone())?;
    let dispatcher = Arc::new(CommandDispatcher::new(store, bus));
    let reconciler = PaymentReconciler::new(dispatcher.clone(), projections.clone());
    let inventory = InventoryMovements::new(dispatcher.clone());
    let transfers = AccountTransfers::new(dispatcher.clone());

    Ok(AppServices {
        dispatcher,
        projections,
        reconciler,
        inventory,
        transfers,
        _worker: worker,
    })
}

impl AppServices {
    pub fn dispatch<A>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        aggregate_type: &'static str,
        command: A::Command,
        make_aggregate: impl FnOnce(TenantId, AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: Event + Serialize + DeserializeOwned,
    {
        self.dispatcher
            .dispatch(tenant_id, aggregate_id, aggregate_type, command, make_aggregate)
    }

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
        self.dispatcher.load(tenant_id, aggregate_id, make_aggregate)
    }

    pub fn projections(&self) -> &ProjectionSet {
        &self.projections
    }

    pub fn reconciler(&self) -> &PaymentReconciler<Store, Bus> {
        &self.reconciler
    }

    pub fn inventory(&self) -> &InventoryMovements<Store, Bus> {
        &self.inventory
    }

    pub fn transfers(&self) -> &AccountTransfers<Store, Bus> {
        &self.transfers
    }

    /// Visibility filter for a request acting for `branch_id`.
    pub fn scoped(&self, tenant_id: TenantId, branch_id: Option<BranchId>) -> BranchScopedQuery {
        BranchScopedQuery::new(self.projections.branches.policy_for(tenant_id, branch_id))
    }

    /// Ownership stamped on a record `branch_id` creates.
    pub fn ownership_for_new_record(
        &self,
        tenant_id: TenantId,
        branch_id: Option<BranchId>,
        kind: EntityKind,
    ) -> Ownership {
        self.projections
            .branches
            .policy_for(tenant_id, branch_id)
            .ownership_for_new_record(kind)
    }
}
