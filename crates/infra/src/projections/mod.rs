//! Projections: disposable, tenant-isolated read models built from events.
//!
//! Every projection ignores envelopes of other aggregate types, checks that
//! the payload belongs to the envelope's tenant and stream, and tracks a
//! per-stream cursor so replays are harmless.

pub mod branches;
pub mod catalog;
pub mod cursor;
pub mod finance;
pub mod inventory;
pub mod parties;
pub mod purchasing;

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;

use branchpos_core::{AggregateId, TenantId};
use branchpos_events::{EventBus, EventEnvelope};

use crate::read_model::InMemoryTenantStore;
use crate::workers::{ProjectionWorker, WorkerHandle};

pub use branches::{BranchDirectoryProjection, BranchReadModel};
pub use catalog::{ProductCatalogProjection, ProductReadModel, VariantStock};
pub use cursor::StreamCursors;
pub use finance::{AccountLedgerProjection, AccountReadModel};
pub use inventory::{StockTransferReadModel, StockTransfersProjection, TransferStats};
pub use parties::{PartyDirectoryProjection, PartyReadModel};
pub use purchasing::{PurchaseOrderReadModel, PurchaseOrdersProjection};

#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("failed to deserialize {aggregate_type} event: {message}")]
    Deserialize {
        aggregate_type: &'static str,
        message: String,
    },

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },

    #[error("read model for {0} is missing")]
    MissingReadModel(AggregateId),
}

/// A read model fed by the envelopes of one aggregate type.
pub trait Projection: Send + Sync {
    fn aggregate_type(&self) -> &'static str;

    fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError>;

    /// Drop all read-model rows and cursors of a tenant.
    fn clear_tenant(&self, tenant_id: TenantId);
}

/// Clear every tenant present in `envelopes`, then replay them in stream order.
pub fn rebuild_from_scratch<P>(
    projection: &P,
    envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
) -> Result<(), ProjectionError>
where
    P: Projection + ?Sized,
{
    let mut envs: Vec<_> = envelopes
        .into_iter()
        .filter(|e| e.aggregate_type() == projection.aggregate_type())
        .collect();

    let mut tenants: Vec<TenantId> = envs.iter().map(|e| e.tenant_id()).collect();
    tenants.sort();
    tenants.dedup();
    for t in tenants {
        projection.clear_tenant(t);
    }

    envs.sort_by_key(|e| (e.tenant_id(), e.aggregate_id(), e.sequence_number()));
    for env in &envs {
        projection.apply_envelope(env)?;
    }
    Ok(())
}

pub(crate) fn decode<E: DeserializeOwned>(
    aggregate_type: &'static str,
    envelope: &EventEnvelope<JsonValue>,
) -> Result<E, ProjectionError> {
    serde_json::from_value(envelope.payload().clone()).map_err(|e| ProjectionError::Deserialize {
        aggregate_type,
        message: e.to_string(),
    })
}

/// The payload must describe the same tenant and stream as its envelope.
pub(crate) fn ensure_same_stream(
    envelope: &EventEnvelope<JsonValue>,
    tenant_id: TenantId,
    aggregate_id: AggregateId,
) -> Result<(), ProjectionError> {
    if tenant_id != envelope.tenant_id() {
        return Err(ProjectionError::TenantIsolation(
            "event tenant_id does not match envelope tenant_id".to_string(),
        ));
    }
    if aggregate_id != envelope.aggregate_id() {
        return Err(ProjectionError::TenantIsolation(
            "event aggregate id does not match envelope aggregate_id".to_string(),
        ));
    }
    Ok(())
}

type Store<K, V> = Arc<InMemoryTenantStore<K, V>>;

/// All read models of the application, on in-memory stores.
#[derive(Debug, Clone)]
pub struct ProjectionSet {
    pub branches: Arc<BranchDirectoryProjection<Store<branchpos_core::BranchId, BranchReadModel>>>,
    pub products: Arc<ProductCatalogProjection<Store<branchpos_catalog::ProductId, ProductReadModel>>>,
    pub parties: Arc<PartyDirectoryProjection<Store<branchpos_parties::PartyId, PartyReadModel>>>,
    pub accounts: Arc<AccountLedgerProjection<Store<branchpos_finance::AccountId, AccountReadModel>>>,
    pub purchase_orders:
        Arc<PurchaseOrdersProjection<Store<branchpos_purchasing::PurchaseOrderId, PurchaseOrderReadModel>>>,
    pub stock_transfers:
        Arc<StockTransfersProjection<Store<branchpos_inventory::StockTransferId, StockTransferReadModel>>>,
}

impl Default for ProjectionSet {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl ProjectionSet {
    pub fn in_memory() -> Self {
        Self {
            branches: Arc::new(BranchDirectoryProjection::new(Arc::new(InMemoryTenantStore::new()))),
            products: Arc::new(ProductCatalogProjection::new(Arc::new(InMemoryTenantStore::new()))),
            parties: Arc::new(PartyDirectoryProjection::new(Arc::new(InMemoryTenantStore::new()))),
            accounts: Arc::new(AccountLedgerProjection::new(Arc::new(InMemoryTenantStore::new()))),
            purchase_orders: Arc::new(PurchaseOrdersProjection::new(Arc::new(InMemoryTenantStore::new()))),
            stock_transfers: Arc::new(StockTransfersProjection::new(Arc::new(InMemoryTenantStore::new()))),
        }
    }

    fn all(&self) -> [&dyn Projection; 6] {
        [
            &*self.branches,
            &*self.products,
            &*self.parties,
            &*self.accounts,
            &*self.purchase_orders,
            &*self.stock_transfers,
        ]
    }

    /// Route an envelope to the projection that owns its aggregate type.
    pub fn apply(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        match self
            .all()
            .into_iter()
            .find(|p| p.aggregate_type() == envelope.aggregate_type())
        {
            Some(projection) => projection.apply_envelope(envelope),
            None => Ok(()),
        }
    }

    /// Rebuild every read model from a full event history.
    pub fn rebuild(&self, envelopes: Vec<EventEnvelope<JsonValue>>) -> Result<(), ProjectionError> {
        for projection in self.all() {
            rebuild_from_scratch(projection, envelopes.iter().cloned())?;
        }
        Ok(())
    }

    /// Feed every envelope published on `bus` into the read models, on a
    /// dedicated thread.
    ///
    /// The subscription is taken before this returns, so nothing published
    /// afterwards is missed.
    pub fn spawn_worker<B>(&self, bus: B) -> std::io::Result<WorkerHandle>
    where
        B: EventBus<EventEnvelope<JsonValue>> + 'static,
    {
        let projections = self.clone();
        ProjectionWorker::spawn("projections", bus, move |env| projections.apply(&env))
    }
}
