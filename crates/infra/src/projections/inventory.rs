use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;

use branchpos_branches::Ownership;
use branchpos_core::{BranchId, TenantId, UserId};
use branchpos_events::EventEnvelope;
use branchpos_inventory::{StockLocation, StockTransferEvent, StockTransferId, StockTransferStatus};

use crate::read_model::TenantStore;

use super::{Projection, ProjectionError, StreamCursors, decode, ensure_same_stream};

pub const AGGREGATE_TYPE: &str = "inventory.stock_transfer";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StockTransferReadModel {
    pub transfer_id: StockTransferId,
    pub from_branch: BranchId,
    pub to_branch: BranchId,
    pub source: StockLocation,
    pub destination: StockLocation,
    pub quantity: i64,
    pub status: StockTransferStatus,
    pub notes: Option<String>,
    pub requested_by: Option<UserId>,
    pub approved_by: Option<UserId>,
    pub completed_by: Option<UserId>,
    pub rejection_reason: Option<String>,
    pub cancellation_reason: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub dispatched_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl StockTransferReadModel {
    pub fn ownership(&self) -> Ownership {
        Ownership::owned_by(self.from_branch)
    }

    pub fn involves(&self, branch_id: BranchId) -> bool {
        self.from_branch == branch_id || self.to_branch == branch_id
    }
}

/// Transfer counts by status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransferStats {
    pub total: usize,
    pub pending: usize,
    pub approved: usize,
    pub in_transit: usize,
    pub completed: usize,
    pub rejected: usize,
    pub cancelled: usize,
}

impl TransferStats {
    fn count(&mut self, status: StockTransferStatus) {
        self.total += 1;
        let slot = match status {
            StockTransferStatus::Pending => &mut self.pending,
            StockTransferStatus::Approved => &mut self.approved,
            StockTransferStatus::InTransit => &mut self.in_transit,
            StockTransferStatus::Completed => &mut self.completed,
            StockTransferStatus::Rejected => &mut self.rejected,
            StockTransferStatus::Cancelled => &mut self.cancelled,
        };
        *slot += 1;
    }
}

#[derive(Debug)]
pub struct StockTransfersProjection<S>
where
    S: TenantStore<StockTransferId, StockTransferReadModel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> StockTransfersProjection<S>
where
    S: TenantStore<StockTransferId, StockTransferReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, tenant_id: TenantId, transfer_id: &StockTransferId) -> Option<StockTransferReadModel> {
        self.store.get(tenant_id, transfer_id)
    }

    /// Newest first.
    pub fn list(&self, tenant_id: TenantId) -> Vec<StockTransferReadModel> {
        let mut rows = self.store.list(tenant_id);
        rows.sort_by(|a, b| b.requested_at.cmp(&a.requested_at));
        rows
    }

    /// Open transfers already claiming stock from `source`.
    pub fn open_from(&self, tenant_id: TenantId, source: StockLocation) -> Vec<StockTransferReadModel> {
        self.store
            .list(tenant_id)
            .into_iter()
            .filter(|rm| rm.source == source && rm.status.is_open())
            .collect()
    }

    pub fn stats(&self, rows: &[StockTransferReadModel]) -> TransferStats {
        let mut stats = TransferStats::default();
        for rm in rows {
            stats.count(rm.status);
        }
        stats
    }

    fn existing(
        &self,
        tenant_id: TenantId,
        transfer_id: StockTransferId,
    ) -> Result<StockTransferReadModel, ProjectionError> {
        self.store
            .get(tenant_id, &transfer_id)
            .ok_or(ProjectionError::MissingReadModel(transfer_id.0))
    }
}

impl<S> Projection for StockTransfersProjection<S>
where
    S: TenantStore<StockTransferId, StockTransferReadModel>,
{
    fn aggregate_type(&self) -> &'static str {
        AGGREGATE_TYPE
    }

    fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != AGGREGATE_TYPE || !self.cursors.admit(envelope)? {
            return Ok(());
        }

        let event: StockTransferEvent = decode(AGGREGATE_TYPE, envelope)?;
        let (event_tenant, transfer_id) = match &event {
            StockTransferEvent::TransferRequested(e) => (e.tenant_id, e.transfer_id),
            StockTransferEvent::TransferApproved(e) => (e.tenant_id, e.transfer_id),
            StockTransferEvent::TransferRejected(e) => (e.tenant_id, e.transfer_id),
            StockTransferEvent::TransferDispatched(e) => (e.tenant_id, e.transfer_id),
            StockTransferEvent::TransferCompleted(e) => (e.tenant_id, e.transfer_id),
            StockTransferEvent::TransferCancelled(e) => (e.tenant_id, e.transfer_id),
        };
        ensure_same_stream(envelope, event_tenant, transfer_id.0)?;
        let tenant_id = envelope.tenant_id();

        let rm = match event {
            StockTransferEvent::TransferRequested(e) => StockTransferReadModel {
                transfer_id: e.transfer_id,
                from_branch: e.from_branch,
                to_branch: e.to_branch,
                source: e.source,
                destination: e.destination,
                quantity: e.quantity,
                status: StockTransferStatus::Pending,
                notes: e.notes,
                requested_by: e.requested_by,
                approved_by: None,
                completed_by: None,
                rejection_reason: None,
                cancellation_reason: None,
                requested_at: e.occurred_at,
                approved_at: None,
                dispatched_at: None,
                completed_at: None,
                updated_at: e.occurred_at,
            },
            StockTransferEvent::TransferApproved(e) => StockTransferReadModel {
                status: StockTransferStatus::Approved,
                approved_by: e.approved_by,
                approved_at: Some(e.occurred_at),
                updated_at: e.occurred_at,
                ..self.existing(tenant_id, transfer_id)?
            },
            StockTransferEvent::TransferRejected(e) => StockTransferReadModel {
                status: StockTransferStatus::Rejected,
                rejection_reason: Some(e.reason),
                updated_at: e.occurred_at,
                ..self.existing(tenant_id, transfer_id)?
            },
            StockTransferEvent::TransferDispatched(e) => StockTransferReadModel {
                status: StockTransferStatus::InTransit,
                dispatched_at: Some(e.occurred_at),
                updated_at: e.occurred_at,
                ..self.existing(tenant_id, transfer_id)?
            },
            StockTransferEvent::TransferCompleted(e) => StockTransferReadModel {
                status: StockTransferStatus::Completed,
                completed_by: e.completed_by,
                completed_at: Some(e.occurred_at),
                updated_at: e.occurred_at,
                ..self.existing(tenant_id, transfer_id)?
            },
            StockTransferEvent::TransferCancelled(e) => StockTransferReadModel {
                status: StockTransferStatus::Cancelled,
                cancellation_reason: e.reason,
                updated_at: e.occurred_at,
                ..self.existing(tenant_id, transfer_id)?
            },
        };
        self.store.upsert(tenant_id, transfer_id, rm);

        self.cursors.advance(envelope);
        Ok(())
    }

    fn clear_tenant(&self, tenant_id: TenantId) {
        self.store.clear_tenant(tenant_id);
        self.cursors.clear_tenant(tenant_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use branchpos_catalog::{ProductId, VariantId};
    use branchpos_core::AggregateId;
    use branchpos_inventory::{TransferApproved, TransferRejected, TransferRequested};
    use uuid::Uuid;

    use crate::read_model::InMemoryTenantStore;

    type Transfers = StockTransfersProjection<Arc<InMemoryTenantStore<StockTransferId, StockTransferReadModel>>>;

    fn location() -> StockLocation {
        StockLocation {
            product_id: ProductId::new(AggregateId::new()),
            variant_id: VariantId::new(AggregateId::new()),
        }
    }

    fn envelope(t: TenantId, id: StockTransferId, seq: u64, event: StockTransferEvent) -> EventEnvelope<JsonValue> {
        EventEnvelope::new(Uuid::now_v7(), t, id.0, AGGREGATE_TYPE, seq, serde_json::to_value(event).unwrap())
    }

    fn requested(t: TenantId, id: StockTransferId, from: BranchId, source: StockLocation) -> StockTransferEvent {
        StockTransferEvent::TransferRequested(TransferRequested {
            tenant_id: t,
            transfer_id: id,
            from_branch: from,
            to_branch: BranchId::new(),
            source,
            destination: location(),
            quantity: 3,
            notes: None,
            requested_by: None,
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn lifecycle_timestamps_and_open_claims() {
        let transfers = Transfers::new(Arc::new(InMemoryTenantStore::new()));
        let (t, from, source) = (TenantId::new(), BranchId::new(), location());
        let (a, b) = (
            StockTransferId::new(AggregateId::new()),
            StockTransferId::new(AggregateId::new()),
        );

        for (id, seq, event) in [
            (a, 1, requested(t, a, from, source)),
            (b, 1, requested(t, b, from, source)),
            (
                a,
                2,
                StockTransferEvent::TransferApproved(TransferApproved {
                    tenant_id: t,
                    transfer_id: a,
                    approved_by: None,
                    occurred_at: Utc::now(),
                }),
            ),
            (
                b,
                2,
                StockTransferEvent::TransferRejected(TransferRejected {
                    tenant_id: t,
                    transfer_id: b,
                    reason: "no space".to_string(),
                    occurred_at: Utc::now(),
                }),
            ),
        ] {
            transfers.apply_envelope(&envelope(t, id, seq, event)).unwrap();
        }

        let approved = transfers.get(t, &a).unwrap();
        assert_eq!(approved.status, StockTransferStatus::Approved);
        assert!(approved.approved_at.is_some());
        assert!(approved.involves(from));
        assert_eq!(approved.ownership(), Ownership::owned_by(from));

        let open = transfers.open_from(t, source);
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].transfer_id, a);

        let stats = transfers.stats(&transfers.list(t));
        assert_eq!((stats.total, stats.approved, stats.rejected), (2, 1, 1));
        assert!(transfers.list(TenantId::new()).is_empty());
    }

    #[test]
    fn payload_from_another_tenant_is_refused() {
        let transfers = Transfers::new(Arc::new(InMemoryTenantStore::new()));
        let (t, id) = (TenantId::new(), StockTransferId::new(AggregateId::new()));
        let foreign = requested(TenantId::new(), id, BranchId::new(), location());

        let err = transfers.apply_envelope(&envelope(t, id, 1, foreign)).unwrap_err();
        assert!(matches!(err, ProjectionError::TenantIsolation(_)));
        assert!(transfers.get(t, &id).is_none());
    }
}
