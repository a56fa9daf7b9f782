use serde::Serialize;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use branchpos_branches::Ownership;
use branchpos_core::{CurrencyCode, TenantId};
use branchpos_events::EventEnvelope;
use branchpos_parties::PartyId;
use branchpos_purchasing::{
    LineItem, PaymentRecordStatus, PaymentStatus, PurchaseOrderEvent, PurchaseOrderId,
    PurchaseOrderPayment, PurchaseOrderStatus, convert_to_base,
};

use crate::read_model::TenantStore;

use super::{Projection, ProjectionError, StreamCursors, decode, ensure_same_stream};

pub const AGGREGATE_TYPE: &str = "purchasing.order";

/// Purchase order with its payment trail and derived totals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PurchaseOrderReadModel {
    pub order_id: PurchaseOrderId,
    pub supplier_id: PartyId,
    pub ownership: Ownership,
    pub currency: CurrencyCode,
    pub exchange_rate: i64,
    pub status: PurchaseOrderStatus,
    pub lines: Vec<LineItem>,
    /// Order currency minor units.
    pub total: i64,
    /// Base currency minor units.
    pub total_base: i64,
    pub payments: Vec<PurchaseOrderPayment>,
    pub total_paid: i64,
    pub payment_status: PaymentStatus,
}

impl PurchaseOrderReadModel {
    /// Base-currency amount still owed (never negative).
    pub fn remaining(&self) -> i64 {
        (self.total_base - self.total_paid).max(0)
    }

    pub fn payment(&self, payment_id: Uuid) -> Option<&PurchaseOrderPayment> {
        self.payments.iter().find(|p| p.payment_id == payment_id)
    }

    fn recompute_totals(&mut self) {
        self.total = self
            .lines
            .iter()
            .map(|l| l.quantity.saturating_mul(l.unit_cost))
            .fold(0i64, i64::saturating_add);
        self.total_base = convert_to_base(self.total, self.exchange_rate).unwrap_or(i64::MAX);
    }
}

#[derive(Debug)]
pub struct PurchaseOrdersProjection<S>
where
    S: TenantStore<PurchaseOrderId, PurchaseOrderReadModel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> PurchaseOrdersProjection<S>
where
    S: TenantStore<PurchaseOrderId, PurchaseOrderReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, tenant_id: TenantId, order_id: &PurchaseOrderId) -> Option<PurchaseOrderReadModel> {
        self.store.get(tenant_id, order_id)
    }

    pub fn list(&self, tenant_id: TenantId) -> Vec<PurchaseOrderReadModel> {
        self.store.list(tenant_id)
    }

    pub fn list_for_supplier(&self, tenant_id: TenantId, supplier_id: PartyId) -> Vec<PurchaseOrderReadModel> {
        self.list(tenant_id)
            .into_iter()
            .filter(|rm| rm.supplier_id == supplier_id)
            .collect()
    }

    /// Orders that still owe money, excluding cancelled ones.
    pub fn outstanding(&self, tenant_id: TenantId) -> Vec<PurchaseOrderReadModel> {
        self.list(tenant_id)
            .into_iter()
            .filter(|rm| rm.status != PurchaseOrderStatus::Cancelled && rm.payment_status != PaymentStatus::Paid)
            .collect()
    }

    fn existing(
        &self,
        tenant_id: TenantId,
        order_id: PurchaseOrderId,
    ) -> Result<PurchaseOrderReadModel, ProjectionError> {
        self.store
            .get(tenant_id, &order_id)
            .ok_or(ProjectionError::MissingReadModel(order_id.0))
    }
}

impl<S> Projection for PurchaseOrdersProjection<S>
where
    S: TenantStore<PurchaseOrderId, PurchaseOrderReadModel>,
{
    fn aggregate_type(&self) -> &'static str {
        AGGREGATE_TYPE
    }

    fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != AGGREGATE_TYPE || !self.cursors.admit(envelope)? {
            return Ok(());
        }

        let event: PurchaseOrderEvent = decode(AGGREGATE_TYPE, envelope)?;
        let (event_tenant, order_id) = match &event {
            PurchaseOrderEvent::PurchaseOrderCreated(e) => (e.tenant_id, e.order_id),
            PurchaseOrderEvent::PurchaseOrderLineAdded(e) => (e.tenant_id, e.order_id),
            PurchaseOrderEvent::PurchaseOrderSent(e) => (e.tenant_id, e.order_id),
            PurchaseOrderEvent::GoodsReceived(e) => (e.tenant_id, e.order_id),
            PurchaseOrderEvent::PurchaseOrderCancelled(e) => (e.tenant_id, e.order_id),
            PurchaseOrderEvent::PaymentRecorded(e) => (e.tenant_id, e.order_id),
            PurchaseOrderEvent::PaymentReversed(e) => (e.tenant_id, e.order_id),
        };
        ensure_same_stream(envelope, event_tenant, order_id.0)?;
        let tenant_id = envelope.tenant_id();

        let rm = match event {
            PurchaseOrderEvent::PurchaseOrderCreated(e) => PurchaseOrderReadModel {
                order_id: e.order_id,
                supplier_id: e.supplier_id,
                ownership: e.ownership,
                currency: e.currency,
                exchange_rate: e.exchange_rate,
                status: PurchaseOrderStatus::Draft,
                lines: Vec::new(),
                total: 0,
                total_base: 0,
                payments: Vec::new(),
                total_paid: 0,
                payment_status: PaymentStatus::Unpaid,
            },
            PurchaseOrderEvent::PurchaseOrderLineAdded(e) => {
                let mut rm = self.existing(tenant_id, order_id)?;
                rm.lines.push(e.line);
                rm.recompute_totals();
                rm
            }
            PurchaseOrderEvent::PurchaseOrderSent(e) => PurchaseOrderReadModel {
                status: PurchaseOrderStatus::Sent,
                total: e.total,
                total_base: e.total_base,
                ..self.existing(tenant_id, order_id)?
            },
            PurchaseOrderEvent::GoodsReceived(e) => {
                let mut rm = self.existing(tenant_id, order_id)?;
                for receipt in &e.receipts {
                    if let Some(line) = rm.lines.iter_mut().find(|l| l.line_no == receipt.line_no) {
                        line.received_quantity += receipt.quantity;
                    }
                }
                rm.status = e.status;
                rm
            }
            PurchaseOrderEvent::PurchaseOrderCancelled(_) => PurchaseOrderReadModel {
                status: PurchaseOrderStatus::Cancelled,
                ..self.existing(tenant_id, order_id)?
            },
            PurchaseOrderEvent::PaymentRecorded(e) => {
                let mut rm = self.existing(tenant_id, order_id)?;
                rm.payments.push(e.payment);
                rm.total_paid = e.total_paid;
                rm.payment_status = e.payment_status;
                rm
            }
            PurchaseOrderEvent::PaymentReversed(e) => {
                let mut rm = self.existing(tenant_id, order_id)?;
                if let Some(p) = rm.payments.iter_mut().find(|p| p.payment_id == e.payment_id) {
                    p.status = PaymentRecordStatus::Reversed;
                    p.reversed_at = Some(e.occurred_at);
                    p.reversal_reason = Some(e.reason);
                }
                rm.total_paid = e.total_paid;
                rm.payment_status = e.payment_status;
                rm
            }
        };
        self.store.upsert(tenant_id, order_id, rm);

        self.cursors.advance(envelope);
        Ok(())
    }

    fn clear_tenant(&self, tenant_id: TenantId) {
        self.store.clear_tenant(tenant_id);
        self.cursors.clear_tenant(tenant_id);
    }
}
