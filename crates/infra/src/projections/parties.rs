use serde::Serialize;
use serde_json::Value as JsonValue;

use branchpos_branches::Ownership;
use branchpos_core::TenantId;
use branchpos_events::EventEnvelope;
use branchpos_parties::{
    ContactInfo, CustomerTotals, PartyEvent, PartyId, PartyKind, PartyStatus, normalize_phone,
};

use crate::read_model::TenantStore;

use super::{Projection, ProjectionError, StreamCursors, decode, ensure_same_stream};

pub const AGGREGATE_TYPE: &str = "parties.party";

/// Customer and supplier directory row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartyReadModel {
    pub party_id: PartyId,
    pub kind: PartyKind,
    pub name: String,
    pub contact: ContactInfo,
    pub ownership: Ownership,
    pub status: PartyStatus,
    pub totals: CustomerTotals,
}

#[derive(Debug)]
pub struct PartyDirectoryProjection<S>
where
    S: TenantStore<PartyId, PartyReadModel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> PartyDirectoryProjection<S>
where
    S: TenantStore<PartyId, PartyReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, tenant_id: TenantId, party_id: &PartyId) -> Option<PartyReadModel> {
        self.store.get(tenant_id, party_id)
    }

    pub fn list(&self, tenant_id: TenantId) -> Vec<PartyReadModel> {
        let mut rows = self.store.list(tenant_id);
        rows.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        rows
    }

    pub fn list_kind(&self, tenant_id: TenantId, kind: PartyKind) -> Vec<PartyReadModel> {
        self.list(tenant_id)
            .into_iter()
            .filter(|rm| rm.kind == kind)
            .collect()
    }

    /// Case-insensitive name substring search.
    pub fn search_by_name(&self, tenant_id: TenantId, query: &str) -> Vec<PartyReadModel> {
        let q = query.to_lowercase();
        self.list(tenant_id)
            .into_iter()
            .filter(|rm| rm.name.to_lowercase().contains(&q))
            .collect()
    }

    /// Look a party up by phone or WhatsApp number, in any local format.
    pub fn find_by_phone(&self, tenant_id: TenantId, raw: &str) -> Option<PartyReadModel> {
        let wanted = normalize_phone(raw)?;
        self.list(tenant_id).into_iter().find(|rm| {
            rm.contact.phone.as_deref() == Some(wanted.as_str())
                || rm.contact.whatsapp.as_deref() == Some(wanted.as_str())
        })
    }

    fn existing(&self, tenant_id: TenantId, party_id: PartyId) -> Result<PartyReadModel, ProjectionError> {
        self.store
            .get(tenant_id, &party_id)
            .ok_or(ProjectionError::MissingReadModel(party_id.0))
    }
}

impl<S> Projection for PartyDirectoryProjection<S>
where
    S: TenantStore<PartyId, PartyReadModel>,
{
    fn aggregate_type(&self) -> &'static str {
        AGGREGATE_TYPE
    }

    fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != AGGREGATE_TYPE || !self.cursors.admit(envelope)? {
            return Ok(());
        }

        let event: PartyEvent = decode(AGGREGATE_TYPE, envelope)?;
        let (event_tenant, party_id) = match &event {
            PartyEvent::PartyRegistered(e) => (e.tenant_id, e.party_id),
            PartyEvent::PartyUpdated(e) => (e.tenant_id, e.party_id),
            PartyEvent::PartySuspended(e) => (e.tenant_id, e.party_id),
            PartyEvent::PartySharingChanged(e) => (e.tenant_id, e.party_id),
            PartyEvent::PurchaseRecorded(e) => (e.tenant_id, e.party_id),
            PartyEvent::TotalsRecalculated(e) => (e.tenant_id, e.party_id),
        };
        ensure_same_stream(envelope, event_tenant, party_id.0)?;
        let tenant_id = envelope.tenant_id();

        let rm = match event {
            PartyEvent::PartyRegistered(e) => PartyReadModel {
                party_id: e.party_id,
                kind: e.kind,
                name: e.name,
                contact: e.contact,
                ownership: e.ownership,
                status: PartyStatus::Active,
                totals: CustomerTotals::default(),
            },
            PartyEvent::PartyUpdated(e) => PartyReadModel {
                name: e.name,
                contact: e.contact,
                ..self.existing(tenant_id, party_id)?
            },
            PartyEvent::PartySuspended(_) => PartyReadModel {
                status: PartyStatus::Suspended,
                ..self.existing(tenant_id, party_id)?
            },
            PartyEvent::PartySharingChanged(e) => {
                let mut rm = self.existing(tenant_id, party_id)?;
                rm.ownership.is_shared = e.is_shared;
                rm
            }
            PartyEvent::PurchaseRecorded(e) => {
                let mut rm = self.existing(tenant_id, party_id)?;
                rm.totals.total_spent += e.amount;
                rm.totals.total_purchases += 1;
                rm.totals.last_purchase_at = Some(e.occurred_at);
                rm
            }
            PartyEvent::TotalsRecalculated(e) => PartyReadModel {
                totals: e.totals,
                ..self.existing(tenant_id, party_id)?
            },
        };
        self.store.upsert(tenant_id, party_id, rm);

        self.cursors.advance(envelope);
        Ok(())
    }

    fn clear_tenant(&self, tenant_id: TenantId) {
        self.store.clear_tenant(tenant_id);
        self.cursors.clear_tenant(tenant_id);
    }
}
