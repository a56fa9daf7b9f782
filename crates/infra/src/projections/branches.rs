use serde::Serialize;
use serde_json::Value as JsonValue;

use branchpos_branches::{
    BranchEvent, BranchSettings, BranchStatus, IsolationMode, SharingSettings, VisibilityPolicy,
};
use branchpos_core::{AggregateId, BranchId, TenantId};
use branchpos_events::EventEnvelope;

use crate::read_model::TenantStore;

use super::{Projection, ProjectionError, StreamCursors, decode, ensure_same_stream};

pub const AGGREGATE_TYPE: &str = "branches.branch";

/// Branch directory row: enough to rebuild a branch's visibility policy
/// without replaying its stream on every request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BranchReadModel {
    pub branch_id: BranchId,
    pub name: String,
    pub code: String,
    pub mode: IsolationMode,
    pub sharing: SharingSettings,
    pub status: BranchStatus,
}

impl BranchReadModel {
    pub fn settings(&self) -> BranchSettings {
        BranchSettings {
            branch_id: self.branch_id,
            mode: self.mode,
            sharing: self.sharing.clone(),
        }
    }
}

#[derive(Debug)]
pub struct BranchDirectoryProjection<S>
where
    S: TenantStore<BranchId, BranchReadModel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> BranchDirectoryProjection<S>
where
    S: TenantStore<BranchId, BranchReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, tenant_id: TenantId, branch_id: &BranchId) -> Option<BranchReadModel> {
        self.store.get(tenant_id, branch_id)
    }

    pub fn list(&self, tenant_id: TenantId) -> Vec<BranchReadModel> {
        let mut rows = self.store.list(tenant_id);
        rows.sort_by(|a, b| a.code.cmp(&b.code));
        rows
    }

    /// Visibility policy for a request scoped to `branch_id`.
    ///
    /// No branch means no filtering. A branch the directory does not know, or
    /// one that has been deactivated, gets the conservative fallback (own
    /// records plus unassigned ones) whatever its stored settings say.
    pub fn policy_for(&self, tenant_id: TenantId, branch_id: Option<BranchId>) -> VisibilityPolicy {
        let Some(branch_id) = branch_id else {
            return VisibilityPolicy::unscoped();
        };
        match self.store.get(tenant_id, &branch_id) {
            Some(rm) if rm.status == BranchStatus::Active => VisibilityPolicy::from_settings(rm.settings()),
            Some(_) => {
                tracing::debug!(
                    tenant_id = %tenant_id,
                    branch_id = %branch_id,
                    "branch is inactive, using fallback visibility"
                );
                VisibilityPolicy::fallback(branch_id)
            }
            None => {
                tracing::warn!(
                    tenant_id = %tenant_id,
                    branch_id = %branch_id,
                    "branch settings unavailable, using fallback visibility"
                );
                VisibilityPolicy::fallback(branch_id)
            }
        }
    }

    /// Whether `branch_id` may still originate writes. Branches the directory
    /// has not seen yet are given the benefit of the doubt.
    pub fn accepts_writes(&self, tenant_id: TenantId, branch_id: BranchId) -> bool {
        self.store
            .get(tenant_id, &branch_id)
            .is_none_or(|rm| rm.status == BranchStatus::Active)
    }

    fn existing(&self, tenant_id: TenantId, branch_id: BranchId) -> Result<BranchReadModel, ProjectionError> {
        self.store
            .get(tenant_id, &branch_id)
            .ok_or(ProjectionError::MissingReadModel(AggregateId::from(branch_id)))
    }
}

impl<S> Projection for BranchDirectoryProjection<S>
where
    S: TenantStore<BranchId, BranchReadModel>,
{
    fn aggregate_type(&self) -> &'static str {
        AGGREGATE_TYPE
    }

    fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != AGGREGATE_TYPE || !self.cursors.admit(envelope)? {
            return Ok(());
        }

        let event: BranchEvent = decode(AGGREGATE_TYPE, envelope)?;
        let (event_tenant, branch_id) = match &event {
            BranchEvent::BranchCreated(e) => (e.tenant_id, e.branch_id),
            BranchEvent::IsolationModeChanged(e) => (e.tenant_id, e.branch_id),
            BranchEvent::SharingUpdated(e) => (e.tenant_id, e.branch_id),
            BranchEvent::BranchDeactivated(e) => (e.tenant_id, e.branch_id),
        };
        ensure_same_stream(envelope, event_tenant, AggregateId::from(branch_id))?;
        let tenant_id = envelope.tenant_id();

        let rm = match event {
            BranchEvent::BranchCreated(e) => BranchReadModel {
                branch_id: e.branch_id,
                name: e.name,
                code: e.code,
                mode: e.mode,
                sharing: e.sharing,
                status: BranchStatus::Active,
            },
            BranchEvent::IsolationModeChanged(e) => BranchReadModel {
                mode: e.mode,
                ..self.existing(tenant_id, branch_id)?
            },
            BranchEvent::SharingUpdated(e) => BranchReadModel {
                sharing: e.sharing,
                ..self.existing(tenant_id, branch_id)?
            },
            BranchEvent::BranchDeactivated(_) => BranchReadModel {
                status: BranchStatus::Inactive,
                ..self.existing(tenant_id, branch_id)?
            },
        };
        self.store.upsert(tenant_id, branch_id, rm);

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

    use branchpos_branches::{
        BranchCreated, BranchDeactivated, EntityKind, IsolationModeChanged, Ownership,
    };
    use chrono::Utc;
    use uuid::Uuid;

    use crate::read_model::InMemoryTenantStore;

    type Directory = BranchDirectoryProjection<Arc<InMemoryTenantStore<BranchId, BranchReadModel>>>;

    fn envelope(tenant_id: TenantId, branch_id: BranchId, seq: u64, event: BranchEvent) -> EventEnvelope<JsonValue> {
        EventEnvelope::new(
            Uuid::now_v7(),
            tenant_id,
            AggregateId::from(branch_id),
            AGGREGATE_TYPE,
            seq,
            serde_json::to_value(event).unwrap(),
        )
    }

    fn created(tenant_id: TenantId, branch_id: BranchId, mode: IsolationMode) -> BranchEvent {
        BranchEvent::BranchCreated(BranchCreated {
            tenant_id,
            branch_id,
            name: "Mlimani".to_string(),
            code: "MLM".to_string(),
            mode,
            sharing: SharingSettings::default(),
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn mode_change_updates_policy() {
        let directory = Directory::new(Arc::new(InMemoryTenantStore::new()));
        let (t, b) = (TenantId::new(), BranchId::new());
        let other = Ownership::owned_by(BranchId::new());

        directory
            .apply_envelope(&envelope(t, b, 1, created(t, b, IsolationMode::Isolated)))
            .unwrap();
        assert!(!directory.policy_for(t, Some(b)).is_visible(EntityKind::Products, &other));

        directory
            .apply_envelope(&envelope(
                t,
                b,
                2,
                BranchEvent::IsolationModeChanged(IsolationModeChanged {
                    tenant_id: t,
                    branch_id: b,
                    previous: IsolationMode::Isolated,
                    mode: IsolationMode::Shared,
                    occurred_at: Utc::now(),
                }),
            ))
            .unwrap();
        assert!(directory.policy_for(t, Some(b)).is_visible(EntityKind::Products, &other));
    }

    #[test]
    fn unknown_branch_falls_back_and_no_branch_is_unscoped() {
        let directory = Directory::new(Arc::new(InMemoryTenantStore::new()));
        let (t, b) = (TenantId::new(), BranchId::new());

        assert_eq!(directory.policy_for(t, Some(b)), VisibilityPolicy::fallback(b));
        assert_eq!(directory.policy_for(t, None), VisibilityPolicy::unscoped());
    }

    #[test]
    fn deactivated_branch_falls_back_and_stops_accepting_writes() {
        let directory = Directory::new(Arc::new(InMemoryTenantStore::new()));
        let (t, b) = (TenantId::new(), BranchId::new());
        let foreign = Ownership::owned_by(BranchId::new());

        directory
            .apply_envelope(&envelope(t, b, 1, created(t, b, IsolationMode::Shared)))
            .unwrap();
        assert!(directory.policy_for(t, Some(b)).is_visible(EntityKind::Products, &foreign));
        assert!(directory.accepts_writes(t, b));

        directory
            .apply_envelope(&envelope(
                t,
                b,
                2,
                BranchEvent::BranchDeactivated(BranchDeactivated {
                    tenant_id: t,
                    branch_id: b,
                    occurred_at: Utc::now(),
                }),
            ))
            .unwrap();
        let policy = directory.policy_for(t, Some(b));
        assert_eq!(policy, VisibilityPolicy::fallback(b));
        assert!(!policy.is_visible(EntityKind::Products, &foreign));
        assert!(policy.is_visible(EntityKind::Products, &Ownership::owned_by(b)));
        assert!(!directory.accepts_writes(t, b));
        assert!(directory.accepts_writes(t, BranchId::new()));
    }

    #[test]
    fn payload_from_another_tenant_is_rejected() {
        let directory = Directory::new(Arc::new(InMemoryTenantStore::new()));
        let (t, b) = (TenantId::new(), BranchId::new());

        let err = directory
            .apply_envelope(&envelope(t, b, 1, created(TenantId::new(), b, IsolationMode::Shared)))
            .unwrap_err();
        assert!(matches!(err, ProjectionError::TenantIsolation(_)));
        assert!(directory.get(t, &b).is_none());
    }
}
