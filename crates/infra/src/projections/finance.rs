use serde::Serialize;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use branchpos_branches::Ownership;
use branchpos_core::{Money, TenantId};
use branchpos_events::EventEnvelope;
use branchpos_finance::{
    AccountEvent, AccountId, AccountKind, AccountStatus, AccountTransaction, RelatedEntity,
};

use crate::read_model::TenantStore;

use super::{Projection, ProjectionError, StreamCursors, decode, ensure_same_stream};

pub const AGGREGATE_TYPE: &str = "finance.account";

/// Account balance with its full ledger, newest entry last.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountReadModel {
    pub account_id: AccountId,
    pub name: String,
    pub kind: AccountKind,
    pub ownership: Ownership,
    pub balance: Money,
    pub allow_negative: bool,
    pub status: AccountStatus,
    pub transactions: Vec<AccountTransaction>,
}

impl AccountReadModel {
    pub fn transaction(&self, transaction_id: Uuid) -> Option<&AccountTransaction> {
        self.transactions.iter().find(|t| t.transaction_id == transaction_id)
    }

    /// Every ledger line written for `related`, reversals included.
    pub fn transactions_for(&self, related: &RelatedEntity) -> Vec<&AccountTransaction> {
        let originals: Vec<Uuid> = self
            .transactions
            .iter()
            .filter(|t| t.related.as_ref() == Some(related))
            .map(|t| t.transaction_id)
            .collect();
        self.transactions
            .iter()
            .filter(|t| {
                originals.contains(&t.transaction_id)
                    || t.reverses.is_some_and(|id| originals.contains(&id))
            })
            .collect()
    }
}

#[derive(Debug)]
pub struct AccountLedgerProjection<S>
where
    S: TenantStore<AccountId, AccountReadModel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> AccountLedgerProjection<S>
where
    S: TenantStore<AccountId, AccountReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, tenant_id: TenantId, account_id: &AccountId) -> Option<AccountReadModel> {
        self.store.get(tenant_id, account_id)
    }

    pub fn list(&self, tenant_id: TenantId) -> Vec<AccountReadModel> {
        let mut rows = self.store.list(tenant_id);
        rows.sort_by(|a, b| a.name.cmp(&b.name));
        rows
    }

    fn existing(&self, tenant_id: TenantId, account_id: AccountId) -> Result<AccountReadModel, ProjectionError> {
        self.store
            .get(tenant_id, &account_id)
            .ok_or(ProjectionError::MissingReadModel(account_id.0))
    }
}

impl<S> Projection for AccountLedgerProjection<S>
where
    S: TenantStore<AccountId, AccountReadModel>,
{
    fn aggregate_type(&self) -> &'static str {
        AGGREGATE_TYPE
    }

    fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != AGGREGATE_TYPE || !self.cursors.admit(envelope)? {
            return Ok(());
        }

        let event: AccountEvent = decode(AGGREGATE_TYPE, envelope)?;
        let (event_tenant, account_id) = match &event {
            AccountEvent::AccountOpened(e) => (e.tenant_id, e.account_id),
            AccountEvent::TransactionRecorded(e) => (e.tenant_id, e.account_id),
            AccountEvent::TransactionReversed(e) => (e.tenant_id, e.account_id),
            AccountEvent::AccountClosed(e) => (e.tenant_id, e.account_id),
        };
        ensure_same_stream(envelope, event_tenant, account_id.0)?;
        let tenant_id = envelope.tenant_id();

        let rm = match event {
            AccountEvent::AccountOpened(e) => AccountReadModel {
                account_id: e.account_id,
                name: e.name,
                kind: e.kind,
                ownership: e.ownership,
                balance: Money::zero(e.currency),
                allow_negative: e.allow_negative,
                status: AccountStatus::Active,
                transactions: Vec::new(),
            },
            AccountEvent::TransactionRecorded(e) => {
                let mut rm = self.existing(tenant_id, account_id)?;
                rm.balance.amount_minor = e.transaction.balance_after;
                rm.transactions.push(e.transaction);
                rm
            }
            AccountEvent::TransactionReversed(e) => {
                let mut rm = self.existing(tenant_id, account_id)?;
                if let Some(original) = rm
                    .transactions
                    .iter_mut()
                    .find(|t| t.transaction_id == e.original_transaction_id)
                {
                    original.reversed_by = Some(e.reversal.transaction_id);
                }
                rm.balance.amount_minor = e.reversal.balance_after;
                rm.transactions.push(e.reversal);
                rm
            }
            AccountEvent::AccountClosed(_) => AccountReadModel {
                status: AccountStatus::Closed,
                ..self.existing(tenant_id, account_id)?
            },
        };
        self.store.upsert(tenant_id, account_id, rm);

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

    use branchpos_core::{AggregateId, BASE_CURRENCY};
    use branchpos_finance::{AccountOpened, TransactionKind, TransactionRecorded, TransactionReversed};
    use chrono::Utc;

    use crate::read_model::InMemoryTenantStore;

    type Ledger = AccountLedgerProjection<Arc<InMemoryTenantStore<AccountId, AccountReadModel>>>;

    fn envelope(tenant_id: TenantId, account_id: AccountId, seq: u64, event: AccountEvent) -> EventEnvelope<JsonValue> {
        EventEnvelope::new(
            Uuid::now_v7(),
            tenant_id,
            account_id.0,
            AGGREGATE_TYPE,
            seq,
            serde_json::to_value(event).unwrap(),
        )
    }

    fn line(kind: TransactionKind, before: i64, after: i64, related: Option<RelatedEntity>) -> AccountTransaction {
        AccountTransaction {
            transaction_id: Uuid::now_v7(),
            kind,
            amount: (after - before).abs(),
            balance_before: before,
            balance_after: after,
            description: None,
            reference: None,
            related,
            reversed_by: None,
            reverses: None,
            occurred_at: Utc::now(),
        }
    }

    #[test]
    fn reversal_restores_balance_and_links_entries() {
        let ledger = Ledger::new(Arc::new(InMemoryTenantStore::new()));
        let t = TenantId::new();
        let a = AccountId::new(AggregateId::new());
        let related = RelatedEntity::purchase_order_payment(Uuid::now_v7());
        let now = Utc::now();

        let payment = line(TransactionKind::Expense, 500_000, 200_000, Some(related));
        let mut reversal = line(TransactionKind::Reversal, 200_000, 500_000, Some(related));
        reversal.reverses = Some(payment.transaction_id);
        let (payment_id, reversal_id) = (payment.transaction_id, reversal.transaction_id);

        let events = [
            AccountEvent::AccountOpened(AccountOpened {
                tenant_id: t,
                account_id: a,
                name: "M-Pesa till".to_string(),
                kind: AccountKind::MobileMoney,
                currency: BASE_CURRENCY,
                ownership: Ownership::unassigned(),
                allow_negative: false,
                occurred_at: now,
            }),
            AccountEvent::TransactionRecorded(TransactionRecorded {
                tenant_id: t,
                account_id: a,
                transaction: line(TransactionKind::Adjustment, 0, 500_000, None),
                category: None,
                occurred_at: now,
            }),
            AccountEvent::TransactionRecorded(TransactionRecorded {
                tenant_id: t,
                account_id: a,
                transaction: payment,
                category: None,
                occurred_at: now,
            }),
        ];
        for (seq, ev) in (1..).zip(events) {
            ledger.apply_envelope(&envelope(t, a, seq, ev)).unwrap();
        }
        assert_eq!(ledger.get(t, &a).unwrap().balance.amount_minor, 200_000);

        ledger
            .apply_envelope(&envelope(
                t,
                a,
                4,
                AccountEvent::TransactionReversed(TransactionReversed {
                    tenant_id: t,
                    account_id: a,
                    original_transaction_id: payment_id,
                    reversal,
                    reason: Some("entered twice".to_string()),
                    occurred_at: now,
                }),
            ))
            .unwrap();

        let rm = ledger.get(t, &a).unwrap();
        assert_eq!(rm.balance.amount_minor, 500_000);
        assert_eq!(rm.transaction(payment_id).unwrap().reversed_by, Some(reversal_id));
        assert_eq!(rm.transactions_for(&related).len(), 2);
    }

    #[test]
    fn transaction_for_unknown_account_is_an_error() {
        let ledger = Ledger::new(Arc::new(InMemoryTenantStore::new()));
        let t = TenantId::new();
        let a = AccountId::new(AggregateId::new());

        let err = ledger
            .apply_envelope(&envelope(
                t,
                a,
                1,
                AccountEvent::TransactionRecorded(TransactionRecorded {
                    tenant_id: t,
                    account_id: a,
                    transaction: line(TransactionKind::Income, 0, 1_000, None),
                    category: None,
                    occurred_at: Utc::now(),
                }),
            ))
            .unwrap_err();
        assert!(matches!(err, ProjectionError::MissingReadModel(_)));
    }
}
