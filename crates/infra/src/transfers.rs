//! Money moved between two finance accounts of one tenant.
//!
//! Each account is its own stream, so a transfer is a two-step saga:
//!
//! ```text
//! Withdraw (source) → Deposit (destination)
//!                      └─ fails → ReverseRelated (source)
//! ```
//!
//! Both ledger lines carry `RelatedEntity::transfer(transfer_id)`, which keeps
//! each leg booked at most once and lets the compensation find the debit.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use branchpos_core::{Money, TenantId, UserId};
use branchpos_events::{EventBus, EventEnvelope};
use branchpos_finance::{
    AccountCommand, AccountId, Deposit, FinanceAccount, RelatedEntity, ReverseRelated, Withdraw,
};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::{EventStore, StoredEvent};
use crate::projections::finance;

/// Reason stamped on a debit undone because the credit side failed.
pub const CREDIT_FAILED_REASON: &str = "destination credit failed";

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("account cannot take part in this transfer: {0}")]
    AccountNotUsable(String),

    #[error("source account rejected the transfer: {0}")]
    Source(DispatchError),

    #[error("destination account rejected the transfer: {0}")]
    Destination(DispatchError),

    #[error("{step} failed ({cause}) and compensation failed ({compensation})")]
    CompensationFailed {
        step: &'static str,
        cause: DispatchError,
        compensation: DispatchError,
    },
}

impl TransferError {
    pub fn dispatch_error(&self) -> Option<&DispatchError> {
        match self {
            TransferError::Source(e) | TransferError::Destination(e) => Some(e),
            TransferError::CompensationFailed { cause, .. } => Some(cause),
            TransferError::AccountNotUsable(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletedTransfer {
    pub transfer_id: Uuid,
    pub out_transaction_id: Uuid,
    pub in_transaction_id: Uuid,
    pub amount: Money,
}

/// Details shared by both ledger lines of a transfer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferNote {
    pub description: Option<String>,
    pub reference: Option<String>,
}

#[derive(Debug)]
pub struct AccountTransfers<S, B> {
    dispatcher: Arc<CommandDispatcher<S, B>>,
}

impl<S, B> Clone for AccountTransfers<S, B> {
    fn clone(&self) -> Self {
        Self {
            dispatcher: self.dispatcher.clone(),
        }
    }
}

impl<S, B> AccountTransfers<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(dispatcher: Arc<CommandDispatcher<S, B>>) -> Self {
        Self { dispatcher }
    }

    pub fn transfer(
        &self,
        tenant_id: TenantId,
        from: AccountId,
        to: AccountId,
        amount: Money,
        note: TransferNote,
        actor: Option<UserId>,
    ) -> Result<CompletedTransfer, TransferError> {
        if from == to {
            return Err(TransferError::Source(DispatchError::Validation(
                "cannot transfer to the same account".to_string(),
            )));
        }
        if amount.amount_minor <= 0 {
            return Err(TransferError::Source(DispatchError::Validation(
                "transfer amount must be positive".to_string(),
            )));
        }

        let source = self.load_account(tenant_id, from).map_err(TransferError::Source)?;
        let destination = self.load_account(tenant_id, to).map_err(TransferError::Destination)?;
        for account in [&source, &destination] {
            if !account.is_open() {
                return Err(TransferError::AccountNotUsable(format!(
                    "account '{}' is not active",
                    account.name()
                )));
            }
            if account.currency() != amount.currency {
                return Err(TransferError::AccountNotUsable(format!(
                    "account '{}' holds {}, transfer is in {}",
                    account.name(),
                    account.currency(),
                    amount.currency
                )));
            }
        }

        let transfer_id = Uuid::now_v7();
        let out_transaction_id = Uuid::now_v7();
        let in_transaction_id = Uuid::now_v7();
        let related = RelatedEntity::transfer(transfer_id);
        let span = tracing::info_span!(
            "account_transfer",
            tenant_id = %tenant_id,
            from = %from,
            to = %to,
            transfer_id = %transfer_id,
            actor = ?actor,
        );
        let _guard = span.enter();

        self.dispatch_account(
            tenant_id,
            from,
            AccountCommand::Withdraw(Withdraw {
                tenant_id,
                account_id: from,
                transaction_id: out_transaction_id,
                amount,
                description: Some(
                    note.description
                        .clone()
                        .unwrap_or_else(|| format!("Transfer to {}", destination.name())),
                ),
                reference: note.reference.clone(),
                related: Some(related),
                occurred_at: Utc::now(),
            }),
        )
        .map_err(TransferError::Source)?;
        tracing::info!(amount = amount.amount_minor, "source account debited");

        let credit = self.dispatch_account(
            tenant_id,
            to,
            AccountCommand::Deposit(Deposit {
                tenant_id,
                account_id: to,
                transaction_id: in_transaction_id,
                amount,
                description: Some(
                    note.description
                        .unwrap_or_else(|| format!("Transfer from {}", source.name())),
                ),
                reference: note.reference,
                related: Some(related),
                occurred_at: Utc::now(),
            }),
        );
        if let Err(cause) = credit {
            tracing::warn!(error = %cause, "destination credit failed, reversing source debit");
            let undo = self.dispatch_account(
                tenant_id,
                from,
                AccountCommand::ReverseRelated(ReverseRelated {
                    tenant_id,
                    account_id: from,
                    related,
                    reversal_id: Uuid::now_v7(),
                    reason: Some(CREDIT_FAILED_REASON.to_string()),
                    occurred_at: Utc::now(),
                }),
            );
            return match undo {
                Ok(_) => Err(TransferError::Destination(cause)),
                Err(compensation) => {
                    tracing::error!(error = %compensation, "reversing source debit failed");
                    Err(TransferError::CompensationFailed {
                        step: "destination credit",
                        cause,
                        compensation,
                    })
                }
            };
        }
        tracing::info!("destination account credited");

        Ok(CompletedTransfer {
            transfer_id,
            out_transaction_id,
            in_transaction_id,
            amount,
        })
    }

    fn load_account(&self, tenant_id: TenantId, account_id: AccountId) -> Result<FinanceAccount, DispatchError> {
        let account: FinanceAccount = self
            .dispatcher
            .load(tenant_id, account_id.0, |_, _| FinanceAccount::empty(account_id))?;
        if account.tenant_id() != Some(tenant_id) {
            return Err(DispatchError::NotFound);
        }
        Ok(account)
    }

    fn dispatch_account(
        &self,
        tenant_id: TenantId,
        account_id: AccountId,
        command: AccountCommand,
    ) -> Result<Vec<StoredEvent>, DispatchError> {
        self.dispatcher.dispatch::<FinanceAccount>(
            tenant_id,
            account_id.0,
            finance::AGGREGATE_TYPE,
            command,
            |_, _| FinanceAccount::empty(account_id),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    use branchpos_branches::Ownership;
    use branchpos_core::{AggregateId, BASE_CURRENCY, CurrencyCode};
    use branchpos_events::InMemoryEventBus;
    use branchpos_finance::{AccountKind, CloseAccount, OpenAccount, TransactionKind};

    use crate::event_store::InMemoryEventStore;

    type Store = Arc<InMemoryEventStore>;
    type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;

    struct Fixture {
        transfers: AccountTransfers<Store, Bus>,
        dispatcher: Arc<CommandDispatcher<Store, Bus>>,
        tenant_id: TenantId,
    }

    fn tzs(amount: i64) -> Money {
        Money::new(amount, BASE_CURRENCY)
    }

    fn fixture() -> Fixture {
        let dispatcher = Arc::new(CommandDispatcher::new(
            Arc::new(InMemoryEventStore::new()),
            Arc::new(InMemoryEventBus::new()),
        ));
        Fixture {
            transfers: AccountTransfers::new(dispatcher.clone()),
            dispatcher,
            tenant_id: TenantId::new(),
        }
    }

    impl Fixture {
        fn open(&self, name: &str, opening: Money) -> AccountId {
            let account_id = AccountId::new(AggregateId::new());
            self.transfers
                .dispatch_account(
                    self.tenant_id,
                    account_id,
                    AccountCommand::OpenAccount(OpenAccount {
                        tenant_id: self.tenant_id,
                        account_id,
                        name: name.to_string(),
                        kind: AccountKind::Cash,
                        ownership: Ownership::unassigned(),
                        opening_balance: opening,
                        allow_negative: false,
                        occurred_at: Utc::now(),
                    }),
                )
                .unwrap();
            account_id
        }

        fn account(&self, account_id: AccountId) -> FinanceAccount {
            self.dispatcher
                .load(self.tenant_id, account_id.0, |_, _| FinanceAccount::empty(account_id))
                .unwrap()
        }

        fn balance(&self, account_id: AccountId) -> i64 {
            self.account(account_id).balance().amount_minor
        }

        fn send(&self, from: AccountId, to: AccountId, amount: i64) -> Result<CompletedTransfer, TransferError> {
            self.transfers
                .transfer(self.tenant_id, from, to, tzs(amount), TransferNote::default(), None)
        }
    }

    #[test]
    fn both_legs_are_booked_with_transfer_kinds() {
        let f = fixture();
        let till = f.open("Till", tzs(500_000));
        let bank = f.open("Bank", tzs(0));

        let done = f.send(till, bank, 200_000).unwrap();
        assert_eq!(f.balance(till), 300_000);
        assert_eq!(f.balance(bank), 200_000);

        let out = f.account(till);
        let out_line = out.transaction(done.out_transaction_id).unwrap();
        assert_eq!(out_line.kind, TransactionKind::TransferOut);
        assert_eq!(out_line.description.as_deref(), Some("Transfer to Bank"));
        let in_line = f.account(bank).transaction(done.in_transaction_id).cloned().unwrap();
        assert_eq!(in_line.kind, TransactionKind::TransferIn);
    }

    #[test]
    fn insufficient_funds_touch_neither_account() {
        let f = fixture();
        let till = f.open("Till", tzs(1_000));
        let bank = f.open("Bank", tzs(0));

        let err = f.send(till, bank, 5_000).unwrap_err();
        assert!(matches!(err, TransferError::Source(DispatchError::InvariantViolation(_))));
        assert_eq!(f.balance(till), 1_000);
        assert_eq!(f.balance(bank), 0);
    }

    #[test]
    fn closed_or_foreign_currency_accounts_are_refused() {
        let f = fixture();
        let till = f.open("Till", tzs(10_000));
        let usd = f.open("USD float", Money::new(10_000, "USD".parse::<CurrencyCode>().unwrap()));
        assert!(matches!(f.send(till, usd, 1_000), Err(TransferError::AccountNotUsable(_))));

        let bank = f.open("Bank", tzs(0));
        f.transfers
            .dispatch_account(
                f.tenant_id,
                bank,
                AccountCommand::CloseAccount(CloseAccount {
                    tenant_id: f.tenant_id,
                    account_id: bank,
                    occurred_at: Utc::now(),
                }),
            )
            .unwrap();
        assert!(matches!(f.send(till, bank, 1_000), Err(TransferError::AccountNotUsable(_))));
        assert_eq!(f.balance(till), 10_000);
    }

    #[test]
    fn same_account_is_a_validation_error() {
        let f = fixture();
        let till = f.open("Till", tzs(10_000));
        assert!(matches!(
            f.send(till, till, 1),
            Err(TransferError::Source(DispatchError::Validation(_)))
        ));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn money_is_conserved_across_transfers(moves in prop::collection::vec((any::<bool>(), 1i64..300_000), 1..10)) {
            let f = fixture();
            let a = f.open("A", tzs(400_000));
            let b = f.open("B", tzs(100_000));

            for (forward, amount) in moves {
                let (from, to) = if forward { (a, b) } else { (b, a) };
                let _ = f.send(from, to, amount);
                prop_assert!(f.balance(a) >= 0 && f.balance(b) >= 0);
                prop_assert_eq!(f.balance(a) + f.balance(b), 500_000);
            }
        }
    }
}
