//! Purchase order payment reconciliation.
//!
//! A payment touches two aggregates: the purchase order (what is owed) and the
//! finance account (where the money came from). They live in separate streams,
//! so the reconciler runs them as a two-step saga with a compensating action:
//!
//! ```text
//! apply:   RecordPayment (order) → Withdraw (account)
//!                                   └─ fails → ReversePayment (order)
//! reverse: ReverseRelated (account) → ReversePayment (order)
//!                                      └─ fails → Withdraw (account) again
//! ```
//!
//! Every ledger line written for a payment carries
//! `RelatedEntity::purchase_order_payment(payment_id)`, which is how the
//! reversal finds it.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use branchpos_core::{BASE_CURRENCY, Money, TenantId, UserId};
use branchpos_events::{EventBus, EventEnvelope};
use branchpos_finance::{
    AccountCommand, AccountId, FinanceAccount, RelatedEntity, ReverseRelated, Withdraw,
};
use branchpos_purchasing::{
    PaymentMethod, PaymentStatus, PurchaseOrder, PurchaseOrderCommand, PurchaseOrderEvent,
    PurchaseOrderId, PurchaseOrderPayment, RecordPayment, ReversePayment,
};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::{EventStore, StoredEvent};
use crate::projections::{ProjectionSet, finance, purchasing};

/// Reason stamped on a payment undone because its account debit failed.
pub const DEBIT_FAILED_REASON: &str = "account debit failed";

#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The paying account cannot fund purchase order payments.
    #[error("account cannot be used for this payment: {0}")]
    AccountNotUsable(String),

    #[error("purchase order rejected the operation: {0}")]
    Order(DispatchError),

    #[error("finance account rejected the operation: {0}")]
    Account(DispatchError),

    /// A step failed and so did its compensation. The two aggregates disagree
    /// until an operator fixes them.
    #[error("{step} failed ({cause}) and compensation failed ({compensation})")]
    CompensationFailed {
        step: &'static str,
        cause: DispatchError,
        compensation: DispatchError,
    },
}

impl ReconcileError {
    /// The dispatch error that decided the outcome, if any.
    pub fn dispatch_error(&self) -> Option<&DispatchError> {
        match self {
            ReconcileError::Order(e) | ReconcileError::Account(e) => Some(e),
            ReconcileError::CompensationFailed { cause, .. } => Some(cause),
            ReconcileError::AccountNotUsable(_) => None,
        }
    }
}

/// A payment applied to both sides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedPayment {
    pub payment_id: Uuid,
    pub transaction_id: Uuid,
    pub total_paid: i64,
    pub payment_status: PaymentStatus,
}

/// A payment undone on both sides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReversedPayment {
    pub payment_id: Uuid,
    pub reversal_transaction_id: Uuid,
    pub total_paid: i64,
    pub payment_status: PaymentStatus,
}

/// Outstanding balance of one purchase order, from the read model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentSummary {
    pub order_id: PurchaseOrderId,
    pub total: i64,
    pub paid: i64,
    pub remaining: i64,
    pub status: PaymentStatus,
    pub payments: Vec<PurchaseOrderPayment>,
}

#[derive(Debug)]
pub struct PaymentReconciler<S, B> {
    dispatcher: Arc<CommandDispatcher<S, B>>,
    projections: ProjectionSet,
}

impl<S, B> Clone for PaymentReconciler<S, B> {
    fn clone(&self) -> Self {
        Self {
            dispatcher: self.dispatcher.clone(),
            projections: self.projections.clone(),
        }
    }
}

impl<S, B> PaymentReconciler<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(dispatcher: Arc<CommandDispatcher<S, B>>, projections: ProjectionSet) -> Self {
        Self {
            dispatcher,
            projections,
        }
    }

    /// Pay `amount` (base currency) of a purchase order from `account_id`.
    #[allow(clippy::too_many_arguments)]
    pub fn apply_payment(
        &self,
        tenant_id: TenantId,
        order_id: PurchaseOrderId,
        account_id: AccountId,
        amount: Money,
        method: PaymentMethod,
        reference: Option<String>,
        actor: Option<UserId>,
    ) -> Result<AppliedPayment, ReconcileError> {
        let account = self.load_account(tenant_id, account_id)?;
        if !account.is_open() {
            return Err(ReconcileError::AccountNotUsable(format!(
                "account {account_id} is not active"
            )));
        }
        if account.currency() != BASE_CURRENCY {
            return Err(ReconcileError::AccountNotUsable(format!(
                "account {account_id} holds {}, payments are settled in {BASE_CURRENCY}",
                account.currency()
            )));
        }

        let payment_id = Uuid::now_v7();
        let transaction_id = Uuid::now_v7();
        let span = tracing::info_span!(
            "apply_payment",
            tenant_id = %tenant_id,
            order_id = %order_id,
            account_id = %account_id,
            payment_id = %payment_id,
            actor = ?actor,
        );
        let _guard = span.enter();

        let recorded = self
            .dispatch_order(
                tenant_id,
                order_id,
                PurchaseOrderCommand::RecordPayment(RecordPayment {
                    tenant_id,
                    order_id,
                    payment_id,
                    account_id,
                    amount,
                    method,
                    reference: reference.clone(),
                    occurred_at: Utc::now(),
                }),
            )
            .map_err(ReconcileError::Order)?;
        tracing::info!(amount = amount.amount_minor, "payment recorded on purchase order");

        let debit = self.withdraw(
            tenant_id,
            account_id,
            transaction_id,
            amount,
            payment_id,
            reference,
            order_id,
        );
        if let Err(cause) = debit {
            tracing::warn!(error = %cause, "account debit failed, reversing order payment");
            return match self.reverse_order_payment(tenant_id, order_id, payment_id, DEBIT_FAILED_REASON) {
                Ok(_) => Err(ReconcileError::Account(cause)),
                Err(compensation) => {
                    tracing::error!(error = %compensation, "compensating order reversal failed");
                    Err(ReconcileError::CompensationFailed {
                        step: "account debit",
                        cause,
                        compensation,
                    })
                }
            };
        }
        tracing::info!(transaction_id = %transaction_id, "account debited");

        let (total_paid, payment_status) = order_totals(&recorded).map_err(ReconcileError::Order)?;
        Ok(AppliedPayment {
            payment_id,
            transaction_id,
            total_paid,
            payment_status,
        })
    }

    /// Undo a completed payment: credit the account back, then reopen the
    /// amount on the purchase order.
    pub fn reverse_payment(
        &self,
        tenant_id: TenantId,
        order_id: PurchaseOrderId,
        payment_id: Uuid,
        reason: &str,
    ) -> Result<ReversedPayment, ReconcileError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(ReconcileError::Order(DispatchError::Validation(
                "reversal reason cannot be empty".to_string(),
            )));
        }

        let order: PurchaseOrder = self
            .dispatcher
            .load(tenant_id, order_id.0, |_, _| PurchaseOrder::empty(order_id))
            .map_err(ReconcileError::Order)?;
        if order.tenant_id() != Some(tenant_id) {
            return Err(ReconcileError::Order(DispatchError::NotFound));
        }
        let payment = order
            .payment(payment_id)
            .cloned()
            .ok_or(ReconcileError::Order(DispatchError::NotFound))?;
        if !payment.is_completed() {
            return Err(ReconcileError::Order(DispatchError::Concurrency(
                "payment already reversed".to_string(),
            )));
        }

        let span = tracing::info_span!(
            "reverse_payment",
            tenant_id = %tenant_id,
            order_id = %order_id,
            account_id = %payment.account_id,
            payment_id = %payment_id,
        );
        let _guard = span.enter();

        let reversal_transaction_id = Uuid::now_v7();
        self.dispatch_account(
            tenant_id,
            payment.account_id,
            AccountCommand::ReverseRelated(ReverseRelated {
                tenant_id,
                account_id: payment.account_id,
                related: RelatedEntity::purchase_order_payment(payment_id),
                reversal_id: reversal_transaction_id,
                reason: Some(reason.to_string()),
                occurred_at: Utc::now(),
            }),
        )
        .map_err(ReconcileError::Account)?;
        tracing::info!(transaction_id = %reversal_transaction_id, "account credited back");

        let reversed = match self.reverse_order_payment(tenant_id, order_id, payment_id, reason) {
            Ok(committed) => committed,
            Err(cause) => {
                tracing::warn!(error = %cause, "order reversal failed, re-applying account debit");
                let redo = self.withdraw(
                    tenant_id,
                    payment.account_id,
                    Uuid::now_v7(),
                    Money::new(payment.amount, BASE_CURRENCY),
                    payment_id,
                    payment.reference.clone(),
                    order_id,
                );
                return match redo {
                    Ok(_) => Err(ReconcileError::Order(cause)),
                    Err(compensation) => {
                        tracing::error!(error = %compensation, "re-applying account debit failed");
                        Err(ReconcileError::CompensationFailed {
                            step: "order reversal",
                            cause,
                            compensation,
                        })
                    }
                };
            }
        };
        tracing::info!("payment reversed on purchase order");

        let (total_paid, payment_status) = order_totals(&reversed).map_err(ReconcileError::Order)?;
        Ok(ReversedPayment {
            payment_id,
            reversal_transaction_id,
            total_paid,
            payment_status,
        })
    }

    /// Payment position of an order as the read model currently sees it.
    pub fn payment_summary(&self, tenant_id: TenantId, order_id: PurchaseOrderId) -> Option<PaymentSummary> {
        let rm = self.projections.purchase_orders.get(tenant_id, &order_id)?;
        Some(PaymentSummary {
            order_id,
            total: rm.total_base,
            paid: rm.total_paid,
            remaining: rm.remaining(),
            status: rm.payment_status,
            payments: rm.payments,
        })
    }

    fn load_account(&self, tenant_id: TenantId, account_id: AccountId) -> Result<FinanceAccount, ReconcileError> {
        let account: FinanceAccount = self
            .dispatcher
            .load(tenant_id, account_id.0, |_, _| FinanceAccount::empty(account_id))
            .map_err(ReconcileError::Account)?;
        if account.tenant_id() != Some(tenant_id) {
            return Err(ReconcileError::Account(DispatchError::NotFound));
        }
        Ok(account)
    }

    #[allow(clippy::too_many_arguments)]
    fn withdraw(
        &self,
        tenant_id: TenantId,
        account_id: AccountId,
        transaction_id: Uuid,
        amount: Money,
        payment_id: Uuid,
        reference: Option<String>,
        order_id: PurchaseOrderId,
    ) -> Result<Vec<StoredEvent>, DispatchError> {
        self.dispatch_account(
            tenant_id,
            account_id,
            AccountCommand::Withdraw(Withdraw {
                tenant_id,
                account_id,
                transaction_id,
                amount,
                description: Some(format!("Payment for purchase order {order_id}")),
                reference,
                related: Some(RelatedEntity::purchase_order_payment(payment_id)),
                occurred_at: Utc::now(),
            }),
        )
    }

    fn reverse_order_payment(
        &self,
        tenant_id: TenantId,
        order_id: PurchaseOrderId,
        payment_id: Uuid,
        reason: &str,
    ) -> Result<Vec<StoredEvent>, DispatchError> {
        self.dispatch_order(
            tenant_id,
            order_id,
            PurchaseOrderCommand::ReversePayment(ReversePayment {
                tenant_id,
                order_id,
                payment_id,
                reason: reason.to_string(),
                occurred_at: Utc::now(),
            }),
        )
    }

    fn dispatch_order(
        &self,
        tenant_id: TenantId,
        order_id: PurchaseOrderId,
        command: PurchaseOrderCommand,
    ) -> Result<Vec<StoredEvent>, DispatchError> {
        self.dispatcher.dispatch::<PurchaseOrder>(
            tenant_id,
            order_id.0,
            purchasing::AGGREGATE_TYPE,
            command,
            |_, _| PurchaseOrder::empty(order_id),
        )
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

/// `(total_paid, payment_status)` carried by the payment event just committed.
fn order_totals(committed: &[StoredEvent]) -> Result<(i64, PaymentStatus), DispatchError> {
    for stored in committed {
        let event: PurchaseOrderEvent = serde_json::from_value(stored.payload.clone())
            .map_err(|e| DispatchError::Deserialize(e.to_string()))?;
        match event {
            PurchaseOrderEvent::PaymentRecorded(e) => return Ok((e.total_paid, e.payment_status)),
            PurchaseOrderEvent::PaymentReversed(e) => return Ok((e.total_paid, e.payment_status)),
            _ => {}
        }
    }
    Err(DispatchError::InvariantViolation(
        "payment command committed no payment event".to_string(),
    ))
}
