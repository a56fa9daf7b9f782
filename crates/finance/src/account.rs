use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use branchpos_branches::Ownership;
use branchpos_core::{
    Aggregate, AggregateId, AggregateRoot, CurrencyCode, DomainError, Money, TenantId,
};
use branchpos_events::Event;

/// Finance account identifier (aggregate id).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub AggregateId);

impl AccountId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for AccountId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountKind {
    Cash,
    Bank,
    MobileMoney,
    CreditCard,
    Savings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Income,
    Expense,
    TransferIn,
    TransferOut,
    /// Opening balance.
    Adjustment,
    Reversal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelatedEntityKind {
    PurchaseOrderPayment,
    Expense,
    Transfer,
    Sale,
}

/// The business record a ledger transaction was written for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelatedEntity {
    pub kind: RelatedEntityKind,
    pub id: Uuid,
}

impl RelatedEntity {
    pub fn purchase_order_payment(payment_id: Uuid) -> Self {
        Self {
            kind: RelatedEntityKind::PurchaseOrderPayment,
            id: payment_id,
        }
    }

    /// Both legs of an account-to-account transfer share this reference.
    pub fn transfer(transfer_id: Uuid) -> Self {
        Self {
            kind: RelatedEntityKind::Transfer,
            id: transfer_id,
        }
    }
}

/// One ledger line. `amount` is always positive; the direction is
/// `balance_after - balance_before`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountTransaction {
    pub transaction_id: Uuid,
    pub kind: TransactionKind,
    pub amount: i64,
    pub balance_before: i64,
    pub balance_after: i64,
    pub description: Option<String>,
    pub reference: Option<String>,
    pub related: Option<RelatedEntity>,
    pub reversed_by: Option<Uuid>,
    pub reverses: Option<Uuid>,
    pub occurred_at: DateTime<Utc>,
}

impl AccountTransaction {
    /// Signed effect on the balance.
    pub fn effect(&self) -> i64 {
        self.balance_after - self.balance_before
    }

    pub fn is_reversed(&self) -> bool {
        self.reversed_by.is_some()
    }

    /// Open for reversal: not itself a reversal and not yet reversed.
    pub fn is_reversible(&self) -> bool {
        self.kind != TransactionKind::Reversal && self.reversed_by.is_none()
    }
}

/// Aggregate root: FinanceAccount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinanceAccount {
    id: AccountId,
    tenant_id: Option<TenantId>,
    name: String,
    kind: AccountKind,
    ownership: Ownership,
    balance: Money,
    allow_negative: bool,
    status: AccountStatus,
    transactions: Vec<AccountTransaction>,
    version: u64,
    created: bool,
}

impl FinanceAccount {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: AccountId) -> Self {
        Self {
            id,
            tenant_id: None,
            name: String::new(),
            kind: AccountKind::Cash,
            ownership: Ownership::unassigned(),
            balance: Money::zero(branchpos_core::BASE_CURRENCY),
            allow_negative: false,
            status: AccountStatus::Active,
            transactions: Vec::new(),
            version: 0,
            created: false,
        }
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> AccountKind {
        self.kind
    }

    pub fn currency(&self) -> CurrencyCode {
        self.balance.currency
    }

    pub fn ownership(&self) -> Ownership {
        self.ownership
    }

    pub fn balance(&self) -> Money {
        self.balance
    }

    pub fn allow_negative(&self) -> bool {
        self.allow_negative
    }

    pub fn status(&self) -> AccountStatus {
        self.status
    }

    pub fn is_open(&self) -> bool {
        self.created && self.status == AccountStatus::Active
    }

    pub fn transactions(&self) -> &[AccountTransaction] {
        &self.transactions
    }

    pub fn transaction(&self, transaction_id: Uuid) -> Option<&AccountTransaction> {
        self.transactions
            .iter()
            .find(|t| t.transaction_id == transaction_id)
    }

    /// The live (not reversed) transaction written for `related`, if any.
    pub fn live_transaction_for(&self, related: &RelatedEntity) -> Option<&AccountTransaction> {
        self.transactions
            .iter()
            .find(|t| t.related.as_ref() == Some(related) && t.is_reversible())
    }
}

impl AggregateRoot for FinanceAccount {
    type Id = AccountId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenAccount {
    pub tenant_id: TenantId,
    pub account_id: AccountId,
    pub name: String,
    pub kind: AccountKind,
    pub ownership: Ownership,
    pub opening_balance: Money,
    pub allow_negative: bool,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deposit {
    pub tenant_id: TenantId,
    pub account_id: AccountId,
    pub transaction_id: Uuid,
    pub amount: Money,
    pub description: Option<String>,
    pub reference: Option<String>,
    pub related: Option<RelatedEntity>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Withdraw {
    pub tenant_id: TenantId,
    pub account_id: AccountId,
    pub transaction_id: Uuid,
    pub amount: Money,
    pub description: Option<String>,
    pub reference: Option<String>,
    pub related: Option<RelatedEntity>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordExpense (a withdrawal booked against an expense record).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordExpense {
    pub tenant_id: TenantId,
    pub account_id: AccountId,
    pub expense_id: Uuid,
    pub transaction_id: Uuid,
    pub amount: Money,
    pub category: String,
    pub description: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReverseTransaction {
    pub tenant_id: TenantId,
    pub account_id: AccountId,
    /// Transaction being reversed.
    pub transaction_id: Uuid,
    pub reversal_id: Uuid,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReverseRelated {
    pub tenant_id: TenantId,
    pub account_id: AccountId,
    pub related: RelatedEntity,
    pub reversal_id: Uuid,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseAccount {
    pub tenant_id: TenantId,
    pub account_id: AccountId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountCommand {
    OpenAccount(OpenAccount),
    Deposit(Deposit),
    Withdraw(Withdraw),
    RecordExpense(RecordExpense),
    ReverseTransaction(ReverseTransaction),
    ReverseRelated(ReverseRelated),
    CloseAccount(CloseAccount),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountOpened {
    pub tenant_id: TenantId,
    pub account_id: AccountId,
    pub name: String,
    pub kind: AccountKind,
    pub currency: CurrencyCode,
    pub ownership: Ownership,
    pub allow_negative: bool,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecorded {
    pub tenant_id: TenantId,
    pub account_id: AccountId,
    pub transaction: AccountTransaction,
    /// Expense category when the transaction books an expense.
    pub category: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionReversed {
    pub tenant_id: TenantId,
    pub account_id: AccountId,
    pub original_transaction_id: Uuid,
    pub reversal: AccountTransaction,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountClosed {
    pub tenant_id: TenantId,
    pub account_id: AccountId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountEvent {
    AccountOpened(AccountOpened),
    TransactionRecorded(TransactionRecorded),
    TransactionReversed(TransactionReversed),
    AccountClosed(AccountClosed),
}

impl Event for AccountEvent {
    fn event_type(&self) -> &'static str {
        match self {
            AccountEvent::AccountOpened(_) => "finance.account.opened",
            AccountEvent::TransactionRecorded(_) => "finance.account.transaction_recorded",
            AccountEvent::TransactionReversed(_) => "finance.account.transaction_reversed",
            AccountEvent::AccountClosed(_) => "finance.account.closed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            AccountEvent::AccountOpened(e) => e.occurred_at,
            AccountEvent::TransactionRecorded(e) => e.occurred_at,
            AccountEvent::TransactionReversed(e) => e.occurred_at,
            AccountEvent::AccountClosed(e) => e.occurred_at,
        }
    }
}

impl Aggregate for FinanceAccount {
    type Command = AccountCommand;
    type Event = AccountEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            AccountEvent::AccountOpened(e) => {
                self.id = e.account_id;
                self.tenant_id = Some(e.tenant_id);
                self.name = e.name.clone();
                self.kind = e.kind;
                self.ownership = e.ownership;
                self.balance = Money::zero(e.currency);
                self.allow_negative = e.allow_negative;
                self.status = AccountStatus::Active;
                self.created = true;
            }
            AccountEvent::TransactionRecorded(e) => {
                self.balance.amount_minor = e.transaction.balance_after;
                self.transactions.push(e.transaction.clone());
            }
            AccountEvent::TransactionReversed(e) => {
                if let Some(original) = self
                    .transactions
                    .iter_mut()
                    .find(|t| t.transaction_id == e.original_transaction_id)
                {
                    original.reversed_by = Some(e.reversal.transaction_id);
                }
                self.balance.amount_minor = e.reversal.balance_after;
                self.transactions.push(e.reversal.clone());
            }
            AccountEvent::AccountClosed(_) => {
                self.status = AccountStatus::Closed;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            AccountCommand::OpenAccount(cmd) => self.handle_open(cmd),
            AccountCommand::Deposit(cmd) => self.handle_deposit(cmd),
            AccountCommand::Withdraw(cmd) => self.handle_withdraw(cmd),
            AccountCommand::RecordExpense(cmd) => self.handle_expense(cmd),
            AccountCommand::ReverseTransaction(cmd) => self.handle_reverse(cmd),
            AccountCommand::ReverseRelated(cmd) => self.handle_reverse_related(cmd),
            AccountCommand::CloseAccount(cmd) => self.handle_close(cmd),
        }
    }
}

impl FinanceAccount {
    fn ensure_open(&self, tenant_id: TenantId, account_id: AccountId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        if self.id != account_id {
            return Err(DomainError::invariant("account_id mismatch"));
        }
        if self.status == AccountStatus::Closed {
            return Err(DomainError::invariant("account is closed"));
        }
        Ok(())
    }

    fn ensure_new_transaction(&self, transaction_id: Uuid) -> Result<(), DomainError> {
        if self.transaction(transaction_id).is_some() {
            return Err(DomainError::conflict("transaction already recorded"));
        }
        Ok(())
    }

    /// Positive, in the account currency.
    fn checked_amount(&self, amount: Money) -> Result<i64, DomainError> {
        if amount.currency != self.currency() {
            return Err(DomainError::validation(format!(
                "amount currency {} does not match account currency {}",
                amount.currency,
                self.currency()
            )));
        }
        if !amount.is_positive() {
            return Err(DomainError::validation("amount must be positive"));
        }
        Ok(amount.amount_minor)
    }

    fn debited_balance(&self, amount: i64) -> Result<i64, DomainError> {
        let after = self
            .balance
            .checked_sub(Money::new(amount, self.currency()))?
            .amount_minor;
        if after < 0 && !self.allow_negative {
            return Err(DomainError::invariant(format!(
                "insufficient balance: available {}, required {}",
                self.balance.amount_minor, amount
            )));
        }
        Ok(after)
    }

    fn credited_balance(&self, amount: i64) -> Result<i64, DomainError> {
        Ok(self
            .balance
            .checked_add(Money::new(amount, self.currency()))?
            .amount_minor)
    }

    fn handle_open(&self, cmd: &OpenAccount) -> Result<Vec<AccountEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("account already exists"));
        }
        if cmd.name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        if cmd.opening_balance.amount_minor < 0 && !cmd.allow_negative {
            return Err(DomainError::validation("opening balance cannot be negative"));
        }

        let mut events = vec![AccountEvent::AccountOpened(AccountOpened {
            tenant_id: cmd.tenant_id,
            account_id: cmd.account_id,
            name: cmd.name.trim().to_string(),
            kind: cmd.kind,
            currency: cmd.opening_balance.currency,
            ownership: cmd.ownership,
            allow_negative: cmd.allow_negative,
            occurred_at: cmd.occurred_at,
        })];

        let opening = cmd.opening_balance.amount_minor;
        if opening != 0 {
            events.push(AccountEvent::TransactionRecorded(TransactionRecorded {
                tenant_id: cmd.tenant_id,
                account_id: cmd.account_id,
                transaction: AccountTransaction {
                    transaction_id: Uuid::now_v7(),
                    kind: TransactionKind::Adjustment,
                    amount: opening.abs(),
                    balance_before: 0,
                    balance_after: opening,
                    description: Some("opening balance".to_string()),
                    reference: None,
                    related: None,
                    reversed_by: None,
                    reverses: None,
                    occurred_at: cmd.occurred_at,
                },
                category: None,
                occurred_at: cmd.occurred_at,
            }));
        }

        Ok(events)
    }

    fn handle_deposit(&self, cmd: &Deposit) -> Result<Vec<AccountEvent>, DomainError> {
        self.ensure_open(cmd.tenant_id, cmd.account_id)?;
        self.ensure_new_transaction(cmd.transaction_id)?;
        let amount = self.checked_amount(cmd.amount)?;

        if let Some(related) = &cmd.related {
            if self.live_transaction_for(related).is_some() {
                return Err(DomainError::conflict("related entity already has a live transaction"));
            }
        }

        let balance_after = self.credited_balance(amount)?;

        let kind = match cmd.related.map(|r| r.kind) {
            Some(RelatedEntityKind::Transfer) => TransactionKind::TransferIn,
            _ => TransactionKind::Income,
        };

        Ok(vec![self.recorded(
            cmd.tenant_id,
            AccountTransaction {
                transaction_id: cmd.transaction_id,
                kind,
                amount,
                balance_before: self.balance.amount_minor,
                balance_after,
                description: cmd.description.clone(),
                reference: cmd.reference.clone(),
                related: cmd.related,
                reversed_by: None,
                reverses: None,
                occurred_at: cmd.occurred_at,
            },
            None,
        )])
    }

    fn handle_withdraw(&self, cmd: &Withdraw) -> Result<Vec<AccountEvent>, DomainError> {
        self.ensure_open(cmd.tenant_id, cmd.account_id)?;
        self.ensure_new_transaction(cmd.transaction_id)?;
        let amount = self.checked_amount(cmd.amount)?;

        if let Some(related) = &cmd.related {
            if self.live_transaction_for(related).is_some() {
                return Err(DomainError::conflict("related entity already has a live transaction"));
            }
        }

        let balance_after = self.debited_balance(amount)?;

        let kind = match cmd.related.map(|r| r.kind) {
            Some(RelatedEntityKind::Transfer) => TransactionKind::TransferOut,
            _ => TransactionKind::Expense,
        };

        Ok(vec![self.recorded(
            cmd.tenant_id,
            AccountTransaction {
                transaction_id: cmd.transaction_id,
                kind,
                amount,
                balance_before: self.balance.amount_minor,
                balance_after,
                description: cmd.description.clone(),
                reference: cmd.reference.clone(),
                related: cmd.related,
                reversed_by: None,
                reverses: None,
                occurred_at: cmd.occurred_at,
            },
            None,
        )])
    }

    fn handle_expense(&self, cmd: &RecordExpense) -> Result<Vec<AccountEvent>, DomainError> {
        self.ensure_open(cmd.tenant_id, cmd.account_id)?;
        self.ensure_new_transaction(cmd.transaction_id)?;

        let category = cmd.category.trim();
        if category.is_empty() {
            return Err(DomainError::validation("expense category cannot be empty"));
        }

        let related = RelatedEntity {
            kind: RelatedEntityKind::Expense,
            id: cmd.expense_id,
        };
        if self.live_transaction_for(&related).is_some() {
            return Err(DomainError::conflict("expense already booked"));
        }

        let amount = self.checked_amount(cmd.amount)?;
        let balance_after = self.debited_balance(amount)?;

        Ok(vec![self.recorded(
            cmd.tenant_id,
            AccountTransaction {
                transaction_id: cmd.transaction_id,
                kind: TransactionKind::Expense,
                amount,
                balance_before: self.balance.amount_minor,
                balance_after,
                description: cmd.description.clone(),
                reference: None,
                related: Some(related),
                reversed_by: None,
                reverses: None,
                occurred_at: cmd.occurred_at,
            },
            Some(category.to_string()),
        )])
    }

    fn handle_reverse(&self, cmd: &ReverseTransaction) -> Result<Vec<AccountEvent>, DomainError> {
        self.ensure_open(cmd.tenant_id, cmd.account_id)?;
        let original = self
            .transaction(cmd.transaction_id)
            .ok_or_else(DomainError::not_found)?;
        self.reversal_of(original, cmd.tenant_id, cmd.reversal_id, cmd.reason.clone(), cmd.occurred_at)
    }

    fn handle_reverse_related(&self, cmd: &ReverseRelated) -> Result<Vec<AccountEvent>, DomainError> {
        self.ensure_open(cmd.tenant_id, cmd.account_id)?;
        let original = self
            .live_transaction_for(&cmd.related)
            .ok_or_else(DomainError::not_found)?;
        self.reversal_of(original, cmd.tenant_id, cmd.reversal_id, cmd.reason.clone(), cmd.occurred_at)
    }

    fn reversal_of(
        &self,
        original: &AccountTransaction,
        tenant_id: TenantId,
        reversal_id: Uuid,
        reason: Option<String>,
        occurred_at: DateTime<Utc>,
    ) -> Result<Vec<AccountEvent>, DomainError> {
        if original.kind == TransactionKind::Reversal {
            return Err(DomainError::invariant("a reversal cannot be reversed"));
        }
        if original.is_reversed() {
            return Err(DomainError::conflict("transaction already reversed"));
        }
        self.ensure_new_transaction(reversal_id)?;

        // Undo the original effect: a debit is credited back and vice versa.
        let balance_after = if original.effect() < 0 {
            self.credited_balance(original.amount)?
        } else {
            self.debited_balance(original.amount)?
        };

        Ok(vec![AccountEvent::TransactionReversed(TransactionReversed {
            tenant_id,
            account_id: self.id,
            original_transaction_id: original.transaction_id,
            reversal: AccountTransaction {
                transaction_id: reversal_id,
                kind: TransactionKind::Reversal,
                amount: original.amount,
                balance_before: self.balance.amount_minor,
                balance_after,
                description: reason.clone(),
                reference: original.reference.clone(),
                related: original.related,
                reversed_by: None,
                reverses: Some(original.transaction_id),
                occurred_at,
            },
            reason,
            occurred_at,
        })])
    }

    fn handle_close(&self, cmd: &CloseAccount) -> Result<Vec<AccountEvent>, DomainError> {
        self.ensure_open(cmd.tenant_id, cmd.account_id)?;
        if self.balance.amount_minor != 0 {
            return Err(DomainError::invariant("account balance must be zero to close"));
        }

        Ok(vec![AccountEvent::AccountClosed(AccountClosed {
            tenant_id: cmd.tenant_id,
            account_id: cmd.account_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn recorded(
        &self,
        tenant_id: TenantId,
        transaction: AccountTransaction,
        category: Option<String>,
    ) -> AccountEvent {
        let occurred_at = transaction.occurred_at;
        AccountEvent::TransactionRecorded(TransactionRecorded {
            tenant_id,
            account_id: self.id,
            transaction,
            category,
            occurred_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use branchpos_core::BASE_CURRENCY;
    use branchpos_events::execute;
    use proptest::prelude::*;

    fn tzs(amount: i64) -> Money {
        Money::new(amount, BASE_CURRENCY)
    }

    fn opened(opening: i64, allow_negative: bool) -> (FinanceAccount, TenantId, AccountId) {
        let tenant_id = TenantId::new();
        let account_id = AccountId::new(AggregateId::new());
        let mut account = FinanceAccount::empty(account_id);
        execute(
            &mut account,
            &AccountCommand::OpenAccount(OpenAccount {
                tenant_id,
                account_id,
                name: "M-Pesa Till".to_string(),
                kind: AccountKind::MobileMoney,
                ownership: Ownership::unassigned(),
                opening_balance: tzs(opening),
                allow_negative,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        (account, tenant_id, account_id)
    }

    fn withdraw(
        account: &mut FinanceAccount,
        tenant_id: TenantId,
        account_id: AccountId,
        amount: i64,
        related: Option<RelatedEntity>,
    ) -> Result<Uuid, DomainError> {
        let transaction_id = Uuid::now_v7();
        execute(
            account,
            &AccountCommand::Withdraw(Withdraw {
                tenant_id,
                account_id,
                transaction_id,
                amount: tzs(amount),
                description: None,
                reference: None,
                related,
                occurred_at: Utc::now(),
            }),
        )?;
        Ok(transaction_id)
    }

    fn reverse(
        account: &mut FinanceAccount,
        tenant_id: TenantId,
        account_id: AccountId,
        transaction_id: Uuid,
    ) -> Result<Vec<AccountEvent>, DomainError> {
        execute(
            account,
            &AccountCommand::ReverseTransaction(ReverseTransaction {
                tenant_id,
                account_id,
                transaction_id,
                reversal_id: Uuid::now_v7(),
                reason: None,
                occurred_at: Utc::now(),
            }),
        )
    }

    #[test]
    fn opening_balance_is_booked_as_adjustment() {
        let (account, _, _) = opened(500_000, false);
        assert_eq!(account.balance(), tzs(500_000));
        assert_eq!(account.transactions().len(), 1);
        assert_eq!(account.transactions()[0].kind, TransactionKind::Adjustment);
        assert_eq!(account.version(), 2);
    }

    #[test]
    fn withdrawal_records_balance_before_and_after() {
        let (mut account, tenant_id, account_id) = opened(100_000, false);
        let tx = withdraw(&mut account, tenant_id, account_id, 30_000, None).unwrap();

        let line = account.transaction(tx).unwrap();
        assert_eq!(line.kind, TransactionKind::Expense);
        assert_eq!(line.balance_before, 100_000);
        assert_eq!(line.balance_after, 70_000);
        assert_eq!(account.balance(), tzs(70_000));
    }

    #[test]
    fn insufficient_balance_is_rejected_unless_negative_allowed() {
        let (mut account, tenant_id, account_id) = opened(10_000, false);
        let err = withdraw(&mut account, tenant_id, account_id, 10_001, None).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));

        let (mut card, tenant_id, account_id) = opened(0, true);
        withdraw(&mut card, tenant_id, account_id, 25_000, None).unwrap();
        assert_eq!(card.balance(), tzs(-25_000));
    }

    #[test]
    fn foreign_currency_amount_is_rejected() {
        let (account, tenant_id, account_id) = opened(10_000, false);
        let err = account
            .handle(&AccountCommand::Deposit(Deposit {
                tenant_id,
                account_id,
                transaction_id: Uuid::now_v7(),
                amount: Money::new(100, "USD".parse().unwrap()),
                description: None,
                reference: None,
                related: None,
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn reversal_restores_balance_and_marks_original() {
        let (mut account, tenant_id, account_id) = opened(100_000, false);
        let tx = withdraw(&mut account, tenant_id, account_id, 40_000, None).unwrap();

        reverse(&mut account, tenant_id, account_id, tx).unwrap();

        assert_eq!(account.balance(), tzs(100_000));
        let original = account.transaction(tx).unwrap();
        let reversal_id = original.reversed_by.unwrap();
        let reversal = account.transaction(reversal_id).unwrap();
        assert_eq!(reversal.kind, TransactionKind::Reversal);
        assert_eq!(reversal.reverses, Some(tx));
        assert_eq!(reversal.effect(), 40_000);
    }

    #[test]
    fn double_reversal_and_reversing_a_reversal_are_rejected() {
        let (mut account, tenant_id, account_id) = opened(100_000, false);
        let tx = withdraw(&mut account, tenant_id, account_id, 40_000, None).unwrap();
        reverse(&mut account, tenant_id, account_id, tx).unwrap();

        let err = reverse(&mut account, tenant_id, account_id, tx).unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));

        let reversal_id = account.transaction(tx).unwrap().reversed_by.unwrap();
        let err = reverse(&mut account, tenant_id, account_id, reversal_id).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn reverse_related_targets_the_live_payment_transaction() {
        let (mut account, tenant_id, account_id) = opened(100_000, false);
        let related = RelatedEntity::purchase_order_payment(Uuid::now_v7());
        withdraw(&mut account, tenant_id, account_id, 60_000, Some(related)).unwrap();

        let reverse_related = AccountCommand::ReverseRelated(ReverseRelated {
            tenant_id,
            account_id,
            related,
            reversal_id: Uuid::now_v7(),
            reason: Some("payment deleted".to_string()),
            occurred_at: Utc::now(),
        });
        execute(&mut account, &reverse_related).unwrap();
        assert_eq!(account.balance(), tzs(100_000));
        assert!(account.live_transaction_for(&related).is_none());

        // Nothing live left to reverse.
        let err = account.handle(&reverse_related).unwrap_err();
        assert_eq!(err, DomainError::NotFound);
    }

    #[test]
    fn expense_is_linked_to_its_record() {
        let (mut account, tenant_id, account_id) = opened(50_000, false);
        let expense_id = Uuid::now_v7();
        let events = execute(
            &mut account,
            &AccountCommand::RecordExpense(RecordExpense {
                tenant_id,
                account_id,
                expense_id,
                transaction_id: Uuid::now_v7(),
                amount: tzs(12_000),
                category: "Rent".to_string(),
                description: Some("October rent".to_string()),
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();

        match &events[0] {
            AccountEvent::TransactionRecorded(e) => {
                assert_eq!(e.category.as_deref(), Some("Rent"));
                assert_eq!(
                    e.transaction.related,
                    Some(RelatedEntity {
                        kind: RelatedEntityKind::Expense,
                        id: expense_id
                    })
                );
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(account.balance(), tzs(38_000));
    }

    #[test]
    fn transfer_legs_are_typed_and_booked_once() {
        let (mut source, tenant_id, source_id) = opened(80_000, false);
        let transfer = RelatedEntity::transfer(Uuid::now_v7());

        let out = withdraw(&mut source, tenant_id, source_id, 30_000, Some(transfer)).unwrap();
        assert_eq!(source.transaction(out).unwrap().kind, TransactionKind::TransferOut);
        assert!(matches!(
            withdraw(&mut source, tenant_id, source_id, 30_000, Some(transfer)),
            Err(DomainError::Conflict(_))
        ));

        let (mut target, target_tenant, target_id) = opened(0, false);
        let deposit = |transaction_id| {
            AccountCommand::Deposit(Deposit {
                tenant_id: target_tenant,
                account_id: target_id,
                transaction_id,
                amount: tzs(30_000),
                description: None,
                reference: None,
                related: Some(transfer),
                occurred_at: Utc::now(),
            })
        };
        let events = execute(&mut target, &deposit(Uuid::now_v7())).unwrap();
        match &events[0] {
            AccountEvent::TransactionRecorded(e) => assert_eq!(e.transaction.kind, TransactionKind::TransferIn),
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(target.balance(), tzs(30_000));

        let again = deposit(Uuid::now_v7());
        assert!(matches!(target.handle(&again), Err(DomainError::Conflict(_))));
    }

    #[test]
    fn close_requires_zero_balance() {
        let (mut account, tenant_id, account_id) = opened(1_000, false);
        let close = AccountCommand::CloseAccount(CloseAccount {
            tenant_id,
            account_id,
            occurred_at: Utc::now(),
        });
        assert!(matches!(account.handle(&close), Err(DomainError::InvariantViolation(_))));

        withdraw(&mut account, tenant_id, account_id, 1_000, None).unwrap();
        execute(&mut account, &close).unwrap();
        assert!(!account.is_open());
        assert!(matches!(
            withdraw(&mut account, tenant_id, account_id, 1, None),
            Err(DomainError::InvariantViolation(_))
        ));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            ..ProptestConfig::default()
        })]

        #[test]
        fn reversing_every_transaction_restores_opening_balance(
            opening in 0i64..1_000_000,
            amounts in prop::collection::vec(1i64..200_000, 1..12),
        ) {
            let (mut account, tenant_id, account_id) = opened(opening, true);

            let mut ids = Vec::new();
            for amount in amounts {
                ids.push(withdraw(&mut account, tenant_id, account_id, amount, None).unwrap());
            }
            for id in ids {
                reverse(&mut account, tenant_id, account_id, id).unwrap();
            }

            prop_assert_eq!(account.balance().amount_minor, opening);
            for line in account.transactions() {
                prop_assert_eq!(line.effect().abs(), line.amount);
            }
        }
    }
}
