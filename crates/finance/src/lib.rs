//! Finance domain module (event-sourced).
//!
//! Finance accounts (cash drawers, bank and mobile-money accounts) with an
//! append-only ledger of transactions. Corrections never delete: a reversal
//! appends a compensating transaction.

pub mod account;

pub use account::{
    AccountClosed, AccountCommand, AccountEvent, AccountId, AccountKind, AccountOpened,
    AccountStatus, AccountTransaction, CloseAccount, Deposit, FinanceAccount, OpenAccount,
    RecordExpense, RelatedEntity, RelatedEntityKind, ReverseRelated, ReverseTransaction,
    TransactionKind, TransactionRecorded, TransactionReversed, Withdraw,
};
