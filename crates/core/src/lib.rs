//! `branchpos-core`: domain building blocks shared by every branchpos module.
//!
//! Pure domain primitives only: identifiers, errors, aggregate contracts and
//! money. Nothing in here performs IO.

pub mod aggregate;
pub mod error;
pub mod id;
pub mod money;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use error::{DomainError, DomainResult};
pub use id::{AggregateId, BranchId, TenantId, UserId};
pub use money::{CurrencyCode, Money, ValueObject, BASE_CURRENCY};
