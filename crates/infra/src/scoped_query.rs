//! Read-side visibility filtering.
//!
//! Read models know their own ownership; the requesting branch's
//! [`VisibilityPolicy`] decides whether each row is returned.

use branchpos_branches::{EntityKind, Ownership, VisibilityPolicy};
use branchpos_core::BranchId;
use branchpos_parties::PartyKind;

use crate::projections::{
    AccountReadModel, PartyReadModel, ProductReadModel, PurchaseOrderReadModel, StockTransferReadModel,
};

/// A read-model row owned by a branch (or by none).
pub trait BranchOwned {
    fn entity_kind(&self) -> EntityKind;
    fn ownership(&self) -> Ownership;

    /// Rows a branch takes part in are visible to it whatever their owner.
    fn involves(&self, _branch_id: BranchId) -> bool {
        false
    }
}

impl BranchOwned for ProductReadModel {
    fn entity_kind(&self) -> EntityKind {
        EntityKind::Products
    }

    fn ownership(&self) -> Ownership {
        self.ownership
    }
}

impl BranchOwned for PartyReadModel {
    fn entity_kind(&self) -> EntityKind {
        match self.kind {
            PartyKind::Customer => EntityKind::Customers,
            PartyKind::Supplier => EntityKind::Suppliers,
        }
    }

    fn ownership(&self) -> Ownership {
        self.ownership
    }
}

impl BranchOwned for AccountReadModel {
    fn entity_kind(&self) -> EntityKind {
        EntityKind::Accounts
    }

    fn ownership(&self) -> Ownership {
        self.ownership
    }
}

impl BranchOwned for PurchaseOrderReadModel {
    fn entity_kind(&self) -> EntityKind {
        EntityKind::PurchaseOrders
    }

    fn ownership(&self) -> Ownership {
        self.ownership
    }
}

impl BranchOwned for StockTransferReadModel {
    fn entity_kind(&self) -> EntityKind {
        EntityKind::Inventory
    }

    fn ownership(&self) -> Ownership {
        StockTransferReadModel::ownership(self)
    }

    fn involves(&self, branch_id: BranchId) -> bool {
        StockTransferReadModel::involves(self, branch_id)
    }
}

/// Queries run on behalf of one branch.
#[derive(Debug, Clone)]
pub struct BranchScopedQuery {
    policy: VisibilityPolicy,
}

impl BranchScopedQuery {
    pub fn new(policy: VisibilityPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &VisibilityPolicy {
        &self.policy
    }

    pub fn can_see<T: BranchOwned>(&self, row: &T) -> bool {
        self.policy.is_visible(row.entity_kind(), &row.ownership())
            || self.policy.branch_id().is_some_and(|b| row.involves(b))
    }

    /// Keep only the rows the branch may see.
    pub fn filter<T: BranchOwned>(&self, rows: impl IntoIterator<Item = T>) -> Vec<T> {
        rows.into_iter().filter(|row| self.can_see(row)).collect()
    }

    /// A single row, or `None` when it is missing or hidden from the branch.
    ///
    /// Hidden and missing look the same so callers cannot discover other
    /// branches' ids.
    pub fn get<T: BranchOwned>(&self, row: Option<T>) -> Option<T> {
        row.filter(|r| self.can_see(r))
    }
}
