//! Branch visibility policy.
//!
//! A branch runs in one of three isolation modes. Given the mode and the
//! branch's sharing settings, the policy decides for each entity kind whether a
//! record owned by some branch (or by none) is visible to the requesting branch.
//!
//! Every read path goes through [`VisibilityPolicy::filter`]; nothing else in
//! the workspace encodes branch predicates.

use std::collections::BTreeSet;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use branchpos_core::{BranchId, DomainError};

/// Data isolation mode of a branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IsolationMode {
    /// Every record is visible from every branch.
    Shared,
    /// A branch sees its own records plus records explicitly flagged shared.
    Isolated,
    /// Per entity kind: shared kinds behave like `Shared`, the rest like a
    /// relaxed `Isolated` that also shows unassigned records.
    Hybrid,
}

impl IsolationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            IsolationMode::Shared => "shared",
            IsolationMode::Isolated => "isolated",
            IsolationMode::Hybrid => "hybrid",
        }
    }
}

impl core::fmt::Display for IsolationMode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IsolationMode {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "shared" => Ok(IsolationMode::Shared),
            "isolated" => Ok(IsolationMode::Isolated),
            "hybrid" => Ok(IsolationMode::Hybrid),
            other => Err(DomainError::validation(format!("unknown isolation mode: {other}"))),
        }
    }
}

/// Every kind of record whose visibility can be shared across branches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Products,
    Customers,
    Inventory,
    Suppliers,
    Categories,
    Employees,
    Sales,
    PurchaseOrders,
    Devices,
    Payments,
    Appointments,
    Reminders,
    Expenses,
    TradeIns,
    SpecialOrders,
    Attendance,
    LoyaltyPoints,
    Accounts,
    GiftCards,
    QualityChecks,
    RecurringExpenses,
    Communications,
    Reports,
    FinanceTransfers,
}

impl EntityKind {
    pub const ALL: [EntityKind; 24] = [
        EntityKind::Products,
        EntityKind::Customers,
        EntityKind::Inventory,
        EntityKind::Suppliers,
        EntityKind::Categories,
        EntityKind::Employees,
        EntityKind::Sales,
        EntityKind::PurchaseOrders,
        EntityKind::Devices,
        EntityKind::Payments,
        EntityKind::Appointments,
        EntityKind::Reminders,
        EntityKind::Expenses,
        EntityKind::TradeIns,
        EntityKind::SpecialOrders,
        EntityKind::Attendance,
        EntityKind::LoyaltyPoints,
        EntityKind::Accounts,
        EntityKind::GiftCards,
        EntityKind::QualityChecks,
        EntityKind::RecurringExpenses,
        EntityKind::Communications,
        EntityKind::Reports,
        EntityKind::FinanceTransfers,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Products => "products",
            EntityKind::Customers => "customers",
            EntityKind::Inventory => "inventory",
            EntityKind::Suppliers => "suppliers",
            EntityKind::Categories => "categories",
            EntityKind::Employees => "employees",
            EntityKind::Sales => "sales",
            EntityKind::PurchaseOrders => "purchase_orders",
            EntityKind::Devices => "devices",
            EntityKind::Payments => "payments",
            EntityKind::Appointments => "appointments",
            EntityKind::Reminders => "reminders",
            EntityKind::Expenses => "expenses",
            EntityKind::TradeIns => "trade_ins",
            EntityKind::SpecialOrders => "special_orders",
            EntityKind::Attendance => "attendance",
            EntityKind::LoyaltyPoints => "loyalty_points",
            EntityKind::Accounts => "accounts",
            EntityKind::GiftCards => "gift_cards",
            EntityKind::QualityChecks => "quality_checks",
            EntityKind::RecurringExpenses => "recurring_expenses",
            EntityKind::Communications => "communications",
            EntityKind::Reports => "reports",
            EntityKind::FinanceTransfers => "finance_transfers",
        }
    }
}

impl core::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        EntityKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == needle)
            .ok_or_else(|| DomainError::validation(format!("unknown entity kind: {s}")))
    }
}

/// Entity kinds shared across branches while the branch runs in hybrid mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SharingSettings {
    shared: BTreeSet<EntityKind>,
}

impl SharingSettings {
    /// Nothing shared.
    pub fn none() -> Self {
        Self {
            shared: BTreeSet::new(),
        }
    }

    /// Every kind shared.
    pub fn all() -> Self {
        Self {
            shared: EntityKind::ALL.into_iter().collect(),
        }
    }

    pub fn from_kinds(kinds: impl IntoIterator<Item = EntityKind>) -> Self {
        Self {
            shared: kinds.into_iter().collect(),
        }
    }

    pub fn with(mut self, kind: EntityKind) -> Self {
        self.shared.insert(kind);
        self
    }

    pub fn set(&mut self, kind: EntityKind, shared: bool) {
        if shared {
            self.shared.insert(kind);
        } else {
            self.shared.remove(&kind);
        }
    }

    pub fn is_shared(&self, kind: EntityKind) -> bool {
        self.shared.contains(&kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = EntityKind> + '_ {
        self.shared.iter().copied()
    }
}

impl Default for SharingSettings {
    /// New branches share money-like records (accounts, gift cards) and keep
    /// everything else local.
    fn default() -> Self {
        Self::from_kinds([EntityKind::Accounts, EntityKind::GiftCards])
    }
}

/// Branch ownership of a single record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Ownership {
    /// Owning branch; `None` for legacy records created before branches existed.
    pub branch_id: Option<BranchId>,
    /// Explicit cross-branch flag.
    pub is_shared: bool,
}

impl Ownership {
    pub fn owned_by(branch_id: BranchId) -> Self {
        Self {
            branch_id: Some(branch_id),
            is_shared: false,
        }
    }

    pub fn shared_from(branch_id: BranchId) -> Self {
        Self {
            branch_id: Some(branch_id),
            is_shared: true,
        }
    }

    pub fn unassigned() -> Self {
        Self::default()
    }
}

/// Effective scope of one entity kind for one branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Shared,
    Isolated,
}

/// Resolve the scope of `kind` for a branch running in `mode`.
pub fn effective_scope(mode: IsolationMode, settings: &SharingSettings, kind: EntityKind) -> Scope {
    match mode {
        IsolationMode::Shared => Scope::Shared,
        IsolationMode::Isolated => Scope::Isolated,
        IsolationMode::Hybrid if settings.is_shared(kind) => Scope::Shared,
        IsolationMode::Hybrid => Scope::Isolated,
    }
}

/// The settings of one branch that the policy needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchSettings {
    pub branch_id: BranchId,
    pub mode: IsolationMode,
    pub sharing: SharingSettings,
}

/// Which ownerships a branch may see for one entity kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VisibilityFilter {
    All,
    Restricted {
        branch_id: BranchId,
        include_flagged_shared: bool,
        include_unassigned: bool,
    },
}

impl VisibilityFilter {
    pub fn matches(&self, ownership: &Ownership) -> bool {
        match *self {
            VisibilityFilter::All => true,
            VisibilityFilter::Restricted {
                branch_id,
                include_flagged_shared,
                include_unassigned,
            } => match ownership.branch_id {
                Some(owner) if owner == branch_id => true,
                _ if include_flagged_shared && ownership.is_shared => true,
                None => include_unassigned,
                Some(_) => false,
            },
        }
    }

}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PolicyKind {
    Configured(BranchSettings),
    /// Branch known but its settings could not be loaded.
    Fallback(BranchId),
    /// Request carries no branch at all.
    Unscoped,
}

/// Visibility decisions for one requesting branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisibilityPolicy {
    kind: PolicyKind,
}

impl VisibilityPolicy {
    pub fn for_branch(branch: &crate::Branch) -> Self {
        Self::from_settings(branch.settings())
    }

    pub fn from_settings(settings: BranchSettings) -> Self {
        Self {
            kind: PolicyKind::Configured(settings),
        }
    }

    /// Conservative policy used when the branch's settings are unavailable:
    /// own records plus unassigned legacy records.
    pub fn fallback(branch_id: BranchId) -> Self {
        Self {
            kind: PolicyKind::Fallback(branch_id),
        }
    }

    /// No branch context: nothing is filtered.
    pub fn unscoped() -> Self {
        Self {
            kind: PolicyKind::Unscoped,
        }
    }

    pub fn branch_id(&self) -> Option<BranchId> {
        match &self.kind {
            PolicyKind::Configured(s) => Some(s.branch_id),
            PolicyKind::Fallback(id) => Some(*id),
            PolicyKind::Unscoped => None,
        }
    }

    pub fn filter(&self, kind: EntityKind) -> VisibilityFilter {
        match &self.kind {
            PolicyKind::Unscoped => VisibilityFilter::All,
            PolicyKind::Fallback(branch_id) => VisibilityFilter::Restricted {
                branch_id: *branch_id,
                include_flagged_shared: false,
                include_unassigned: true,
            },
            PolicyKind::Configured(settings) => {
                match effective_scope(settings.mode, &settings.sharing, kind) {
                    Scope::Shared => VisibilityFilter::All,
                    Scope::Isolated => VisibilityFilter::Restricted {
                        branch_id: settings.branch_id,
                        include_flagged_shared: true,
                        include_unassigned: settings.mode == IsolationMode::Hybrid,
                    },
                }
            }
        }
    }

    pub fn is_visible(&self, kind: EntityKind, ownership: &Ownership) -> bool {
        self.filter(kind).matches(ownership)
    }

    /// Ownership stamped onto a record the requesting branch creates.
    pub fn ownership_for_new_record(&self, kind: EntityKind) -> Ownership {
        match &self.kind {
            PolicyKind::Configured(settings) => ownership_for_new_record(settings, kind),
            PolicyKind::Fallback(branch_id) => Ownership::owned_by(*branch_id),
            PolicyKind::Unscoped => Ownership::unassigned(),
        }
    }
}

/// A record created in a branch belongs to it, and is flagged shared only when
/// the kind is shared for that branch.
pub fn ownership_for_new_record(settings: &BranchSettings, kind: EntityKind) -> Ownership {
    Ownership {
        branch_id: Some(settings.branch_id),
        is_shared: effective_scope(settings.mode, &settings.sharing, kind) == Scope::Shared,
    }
}
