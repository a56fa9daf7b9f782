//! Branches domain module.
//!
//! Holds the `Branch` aggregate (isolation mode + sharing settings) and the
//! visibility policy every other module consults to decide which records a
//! branch may see.

pub mod branch;
pub mod visibility;

pub use branch::{
    Branch, BranchCommand, BranchCreated, BranchDeactivated, BranchEvent, BranchStatus,
    ChangeIsolationMode, CreateBranch, DeactivateBranch, IsolationModeChanged, SharingUpdated,
    UpdateSharing,
};
pub use visibility::{
    BranchSettings, EntityKind, IsolationMode, Ownership, Scope, SharingSettings,
    VisibilityFilter, VisibilityPolicy, effective_scope, ownership_for_new_record,
};
