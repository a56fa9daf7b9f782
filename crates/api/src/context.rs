use branchpos_auth::Role;
use branchpos_core::{BranchId, TenantId, UserId};

/// Tenant context for a request.
///
/// This is immutable and must be present for all domain routes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TenantContext {
    tenant_id: TenantId,
}

impl TenantContext {
    pub fn new(tenant_id: TenantId) -> Self {
        Self { tenant_id }
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}

/// Authenticated user and the roles granted by the token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrincipalContext {
    user_id: UserId,
    roles: Vec<Role>,
}

impl PrincipalContext {
    pub fn new(user_id: UserId, roles: Vec<Role>) -> Self {
        Self { user_id, roles }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn roles(&self) -> &[Role] {
        &self.roles
    }
}

/// Branch the request acts for. `None` means tenant-wide (no visibility
/// filtering, new records unassigned).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BranchContext {
    branch_id: Option<BranchId>,
}

impl BranchContext {
    pub fn new(branch_id: Option<BranchId>) -> Self {
        Self { branch_id }
    }

    pub fn branch_id(&self) -> Option<BranchId> {
        self.branch_id
    }
}
