use serde::{Deserialize, Serialize};

use branchpos_core::{TenantId, UserId};

use crate::{Permission, Role};

/// A user's membership in a tenant: roles and the permissions they resolve to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantMembership {
    pub tenant_id: TenantId,
    pub roles: Vec<Role>,
    pub permissions: Vec<Permission>,
}

impl TenantMembership {
    /// Membership whose permissions come from the built-in role mapping.
    pub fn from_roles(tenant_id: TenantId, roles: Vec<Role>) -> Self {
        let permissions = crate::permissions_for_roles(&roles);
        Self {
            tenant_id,
            roles,
            permissions,
        }
    }
}

/// A fully resolved principal for authorization decisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: UserId,
    pub active_tenant_id: TenantId,
    pub membership: TenantMembership,
}
