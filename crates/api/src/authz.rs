//! API-side authorization guard for commands.
//!
//! Authorization is enforced at the command boundary (before dispatch), so
//! domain aggregates and infra stay auth-agnostic.

use branchpos_auth::{AuthzError, CommandAuthorization, Principal, TenantMembership, authorize};

use crate::context::{PrincipalContext, TenantContext};

/// Check every permission a command requires in the current request context.
pub fn authorize_command<C: CommandAuthorization>(
    tenant: &TenantContext,
    principal: &PrincipalContext,
    command: &C,
) -> Result<(), AuthzError> {
    let principal = Principal {
        user_id: principal.user_id(),
        active_tenant_id: tenant.tenant_id(),
        membership: TenantMembership::from_roles(tenant.tenant_id(), principal.roles().to_vec()),
    };

    for perm in command.required_permissions() {
        authorize(&principal, perm)?;
    }

    Ok(())
}
