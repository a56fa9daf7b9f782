use thiserror::Error;

use crate::{Permission, Principal};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("tenant mismatch")]
    TenantMismatch,

    #[error("forbidden: missing permission '{0}'")]
    Forbidden(String),
}

/// Command-side authorization contract, checked before dispatch.
pub trait CommandAuthorization {
    fn required_permissions(&self) -> &[Permission];
}

/// Authorize a principal within its active tenant. Pure policy check, no IO.
pub fn authorize(principal: &Principal, required: &Permission) -> Result<(), AuthzError> {
    if principal.active_tenant_id != principal.membership.tenant_id {
        return Err(AuthzError::TenantMismatch);
    }

    if principal
        .membership
        .permissions
        .iter()
        .any(|granted| granted.grants(required))
    {
        Ok(())
    } else {
        tracing::debug!(
            user_id = %principal.user_id,
            permission = %required,
            "authorization denied"
        );
        Err(AuthzError::Forbidden(required.as_str().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Role, TenantMembership};
    use branchpos_core::{TenantId, UserId};

    fn principal(role: &'static str) -> Principal {
        let tenant_id = TenantId::new();
        Principal {
            user_id: UserId::new(),
            active_tenant_id: tenant_id,
            membership: TenantMembership::from_roles(tenant_id, vec![Role::new(role)]),
        }
    }

    #[test]
    fn admin_is_allowed_everything() {
        assert!(authorize(&principal("admin"), &Permission::new("branches.write")).is_ok());
    }

    #[test]
    fn cashier_cannot_pay_suppliers() {
        let err = authorize(&principal("cashier"), &Permission::new("purchases.pay")).unwrap_err();
        assert_eq!(err, AuthzError::Forbidden("purchases.pay".to_string()));
    }

    #[test]
    fn accountant_can_pay_but_not_create_orders() {
        let p = principal("accountant");
        assert!(authorize(&p, &Permission::new("purchases.pay")).is_ok());
        assert!(authorize(&p, &Permission::new("purchases.write")).is_err());
        assert!(authorize(&p, &Permission::new("finance.write")).is_ok());
    }

    #[test]
    fn membership_in_another_tenant_is_rejected() {
        let mut p = principal("admin");
        p.active_tenant_id = TenantId::new();
        assert_eq!(
            authorize(&p, &Permission::new("catalog.read")),
            Err(AuthzError::TenantMismatch)
        );
    }
}
