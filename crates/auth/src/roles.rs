use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use crate::Permission;

/// Role identifier used for RBAC.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(Cow<'static, str>);

impl Role {
    pub const ADMIN: &'static str = "admin";
    pub const MANAGER: &'static str = "manager";
    pub const CASHIER: &'static str = "cashier";
    pub const ACCOUNTANT: &'static str = "accountant";

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

fn grants_of(role: &str) -> &'static [&'static str] {
    match role {
        Role::ADMIN => &["*"],
        Role::MANAGER => &[
            "branches.read",
            "catalog.*",
            "parties.*",
            "finance.*",
            "purchases.*",
        ],
        Role::CASHIER => &["catalog.read", "parties.read", "parties.write"],
        Role::ACCOUNTANT => &["finance.*", "purchases.read", "purchases.pay"],
        _ => &[],
    }
}

/// Built-in role → permission mapping. Unknown roles grant nothing.
pub fn permissions_for_roles(roles: &[Role]) -> Vec<Permission> {
    let mut out: Vec<Permission> = Vec::new();
    for role in roles {
        for name in grants_of(role.as_str()) {
            let perm = Permission::new(*name);
            if !out.contains(&perm) {
                out.push(perm);
            }
        }
    }
    out
}
