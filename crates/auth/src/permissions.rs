use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Permission identifier, e.g. `"purchases.pay"`.
///
/// A granted permission may be a wildcard: `"*"` grants everything and
/// `"finance.*"` grants every permission under `finance.`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(Cow<'static, str>);

impl Permission {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_wildcard(&self) -> bool {
        self.as_str() == "*"
    }

    /// Does holding `self` satisfy `required`?
    pub fn grants(&self, required: &Permission) -> bool {
        let granted = self.as_str();
        if granted == "*" || granted == required.as_str() {
            return true;
        }
        match granted.strip_suffix('*') {
            Some(prefix) if prefix.ends_with('.') => required.as_str().starts_with(prefix),
            _ => false,
        }
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_wildcards_match_their_namespace_only() {
        let finance = Permission::new("finance.*");
        assert!(finance.grants(&Permission::new("finance.write")));
        assert!(!finance.grants(&Permission::new("financeX.write")));
        assert!(!finance.grants(&Permission::new("purchases.pay")));
        assert!(Permission::new("*").grants(&Permission::new("branches.write")));
        assert!(!Permission::new("catalog.read").grants(&Permission::new("catalog.write")));
    }
}
