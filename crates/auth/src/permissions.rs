use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Permission identifier.
///
/// Permissions are opaque strings (e.g. "financials.view"). The wildcard
/// `"*"` grants everything within the tenant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(Cow<'static, str>);

impl Permission {
    /// Read accounts, transactions, proposals, the journal and balances.
    pub const FINANCIALS_VIEW: Permission = Permission(Cow::Borrowed("financials.view"));

    /// Create and change accounts, transactions and receipts; request suggestions.
    pub const TRANSACTIONS_EDIT: Permission = Permission(Cow::Borrowed("transactions.edit"));

    /// Approve or reject proposals and post manual entries.
    pub const ENTRIES_APPROVE: Permission = Permission(Cow::Borrowed("entries.approve"));

    pub const WILDCARD: Permission = Permission(Cow::Borrowed("*"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_wildcard(&self) -> bool {
        self.as_str() == "*"
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
