use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use crate::Permission;

/// Role identifier used for RBAC.
///
/// Known roles: `owner`, `admin`, `bookkeeper`, `viewer`. Unknown roles grant
/// nothing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(Cow<'static, str>);

impl Role {
    pub const OWNER: Role = Role(Cow::Borrowed("owner"));
    pub const ADMIN: Role = Role(Cow::Borrowed("admin"));
    pub const BOOKKEEPER: Role = Role(Cow::Borrowed("bookkeeper"));
    pub const VIEWER: Role = Role(Cow::Borrowed("viewer"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Permissions this role grants.
    pub fn permissions(&self) -> Vec<Permission> {
        match self.as_str() {
            "owner" | "admin" => vec![Permission::WILDCARD],
            "bookkeeper" => vec![
                Permission::FINANCIALS_VIEW,
                Permission::TRANSACTIONS_EDIT,
                Permission::ENTRIES_APPROVE,
            ],
            "viewer" => vec![Permission::FINANCIALS_VIEW],
            _ => Vec::new(),
        }
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Union of the permissions granted by `roles`, without duplicates.
pub fn permissions_for_roles(roles: &[Role]) -> Vec<Permission> {
    let mut out: Vec<Permission> = Vec::new();
    for perm in roles.iter().flat_map(Role::permissions) {
        if !out.contains(&perm) {
            out.push(perm);
        }
    }
    out
}
