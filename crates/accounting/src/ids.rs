//! Typed aggregate identifiers for the accounting aggregates.

use serde::{Deserialize, Serialize};

use ezbooks_core::{AggregateId, DomainError, TenantId};

macro_rules! typed_aggregate_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub AggregateId);

        impl $name {
            pub fn new(id: AggregateId) -> Self {
                Self(id)
            }

            pub fn generate() -> Self {
                Self(AggregateId::new())
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl core::str::FromStr for $name {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.parse()?))
            }
        }

        impl From<$name> for AggregateId {
            fn from(value: $name) -> Self {
                value.0
            }
        }
    };
}

typed_aggregate_id!(
    /// Chart-of-accounts entry.
    AccountId
);
typed_aggregate_id!(
    /// Raw bank or manual transaction (owns its proposed entries).
    TransactionId
);
typed_aggregate_id!(
    /// Per-tenant general ledger holding manual and adjustment postings.
    LedgerId
);
typed_aggregate_id!(ReceiptId);

impl TransactionId {
    /// Stable id for a transaction imported with an external (bank) id.
    pub fn for_external(tenant_id: TenantId, external_id: &str) -> Self {
        Self(AggregateId::derived(tenant_id, "transaction", external_id))
    }
}

impl LedgerId {
    /// Each tenant has exactly one general ledger stream.
    pub fn general(tenant_id: TenantId) -> Self {
        Self(AggregateId::derived(tenant_id, "ledger", "general"))
    }
}
