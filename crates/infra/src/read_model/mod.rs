//! Tenant-isolated storage for disposable read models.

pub mod tenant_store;

pub use tenant_store::{InMemoryTenantStore, TenantStore};
