use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, RwLock};

use ezbooks_core::TenantId;

/// Tenant-partitioned key/value store backing a projection.
///
/// Every operation takes the tenant explicitly; there is no way to read
/// across tenants.
pub trait TenantStore<K, V>: Send + Sync {
    fn get(&self, tenant_id: TenantId, key: &K) -> Option<V>;
    fn upsert(&self, tenant_id: TenantId, key: K, value: V);
    fn remove(&self, tenant_id: TenantId, key: &K) -> Option<V>;
    fn list(&self, tenant_id: TenantId) -> Vec<V>;
    /// Drop every record of a tenant (rebuild support).
    fn clear_tenant(&self, tenant_id: TenantId);

    /// Read-modify-write of a single record. `f` receives `None` when the key
    /// is absent and returns the value to store, or `None` to delete.
    fn update(&self, tenant_id: TenantId, key: K, f: impl FnOnce(Option<V>) -> Option<V>)
    where
        Self: Sized,
    {
        let current = self.get(tenant_id, &key);
        match f(current) {
            Some(v) => self.upsert(tenant_id, key, v),
            None => {
                self.remove(tenant_id, &key);
            }
        }
    }
}

impl<K, V, S> TenantStore<K, V> for Arc<S>
where
    S: TenantStore<K, V> + ?Sized,
{
    fn get(&self, tenant_id: TenantId, key: &K) -> Option<V> {
        (**self).get(tenant_id, key)
    }

    fn upsert(&self, tenant_id: TenantId, key: K, value: V) {
        (**self).upsert(tenant_id, key, value)
    }

    fn remove(&self, tenant_id: TenantId, key: &K) -> Option<V> {
        (**self).remove(tenant_id, key)
    }

    fn list(&self, tenant_id: TenantId) -> Vec<V> {
        (**self).list(tenant_id)
    }

    fn clear_tenant(&self, tenant_id: TenantId) {
        (**self).clear_tenant(tenant_id)
    }
}

/// In-memory store for tests and single-process deployments.
///
/// A poisoned lock reads as empty and drops writes; read models are
/// rebuildable from the event store.
#[derive(Debug)]
pub struct InMemoryTenantStore<K, V> {
    inner: RwLock<HashMap<TenantId, HashMap<K, V>>>,
}

impl<K, V> InMemoryTenantStore<K, V> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }
}

impl<K, V> Default for InMemoryTenantStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> TenantStore<K, V> for InMemoryTenantStore<K, V>
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn get(&self, tenant_id: TenantId, key: &K) -> Option<V> {
        let map = self.inner.read().ok()?;
        map.get(&tenant_id)?.get(key).cloned()
    }

    fn upsert(&self, tenant_id: TenantId, key: K, value: V) {
        if let Ok(mut map) = self.inner.write() {
            map.entry(tenant_id).or_default().insert(key, value);
        }
    }

    fn remove(&self, tenant_id: TenantId, key: &K) -> Option<V> {
        let mut map = self.inner.write().ok()?;
        map.get_mut(&tenant_id)?.remove(key)
    }

    fn list(&self, tenant_id: TenantId) -> Vec<V> {
        let Ok(map) = self.inner.read() else {
            return vec![];
        };
        map.get(&tenant_id)
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default()
    }

    fn clear_tenant(&self, tenant_id: TenantId) {
        if let Ok(mut map) = self.inner.write() {
            map.remove(&tenant_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenants_never_see_each_other() {
        let store = InMemoryTenantStore::<u32, &'static str>::new();
        let (a, b) = (TenantId::new(), TenantId::new());

        store.upsert(a, 1, "a-one");
        store.upsert(b, 1, "b-one");

        assert_eq!(store.get(a, &1), Some("a-one"));
        assert_eq!(store.list(b), vec!["b-one"]);

        store.clear_tenant(a);
        assert!(store.list(a).is_empty());
        assert_eq!(store.get(b, &1), Some("b-one"));
    }

    #[test]
    fn update_can_insert_modify_and_delete() {
        let store = InMemoryTenantStore::<&'static str, i64>::new();
        let t = TenantId::new();

        store.update(t, "cash", |v| Some(v.unwrap_or(0) + 10));
        store.update(t, "cash", |v| Some(v.unwrap_or(0) + 5));
        assert_eq!(store.get(t, &"cash"), Some(15));

        store.update(t, "cash", |_| None);
        assert_eq!(store.get(t, &"cash"), None);
        assert_eq!(store.remove(t, &"cash"), None);
    }
}
