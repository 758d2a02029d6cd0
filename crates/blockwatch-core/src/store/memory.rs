// In-memory `TenantStore` on `DashMap`, lost on exit.

use async_trait::async_trait;
use dashmap::DashMap;

use super::{StoreError, StoreResult, TenantStore};
use crate::model::{DerivedState, Tenant, TenantId};

#[derive(Debug, Default)]
pub struct MemoryStore {
    tenants: DashMap<TenantId, Tenant>,
    derived: DashMap<TenantId, DerivedState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TenantStore for MemoryStore {
    async fn list_tenants(&self) -> StoreResult<Vec<Tenant>> {
        let mut tenants: Vec<Tenant> = self.tenants.iter().map(|e| e.value().clone()).collect();
        tenants.sort_by_key(|t| t.id);
        Ok(tenants)
    }

    async fn get_tenant(&self, id: TenantId) -> StoreResult<Option<Tenant>> {
        Ok(self.tenants.get(&id).map(|e| e.value().clone()))
    }

    async fn upsert_tenant(&self, tenant: &Tenant) -> StoreResult<()> {
        self.tenants.insert(tenant.id, tenant.clone());
        Ok(())
    }

    async fn delete_tenant(&self, id: TenantId) -> StoreResult<bool> {
        let had_tenant = self.tenants.remove(&id).is_some();
        let had_state = self.derived.remove(&id).is_some();
        Ok(had_tenant || had_state)
    }

    async fn derived_state(&self, id: TenantId) -> StoreResult<DerivedState> {
        Ok(self.derived.get(&id).map(|e| e.value().clone()).unwrap_or_default())
    }

    async fn save_derived_state(&self, id: TenantId, state: &DerivedState) -> StoreResult<()> {
        if !self.tenants.contains_key(&id) {
            return Err(StoreError::UnknownTenant(id));
        }
        self.derived.insert(id, state.clone());
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = MemoryStore::new();
        store
            .upsert_tenant(&Tenant::new(TenantId(1), "mc.example.net", 25565))
            .await
            .unwrap();
        store
            .save_derived_state(TenantId(1), &DerivedState::default())
            .await
            .unwrap();

        assert!(store.delete_tenant(TenantId(1)).await.unwrap());
        assert!(!store.delete_tenant(TenantId(1)).await.unwrap());
        assert!(store.get_tenant(TenantId(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn derived_state_requires_tenant() {
        let store = MemoryStore::new();
        let err = store
            .save_derived_state(TenantId(7), &DerivedState::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UnknownTenant(TenantId(7))));
    }

    #[tokio::test]
    async fn tenants_list_in_id_order() {
        let store = MemoryStore::new();
        for id in [3, 1, 2] {
            store
                .upsert_tenant(&Tenant::new(TenantId(id), "mc.example.net", 25565))
                .await
                .unwrap();
        }
        let ids: Vec<u64> = store.list_tenants().await.unwrap().iter().map(|t| t.id.0).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }
}
