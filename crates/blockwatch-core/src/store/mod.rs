// ── Tenant persistence ──
//
// `TenantStore` owns tenant configuration and derived state. Two backends:
// SQLite for real deployments and a DashMap-backed store for tests and
// ephemeral runs.

mod memory;
mod sqlite;

use async_trait::async_trait;
use thiserror::Error;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::model::{DerivedState, Tenant, TenantId};

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("tenant {0} is not stored")]
    UnknownTenant(TenantId),
    #[error("invalid persisted value for '{field}': {value}")]
    InvalidPersistedValue { field: &'static str, value: String },
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Chrono(#[from] chrono::ParseError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("store worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

#[async_trait]
pub trait TenantStore: Send + Sync {
    async fn list_tenants(&self) -> StoreResult<Vec<Tenant>>;

    async fn get_tenant(&self, id: TenantId) -> StoreResult<Option<Tenant>>;

    /// Insert or replace the tenant's configuration. Derived state is untouched.
    async fn upsert_tenant(&self, tenant: &Tenant) -> StoreResult<()>;

    /// Remove the tenant and everything derived from it. Returns whether
    /// anything was stored.
    async fn delete_tenant(&self, id: TenantId) -> StoreResult<bool>;

    /// Derived state for `id`, or the empty state if none was saved.
    async fn derived_state(&self, id: TenantId) -> StoreResult<DerivedState>;

    /// Replace roster, timestamp, and counter in one atomic write. Fails
    /// with `UnknownTenant` if the tenant was deleted meanwhile.
    async fn save_derived_state(&self, id: TenantId, state: &DerivedState) -> StoreResult<()>;
}
