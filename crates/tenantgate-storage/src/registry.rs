use async_trait::async_trait;
use tenantgate_core::{
    MemoryRegistry, RegistryError, RegistryResult, RegistrySnapshot, RegistryStore,
    SandboxClaim, SandboxId, TenantId, TenantRecord,
};
use tracing::{debug, warn};

use crate::storage::{StorageError, StorageResult, TenantStorage};

impl From<StorageError> for RegistryError {
    fn from(value: StorageError) -> Self {
        match value {
            StorageError::InvalidSandboxId(err) => RegistryError::Format(err),
            StorageError::Conflict(message) => RegistryError::Conflict(message),
            other => RegistryError::Unavailable(other.to_string()),
        }
    }
}

/// Uncached registry: every call goes to the database.
#[async_trait]
impl RegistryStore for TenantStorage {
    async fn tenant_by_key(&self, tenant_key: &str) -> RegistryResult<Option<TenantRecord>> {
        Ok(self.find_tenant_by_key(tenant_key).await?)
    }

    async fn tenant_by_custom_host(&self, host: &str) -> RegistryResult<Option<TenantRecord>> {
        Ok(self.find_tenant_by_custom_host(host).await?)
    }

    async fn sandbox_owner(&self, sandbox_id: &SandboxId) -> RegistryResult<Option<TenantId>> {
        Ok(self.find_sandbox_owner(sandbox_id).await?)
    }

    async fn put_sandbox_id_if_absent(
        &self,
        tenant_id: &TenantId,
        sandbox_id: &SandboxId,
    ) -> RegistryResult<SandboxClaim> {
        Ok(self.claim_sandbox_id(tenant_id, sandbox_id).await?)
    }
}

/// Request-path registry: lookups are served from an in-memory snapshot of the
/// tenants table; sandbox id claims go to the database first and are mirrored
/// into the snapshot once stored.
pub struct CachedRegistry {
    storage: TenantStorage,
    cache: MemoryRegistry,
}

impl CachedRegistry {
    pub async fn load(storage: TenantStorage) -> StorageResult<Self> {
        let snapshot = load_snapshot(&storage).await?;
        if snapshot.is_empty() {
            warn!(event = "registry_empty", "no tenants registered");
        }
        Ok(Self {
            storage,
            cache: MemoryRegistry::new(snapshot),
        })
    }

    /// Re-reads the tenants table and swaps the snapshot. Returns the tenant count.
    pub async fn refresh(&self) -> StorageResult<usize> {
        let snapshot = load_snapshot(&self.storage).await?;
        let count = snapshot.len();
        self.cache.replace_snapshot(snapshot);
        Ok(count)
    }
}

async fn load_snapshot(storage: &TenantStorage) -> StorageResult<RegistrySnapshot> {
    let tenants = storage.load_tenants().await?;
    RegistrySnapshot::from_records(tenants)
        .map_err(|err| StorageError::Conflict(err.to_string()))
}

#[async_trait]
impl RegistryStore for CachedRegistry {
    async fn tenant_by_key(&self, tenant_key: &str) -> RegistryResult<Option<TenantRecord>> {
        self.cache.tenant_by_key(tenant_key).await
    }

    async fn tenant_by_custom_host(&self, host: &str) -> RegistryResult<Option<TenantRecord>> {
        self.cache.tenant_by_custom_host(host).await
    }

    async fn sandbox_owner(&self, sandbox_id: &SandboxId) -> RegistryResult<Option<TenantId>> {
        // Ownership checks must see claims made by other processes.
        Ok(self.storage.find_sandbox_owner(sandbox_id).await?)
    }

    async fn put_sandbox_id_if_absent(
        &self,
        tenant_id: &TenantId,
        sandbox_id: &SandboxId,
    ) -> RegistryResult<SandboxClaim> {
        let claim = self.storage.claim_sandbox_id(tenant_id, sandbox_id).await?;
        let stored = match &claim {
            SandboxClaim::Claimed => Some(sandbox_id),
            SandboxClaim::AlreadyAssigned(existing) => Some(existing),
            SandboxClaim::Taken => None,
        };
        if let Some(stored) = stored
            && let Err(err) = self.cache.put_sandbox_id_if_absent(tenant_id, stored).await
        {
            debug!(event = "registry_cache_mirror_skipped", tenant_id = %tenant_id, error = %err);
        }
        Ok(claim)
    }
}
