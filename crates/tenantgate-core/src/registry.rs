use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use async_trait::async_trait;
use time::OffsetDateTime;

use crate::model::{TenantId, TenantRecord};
use crate::sandbox::{SandboxId, SandboxIdError};

pub type RegistryResult<T> = Result<T, RegistryError>;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("registry unavailable: {0}")]
    Unavailable(String),
    #[error("registry conflict: {0}")]
    Conflict(String),
    #[error("stored identifier rejected: {0}")]
    Format(#[from] SandboxIdError),
}

/// Result of a put-if-absent on a sandbox id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SandboxClaim {
    /// The id was free and now belongs to the tenant.
    Claimed,
    /// The tenant already had an id; it is returned unchanged.
    AlreadyAssigned(SandboxId),
    /// Another tenant owns this id.
    Taken,
}

/// Keyed access to the tenant registry.
///
/// Request-path calls are reads. `put_sandbox_id_if_absent` is the only write
/// and runs at most once per tenant.
#[async_trait]
pub trait RegistryStore: Send + Sync {
    async fn tenant_by_key(&self, tenant_key: &str) -> RegistryResult<Option<TenantRecord>>;

    async fn tenant_by_custom_host(&self, host: &str) -> RegistryResult<Option<TenantRecord>>;

    async fn sandbox_owner(&self, sandbox_id: &SandboxId) -> RegistryResult<Option<TenantId>>;

    async fn put_sandbox_id_if_absent(
        &self,
        tenant_id: &TenantId,
        sandbox_id: &SandboxId,
    ) -> RegistryResult<SandboxClaim>;
}

pub type SharedRegistry = Arc<dyn RegistryStore>;

#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    tenants_by_key: HashMap<String, TenantRecord>,
    key_by_tenant_id: HashMap<TenantId, String>,
    key_by_primary_host: HashMap<String, String>,
    key_by_custom_host: HashMap<String, String>,
    owner_by_sandbox: HashMap<SandboxId, TenantId>,
}

impl RegistrySnapshot {
    pub fn from_records(records: impl IntoIterator<Item = TenantRecord>) -> RegistryResult<Self> {
        let mut snapshot = Self::default();
        for record in records {
            snapshot.insert(record)?;
        }
        Ok(snapshot)
    }

    /// Adds a record, enforcing uniqueness of key, id, hosts and sandbox id.
    pub fn insert(&mut self, record: TenantRecord) -> RegistryResult<()> {
        if self.tenants_by_key.contains_key(&record.tenant_key) {
            return Err(RegistryError::Conflict(format!(
                "tenant key {} already registered",
                record.tenant_key
            )));
        }
        if self.key_by_tenant_id.contains_key(&record.tenant_id) {
            return Err(RegistryError::Conflict(format!(
                "tenant id {} already registered",
                record.tenant_id
            )));
        }
        let hosts = std::iter::once(&record.primary_host).chain(record.custom_hosts.iter());
        for host in hosts {
            if self.host_taken(host) {
                return Err(RegistryError::Conflict(format!(
                    "host {host} already registered"
                )));
            }
        }
        if let Some(sandbox_id) = &record.sandbox_id
            && self.owner_by_sandbox.contains_key(sandbox_id)
        {
            return Err(RegistryError::Conflict(format!(
                "sandbox id {sandbox_id} already registered"
            )));
        }

        let key = record.tenant_key.clone();
        self.key_by_tenant_id.insert(record.tenant_id, key.clone());
        self.key_by_primary_host
            .insert(record.primary_host.clone(), key.clone());
        for host in &record.custom_hosts {
            self.key_by_custom_host.insert(host.clone(), key.clone());
        }
        if let Some(sandbox_id) = &record.sandbox_id {
            self.owner_by_sandbox
                .insert(sandbox_id.clone(), record.tenant_id);
        }
        self.tenants_by_key.insert(key, record);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.tenants_by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tenants_by_key.is_empty()
    }

    fn host_taken(&self, host: &str) -> bool {
        self.key_by_primary_host.contains_key(host) || self.key_by_custom_host.contains_key(host)
    }
}

/// In-process registry served from an atomically swapped snapshot.
///
/// Reads never take a lock. Writes are serialized and publish a new snapshot.
#[derive(Debug)]
pub struct MemoryRegistry {
    snapshot: ArcSwap<RegistrySnapshot>,
    write: Mutex<()>,
}

impl MemoryRegistry {
    pub fn new(snapshot: RegistrySnapshot) -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(snapshot),
            write: Mutex::new(()),
        }
    }

    pub fn from_records(records: impl IntoIterator<Item = TenantRecord>) -> RegistryResult<Self> {
        Ok(Self::new(RegistrySnapshot::from_records(records)?))
    }

    pub fn replace_snapshot(&self, snapshot: RegistrySnapshot) {
        self.snapshot.store(Arc::new(snapshot));
    }

    pub fn insert(&self, record: TenantRecord) -> RegistryResult<()> {
        self.update(|snapshot| snapshot.insert(record))
    }

    /// Soft-deletes a tenant. Returns `false` when the key is unknown.
    pub fn mark_deleted(&self, tenant_key: &str, at: OffsetDateTime) -> RegistryResult<bool> {
        self.update(|snapshot| {
            let Some(record) = snapshot.tenants_by_key.get_mut(tenant_key) else {
                return Ok(false);
            };
            record.deleted_at = Some(at);
            record.updated_at = at;
            Ok(true)
        })
    }

    fn update<T>(
        &self,
        f: impl FnOnce(&mut RegistrySnapshot) -> RegistryResult<T>,
    ) -> RegistryResult<T> {
        let _guard = self
            .write
            .lock()
            .map_err(|_| RegistryError::Unavailable("registry write lock poisoned".to_string()))?;
        let mut next = RegistrySnapshot::clone(&self.snapshot.load());
        let out = f(&mut next)?;
        self.snapshot.store(Arc::new(next));
        Ok(out)
    }
}

#[async_trait]
impl RegistryStore for MemoryRegistry {
    async fn tenant_by_key(&self, tenant_key: &str) -> RegistryResult<Option<TenantRecord>> {
        Ok(self.snapshot.load().tenants_by_key.get(tenant_key).cloned())
    }

    async fn tenant_by_custom_host(&self, host: &str) -> RegistryResult<Option<TenantRecord>> {
        let snapshot = self.snapshot.load();
        Ok(snapshot
            .key_by_custom_host
            .get(host)
            .and_then(|key| snapshot.tenants_by_key.get(key))
            .cloned())
    }

    async fn sandbox_owner(&self, sandbox_id: &SandboxId) -> RegistryResult<Option<TenantId>> {
        Ok(self.snapshot.load().owner_by_sandbox.get(sandbox_id).copied())
    }

    async fn put_sandbox_id_if_absent(
        &self,
        tenant_id: &TenantId,
        sandbox_id: &SandboxId,
    ) -> RegistryResult<SandboxClaim> {
        self.update(|snapshot| {
            let key = snapshot.key_by_tenant_id.get(tenant_id).cloned().ok_or_else(|| {
                RegistryError::Conflict(format!("tenant id {tenant_id} is not registered"))
            })?;
            let Some(record) = snapshot.tenants_by_key.get_mut(&key) else {
                return Err(RegistryError::Conflict(format!(
                    "tenant id {tenant_id} is not registered"
                )));
            };
            if let Some(existing) = &record.sandbox_id {
                return Ok(SandboxClaim::AlreadyAssigned(existing.clone()));
            }
            match snapshot.owner_by_sandbox.get(sandbox_id) {
                Some(owner) if owner != tenant_id => return Ok(SandboxClaim::Taken),
                _ => {}
            }
            record.sandbox_id = Some(sandbox_id.clone());
            snapshot
                .owner_by_sandbox
                .insert(sandbox_id.clone(), *tenant_id);
            Ok(SandboxClaim::Claimed)
        })
    }
}
