use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::sandbox::SandboxId;

/// Durable tenant identity assigned at provisioning. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(Uuid);

impl TenantId {
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn parse(value: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(value).map(Self)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Lowercase hyphenated form; the input to sandbox id derivation.
    pub fn canonical(&self) -> String {
        self.0.hyphenated().to_string()
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.hyphenated().fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantRecord {
    pub tenant_id: TenantId,
    /// Subdomain label under the base domain, also the dev override key.
    pub tenant_key: String,
    pub primary_host: String,
    pub custom_hosts: BTreeSet<String>,
    /// Assigned once, then immutable.
    pub sandbox_id: Option<SandboxId>,
    pub tier: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub deleted_at: Option<OffsetDateTime>,
}

impl TenantRecord {
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }
}

/// Outcome of resolving one request. Deliberately binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionResult {
    Resolved(TenantRecord),
    NotFound,
}

impl ResolutionResult {
    pub fn into_tenant(self) -> Option<TenantRecord> {
        match self {
            ResolutionResult::Resolved(tenant) => Some(tenant),
            ResolutionResult::NotFound => None,
        }
    }
}
