use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::assign::SandboxAssigner;
use crate::error::ResolveError;
use crate::host::{normalize_host, subdomain_label};
use crate::model::{ResolutionResult, TenantRecord};
use crate::registry::SharedRegistry;

const MAX_OVERRIDE_LEN: usize = 63;

/// What a resolver may look at for one inbound request.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResolveRequest<'a> {
    /// Raw `Host` header or request URI authority.
    pub host: Option<&'a str>,
    /// Development override header. Only [`DevOverrideResolver`] reads it.
    pub override_token: Option<&'a str>,
}

#[async_trait]
pub trait TenantResolver: Send + Sync {
    async fn resolve(
        &self,
        request: &ResolveRequest<'_>,
    ) -> Result<ResolutionResult, ResolveError>;
}

pub type SharedResolver = Arc<dyn TenantResolver>;

#[derive(Debug, thiserror::Error)]
#[error("invalid base domain: {0:?}")]
pub struct InvalidBaseDomain(pub String);

/// Picks the resolution strategy once, at startup.
///
/// With `dev_mode` off no [`DevOverrideResolver`] is ever constructed, so the
/// override header has no code path that could read it.
pub fn build_resolver(
    registry: SharedRegistry,
    base_domain: &str,
    dev_mode: bool,
) -> Result<SharedResolver, InvalidBaseDomain> {
    let hosts = HostResolver::new(registry, base_domain)?;
    if dev_mode {
        warn!(
            event = "dev_override_enabled",
            base_domain = %hosts.base_domain,
            "tenant override header is honored; never enable this in production"
        );
        Ok(Arc::new(DevOverrideResolver::new(hosts)))
    } else {
        Ok(Arc::new(hosts))
    }
}

/// Host-based resolution: subdomain of the base domain, then custom hosts.
#[derive(Clone)]
pub struct HostResolver {
    registry: SharedRegistry,
    assigner: SandboxAssigner,
    base_domain: String,
}

impl HostResolver {
    pub fn new(registry: SharedRegistry, base_domain: &str) -> Result<Self, InvalidBaseDomain> {
        let base_domain =
            normalize_host(base_domain).ok_or_else(|| InvalidBaseDomain(base_domain.to_string()))?;
        Ok(Self {
            assigner: SandboxAssigner::new(registry.clone()),
            registry,
            base_domain,
        })
    }

    pub fn base_domain(&self) -> &str {
        &self.base_domain
    }

    /// Direct lookup by tenant key, bypassing host matching.
    pub async fn resolve_key(&self, tenant_key: &str) -> Result<ResolutionResult, ResolveError> {
        let found = self.registry.tenant_by_key(tenant_key).await?;
        self.finish(found).await
    }

    async fn finish(
        &self,
        found: Option<TenantRecord>,
    ) -> Result<ResolutionResult, ResolveError> {
        let Some(mut tenant) = found else {
            return Ok(ResolutionResult::NotFound);
        };
        if !tenant.is_active() {
            debug!(
                event = "tenant_soft_deleted",
                tenant_id = %tenant.tenant_id
            );
            return Ok(ResolutionResult::NotFound);
        }
        if tenant.sandbox_id.is_none() {
            tenant.sandbox_id = Some(self.assigner.assign(&tenant.tenant_id).await?);
        }
        Ok(ResolutionResult::Resolved(tenant))
    }
}

#[async_trait]
impl TenantResolver for HostResolver {
    async fn resolve(
        &self,
        request: &ResolveRequest<'_>,
    ) -> Result<ResolutionResult, ResolveError> {
        let Some(host) = request.host.and_then(normalize_host) else {
            debug!(event = "host_rejected", raw = ?request.host);
            return Ok(ResolutionResult::NotFound);
        };

        let found = match subdomain_label(&host, &self.base_domain) {
            Some(label) => self.registry.tenant_by_key(label).await?,
            None => self.registry.tenant_by_custom_host(&host).await?,
        };
        self.finish(found).await
    }
}

/// Development posture: a valid override token wins over the host.
pub struct DevOverrideResolver {
    hosts: HostResolver,
}

impl DevOverrideResolver {
    pub fn new(hosts: HostResolver) -> Self {
        Self { hosts }
    }
}

#[async_trait]
impl TenantResolver for DevOverrideResolver {
    async fn resolve(
        &self,
        request: &ResolveRequest<'_>,
    ) -> Result<ResolutionResult, ResolveError> {
        if let Some(token) = request.override_token {
            match validate_override_token(token) {
                Some(tenant_key) => {
                    info!(event = "dev_override", tenant_key = %tenant_key);
                    return self.hosts.resolve_key(&tenant_key).await;
                }
                None => warn!(event = "dev_override_rejected", token_len = token.len()),
            }
        }
        self.hosts.resolve(request).await
    }
}

/// Alphanumerics and hyphen, 1..=63 chars. Returns the lowercased tenant key.
pub fn validate_override_token(token: &str) -> Option<String> {
    if token.is_empty() || token.len() > MAX_OVERRIDE_LEN {
        return None;
    }
    if !token.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-') {
        return None;
    }
    Some(token.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_token_charset_and_length() {
        assert_eq!(validate_override_token("Acme-2").as_deref(), Some("acme-2"));
        assert_eq!(validate_override_token(""), None);
        assert_eq!(validate_override_token("acme.example"), None);
        assert_eq!(validate_override_token("acme corp"), None);
        assert_eq!(validate_override_token("acme_corp"), None);
        assert_eq!(validate_override_token("ácme"), None);
        assert_eq!(validate_override_token(&"a".repeat(64)), None);
        assert!(validate_override_token(&"a".repeat(63)).is_some());
    }
}
