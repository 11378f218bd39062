use tracing::{info, warn};

use crate::error::ResolveError;
use crate::model::TenantId;
use crate::registry::{SandboxClaim, SharedRegistry};
use crate::sandbox::{MAX_DISAMBIGUATOR, SandboxId, SandboxIdError};

/// Persists a tenant's sandbox id the first time it is needed.
///
/// Uses read-then-put-if-absent rather than a transaction: two racing
/// assigners for the same tenant both end up with whichever id was stored.
#[derive(Clone)]
pub struct SandboxAssigner {
    registry: SharedRegistry,
}

impl SandboxAssigner {
    pub fn new(registry: SharedRegistry) -> Self {
        Self { registry }
    }

    pub async fn assign(&self, tenant_id: &TenantId) -> Result<SandboxId, ResolveError> {
        let canonical = SandboxId::derive(tenant_id);
        let mut candidate = canonical.clone();
        let mut n = 0;
        loop {
            if let Some(owner) = self.registry.sandbox_owner(&candidate).await?
                && owner != *tenant_id
            {
                warn!(
                    event = "sandbox_id_collision",
                    tenant_id = %tenant_id,
                    sandbox_id = %candidate,
                    owner = %owner
                );
            } else {
                match self
                    .registry
                    .put_sandbox_id_if_absent(tenant_id, &candidate)
                    .await?
                {
                    SandboxClaim::Claimed => {
                        info!(
                            event = "sandbox_id_assigned",
                            tenant_id = %tenant_id,
                            sandbox_id = %candidate
                        );
                        return Ok(candidate);
                    }
                    SandboxClaim::AlreadyAssigned(existing) => return Ok(existing),
                    SandboxClaim::Taken => {
                        warn!(
                            event = "sandbox_id_collision",
                            tenant_id = %tenant_id,
                            sandbox_id = %candidate
                        );
                    }
                }
            }

            n += 1;
            if n > MAX_DISAMBIGUATOR {
                return Err(SandboxIdError::Exhausted(*tenant_id).into());
            }
            candidate = canonical.disambiguated(n)?;
        }
    }
}
