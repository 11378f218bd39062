//! Tenant resolution, sandbox identity and usage gating.
//!
//! Nothing in this crate performs IO directly. The registry is reached through
//! [`RegistryStore`], and usage records leave through [`UsageSink`]; concrete
//! implementations live in `tenantgate-storage`.

pub mod assign;
pub mod error;
pub mod host;
pub mod metadata;
pub mod model;
pub mod registry;
pub mod resolver;
pub mod sandbox;
pub mod usage;

pub use assign::SandboxAssigner;
pub use error::ResolveError;
pub use host::{normalize_host, subdomain_label};
pub use metadata::telemetry_metadata;
pub use model::{ResolutionResult, TenantId, TenantRecord};
pub use registry::{
    MemoryRegistry, RegistryError, RegistryResult, RegistrySnapshot, RegistryStore,
    SandboxClaim, SharedRegistry,
};
pub use resolver::{
    DevOverrideResolver, HostResolver, InvalidBaseDomain, ResolveRequest, SharedResolver,
    TenantResolver, build_resolver, validate_override_token,
};
pub use sandbox::{SandboxId, SandboxIdError};
pub use usage::{
    CompletedOperation, NoopUsageSink, Outcome, SharedUsageSink, UsageGate, UsageRecord,
    UsageSink, build_usage_record,
};
