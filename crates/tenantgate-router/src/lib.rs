//! HTTP edge for tenant resolution.

pub mod tenant;

pub use tenant::{
    NOT_FOUND_BODY, ResolvedTenant, TENANT_OVERRIDE_HEADER, TenantState, UsageReport,
    classify_outcome, tenant_router,
};
