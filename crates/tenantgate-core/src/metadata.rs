use std::collections::BTreeMap;

use crate::model::TenantRecord;

/// Flat string metadata attached to downstream telemetry calls.
/// The sink does not accept nested values.
pub fn telemetry_metadata(tenant: &TenantRecord) -> BTreeMap<&'static str, String> {
    let mut out = BTreeMap::new();
    out.insert("tenant_id", tenant.tenant_id.to_string());
    if let Some(sandbox_id) = &tenant.sandbox_id {
        out.insert("sandbox_id", sandbox_id.to_string());
    }
    out
}
