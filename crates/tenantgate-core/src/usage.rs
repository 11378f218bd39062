use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::model::{TenantId, TenantRecord};
use crate::sandbox::SandboxId;

/// How a completed tenant-scoped operation ended, as classified by its caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// A well-formed response was produced and returned.
    Succeeded,
    TransportFailure,
    Timeout,
    /// The request itself was invalid or refused.
    Rejected,
    InternalError,
    /// Streaming started and was cut off before completion.
    StreamAborted,
}

impl Outcome {
    pub fn is_success(self) -> bool {
        matches!(self, Outcome::Succeeded)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Succeeded => "succeeded",
            Outcome::TransportFailure => "transport_failure",
            Outcome::Timeout => "timeout",
            Outcome::Rejected => "rejected",
            Outcome::InternalError => "internal_error",
            Outcome::StreamAborted => "stream_aborted",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompletedOperation {
    pub outcome: Outcome,
    pub model_identifier: String,
    pub input_units: i64,
    pub output_units: i64,
    pub latency: Duration,
}

/// One persisted row per successful operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageRecord {
    pub tenant_id: TenantId,
    pub sandbox_id: SandboxId,
    pub model_identifier: String,
    pub input_units: i64,
    pub output_units: i64,
    pub latency_ms: i64,
    pub created_at: OffsetDateTime,
}

/// Builds the usage row for an operation, or `None` when none may be written.
pub fn build_usage_record(
    tenant: &TenantRecord,
    operation: &CompletedOperation,
    now: OffsetDateTime,
) -> Option<UsageRecord> {
    if !operation.outcome.is_success() {
        return None;
    }
    let sandbox_id = tenant.sandbox_id.clone()?;
    Some(UsageRecord {
        tenant_id: tenant.tenant_id,
        sandbox_id,
        model_identifier: operation.model_identifier.clone(),
        input_units: operation.input_units,
        output_units: operation.output_units,
        latency_ms: i64::try_from(operation.latency.as_millis()).unwrap_or(i64::MAX),
        created_at: now,
    })
}

/// Destination for usage rows.
///
/// `submit` must return immediately; persistence happens elsewhere and its
/// failures never reach the caller.
pub trait UsageSink: Send + Sync {
    fn submit(&self, record: UsageRecord);
}

pub type SharedUsageSink = Arc<dyn UsageSink>;

#[derive(Debug, Default)]
pub struct NoopUsageSink;

impl UsageSink for NoopUsageSink {
    fn submit(&self, _record: UsageRecord) {}
}

#[derive(Clone)]
pub struct UsageGate {
    sink: SharedUsageSink,
}

impl UsageGate {
    pub fn new(sink: SharedUsageSink) -> Self {
        Self { sink }
    }

    /// Hands a usage row to the sink iff the operation succeeded.
    /// Returns whether a row was submitted.
    pub fn observe(&self, tenant: &TenantRecord, operation: &CompletedOperation) -> bool {
        if !operation.outcome.is_success() {
            debug!(
                event = "usage_skipped",
                tenant_id = %tenant.tenant_id,
                outcome = operation.outcome.as_str()
            );
            return false;
        }
        let Some(record) = build_usage_record(tenant, operation, OffsetDateTime::now_utc()) else {
            warn!(
                event = "usage_skipped",
                tenant_id = %tenant.tenant_id,
                reason = "missing sandbox id"
            );
            return false;
        };
        self.sink.submit(record);
        true
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct CollectSink(Mutex<Vec<UsageRecord>>);

    impl UsageSink for CollectSink {
        fn submit(&self, record: UsageRecord) {
            self.0.lock().unwrap().push(record);
        }
    }

    fn tenant() -> TenantRecord {
        let tenant_id = TenantId::parse("11111111-1111-1111-1111-111111111111").unwrap();
        let now = OffsetDateTime::now_utc();
        TenantRecord {
            tenant_id,
            tenant_key: "acme".to_string(),
            primary_host: "acme.basedomain.example".to_string(),
            custom_hosts: BTreeSet::new(),
            sandbox_id: Some(SandboxId::derive(&tenant_id)),
            tier: "free".to_string(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    fn op(outcome: Outcome) -> CompletedOperation {
        CompletedOperation {
            outcome,
            model_identifier: "llama-3-8b".to_string(),
            input_units: 12,
            output_units: 34,
            latency: Duration::from_millis(250),
        }
    }

    #[test]
    fn failed_outcomes_write_nothing() {
        let sink = Arc::new(CollectSink::default());
        let gate = UsageGate::new(sink.clone());
        let tenant = tenant();
        for outcome in [
            Outcome::TransportFailure,
            Outcome::Timeout,
            Outcome::Rejected,
            Outcome::InternalError,
            Outcome::StreamAborted,
        ] {
            assert!(!gate.observe(&tenant, &op(outcome)));
        }
        assert!(sink.0.lock().unwrap().is_empty());
    }

    #[test]
    fn success_writes_exactly_one_matching_row() {
        let sink = Arc::new(CollectSink::default());
        let gate = UsageGate::new(sink.clone());
        let tenant = tenant();

        assert!(gate.observe(&tenant, &op(Outcome::Succeeded)));

        let rows = sink.0.lock().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].tenant_id, tenant.tenant_id);
        assert_eq!(Some(&rows[0].sandbox_id), tenant.sandbox_id.as_ref());
        assert_eq!(rows[0].model_identifier, "llama-3-8b");
        assert_eq!((rows[0].input_units, rows[0].output_units), (12, 34));
        assert_eq!(rows[0].latency_ms, 250);
    }

    #[test]
    fn tenant_without_sandbox_id_is_skipped() {
        let mut tenant = tenant();
        tenant.sandbox_id = None;
        assert!(build_usage_record(&tenant, &op(Outcome::Succeeded), OffsetDateTime::now_utc()).is_none());
    }
}
