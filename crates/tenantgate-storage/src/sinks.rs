use tenantgate_core::{UsageRecord, UsageSink};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::warn;

/// Hands usage rows to the [`StorageBus`](crate::StorageBus) without waiting.
#[derive(Clone)]
pub struct BusUsageSink {
    tx: mpsc::Sender<UsageRecord>,
}

impl BusUsageSink {
    pub fn new(tx: mpsc::Sender<UsageRecord>) -> Self {
        Self { tx }
    }
}

impl UsageSink for BusUsageSink {
    fn submit(&self, record: UsageRecord) {
        match self.tx.try_send(record) {
            Ok(()) => {}
            Err(TrySendError::Full(record)) => warn!(
                event = "usage_dropped",
                reason = "queue full",
                tenant_id = %record.tenant_id
            ),
            Err(TrySendError::Closed(record)) => warn!(
                event = "usage_dropped",
                reason = "shutting down",
                tenant_id = %record.tenant_id
            ),
        }
    }
}
