use std::time::Duration;

use tenantgate_core::UsageRecord;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self as tokio_time, MissedTickBehavior};
use tracing::{info, warn};

use crate::sinks::BusUsageSink;
use crate::storage::TenantStorage;

#[derive(Debug, Clone)]
pub struct StorageBusConfig {
    pub usage_capacity: usize,
    pub usage_batch_size: usize,
    pub flush_interval: Duration,
}

impl Default for StorageBusConfig {
    fn default() -> Self {
        Self {
            usage_capacity: 65_536,
            usage_batch_size: 200,
            flush_interval: Duration::from_millis(200),
        }
    }
}

/// Write-behind queue for usage rows.
///
/// Producers never wait on the database. A failed batch is logged and
/// dropped; there is no retry.
pub struct StorageBus {
    usage_tx: mpsc::Sender<UsageRecord>,
    shutdown_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl StorageBus {
    pub fn spawn(storage: TenantStorage, config: StorageBusConfig) -> Self {
        let (usage_tx, usage_rx) = mpsc::channel(config.usage_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(usage_writer(
            storage,
            usage_rx,
            shutdown_rx,
            config.usage_batch_size.max(1),
            config.flush_interval,
        ));
        Self {
            usage_tx,
            shutdown_tx,
            handle,
        }
    }

    pub fn usage_sink(&self) -> BusUsageSink {
        BusUsageSink::new(self.usage_tx.clone())
    }

    /// Stops accepting rows, writes what is queued, and waits up to `grace`.
    /// Whatever has not been written by then is dropped.
    pub async fn shutdown(self, grace: Duration) {
        let Self {
            usage_tx,
            shutdown_tx,
            mut handle,
        } = self;
        drop(usage_tx);
        let _ = shutdown_tx.send(());
        match tokio_time::timeout(grace, &mut handle).await {
            Ok(Ok(())) => info!(event = "usage_writer_stopped"),
            Ok(Err(err)) => warn!(event = "usage_writer_stopped", error = %err),
            Err(_) => {
                warn!(
                    event = "usage_writer_stopped",
                    grace_ms = grace.as_millis() as u64,
                    "drain did not finish in time; queued usage rows dropped"
                );
                handle.abort();
            }
        }
    }
}

async fn usage_writer(
    storage: TenantStorage,
    mut rx: mpsc::Receiver<UsageRecord>,
    mut shutdown_rx: oneshot::Receiver<()>,
    batch_size: usize,
    flush_interval: Duration,
) {
    let mut buffer = Vec::with_capacity(batch_size);
    let mut ticker = tokio_time::interval(flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            Some(record) = rx.recv() => {
                buffer.push(record);
                if buffer.len() >= batch_size {
                    flush_usage(&storage, &mut buffer).await;
                }
            }
            _ = ticker.tick() => {
                if !buffer.is_empty() {
                    flush_usage(&storage, &mut buffer).await;
                }
            }
            _ = &mut shutdown_rx => {
                rx.close();
                while let Ok(record) = rx.try_recv() {
                    buffer.push(record);
                    if buffer.len() >= batch_size {
                        flush_usage(&storage, &mut buffer).await;
                    }
                }
                flush_usage(&storage, &mut buffer).await;
                break;
            }
            else => {
                flush_usage(&storage, &mut buffer).await;
                break;
            }
        }
    }
}

async fn flush_usage(storage: &TenantStorage, buffer: &mut Vec<UsageRecord>) {
    if buffer.is_empty() {
        return;
    }
    if let Err(err) = storage.insert_usage_batch(buffer).await {
        warn!(
            event = "usage_write_failed",
            dropped = buffer.len(),
            error = %err
        );
    }
    buffer.clear();
}
