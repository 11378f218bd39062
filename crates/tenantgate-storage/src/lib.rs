pub mod bus;
pub mod db;
pub mod entities;
pub mod registry;
pub mod sinks;
pub mod storage;

pub use bus::{StorageBus, StorageBusConfig};
pub use registry::CachedRegistry;
pub use sinks::BusUsageSink;
pub use storage::{NewTenant, StorageError, StorageResult, TenantStorage};
