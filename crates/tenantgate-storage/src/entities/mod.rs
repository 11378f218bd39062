pub mod tenant_hosts;
pub mod tenants;
pub mod usage_records;

pub use tenant_hosts::Entity as TenantHosts;
pub use tenants::Entity as Tenants;
pub use usage_records::Entity as UsageRecords;
