#![allow(clippy::needless_update)]

use std::collections::HashMap;

use sea_orm::sea_query::{Expr, Index};
use sea_orm::{
    ActiveModelTrait, ActiveValue, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr,
    EntityTrait, QueryFilter, QueryOrder, Schema, SqlErr, TransactionTrait,
};
use tenantgate_core::{
    SandboxClaim, SandboxId, SandboxIdError, TenantId, TenantRecord, UsageRecord,
    normalize_host, subdomain_label, validate_override_token,
};
use time::OffsetDateTime;

use crate::db;
use crate::entities;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("db error: {0}")]
    Db(#[from] DbErr),
    #[error("stored sandbox id is invalid: {0}")]
    InvalidSandboxId(#[from] SandboxIdError),
    #[error("invalid tenant key: {0:?}")]
    InvalidTenantKey(String),
    #[error("invalid host: {0:?}")]
    InvalidHost(String),
    #[error("conflict: {0}")]
    Conflict(String),
}

/// Input for registering a pre-provisioned tenant. The primary host is always
/// `<tenant_key>.<base_domain>` and is derived on insert.
#[derive(Debug, Clone)]
pub struct NewTenant {
    pub tenant_id: TenantId,
    pub tenant_key: String,
    pub custom_hosts: Vec<String>,
    pub tier: String,
}

#[derive(Clone)]
pub struct TenantStorage {
    db: DatabaseConnection,
}

impl TenantStorage {
    pub async fn connect(dsn: &str) -> StorageResult<Self> {
        Ok(Self {
            db: db::connect(dsn).await?,
        })
    }

    pub fn from_connection(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    /// Idempotent create-if-not-exists of every table and index.
    pub async fn sync(&self) -> StorageResult<()> {
        Schema::new(self.db.get_database_backend())
            .builder()
            .register(entities::Tenants)
            .register(entities::TenantHosts)
            .register(entities::UsageRecords)
            .sync(&self.db)
            .await?;
        self.ensure_indexes().await?;
        Ok(())
    }

    async fn ensure_indexes(&self) -> StorageResult<()> {
        use entities::tenant_hosts::Column as HostColumn;
        use entities::usage_records::Column as UsageColumn;

        let statements = vec![
            Index::create()
                .name("idx_usage_records_tenant_created_at")
                .table(entities::usage_records::Entity)
                .col(UsageColumn::TenantId)
                .col(UsageColumn::CreatedAt)
                .if_not_exists()
                .to_owned(),
            Index::create()
                .name("idx_tenant_hosts_tenant_row_id")
                .table(entities::tenant_hosts::Entity)
                .col(HostColumn::TenantRowId)
                .if_not_exists()
                .to_owned(),
        ];

        for statement in statements {
            self.db.execute(&statement).await?;
        }

        Ok(())
    }

    pub async fn health(&self) -> StorageResult<()> {
        entities::Tenants::find()
            .order_by_asc(entities::tenants::Column::Id)
            .one(&self.db)
            .await?;
        Ok(())
    }

    /// Registers a tenant with its hosts. Hosts are normalized and must not be
    /// claimed by any other tenant, as primary or custom host. Custom hosts
    /// may not sit under `base_domain`, since such hosts only ever resolve
    /// through the subdomain path.
    pub async fn insert_tenant(
        &self,
        base_domain: &str,
        input: NewTenant,
    ) -> StorageResult<TenantRecord> {
        use entities::tenant_hosts::Column as HostColumn;
        use entities::tenants::Column as TenantColumn;

        if validate_override_token(&input.tenant_key).as_deref() != Some(input.tenant_key.as_str()) {
            return Err(StorageError::InvalidTenantKey(input.tenant_key));
        }
        let base_domain = normalize_host(base_domain)
            .ok_or_else(|| StorageError::InvalidHost(base_domain.to_string()))?;
        let primary_host = format!("{}.{base_domain}", input.tenant_key);
        let primary_host = normalize_host(&primary_host)
            .filter(|host| subdomain_label(host, &base_domain) == Some(input.tenant_key.as_str()))
            .ok_or(StorageError::InvalidHost(primary_host))?;
        let mut custom_hosts = Vec::with_capacity(input.custom_hosts.len());
        for host in &input.custom_hosts {
            let host = normalize_host(host).ok_or_else(|| StorageError::InvalidHost(host.clone()))?;
            if host == base_domain || subdomain_label(&host, &base_domain).is_some() {
                return Err(StorageError::InvalidHost(host));
            }
            if custom_hosts.contains(&host) {
                return Err(StorageError::Conflict(format!("host {host} listed twice")));
            }
            custom_hosts.push(host);
        }

        let txn = self.db.begin().await?;

        let mut all_hosts = custom_hosts.clone();
        all_hosts.push(primary_host.clone());
        let primary_taken = entities::Tenants::find()
            .filter(TenantColumn::PrimaryHost.is_in(all_hosts.clone()))
            .one(&txn)
            .await?;
        let custom_taken = entities::TenantHosts::find()
            .filter(HostColumn::Host.is_in(all_hosts))
            .one(&txn)
            .await?;
        if let Some(row) = primary_taken {
            return Err(StorageError::Conflict(format!(
                "host {} already registered",
                row.primary_host
            )));
        }
        if let Some(row) = custom_taken {
            return Err(StorageError::Conflict(format!(
                "host {} already registered",
                row.host
            )));
        }

        let now = OffsetDateTime::now_utc();
        let tenant = entities::tenants::ActiveModel {
            id: ActiveValue::NotSet,
            tenant_id: ActiveValue::Set(*input.tenant_id.as_uuid()),
            tenant_key: ActiveValue::Set(input.tenant_key.clone()),
            primary_host: ActiveValue::Set(primary_host),
            sandbox_id: ActiveValue::Set(None),
            tier: ActiveValue::Set(input.tier),
            created_at: ActiveValue::Set(now),
            updated_at: ActiveValue::Set(now),
            deleted_at: ActiveValue::Set(None),
            ..Default::default()
        };
        let tenant = tenant.insert(&txn).await?;

        for host in &custom_hosts {
            let active = entities::tenant_hosts::ActiveModel {
                id: ActiveValue::NotSet,
                tenant_row_id: ActiveValue::Set(tenant.id),
                host: ActiveValue::Set(host.clone()),
                created_at: ActiveValue::Set(now),
                ..Default::default()
            };
            entities::TenantHosts::insert(active).exec(&txn).await?;
        }

        txn.commit().await?;
        tenant_record(tenant, custom_hosts)
    }

    /// Marks a tenant deleted. Returns `false` when the key is unknown.
    pub async fn soft_delete_tenant(
        &self,
        tenant_key: &str,
        at: OffsetDateTime,
    ) -> StorageResult<bool> {
        use entities::tenants::Column;

        let result = entities::Tenants::update_many()
            .col_expr(Column::DeletedAt, Expr::value(at))
            .col_expr(Column::UpdatedAt, Expr::value(at))
            .filter(Column::TenantKey.eq(tenant_key))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }

    /// Every tenant, soft-deleted ones included, with their custom hosts.
    pub async fn load_tenants(&self) -> StorageResult<Vec<TenantRecord>> {
        let tenants = entities::Tenants::find()
            .order_by_asc(entities::tenants::Column::Id)
            .all(&self.db)
            .await?;
        let hosts = entities::TenantHosts::find().all(&self.db).await?;

        let mut hosts_by_row: HashMap<i64, Vec<String>> = HashMap::new();
        for host in hosts {
            hosts_by_row.entry(host.tenant_row_id).or_default().push(host.host);
        }

        tenants
            .into_iter()
            .map(|tenant| {
                let hosts = hosts_by_row.remove(&tenant.id).unwrap_or_default();
                tenant_record(tenant, hosts)
            })
            .collect()
    }

    pub async fn find_tenant_by_key(&self, tenant_key: &str) -> StorageResult<Option<TenantRecord>> {
        let tenant = entities::Tenants::find()
            .filter(entities::tenants::Column::TenantKey.eq(tenant_key))
            .one(&self.db)
            .await?;
        match tenant {
            Some(tenant) => self.with_hosts(tenant).await.map(Some),
            None => Ok(None),
        }
    }

    pub async fn find_tenant_by_custom_host(
        &self,
        host: &str,
    ) -> StorageResult<Option<TenantRecord>> {
        let Some(row) = entities::TenantHosts::find()
            .filter(entities::tenant_hosts::Column::Host.eq(host))
            .one(&self.db)
            .await?
        else {
            return Ok(None);
        };
        let tenant = entities::Tenants::find_by_id(row.tenant_row_id)
            .one(&self.db)
            .await?;
        match tenant {
            Some(tenant) => self.with_hosts(tenant).await.map(Some),
            None => Ok(None),
        }
    }

    pub async fn find_sandbox_owner(&self, sandbox_id: &SandboxId) -> StorageResult<Option<TenantId>> {
        let tenant = entities::Tenants::find()
            .filter(entities::tenants::Column::SandboxId.eq(sandbox_id.as_str()))
            .one(&self.db)
            .await?;
        Ok(tenant.map(|tenant| TenantId::from_uuid(tenant.tenant_id)))
    }

    /// Stores `sandbox_id` on the tenant only if it has none and no other
    /// tenant holds it. The update is conditional on `sandbox_id IS NULL`, so
    /// a concurrent claimer cannot overwrite an assigned id.
    pub async fn claim_sandbox_id(
        &self,
        tenant_id: &TenantId,
        sandbox_id: &SandboxId,
    ) -> StorageResult<SandboxClaim> {
        use entities::tenants::Column;

        if let Some(existing) = self.stored_sandbox_id(tenant_id).await? {
            return Ok(SandboxClaim::AlreadyAssigned(existing));
        }
        if let Some(owner) = self.find_sandbox_owner(sandbox_id).await?
            && owner != *tenant_id
        {
            return Ok(SandboxClaim::Taken);
        }

        let result = entities::Tenants::update_many()
            .col_expr(Column::SandboxId, Expr::value(sandbox_id.as_str().to_string()))
            .col_expr(Column::UpdatedAt, Expr::value(OffsetDateTime::now_utc()))
            .filter(Column::TenantId.eq(*tenant_id.as_uuid()))
            .filter(Column::SandboxId.is_null())
            .exec(&self.db)
            .await;
        match result {
            Ok(result) if result.rows_affected > 0 => Ok(SandboxClaim::Claimed),
            Ok(_) => match self.stored_sandbox_id(tenant_id).await? {
                Some(existing) => Ok(SandboxClaim::AlreadyAssigned(existing)),
                None => Err(StorageError::Conflict(format!(
                    "tenant id {tenant_id} is not registered"
                ))),
            },
            Err(err) if matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                Ok(SandboxClaim::Taken)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn stored_sandbox_id(&self, tenant_id: &TenantId) -> StorageResult<Option<SandboxId>> {
        let tenant = entities::Tenants::find()
            .filter(entities::tenants::Column::TenantId.eq(*tenant_id.as_uuid()))
            .one(&self.db)
            .await?;
        match tenant.and_then(|tenant| tenant.sandbox_id) {
            Some(raw) => Ok(Some(SandboxId::parse(&raw)?)),
            None => Ok(None),
        }
    }

    async fn with_hosts(&self, tenant: entities::tenants::Model) -> StorageResult<TenantRecord> {
        let hosts = entities::TenantHosts::find()
            .filter(entities::tenant_hosts::Column::TenantRowId.eq(tenant.id))
            .all(&self.db)
            .await?
            .into_iter()
            .map(|row| row.host)
            .collect();
        tenant_record(tenant, hosts)
    }

    pub async fn insert_usage_batch(&self, records: &[UsageRecord]) -> StorageResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        let actives = records.iter().map(|record| entities::usage_records::ActiveModel {
            id: ActiveValue::NotSet,
            tenant_id: ActiveValue::Set(*record.tenant_id.as_uuid()),
            sandbox_id: ActiveValue::Set(record.sandbox_id.to_string()),
            model_identifier: ActiveValue::Set(record.model_identifier.clone()),
            input_units: ActiveValue::Set(record.input_units),
            output_units: ActiveValue::Set(record.output_units),
            latency_ms: ActiveValue::Set(record.latency_ms),
            created_at: ActiveValue::Set(record.created_at),
            ..Default::default()
        });
        entities::UsageRecords::insert_many(actives)
            .exec(&self.db)
            .await?;
        Ok(())
    }

    /// Usage rows for one tenant with `from <= created_at < to`, oldest first.
    pub async fn usage_for_tenant(
        &self,
        tenant_id: &TenantId,
        from: OffsetDateTime,
        to: OffsetDateTime,
    ) -> StorageResult<Vec<UsageRecord>> {
        use entities::usage_records::Column;

        let rows = entities::UsageRecords::find()
            .filter(Column::TenantId.eq(*tenant_id.as_uuid()))
            .filter(Column::CreatedAt.gte(from))
            .filter(Column::CreatedAt.lt(to))
            .order_by_asc(Column::CreatedAt)
            .order_by_asc(Column::Id)
            .all(&self.db)
            .await?;

        rows.into_iter()
            .map(|row| {
                Ok(UsageRecord {
                    tenant_id: TenantId::from_uuid(row.tenant_id),
                    sandbox_id: SandboxId::parse(&row.sandbox_id)?,
                    model_identifier: row.model_identifier,
                    input_units: row.input_units,
                    output_units: row.output_units,
                    latency_ms: row.latency_ms,
                    created_at: row.created_at,
                })
            })
            .collect()
    }
}

fn tenant_record(
    tenant: entities::tenants::Model,
    custom_hosts: Vec<String>,
) -> StorageResult<TenantRecord> {
    let sandbox_id = tenant
        .sandbox_id
        .as_deref()
        .map(SandboxId::parse)
        .transpose()?;
    Ok(TenantRecord {
        tenant_id: TenantId::from_uuid(tenant.tenant_id),
        tenant_key: tenant.tenant_key,
        primary_host: tenant.primary_host,
        custom_hosts: custom_hosts.into_iter().collect(),
        sandbox_id,
        tier: tenant.tier,
        created_at: tenant.created_at,
        updated_at: tenant.updated_at,
        deleted_at: tenant.deleted_at,
    })
}
