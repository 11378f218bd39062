use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "tenants")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique_key = "tenant_tenant_id")]
    pub tenant_id: Uuid,
    #[sea_orm(unique_key = "tenant_key")]
    pub tenant_key: String,
    #[sea_orm(unique_key = "tenant_primary_host")]
    pub primary_host: String,
    #[sea_orm(unique_key = "tenant_sandbox_id")]
    pub sandbox_id: Option<String>,
    pub tier: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub deleted_at: Option<OffsetDateTime>,
    #[sea_orm(has_many)]
    pub hosts: HasMany<super::tenant_hosts::Entity>,
}

impl ActiveModelBehavior for ActiveModel {}
