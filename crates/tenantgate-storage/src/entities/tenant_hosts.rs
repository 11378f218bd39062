use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

/// Custom hosts. Primary hosts live on `tenants` itself.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "tenant_hosts")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub tenant_row_id: i64,
    #[sea_orm(unique_key = "tenant_host")]
    pub host: String,
    pub created_at: OffsetDateTime,
    #[sea_orm(belongs_to, from = "tenant_row_id", to = "id", on_delete = "Cascade")]
    pub tenant: HasOne<super::tenants::Entity>,
}

impl ActiveModelBehavior for ActiveModel {}
