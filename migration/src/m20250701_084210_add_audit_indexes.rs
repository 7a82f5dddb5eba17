use sea_orm_migration::prelude::*;

use crate::m20250618_101530_create_api_key_tables::ApiKeyAudit;

#[derive(DeriveMigrationName)]
pub struct Migration;

const IDX_AUDIT_KEY_ID_CREATED: &str = "idx-api_key_audit-api_key_id-created_at";
const IDX_AUDIT_ACTION: &str = "idx-api_key_audit-action";

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_index(
                Index::create()
                    .name(IDX_AUDIT_KEY_ID_CREATED)
                    .table(ApiKeyAudit::Table)
                    .col(ApiKeyAudit::ApiKeyId)
                    .col(ApiKeyAudit::CreatedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name(IDX_AUDIT_ACTION)
                    .table(ApiKeyAudit::Table)
                    .col(ApiKeyAudit::Action)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name(IDX_AUDIT_ACTION).to_owned())
            .await?;
        manager
            .drop_index(Index::drop().name(IDX_AUDIT_KEY_ID_CREATED).to_owned())
            .await?;

        Ok(())
    }
}
