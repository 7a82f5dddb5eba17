use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

const IDX_API_KEY_WORKSPACE: &str = "idx-api_key-workspace_id";
const IDX_API_KEY_HASH: &str = "idx-api_key-key_hash";

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ApiKey::Table)
                    .if_not_exists()
                    .col(uuid(ApiKey::Id).primary_key())
                    .col(string(ApiKey::WorkspaceId).not_null())
                    .col(string(ApiKey::Name).not_null())
                    .col(string(ApiKey::KeyHash).not_null())
                    .col(json_binary(ApiKey::Permissions).not_null())
                    .col(string(ApiKey::Status).not_null())
                    .col(timestamp_with_time_zone(ApiKey::ExpiresAt).not_null())
                    .col(boolean(ApiKey::AutoRenew).default(false).not_null())
                    .col(integer(ApiKey::RenewalPeriodDays).default(90).not_null())
                    .col(timestamp_with_time_zone_null(ApiKey::RevokedAt))
                    .col(string_null(ApiKey::RevokedBy))
                    .col(string_null(ApiKey::RevokedReason))
                    .col(timestamp_with_time_zone_null(ApiKey::LastUsedAt))
                    .col(
                        timestamp_with_time_zone(ApiKey::CreatedAt)
                            .default(Expr::current_timestamp())
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name(IDX_API_KEY_WORKSPACE)
                    .table(ApiKey::Table)
                    .col(ApiKey::WorkspaceId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name(IDX_API_KEY_HASH)
                    .table(ApiKey::Table)
                    .col(ApiKey::KeyHash)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(ApiKeyAudit::Table)
                    .if_not_exists()
                    .col(big_integer(ApiKeyAudit::Id).auto_increment().primary_key())
                    .col(uuid(ApiKeyAudit::ApiKeyId).not_null())
                    .col(string(ApiKeyAudit::Action).not_null())
                    .col(string_null(ApiKeyAudit::UserId))
                    .col(string_null(ApiKeyAudit::IpAddress))
                    .col(string_null(ApiKeyAudit::UserAgent))
                    .col(json_binary(ApiKeyAudit::Metadata).not_null())
                    .col(
                        timestamp_with_time_zone(ApiKeyAudit::CreatedAt)
                            .default(Expr::current_timestamp())
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-api_key_audit-api_key_id")
                            .from(ApiKeyAudit::Table, ApiKeyAudit::ApiKeyId)
                            .to(ApiKey::Table, ApiKey::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ApiKeyAudit::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(ApiKey::Table).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
pub enum ApiKey {
    Table,
    Id,
    WorkspaceId,
    Name,
    KeyHash,
    Permissions,
    Status,
    ExpiresAt,
    AutoRenew,
    RenewalPeriodDays,
    RevokedAt,
    RevokedBy,
    RevokedReason,
    LastUsedAt,
    CreatedAt,
}

#[derive(DeriveIden)]
pub enum ApiKeyAudit {
    Table,
    Id,
    ApiKeyId,
    Action,
    UserId,
    IpAddress,
    UserAgent,
    Metadata,
    CreatedAt,
}
