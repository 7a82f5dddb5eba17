use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

const IDX_LEAD_WORKSPACE_EMAIL: &str = "idx-lead-workspace_id-email";
const IDX_IMPORT_BATCH_IMPORT_INDEX: &str = "idx-import_batch-import_id-batch_index";
const IDX_SEND_BATCH_SEND_INDEX: &str = "idx-send_batch-send_id-batch_index";
const IDX_DELIVERY_SEND_ID: &str = "idx-email_delivery-send_id";
const IDX_PROGRESS_WORKSPACE: &str = "idx-progress_record-workspace_id";

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Lead::Table)
                    .if_not_exists()
                    .col(uuid(Lead::Id).primary_key())
                    .col(string(Lead::WorkspaceId).not_null())
                    .col(string(Lead::Email).not_null())
                    .col(string_null(Lead::Name))
                    .col(string_null(Lead::Phone))
                    .col(json_binary(Lead::Tags).not_null())
                    .col(json_binary(Lead::Metadata).not_null())
                    .col(string(Lead::Source).not_null())
                    .col(string(Lead::Status).not_null())
                    .col(
                        timestamp_with_time_zone(Lead::CreatedAt)
                            .default(Expr::current_timestamp())
                            .not_null(),
                    )
                    .col(
                        timestamp_with_time_zone(Lead::UpdatedAt)
                            .default(Expr::current_timestamp())
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name(IDX_LEAD_WORKSPACE_EMAIL)
                    .table(Lead::Table)
                    .col(Lead::WorkspaceId)
                    .col(Lead::Email)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(ContactImport::Table)
                    .if_not_exists()
                    .col(uuid(ContactImport::Id).primary_key())
                    .col(string(ContactImport::WorkspaceId).not_null())
                    .col(integer(ContactImport::TotalRecords).not_null())
                    .col(integer(ContactImport::TotalBatches).not_null())
                    .col(integer(ContactImport::CompletedBatches).default(0).not_null())
                    .col(string(ContactImport::Status).not_null())
                    .col(
                        timestamp_with_time_zone(ContactImport::CreatedAt)
                            .default(Expr::current_timestamp())
                            .not_null(),
                    )
                    .col(
                        timestamp_with_time_zone(ContactImport::UpdatedAt)
                            .default(Expr::current_timestamp())
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(ImportBatch::Table)
                    .if_not_exists()
                    .col(uuid(ImportBatch::Id).primary_key())
                    .col(uuid(ImportBatch::ImportId).not_null())
                    .col(integer(ImportBatch::BatchIndex).not_null())
                    .col(integer(ImportBatch::Processed).default(0).not_null())
                    .col(integer(ImportBatch::Failed).default(0).not_null())
                    .col(json_binary(ImportBatch::Errors).not_null())
                    .col(
                        timestamp_with_time_zone(ImportBatch::CreatedAt)
                            .default(Expr::current_timestamp())
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-import_batch-import_id")
                            .from(ImportBatch::Table, ImportBatch::ImportId)
                            .to(ContactImport::Table, ContactImport::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name(IDX_IMPORT_BATCH_IMPORT_INDEX)
                    .table(ImportBatch::Table)
                    .col(ImportBatch::ImportId)
                    .col(ImportBatch::BatchIndex)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(CampaignSend::Table)
                    .if_not_exists()
                    .col(uuid(CampaignSend::Id).primary_key())
                    .col(string(CampaignSend::CampaignId).not_null())
                    .col(string(CampaignSend::WorkspaceId).not_null())
                    .col(integer(CampaignSend::TotalRecipients).not_null())
                    .col(integer(CampaignSend::TotalBatches).not_null())
                    .col(integer(CampaignSend::CompletedBatches).default(0).not_null())
                    .col(string(CampaignSend::Status).not_null())
                    .col(
                        timestamp_with_time_zone(CampaignSend::CreatedAt)
                            .default(Expr::current_timestamp())
                            .not_null(),
                    )
                    .col(
                        timestamp_with_time_zone(CampaignSend::UpdatedAt)
                            .default(Expr::current_timestamp())
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(SendBatch::Table)
                    .if_not_exists()
                    .col(uuid(SendBatch::Id).primary_key())
                    .col(uuid(SendBatch::SendId).not_null())
                    .col(integer(SendBatch::BatchIndex).not_null())
                    .col(integer(SendBatch::Sent).default(0).not_null())
                    .col(integer(SendBatch::Failed).default(0).not_null())
                    .col(json_binary(SendBatch::Failures).not_null())
                    .col(
                        timestamp_with_time_zone(SendBatch::CreatedAt)
                            .default(Expr::current_timestamp())
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-send_batch-send_id")
                            .from(SendBatch::Table, SendBatch::SendId)
                            .to(CampaignSend::Table, CampaignSend::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name(IDX_SEND_BATCH_SEND_INDEX)
                    .table(SendBatch::Table)
                    .col(SendBatch::SendId)
                    .col(SendBatch::BatchIndex)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(EmailDelivery::Table)
                    .if_not_exists()
                    .col(uuid(EmailDelivery::Id).primary_key())
                    .col(uuid(EmailDelivery::SendId).not_null())
                    .col(string(EmailDelivery::WorkspaceId).not_null())
                    .col(string(EmailDelivery::RecipientEmail).not_null())
                    .col(string(EmailDelivery::Status).not_null())
                    .col(string_null(EmailDelivery::ProviderId))
                    .col(string_null(EmailDelivery::Error))
                    .col(
                        timestamp_with_time_zone(EmailDelivery::CreatedAt)
                            .default(Expr::current_timestamp())
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-email_delivery-send_id")
                            .from(EmailDelivery::Table, EmailDelivery::SendId)
                            .to(CampaignSend::Table, CampaignSend::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name(IDX_DELIVERY_SEND_ID)
                    .table(EmailDelivery::Table)
                    .col(EmailDelivery::SendId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(ProgressRecord::Table)
                    .if_not_exists()
                    .col(string(ProgressRecord::Id).primary_key())
                    .col(string(ProgressRecord::Kind).not_null())
                    .col(string(ProgressRecord::WorkspaceId).not_null())
                    .col(string(ProgressRecord::Status).not_null())
                    .col(integer(ProgressRecord::Progress).default(0).not_null())
                    .col(integer(ProgressRecord::Total).default(0).not_null())
                    .col(integer(ProgressRecord::Processed).default(0).not_null())
                    .col(integer(ProgressRecord::Failed).default(0).not_null())
                    .col(string(ProgressRecord::Message).default("").not_null())
                    .col(json_binary(ProgressRecord::Metadata).not_null())
                    .col(json_binary(ProgressRecord::Errors).not_null())
                    .col(
                        timestamp_with_time_zone(ProgressRecord::StartedAt)
                            .default(Expr::current_timestamp())
                            .not_null(),
                    )
                    .col(timestamp_with_time_zone_null(ProgressRecord::EndedAt))
                    .col(
                        timestamp_with_time_zone(ProgressRecord::UpdatedAt)
                            .default(Expr::current_timestamp())
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name(IDX_PROGRESS_WORKSPACE)
                    .table(ProgressRecord::Table)
                    .col(ProgressRecord::WorkspaceId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ProgressRecord::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(EmailDelivery::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(SendBatch::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(CampaignSend::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(ImportBatch::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(ContactImport::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Lead::Table).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
pub enum Lead {
    Table,
    Id,
    WorkspaceId,
    Email,
    Name,
    Phone,
    Tags,
    Metadata,
    Source,
    Status,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
pub enum ContactImport {
    Table,
    Id,
    WorkspaceId,
    TotalRecords,
    TotalBatches,
    CompletedBatches,
    Status,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
pub enum ImportBatch {
    Table,
    Id,
    ImportId,
    BatchIndex,
    Processed,
    Failed,
    Errors,
    CreatedAt,
}

#[derive(DeriveIden)]
pub enum CampaignSend {
    Table,
    Id,
    CampaignId,
    WorkspaceId,
    TotalRecipients,
    TotalBatches,
    CompletedBatches,
    Status,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
pub enum SendBatch {
    Table,
    Id,
    SendId,
    BatchIndex,
    Sent,
    Failed,
    Failures,
    CreatedAt,
}

#[derive(DeriveIden)]
pub enum EmailDelivery {
    Table,
    Id,
    SendId,
    WorkspaceId,
    RecipientEmail,
    Status,
    ProviderId,
    Error,
    CreatedAt,
}

#[derive(DeriveIden)]
pub enum ProgressRecord {
    Table,
    Id,
    Kind,
    WorkspaceId,
    Status,
    Progress,
    Total,
    Processed,
    Failed,
    Message,
    Metadata,
    Errors,
    StartedAt,
    EndedAt,
    UpdatedAt,
}
