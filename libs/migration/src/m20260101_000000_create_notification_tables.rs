use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Create the notification_templates table
        manager
            .create_table(
                Table::create()
                    .table(NotificationTemplates::Table)
                    .if_not_exists()
                    .col(pk_uuid(NotificationTemplates::Id))
                    .col(
                        ColumnDef::new(NotificationTemplates::Trigger)
                            .string_len(64)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(NotificationTemplates::Channel)
                            .string_len(16)
                            .not_null(),
                    )
                    .col(text_null(NotificationTemplates::Subject))
                    .col(text_null(NotificationTemplates::BodyHtml))
                    .col(text(NotificationTemplates::BodyText))
                    .col(
                        ColumnDef::new(NotificationTemplates::Variables)
                            .json_binary()
                            .not_null()
                            .default(Expr::cust("'[]'::jsonb")),
                    )
                    .col(
                        ColumnDef::new(NotificationTemplates::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(NotificationTemplates::Version)
                            .integer()
                            .not_null()
                            .default(1),
                    )
                    .col(
                        timestamp_with_time_zone(NotificationTemplates::CreatedAt)
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        timestamp_with_time_zone(NotificationTemplates::UpdatedAt)
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Create the append-only notification_template_versions table
        manager
            .create_table(
                Table::create()
                    .table(NotificationTemplateVersions::Table)
                    .if_not_exists()
                    .col(pk_uuid(NotificationTemplateVersions::Id))
                    .col(
                        ColumnDef::new(NotificationTemplateVersions::TemplateId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(NotificationTemplateVersions::Version)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(NotificationTemplateVersions::Snapshot)
                            .json_binary()
                            .not_null(),
                    )
                    .col(
                        timestamp_with_time_zone(NotificationTemplateVersions::CreatedAt)
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_notification_template_versions_template")
                            .from(
                                NotificationTemplateVersions::Table,
                                NotificationTemplateVersions::TemplateId,
                            )
                            .to(NotificationTemplates::Table, NotificationTemplates::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Create the notification_settings table
        manager
            .create_table(
                Table::create()
                    .table(NotificationSettings::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(NotificationSettings::NotificationType)
                            .string_len(64)
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(NotificationSettings::EmailEnabled)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(NotificationSettings::SmsEnabled)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(NotificationSettings::MaxRetries)
                            .integer()
                            .not_null()
                            .default(2),
                    )
                    .col(
                        ColumnDef::new(NotificationSettings::RetryDelaysSeconds)
                            .json_binary()
                            .not_null()
                            .default(Expr::cust("'[30, 300]'::jsonb")),
                    )
                    .col(
                        timestamp_with_time_zone(NotificationSettings::UpdatedAt)
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Create the notification_logs table
        manager
            .create_table(
                Table::create()
                    .table(NotificationLogs::Table)
                    .if_not_exists()
                    .col(pk_uuid(NotificationLogs::Id))
                    .col(
                        ColumnDef::new(NotificationLogs::NotificationType)
                            .string_len(64)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(NotificationLogs::Channel)
                            .string_len(16)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(NotificationLogs::Recipient)
                            .json_binary()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(NotificationLogs::RecipientAddress)
                            .string_len(255)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(NotificationLogs::Rendered)
                            .json_binary()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(NotificationLogs::Variables)
                            .json_binary()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(NotificationLogs::Priority)
                            .string_len(16)
                            .not_null()
                            .default("normal"),
                    )
                    .col(
                        ColumnDef::new(NotificationLogs::Status)
                            .string_len(32)
                            .not_null()
                            .default("pending"),
                    )
                    .col(
                        ColumnDef::new(NotificationLogs::RetryCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(timestamp_with_time_zone_null(NotificationLogs::RetryAfter))
                    .col(text_null(NotificationLogs::ProviderMessageId))
                    .col(text_null(NotificationLogs::ErrorMessage))
                    .col(
                        ColumnDef::new(NotificationLogs::ErrorKind)
                            .string_len(32)
                            .null(),
                    )
                    .col(
                        ColumnDef::new(NotificationLogs::IsTest)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(NotificationLogs::ResendOf).uuid().null())
                    .col(
                        timestamp_with_time_zone(NotificationLogs::CreatedAt)
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        timestamp_with_time_zone(NotificationLogs::UpdatedAt)
                            .default(Expr::current_timestamp()),
                    )
                    .col(timestamp_with_time_zone_null(NotificationLogs::SentAt))
                    .to_owned(),
            )
            .await?;

        // Create indexes
        manager
            .create_index(
                Index::create()
                    .name("idx_notification_templates_trigger_channel")
                    .table(NotificationTemplates::Table)
                    .col(NotificationTemplates::Trigger)
                    .col(NotificationTemplates::Channel)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_notification_template_versions_template_version")
                    .table(NotificationTemplateVersions::Table)
                    .col(NotificationTemplateVersions::TemplateId)
                    .col(NotificationTemplateVersions::Version)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_notification_logs_status_retry_after")
                    .table(NotificationLogs::Table)
                    .col(NotificationLogs::Status)
                    .col(NotificationLogs::RetryAfter)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_notification_logs_created_at")
                    .table(NotificationLogs::Table)
                    .col(NotificationLogs::CreatedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_notification_logs_recipient_address")
                    .table(NotificationLogs::Table)
                    .col(NotificationLogs::RecipientAddress)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(NotificationLogs::Table).to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(NotificationSettings::Table).to_owned())
            .await?;

        manager
            .drop_table(
                Table::drop()
                    .table(NotificationTemplateVersions::Table)
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(NotificationTemplates::Table).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
enum NotificationTemplates {
    Table,
    Id,
    Trigger,
    Channel,
    Subject,
    BodyHtml,
    BodyText,
    Variables,
    IsActive,
    Version,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum NotificationTemplateVersions {
    Table,
    Id,
    TemplateId,
    Version,
    Snapshot,
    CreatedAt,
}

#[derive(DeriveIden)]
enum NotificationSettings {
    Table,
    NotificationType,
    EmailEnabled,
    SmsEnabled,
    MaxRetries,
    RetryDelaysSeconds,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum NotificationLogs {
    Table,
    Id,
    NotificationType,
    Channel,
    Recipient,
    RecipientAddress,
    Rendered,
    Variables,
    Priority,
    Status,
    RetryCount,
    RetryAfter,
    ProviderMessageId,
    ErrorMessage,
    ErrorKind,
    IsTest,
    ResendOf,
    CreatedAt,
    UpdatedAt,
    SentAt,
}
