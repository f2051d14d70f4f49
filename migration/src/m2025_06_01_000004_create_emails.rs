//! Migration to create the emails table.
//!
//! (user_id, provider_message_id) is the deduplication key: ingestion is an
//! upsert on this pair, so re-fetching an overlapping window never creates
//! duplicate rows.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Emails::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Emails::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Emails::UserId).uuid().not_null())
                    .col(ColumnDef::new(Emails::Provider).text().not_null())
                    .col(
                        ColumnDef::new(Emails::ProviderMessageId)
                            .text()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Emails::ThreadId).text().not_null())
                    .col(ColumnDef::new(Emails::Subject).text().null())
                    .col(ColumnDef::new(Emails::FromEmail).text().null())
                    .col(ColumnDef::new(Emails::ToEmails).json_binary().null())
                    .col(ColumnDef::new(Emails::CcEmails).json_binary().null())
                    .col(ColumnDef::new(Emails::BccEmails).json_binary().null())
                    .col(
                        ColumnDef::new(Emails::SentAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(Emails::Snippet).text().null())
                    .col(ColumnDef::new(Emails::BodyText).text().null())
                    .col(ColumnDef::new(Emails::BodyHtml).text().null())
                    .col(ColumnDef::new(Emails::Labels).json_binary().null())
                    .col(
                        ColumnDef::new(Emails::HasAttachments)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(Emails::SizeEstimate).big_integer().null())
                    .col(
                        ColumnDef::new(Emails::IsRead)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(Emails::Category).text().null())
                    .col(ColumnDef::new(Emails::CategoryConfidence).double().null())
                    .col(
                        ColumnDef::new(Emails::CategoryPromptVersion)
                            .text()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Emails::CategorizedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Emails::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Emails::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_emails_user_provider_message")
                    .table(Emails::Table)
                    .col(Emails::UserId)
                    .col(Emails::ProviderMessageId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Thread projection reads scan by (user, thread)
        manager
            .create_index(
                Index::create()
                    .name("idx_emails_user_thread")
                    .table(Emails::Table)
                    .col(Emails::UserId)
                    .col(Emails::ThreadId)
                    .to_owned(),
            )
            .await?;

        // Watermark lookups order by sent_at
        manager
            .create_index(
                Index::create()
                    .name("idx_emails_user_sent_at")
                    .table(Emails::Table)
                    .col(Emails::UserId)
                    .col(Emails::SentAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_emails_user_sent_at").to_owned())
            .await?;

        manager
            .drop_index(Index::drop().name("idx_emails_user_thread").to_owned())
            .await?;

        manager
            .drop_index(
                Index::drop()
                    .name("idx_emails_user_provider_message")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(Emails::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Emails {
    Table,
    Id,
    UserId,
    Provider,
    ProviderMessageId,
    ThreadId,
    Subject,
    FromEmail,
    ToEmails,
    CcEmails,
    BccEmails,
    SentAt,
    Snippet,
    BodyText,
    BodyHtml,
    Labels,
    HasAttachments,
    SizeEstimate,
    IsRead,
    Category,
    CategoryConfidence,
    CategoryPromptVersion,
    CategorizedAt,
    CreatedAt,
    UpdatedAt,
}
