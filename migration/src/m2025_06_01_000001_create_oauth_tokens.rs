//! Migration to create the oauth_tokens table.
//!
//! Stores one OAuth credential per (user, provider) pair with encrypted
//! access/refresh token columns and a UTC expiry timestamp.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(OauthTokens::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(OauthTokens::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(OauthTokens::UserId).uuid().not_null())
                    .col(ColumnDef::new(OauthTokens::Provider).text().not_null())
                    .col(
                        ColumnDef::new(OauthTokens::AccessTokenCiphertext)
                            .binary()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(OauthTokens::RefreshTokenCiphertext)
                            .binary()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(OauthTokens::TokenType)
                            .text()
                            .not_null()
                            .default("Bearer"),
                    )
                    .col(
                        ColumnDef::new(OauthTokens::ExpiresAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(OauthTokens::Scope).text().null())
                    .col(
                        ColumnDef::new(OauthTokens::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(OauthTokens::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // One active credential per (user, provider)
        manager
            .create_index(
                Index::create()
                    .name("idx_oauth_tokens_user_provider")
                    .table(OauthTokens::Table)
                    .col(OauthTokens::UserId)
                    .col(OauthTokens::Provider)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_oauth_tokens_user_provider")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(OauthTokens::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum OauthTokens {
    Table,
    Id,
    UserId,
    Provider,
    AccessTokenCiphertext,
    RefreshTokenCiphertext,
    TokenType,
    ExpiresAt,
    Scope,
    CreatedAt,
    UpdatedAt,
}
