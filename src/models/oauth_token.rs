//! OAuth token entity model
//!
//! This module contains the SeaORM entity model for the oauth_tokens table,
//! which stores one encrypted OAuth credential per (user, provider) pair.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

/// OAuth credential for a single (user, provider) pair.
///
/// `expires_at` is always UTC-normalized before persistence; comparisons
/// against it must use a UTC `now` as well.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "oauth_tokens")]
pub struct Model {
    /// Unique identifier for the credential (primary key)
    #[sea_orm(primary_key)]
    pub id: Uuid,

    /// Owning user
    pub user_id: Uuid,

    /// Provider slug ("gmail" or "slack")
    pub provider: String,

    /// Encrypted access token ciphertext
    pub access_token_ciphertext: Vec<u8>,

    /// Encrypted refresh token ciphertext; absent when the provider issued
    /// no refresh token
    pub refresh_token_ciphertext: Option<Vec<u8>>,

    /// OAuth token type, normally "Bearer"
    pub token_type: String,

    /// Expiration timestamp (UTC)
    pub expires_at: DateTimeWithTimeZone,

    /// Granted scopes as the provider reported them
    pub scope: Option<String>,

    /// Timestamp when the credential was created
    pub created_at: DateTimeWithTimeZone,

    /// Timestamp when the credential was last updated
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
