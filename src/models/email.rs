//! Email entity model
//!
//! This module contains the SeaORM entity model for the emails table. The
//! (user_id, provider_message_id) pair is the deduplication key: ingestion
//! upserts on it, so re-fetching an overlapping window updates existing rows
//! instead of duplicating them.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Canonical email record normalized from a provider message.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "emails")]
pub struct Model {
    /// Unique identifier for the email (primary key)
    #[sea_orm(primary_key)]
    pub id: Uuid,

    /// Owning user
    pub user_id: Uuid,

    /// Provider slug the message came from
    pub provider: String,

    /// Provider-assigned message identifier (dedup key with user_id)
    pub provider_message_id: String,

    /// Conversation grouping key; falls back to provider_message_id when the
    /// provider supplies none
    pub thread_id: String,

    /// Subject header
    pub subject: Option<String>,

    /// Raw From header ("Name <addr>" or bare address)
    pub from_email: Option<String>,

    /// To recipients as a JSON string array
    #[sea_orm(column_type = "JsonBinary")]
    pub to_emails: Option<JsonValue>,

    /// Cc recipients as a JSON string array
    #[sea_orm(column_type = "JsonBinary")]
    pub cc_emails: Option<JsonValue>,

    /// Bcc recipients as a JSON string array
    #[sea_orm(column_type = "JsonBinary")]
    pub bcc_emails: Option<JsonValue>,

    /// When the message was sent (UTC); absent when the provider gave no
    /// usable timestamp
    pub sent_at: Option<DateTimeWithTimeZone>,

    /// Provider-generated preview snippet
    pub snippet: Option<String>,

    /// First text/plain body part found in the MIME tree
    pub body_text: Option<String>,

    /// First text/html body part found in the MIME tree
    pub body_html: Option<String>,

    /// Provider label set as a JSON string array
    #[sea_orm(column_type = "JsonBinary")]
    pub labels: Option<JsonValue>,

    /// Whether any MIME part carries an attachment
    pub has_attachments: bool,

    /// Provider size estimate in bytes
    pub size_estimate: Option<i64>,

    /// Read flag
    pub is_read: bool,

    /// Categorization result, set by the categorization gateway
    pub category: Option<String>,

    /// Model confidence for the category (0.0..=1.0)
    pub category_confidence: Option<f64>,

    /// Prompt version used for categorization
    pub category_prompt_version: Option<String>,

    /// When categorization completed
    pub categorized_at: Option<DateTimeWithTimeZone>,

    /// Timestamp when the record was created
    pub created_at: DateTimeWithTimeZone,

    /// Timestamp when the record was last updated
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
