//! Email repository for database operations
//!
//! This module provides the EmailRepository struct which encapsulates SeaORM
//! operations for the emails table. All writes go through an upsert keyed on
//! (user_id, provider_message_id), which is what makes overlapping fetch
//! windows and concurrent syncs safe.

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::categorize::Categorization;
use crate::models::Provider;
use crate::models::email::{self, Entity as Email};

/// Normalized email fields ready for persistence.
///
/// Produced by the ingest normalizer (or synthesized for sent replies);
/// categorization fields are intentionally absent — they are written later
/// by [`EmailRepository::set_category`] and survive re-ingestion untouched.
#[derive(Debug, Clone)]
pub struct NewEmail {
    pub provider: Provider,
    pub provider_message_id: String,
    pub thread_id: String,
    pub subject: Option<String>,
    pub from_email: Option<String>,
    pub to_emails: Vec<String>,
    pub cc_emails: Vec<String>,
    pub bcc_emails: Vec<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub snippet: Option<String>,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    pub labels: Vec<String>,
    pub has_attachments: bool,
    pub size_estimate: Option<i64>,
    pub is_read: bool,
}

fn string_array(values: &[String]) -> JsonValue {
    JsonValue::Array(
        values
            .iter()
            .map(|v| JsonValue::String(v.clone()))
            .collect(),
    )
}

/// Repository for email database operations
#[derive(Debug, Clone)]
pub struct EmailRepository {
    db: DatabaseConnection,
}

impl EmailRepository {
    /// Creates a new EmailRepository instance
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Inserts or updates an email keyed on (user_id, provider_message_id).
    ///
    /// The conflict path refreshes content fields but leaves the row id and
    /// any categorization result in place, so re-ingesting a message never
    /// loses work already done on it.
    pub async fn upsert(&self, user_id: &Uuid, new_email: &NewEmail) -> Result<email::Model> {
        let now = Utc::now();

        let active = email::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(*user_id),
            provider: Set(new_email.provider.as_str().to_string()),
            provider_message_id: Set(new_email.provider_message_id.clone()),
            thread_id: Set(new_email.thread_id.clone()),
            subject: Set(new_email.subject.clone()),
            from_email: Set(new_email.from_email.clone()),
            to_emails: Set(Some(string_array(&new_email.to_emails))),
            cc_emails: Set(Some(string_array(&new_email.cc_emails))),
            bcc_emails: Set(Some(string_array(&new_email.bcc_emails))),
            sent_at: Set(new_email.sent_at.map(Into::into)),
            snippet: Set(new_email.snippet.clone()),
            body_text: Set(new_email.body_text.clone()),
            body_html: Set(new_email.body_html.clone()),
            labels: Set(Some(string_array(&new_email.labels))),
            has_attachments: Set(new_email.has_attachments),
            size_estimate: Set(new_email.size_estimate),
            is_read: Set(new_email.is_read),
            category: Set(None),
            category_confidence: Set(None),
            category_prompt_version: Set(None),
            categorized_at: Set(None),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };

        Email::insert(active)
            .on_conflict(
                OnConflict::columns([email::Column::UserId, email::Column::ProviderMessageId])
                    .update_columns([
                        email::Column::ThreadId,
                        email::Column::Subject,
                        email::Column::FromEmail,
                        email::Column::ToEmails,
                        email::Column::CcEmails,
                        email::Column::BccEmails,
                        email::Column::SentAt,
                        email::Column::Snippet,
                        email::Column::BodyText,
                        email::Column::BodyHtml,
                        email::Column::Labels,
                        email::Column::HasAttachments,
                        email::Column::SizeEstimate,
                        email::Column::IsRead,
                        email::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await?;

        // The insert id is meaningless on the conflict path; fetch by the
        // natural key instead.
        self.find_by_provider_message_id(user_id, &new_email.provider_message_id)
            .await?
            .ok_or_else(|| anyhow!("email not persisted"))
    }

    /// Checks whether a provider message is already stored for this user
    pub async fn exists(&self, user_id: &Uuid, provider_message_id: &str) -> Result<bool> {
        let count = Email::find()
            .filter(email::Column::UserId.eq(*user_id))
            .filter(email::Column::ProviderMessageId.eq(provider_message_id))
            .count(&self.db)
            .await?;

        Ok(count > 0)
    }

    /// Finds an email by its provider message id
    pub async fn find_by_provider_message_id(
        &self,
        user_id: &Uuid,
        provider_message_id: &str,
    ) -> Result<Option<email::Model>> {
        Ok(Email::find()
            .filter(email::Column::UserId.eq(*user_id))
            .filter(email::Column::ProviderMessageId.eq(provider_message_id))
            .one(&self.db)
            .await?)
    }

    /// Finds an email by its row id within a user scope
    pub async fn find_by_id(&self, user_id: &Uuid, id: &Uuid) -> Result<Option<email::Model>> {
        Ok(Email::find_by_id(*id)
            .filter(email::Column::UserId.eq(*user_id))
            .one(&self.db)
            .await?)
    }

    /// The watermark for incremental sync: the most recent stored sent_at.
    ///
    /// A read of current storage state at call time, not a resumable cursor;
    /// overlapping windows between concurrent fetches are absorbed by the
    /// upsert key.
    pub async fn latest_sent_at(
        &self,
        user_id: &Uuid,
        provider: Provider,
    ) -> Result<Option<DateTime<Utc>>> {
        let latest = Email::find()
            .filter(email::Column::UserId.eq(*user_id))
            .filter(email::Column::Provider.eq(provider.as_str()))
            .filter(email::Column::SentAt.is_not_null())
            .order_by_desc(email::Column::SentAt)
            .limit(1)
            .one(&self.db)
            .await?;

        Ok(latest.and_then(|m| m.sent_at).map(|dt| dt.with_timezone(&Utc)))
    }

    /// Lists a user's emails ordered by sent_at descending
    pub async fn list(
        &self,
        user_id: &Uuid,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<email::Model>> {
        Ok(Email::find()
            .filter(email::Column::UserId.eq(*user_id))
            .order_by_desc(email::Column::SentAt)
            .order_by_desc(email::Column::CreatedAt)
            .limit(limit)
            .offset(offset)
            .all(&self.db)
            .await?)
    }

    /// Loads all of a user's emails for thread assembly
    pub async fn list_all(&self, user_id: &Uuid) -> Result<Vec<email::Model>> {
        Ok(Email::find()
            .filter(email::Column::UserId.eq(*user_id))
            .order_by_desc(email::Column::SentAt)
            .all(&self.db)
            .await?)
    }

    /// Loads the members of one thread
    pub async fn find_by_thread(
        &self,
        user_id: &Uuid,
        thread_id: &str,
    ) -> Result<Vec<email::Model>> {
        Ok(Email::find()
            .filter(email::Column::UserId.eq(*user_id))
            .filter(email::Column::ThreadId.eq(thread_id))
            .order_by_asc(email::Column::SentAt)
            .all(&self.db)
            .await?)
    }

    /// Marks a single email as read; returns false when it does not exist
    pub async fn mark_read(&self, user_id: &Uuid, id: &Uuid) -> Result<bool> {
        let Some(existing) = self.find_by_id(user_id, id).await? else {
            return Ok(false);
        };

        let mut active: email::ActiveModel = existing.into();
        active.is_read = Set(true);
        active.updated_at = Set(Utc::now().into());
        active.update(&self.db).await?;

        Ok(true)
    }

    /// Marks every email in a thread as read; returns the number updated
    pub async fn mark_thread_read(&self, user_id: &Uuid, thread_id: &str) -> Result<u64> {
        let result = Email::update_many()
            .col_expr(email::Column::IsRead, Expr::value(true))
            .col_expr(
                email::Column::UpdatedAt,
                Expr::value(sea_orm::prelude::DateTimeWithTimeZone::from(Utc::now())),
            )
            .filter(email::Column::UserId.eq(*user_id))
            .filter(email::Column::ThreadId.eq(thread_id))
            .exec(&self.db)
            .await?;

        Ok(result.rows_affected)
    }

    /// Writes a categorization result onto an email row
    pub async fn set_category(
        &self,
        user_id: &Uuid,
        id: &Uuid,
        categorization: &Categorization,
        prompt_version: &str,
    ) -> Result<bool> {
        let Some(existing) = self.find_by_id(user_id, id).await? else {
            return Ok(false);
        };

        let now = Utc::now();
        let mut active: email::ActiveModel = existing.into();
        active.category = Set(Some(categorization.category.clone()));
        active.category_confidence = Set(Some(categorization.confidence));
        active.category_prompt_version = Set(Some(prompt_version.to_string()));
        active.categorized_at = Set(Some(now.into()));
        active.updated_at = Set(now.into());
        active.update(&self.db).await?;

        Ok(true)
    }
}
