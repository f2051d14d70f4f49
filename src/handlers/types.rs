//! Shared request/response types for API handlers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::models::email;

/// OAuth authorization URL response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AuthorizeUrlResponse {
    /// Complete authorization URL for user redirection
    pub authorization_url: String,
    /// Hint for the frontend
    pub message: String,
}

/// Simple message response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

/// OAuth callback query parameters
#[derive(Debug, Deserialize, IntoParams)]
pub struct OAuthCallbackQuery {
    /// Authorization code from the provider
    pub code: Option<String>,
    /// Opaque state token issued at flow start
    pub state: Option<String>,
}

/// Connection status summary for auth status endpoints
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AuthStatusResponse {
    /// Whether a usable credential is stored
    pub authenticated: bool,
    /// Connection status (connected|disconnected|refresh_required|error)
    pub connection_status: String,
    /// Token expiry, when a credential exists
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Granted scopes, when a credential exists
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Whether a refresh token is stored
    pub has_refresh_token: bool,
    /// Timestamp of the last completed sync
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync_at: Option<DateTime<Utc>>,
}

/// Pagination query parameters
#[derive(Debug, Deserialize, IntoParams)]
pub struct PageQuery {
    /// Maximum number of items to return (default: 50, max: 200)
    pub limit: Option<usize>,
    /// Number of items to skip (default: 0)
    pub offset: Option<usize>,
}

/// Sync trigger query parameters
#[derive(Debug, Deserialize, IntoParams)]
pub struct SyncQuery {
    /// Maximum number of messages to fetch (default: 50, max: 500)
    pub max_results: Option<u32>,
}

/// Email reply request body
#[derive(Debug, Deserialize, ToSchema)]
pub struct EmailReplyRequest {
    /// Reply body text (required, non-empty)
    pub reply_body: String,
    /// Subject override; defaults to "Re: <original subject>"
    pub reply_subject: Option<String>,
    /// Recipient override; defaults to the original sender
    pub to: Option<Vec<String>>,
    /// Additional CC recipients
    #[serde(default)]
    pub cc: Vec<String>,
    /// Additional BCC recipients
    #[serde(default)]
    pub bcc: Vec<String>,
}

/// Email item for list views (bodies omitted)
#[derive(Debug, Serialize, ToSchema)]
pub struct EmailListItem {
    #[schema(value_type = String)]
    pub id: Uuid,
    pub provider_message_id: String,
    pub thread_id: String,
    pub subject: Option<String>,
    pub from_email: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub snippet: Option<String>,
    pub is_read: bool,
    pub has_attachments: bool,
    pub category: Option<String>,
    pub category_confidence: Option<f64>,
}

impl From<email::Model> for EmailListItem {
    fn from(model: email::Model) -> Self {
        Self {
            id: model.id,
            provider_message_id: model.provider_message_id,
            thread_id: model.thread_id,
            subject: model.subject,
            from_email: model.from_email,
            sent_at: model.sent_at.map(|dt| dt.with_timezone(&Utc)),
            snippet: model.snippet,
            is_read: model.is_read,
            has_attachments: model.has_attachments,
            category: model.category,
            category_confidence: model.category_confidence,
        }
    }
}

/// Full email detail (bodies included)
#[derive(Debug, Serialize, ToSchema)]
pub struct EmailDetail {
    #[schema(value_type = String)]
    pub id: Uuid,
    pub provider: String,
    pub provider_message_id: String,
    pub thread_id: String,
    pub subject: Option<String>,
    pub from_email: Option<String>,
    pub to_emails: Option<serde_json::Value>,
    pub cc_emails: Option<serde_json::Value>,
    pub bcc_emails: Option<serde_json::Value>,
    pub sent_at: Option<DateTime<Utc>>,
    pub snippet: Option<String>,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    pub labels: Option<serde_json::Value>,
    pub is_read: bool,
    pub has_attachments: bool,
    pub size_estimate: Option<i64>,
    pub category: Option<String>,
    pub category_confidence: Option<f64>,
    pub category_prompt_version: Option<String>,
    pub categorized_at: Option<DateTime<Utc>>,
}

impl From<email::Model> for EmailDetail {
    fn from(model: email::Model) -> Self {
        Self {
            id: model.id,
            provider: model.provider,
            provider_message_id: model.provider_message_id,
            thread_id: model.thread_id,
            subject: model.subject,
            from_email: model.from_email,
            to_emails: model.to_emails,
            cc_emails: model.cc_emails,
            bcc_emails: model.bcc_emails,
            sent_at: model.sent_at.map(|dt| dt.with_timezone(&Utc)),
            snippet: model.snippet,
            body_text: model.body_text,
            body_html: model.body_html,
            labels: model.labels,
            is_read: model.is_read,
            has_attachments: model.has_attachments,
            size_estimate: model.size_estimate,
            category: model.category,
            category_confidence: model.category_confidence,
            category_prompt_version: model.category_prompt_version,
            categorized_at: model.categorized_at.map(|dt| dt.with_timezone(&Utc)),
        }
    }
}
