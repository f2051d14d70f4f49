//! # Inbox Handlers
//!
//! Endpoints over stored emails: threaded and flat views, sync trigger,
//! read-state toggles, and reply sending. The read views never touch the
//! provider; sync and reply are the only paths that do.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::error::{ApiError, not_found, reauth_required, validation_error};
use crate::handlers::types::{
    EmailDetail, EmailListItem, EmailReplyRequest, PageQuery, SyncQuery,
};
use crate::ingest::{ReplyError, ReplyRequest};
use crate::server::AppState;
use crate::threads::Thread;

const DEFAULT_PAGE_LIMIT: usize = 50;
const MAX_PAGE_LIMIT: usize = 200;
const DEFAULT_SYNC_MAX_RESULTS: u32 = 50;
const MAX_SYNC_MAX_RESULTS: u32 = 500;

/// Threaded inbox response
#[derive(Debug, Serialize, ToSchema)]
pub struct InboxResponse {
    pub threads: Vec<Thread>,
    pub thread_count: usize,
    pub total_emails: usize,
    pub limit: usize,
    pub offset: usize,
    pub source: &'static str,
}

/// Flat email list response
#[derive(Debug, Serialize, ToSchema)]
pub struct EmailsResponse {
    pub emails: Vec<EmailListItem>,
    pub count: usize,
    pub limit: usize,
    pub offset: usize,
    pub source: &'static str,
}

/// Sync trigger response
#[derive(Debug, Serialize, ToSchema)]
pub struct SyncResponse {
    pub message: String,
    pub emails_synced: usize,
    pub source: &'static str,
}

/// Reply response
#[derive(Debug, Serialize, ToSchema)]
pub struct ReplyResponse {
    pub message: String,
    #[schema(value_type = String)]
    pub email_id: Uuid,
    pub sent_provider_message_id: String,
}

/// Read-state change response
#[derive(Debug, Serialize, ToSchema)]
pub struct MarkReadResponse {
    pub message: String,
    pub emails_marked: u64,
}

fn page_params(query: &PageQuery) -> Result<(usize, usize), ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_LIMIT);
    if limit == 0 || limit > MAX_PAGE_LIMIT {
        return Err(validation_error(
            "Invalid pagination",
            serde_json::json!({ "limit": format!("must be between 1 and {}", MAX_PAGE_LIMIT) }),
        ));
    }
    Ok((limit, query.offset.unwrap_or(0)))
}

/// Get the user's inbox organized by email threads
#[utoipa::path(
    get,
    path = "/inbox/",
    security(("bearer_auth" = [])),
    params(PageQuery),
    responses(
        (status = 200, description = "Threaded inbox view", body = InboxResponse),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError)
    ),
    tag = "inbox"
)]
pub async fn get_inbox(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<PageQuery>,
) -> Result<Json<InboxResponse>, ApiError> {
    let (limit, offset) = page_params(&query)?;

    let threads = state
        .thread_assembler()
        .list_threads(&user.user_id, limit, offset)
        .await?;

    let total_emails = threads.iter().map(|t| t.email_count).sum();

    Ok(Json(InboxResponse {
        thread_count: threads.len(),
        total_emails,
        threads,
        limit,
        offset,
        source: "database",
    }))
}

/// Get the user's emails as individual items (non-threaded view)
#[utoipa::path(
    get,
    path = "/inbox/emails",
    security(("bearer_auth" = [])),
    params(PageQuery),
    responses(
        (status = 200, description = "Flat email list", body = EmailsResponse),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError)
    ),
    tag = "inbox"
)]
pub async fn get_emails(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<PageQuery>,
) -> Result<Json<EmailsResponse>, ApiError> {
    let (limit, offset) = page_params(&query)?;

    let emails = state
        .email_repo()
        .list(&user.user_id, limit as u64, offset as u64)
        .await?;

    let emails: Vec<EmailListItem> = emails.into_iter().map(Into::into).collect();

    Ok(Json(EmailsResponse {
        count: emails.len(),
        emails,
        limit,
        offset,
        source: "database",
    }))
}

/// Fetch emails from Gmail and store them
///
/// Returns how many messages this call ingested. Zero can mean "nothing
/// new" or a provider hiccup; a connection needing re-authorization shows
/// up on the status endpoint, not here.
#[utoipa::path(
    post,
    path = "/inbox/emails/sync",
    security(("bearer_auth" = [])),
    params(SyncQuery),
    responses(
        (status = 200, description = "Sync completed", body = SyncResponse),
        (status = 400, description = "Invalid max_results", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError)
    ),
    tag = "inbox"
)]
pub async fn sync_emails(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<SyncQuery>,
) -> Result<Json<SyncResponse>, ApiError> {
    let max_results = query.max_results.unwrap_or(DEFAULT_SYNC_MAX_RESULTS);
    if max_results == 0 || max_results > MAX_SYNC_MAX_RESULTS {
        return Err(validation_error(
            "Invalid sync parameters",
            serde_json::json!({
                "max_results": format!("must be between 1 and {}", MAX_SYNC_MAX_RESULTS)
            }),
        ));
    }

    let ingestor = state.ingestor()?;
    let fetched = ingestor.fetch(user.user_id, max_results, true).await;

    Ok(Json(SyncResponse {
        message: format!("Successfully synced {} emails", fetched.len()),
        emails_synced: fetched.len(),
        source: "gmail_api",
    }))
}

/// Get a single stored email with full bodies
#[utoipa::path(
    get,
    path = "/inbox/email/{id}",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "Email id")),
    responses(
        (status = 200, description = "Email detail", body = EmailDetail),
        (status = 404, description = "Email not found", body = ApiError)
    ),
    tag = "inbox"
)]
pub async fn get_single_email(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<EmailDetail>, ApiError> {
    let email = state
        .email_repo()
        .find_by_id(&user.user_id, &id)
        .await?
        .ok_or_else(|| not_found(&format!("Email with ID {} not found", id)))?;

    Ok(Json(email.into()))
}

/// Get a specific email thread with all emails in the conversation
#[utoipa::path(
    get,
    path = "/inbox/thread/{thread_id}",
    security(("bearer_auth" = [])),
    params(("thread_id" = String, Path, description = "Thread id")),
    responses(
        (status = 200, description = "Thread with full bodies", body = Thread),
        (status = 404, description = "Thread not found", body = ApiError)
    ),
    tag = "inbox"
)]
pub async fn get_thread(
    State(state): State<AppState>,
    user: AuthUser,
    Path(thread_id): Path<String>,
) -> Result<Json<Thread>, ApiError> {
    let thread = state
        .thread_assembler()
        .get_thread(&user.user_id, &thread_id)
        .await?
        .ok_or_else(|| not_found(&format!("Thread {} not found", thread_id)))?;

    Ok(Json(thread))
}

/// Mark an email as read
#[utoipa::path(
    put,
    path = "/inbox/email/{id}/read",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "Email id")),
    responses(
        (status = 200, description = "Marked read", body = MarkReadResponse),
        (status = 404, description = "Email not found", body = ApiError)
    ),
    tag = "inbox"
)]
pub async fn mark_email_read(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<MarkReadResponse>, ApiError> {
    let updated = state.email_repo().mark_read(&user.user_id, &id).await?;

    if !updated {
        return Err(not_found("Email not found"));
    }

    Ok(Json(MarkReadResponse {
        message: "Email marked as read".to_string(),
        emails_marked: 1,
    }))
}

/// Mark all emails in a thread as read
#[utoipa::path(
    put,
    path = "/inbox/thread/{thread_id}/read",
    security(("bearer_auth" = [])),
    params(("thread_id" = String, Path, description = "Thread id")),
    responses(
        (status = 200, description = "Marked read", body = MarkReadResponse),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError)
    ),
    tag = "inbox"
)]
pub async fn mark_thread_read(
    State(state): State<AppState>,
    user: AuthUser,
    Path(thread_id): Path<String>,
) -> Result<Json<MarkReadResponse>, ApiError> {
    let count = state
        .email_repo()
        .mark_thread_read(&user.user_id, &thread_id)
        .await?;

    Ok(Json(MarkReadResponse {
        message: format!("Marked {} emails as read in thread", count),
        emails_marked: count,
    }))
}

/// Reply to a stored email
///
/// Recipients default to the original sender, the subject to
/// `Re: <original>`. The reply is threaded at the provider and the sent
/// message is stored immediately without a re-fetch.
#[utoipa::path(
    post,
    path = "/inbox/email/{id}/reply",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "Original email id")),
    request_body = EmailReplyRequest,
    responses(
        (status = 200, description = "Reply sent", body = ReplyResponse),
        (status = 400, description = "Invalid reply request", body = ApiError),
        (status = 404, description = "Original email not found", body = ApiError),
        (status = 409, description = "Gmail connection requires re-authorization", body = ApiError),
        (status = 502, description = "Provider send failure", body = ApiError)
    ),
    tag = "inbox"
)]
pub async fn reply_to_email(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(request): Json<EmailReplyRequest>,
) -> Result<Json<ReplyResponse>, ApiError> {
    let ingestor = state.ingestor()?;

    let reply = ReplyRequest {
        reply_body: request.reply_body,
        reply_subject: request.reply_subject,
        to: request.to,
        cc: request.cc,
        bcc: request.bcc,
    };

    let sent = ingestor
        .send_reply(user.user_id, id, reply)
        .await
        .map_err(|err| match err {
            ReplyError::OriginalNotFound => not_found(&format!("Email with ID {} not found", id)),
            ReplyError::EmptyBody => validation_error(
                "Invalid reply request",
                serde_json::json!({ "reply_body": "Reply body is required" }),
            ),
            ReplyError::MissingRecipient => validation_error(
                "Invalid reply request",
                serde_json::json!({ "to": "Original email has no sender address; specify recipients" }),
            ),
            ReplyError::NoValidToken => reauth_required("gmail"),
            ReplyError::SendFailed(reason) => {
                tracing::error!(user_id = %user.user_id, email_id = %id, reason = %reason, "Reply send failed");
                ApiError::new(StatusCode::BAD_GATEWAY, "PROVIDER_ERROR", &reason)
            }
            ReplyError::Store(reason) => {
                tracing::error!(user_id = %user.user_id, email_id = %id, reason = %reason, "Reply storage failed");
                ApiError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_SERVER_ERROR",
                    "Failed to store sent reply",
                )
            }
        })?;

    Ok(Json(ReplyResponse {
        message: format!("Successfully sent reply for email {}", id),
        email_id: id,
        sent_provider_message_id: sent.provider_message_id,
    }))
}
