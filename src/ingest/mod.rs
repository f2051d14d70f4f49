//! Message ingestion
//!
//! The [`MessageIngestor`] pulls messages from Gmail and materializes them as
//! canonical email records without duplication, triggers best-effort
//! categorization, and handles reply sending. Per the error propagation
//! policy, `fetch` swallows provider failures and returns what it could get;
//! only `send_reply` propagates structured failures, because replies are
//! user-visible, non-idempotent actions that must not silently no-op.

pub mod normalize;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE;
use chrono::Utc;
use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;
use uuid::Uuid;

use crate::categorize::{CategorizationGateway, CategorizeError};
use crate::connectors::broker::CredentialBroker;
use crate::connectors::gmail::GmailConnector;
use crate::models::Provider;
use crate::models::email;
use crate::repositories::email::NewEmail;
use crate::repositories::{ConnectionRepository, EmailRepository};

/// Reply request fields accepted from the API.
#[derive(Debug, Clone, Default)]
pub struct ReplyRequest {
    pub reply_body: String,
    pub reply_subject: Option<String>,
    pub to: Option<Vec<String>>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
}

/// Structured failures from `send_reply`.
#[derive(Debug, Error)]
pub enum ReplyError {
    #[error("original email not found")]
    OriginalNotFound,
    #[error("reply body is empty")]
    EmptyBody,
    #[error("no valid Gmail token; re-authorization required")]
    NoValidToken,
    #[error("original email has no sender address and no recipients were given")]
    MissingRecipient,
    #[error("provider send failed: {0}")]
    SendFailed(String),
    #[error("storage error: {0}")]
    Store(String),
}

/// Ingests Gmail messages for one call at a time; stateless apart from its
/// collaborators, so one instance serves any user id.
pub struct MessageIngestor {
    gmail: GmailConnector,
    emails: EmailRepository,
    connections: ConnectionRepository,
    categorizer: CategorizationGateway,
}

impl MessageIngestor {
    /// Create an ingestor over its collaborators.
    pub fn new(
        gmail: GmailConnector,
        emails: EmailRepository,
        connections: ConnectionRepository,
        categorizer: CategorizationGateway,
    ) -> Self {
        Self {
            gmail,
            emails,
            connections,
            categorizer,
        }
    }

    /// Fetch messages from Gmail and upsert them into storage.
    ///
    /// Never raises: any auth or provider failure yields the messages
    /// ingested so far (possibly none), with the cause in the logs. A sync
    /// returning zero emails is indistinguishable here from "nothing new" by
    /// design; callers needing the distinction check the connection status.
    pub async fn fetch(&self, user_id: Uuid, max_results: u32, only_new: bool) -> Vec<email::Model> {
        let Some(access_token) = self.gmail.valid_token(user_id).await else {
            tracing::warn!(
                user_id = %user_id,
                "No valid Gmail token; skipping fetch (connection may need re-authorization)"
            );
            return Vec::new();
        };

        // Watermark-based incremental window. Best-effort: provider timestamp
        // granularity admits overlap at the boundary, which the upsert key
        // absorbs.
        let mut query = None;
        if only_new {
            match self.emails.latest_sent_at(&user_id, Provider::Gmail).await {
                Ok(Some(watermark)) => {
                    query = Some(format!("after:{}", watermark.timestamp()));
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::error!(user_id = %user_id, error = %err, "Watermark read failed");
                }
            }
        }

        let refs = match self
            .gmail
            .list_message_ids(&access_token, query.as_deref(), max_results)
            .await
        {
            Ok(refs) => refs,
            Err(err) => {
                tracing::warn!(
                    user_id = %user_id,
                    error = %err,
                    "Gmail message listing failed; returning empty sync result"
                );
                metrics::counter!("email_fetch_provider_failure_total").increment(1);
                return Vec::new();
            }
        };

        let mut fetched = Vec::new();

        for message_ref in refs {
            // Cost-saving short-circuit: skip the detail fetch for messages
            // already in storage.
            if only_new {
                match self.emails.exists(&user_id, &message_ref.id).await {
                    Ok(true) => continue,
                    Ok(false) => {}
                    Err(err) => {
                        tracing::error!(
                            user_id = %user_id,
                            provider_message_id = %message_ref.id,
                            error = %err,
                            "Existence check failed"
                        );
                        continue;
                    }
                }
            }

            let message = match self.gmail.get_message(&access_token, &message_ref.id).await {
                Ok(message) => message,
                Err(err) => {
                    tracing::warn!(
                        user_id = %user_id,
                        provider_message_id = %message_ref.id,
                        error = %err,
                        "Message detail fetch failed; skipping"
                    );
                    continue;
                }
            };

            let new_email = normalize::normalize_message(&message);

            match self.emails.upsert(&user_id, &new_email).await {
                Ok(model) => {
                    self.try_categorize(&user_id, &model).await;
                    fetched.push(model);
                }
                Err(err) => {
                    tracing::error!(
                        user_id = %user_id,
                        provider_message_id = %new_email.provider_message_id,
                        error = %err,
                        "Email upsert failed"
                    );
                }
            }
        }

        metrics::counter!("emails_ingested_total").increment(fetched.len() as u64);

        if let Err(err) = self.connections.touch_sync(&user_id, Provider::Gmail).await {
            tracing::error!(user_id = %user_id, error = %err, "Failed to update last_sync_at");
        }

        fetched
    }

    /// Categorize a freshly ingested email. Failure-isolated: every outcome
    /// other than success is logged and ingestion proceeds regardless.
    async fn try_categorize(&self, user_id: &Uuid, email: &email::Model) {
        if email.category.is_some() {
            return;
        }

        let subject = email.subject.as_deref().unwrap_or_default();
        let sender = email.from_email.as_deref().unwrap_or_default();
        let content = email
            .body_text
            .as_deref()
            .filter(|text| !text.is_empty())
            .or(email.snippet.as_deref())
            .unwrap_or_default();

        match self.categorizer.categorize(subject, sender, content).await {
            Ok(categorization) => {
                tracing::info!(
                    user_id = %user_id,
                    email_id = %email.id,
                    category = %categorization.category,
                    confidence = categorization.confidence,
                    "Categorized email"
                );
                if let Err(err) = self
                    .emails
                    .set_category(
                        user_id,
                        &email.id,
                        &categorization,
                        self.categorizer.prompt_version(),
                    )
                    .await
                {
                    tracing::error!(
                        user_id = %user_id,
                        email_id = %email.id,
                        error = %err,
                        "Failed to persist categorization"
                    );
                }
            }
            Err(CategorizeError::Disabled) => {
                tracing::debug!(email_id = %email.id, "Categorization disabled, skipping");
            }
            Err(err) => {
                tracing::warn!(
                    user_id = %user_id,
                    email_id = %email.id,
                    error = %err,
                    "Categorization failed; email remains uncategorized"
                );
                metrics::counter!("email_categorization_failure_total").increment(1);
            }
        }
    }

    /// Send a reply to a stored email.
    ///
    /// The original is loaded from local storage only — the fields needed to
    /// construct the reply are already owned, so no provider round-trip
    /// happens before the send. On success the sent message is synthesized
    /// into storage directly from known fields, again with no re-fetch. On
    /// provider failure nothing is written.
    pub async fn send_reply(
        &self,
        user_id: Uuid,
        original_id: Uuid,
        request: ReplyRequest,
    ) -> Result<email::Model, ReplyError> {
        if request.reply_body.trim().is_empty() {
            return Err(ReplyError::EmptyBody);
        }

        let original = self
            .emails
            .find_by_id(&user_id, &original_id)
            .await
            .map_err(|e| ReplyError::Store(e.to_string()))?
            .ok_or(ReplyError::OriginalNotFound)?;

        let access_token = self
            .gmail
            .valid_token(user_id)
            .await
            .ok_or(ReplyError::NoValidToken)?;

        let to = match request.to.filter(|to| !to.is_empty()) {
            Some(to) => to,
            None => {
                let sender = original
                    .from_email
                    .as_deref()
                    .and_then(extract_bare_address)
                    .ok_or(ReplyError::MissingRecipient)?;
                vec![sender]
            }
        };

        let subject = match &request.reply_subject {
            Some(subject) if !subject.trim().is_empty() => subject.clone(),
            _ => reply_subject(original.subject.as_deref()),
        };

        let raw = build_raw_message(&to, &request.cc, &request.bcc, &subject, &request.reply_body);

        let sent = self
            .gmail
            .send_message(&access_token, &raw, &original.thread_id)
            .await
            .map_err(|e| ReplyError::SendFailed(e.to_string()))?;

        tracing::info!(
            user_id = %user_id,
            original_id = %original_id,
            sent_message_id = %sent.id,
            "Reply sent"
        );

        // Synthesize the stored record from known fields; no provider re-fetch
        let mut labels = sent.label_ids.clone();
        if !labels.iter().any(|l| l == "SENT") {
            labels.push("SENT".to_string());
        }

        let new_email = NewEmail {
            provider: Provider::Gmail,
            provider_message_id: sent.id.clone(),
            thread_id: sent
                .thread_id
                .clone()
                .unwrap_or_else(|| original.thread_id.clone()),
            subject: Some(subject),
            from_email: self.account_email(&user_id).await,
            to_emails: to,
            cc_emails: request.cc,
            bcc_emails: request.bcc,
            sent_at: Some(Utc::now()),
            snippet: Some(snippet_of(&request.reply_body)),
            body_text: Some(request.reply_body),
            body_html: None,
            labels,
            has_attachments: false,
            size_estimate: None,
            is_read: true,
        };

        self.emails
            .upsert(&user_id, &new_email)
            .await
            .map_err(|e| ReplyError::Store(e.to_string()))
    }

    /// The connected Gmail account address, recorded in connection metadata
    /// at exchange time.
    async fn account_email(&self, user_id: &Uuid) -> Option<String> {
        self.connections
            .find(user_id, Provider::Gmail)
            .await
            .ok()
            .flatten()
            .and_then(|conn| conn.metadata)
            .and_then(|meta| {
                meta.get("email")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string())
            })
    }
}

/// Extract the bare address from `"Name <addr>"` or a raw `addr` form.
pub fn extract_bare_address(from: &str) -> Option<String> {
    static ANGLE_ADDR: OnceLock<Regex> = OnceLock::new();
    let re = ANGLE_ADDR.get_or_init(|| Regex::new(r"<([^<>]+)>").expect("valid regex"));

    if let Some(captures) = re.captures(from) {
        let addr = captures[1].trim();
        if !addr.is_empty() {
            return Some(addr.to_string());
        }
    }

    let trimmed = from.trim();
    if trimmed.contains('@') && !trimmed.contains(' ') {
        return Some(trimmed.to_string());
    }

    None
}

/// Derive the default reply subject: prefix `Re: ` unless already present.
pub fn reply_subject(original_subject: Option<&str>) -> String {
    let original = original_subject.unwrap_or_default().trim();
    if original.to_ascii_lowercase().starts_with("re:") {
        original.to_string()
    } else {
        format!("Re: {}", original)
    }
}

/// Assemble a base64url-encoded RFC 2822 message.
fn build_raw_message(
    to: &[String],
    cc: &[String],
    bcc: &[String],
    subject: &str,
    body: &str,
) -> String {
    let mut lines = Vec::new();
    lines.push(format!("To: {}", to.join(", ")));
    if !cc.is_empty() {
        lines.push(format!("Cc: {}", cc.join(", ")));
    }
    if !bcc.is_empty() {
        lines.push(format!("Bcc: {}", bcc.join(", ")));
    }
    lines.push(format!("Subject: {}", subject));
    lines.push("Content-Type: text/plain; charset=utf-8".to_string());
    lines.push(String::new());
    lines.push(body.to_string());

    URL_SAFE.encode(lines.join("\r\n").as_bytes())
}

/// Short preview of a reply body, mirroring provider snippets.
fn snippet_of(body: &str) -> String {
    let snippet: String = body.chars().take(200).collect();
    snippet
}
