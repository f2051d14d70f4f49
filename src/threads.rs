//! Thread assembly
//!
//! Read-only projection of stored emails into conversation threads. Threads
//! are never persisted: every read regroups and reaggregates the current
//! member emails, so metadata can never go stale between ingestions.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::email;
use crate::repositories::EmailRepository;

/// One email inside a thread view. Bodies are included only in the detail
/// view; the list view omits them for payload size.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ThreadEmail {
    #[schema(value_type = String)]
    pub id: Uuid,
    pub provider_message_id: String,
    pub subject: Option<String>,
    pub from_email: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub snippet: Option<String>,
    pub is_read: bool,
    pub has_attachments: bool,
    pub category: Option<String>,
    pub category_confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_html: Option<String>,
}

/// A derived conversation thread.
///
/// All aggregates come from the current member set: subject/sender/date from
/// the most recent member, unread count over unread members, attachment flag
/// as a logical OR.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Thread {
    pub thread_id: String,
    pub subject: Option<String>,
    pub latest_from: Option<String>,
    pub latest_date_sent: Option<DateTime<Utc>>,
    pub email_count: usize,
    pub unread_count: usize,
    pub has_attachments: bool,
    /// Members in conversational order (oldest first)
    pub emails: Vec<ThreadEmail>,
}

/// Read-only projection of stored emails into threads.
pub struct ThreadAssembler {
    emails: EmailRepository,
}

impl ThreadAssembler {
    /// Create an assembler over the email repository.
    pub fn new(emails: EmailRepository) -> Self {
        Self { emails }
    }

    /// List a user's threads, newest first.
    ///
    /// Pagination applies to the thread list, not the underlying email rows.
    pub async fn list_threads(
        &self,
        user_id: &Uuid,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Thread>> {
        let emails = self.emails.list_all(user_id).await?;
        let threads = assemble_threads(emails, false);

        Ok(threads.into_iter().skip(offset).take(limit).collect())
    }

    /// Load one thread with full body content per member.
    pub async fn get_thread(&self, user_id: &Uuid, thread_id: &str) -> Result<Option<Thread>> {
        let members = self.emails.find_by_thread(user_id, thread_id).await?;
        if members.is_empty() {
            return Ok(None);
        }

        Ok(assemble_threads(members, true).into_iter().next())
    }
}

/// Group emails into threads and compute aggregates.
///
/// Emails with a missing sent_at sort as the oldest possible value; they are
/// never excluded and never break the sort.
fn assemble_threads(emails: Vec<email::Model>, include_bodies: bool) -> Vec<Thread> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<email::Model>> = HashMap::new();

    for email in emails {
        let key = email.thread_id.clone();
        if !groups.contains_key(&key) {
            order.push(key.clone());
        }
        groups.entry(key).or_default().push(email);
    }

    let mut threads: Vec<Thread> = order
        .into_iter()
        .filter_map(|thread_id| {
            let mut members = groups.remove(&thread_id)?;
            // Conversational order inside the thread: oldest first; None
            // sorts before any timestamp
            members.sort_by_key(|m| m.sent_at);

            let latest = members.last()?;
            let unread_count = members.iter().filter(|m| !m.is_read).count();
            let has_attachments = members.iter().any(|m| m.has_attachments);

            Some(Thread {
                thread_id,
                subject: latest.subject.clone(),
                latest_from: latest.from_email.clone(),
                latest_date_sent: latest.sent_at.map(|dt| dt.with_timezone(&Utc)),
                email_count: members.len(),
                unread_count,
                has_attachments,
                emails: members
                    .iter()
                    .map(|m| to_thread_email(m, include_bodies))
                    .collect(),
            })
        })
        .collect();

    // Threads themselves newest-first by their latest member
    threads.sort_by(|a, b| b.latest_date_sent.cmp(&a.latest_date_sent));

    threads
}

fn to_thread_email(model: &email::Model, include_bodies: bool) -> ThreadEmail {
    ThreadEmail {
        id: model.id,
        provider_message_id: model.provider_message_id.clone(),
        subject: model.subject.clone(),
        from_email: model.from_email.clone(),
        sent_at: model.sent_at.map(|dt| dt.with_timezone(&Utc)),
        snippet: model.snippet.clone(),
        is_read: model.is_read,
        has_attachments: model.has_attachments,
        category: model.category.clone(),
        category_confidence: model.category_confidence,
        body_text: include_bodies.then(|| model.body_text.clone()).flatten(),
        body_html: include_bodies.then(|| model.body_html.clone()).flatten(),
    }
}
