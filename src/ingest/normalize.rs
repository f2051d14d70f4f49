//! Gmail message normalization
//!
//! Turns a raw Gmail message payload into the canonical [`NewEmail`] shape.
//! The MIME tree is walked depth-first with first-found-wins semantics per
//! body type: the first text/plain part becomes body_text and the first
//! text/html part becomes body_html, no matter how deeply nested.

use base64::Engine as _;
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};

use crate::connectors::gmail::{GmailHeader, GmailMessage, GmailPayload};
use crate::models::Provider;
use crate::repositories::email::NewEmail;

/// Normalize a full Gmail message into the canonical email shape.
pub fn normalize_message(message: &GmailMessage) -> NewEmail {
    let headers = message
        .payload
        .as_ref()
        .map(|p| p.headers.as_slice())
        .unwrap_or_default();

    let subject = header_value(headers, "Subject").map(|s| s.to_string());
    let from_email = header_value(headers, "From").map(|s| s.to_string());
    let to_emails = header_value(headers, "To").map(split_addresses).unwrap_or_default();
    let cc_emails = header_value(headers, "Cc").map(split_addresses).unwrap_or_default();
    let bcc_emails = header_value(headers, "Bcc").map(split_addresses).unwrap_or_default();

    let sent_at = parse_sent_at(message.internal_date.as_deref(), header_value(headers, "Date"));

    let mut bodies = ExtractedBodies::default();
    if let Some(payload) = &message.payload {
        walk_parts(payload, &mut bodies);
    }

    NewEmail {
        provider: Provider::Gmail,
        provider_message_id: message.id.clone(),
        // Singleton-thread fallback when the provider gives no conversation key
        thread_id: message.thread_id.clone().unwrap_or_else(|| message.id.clone()),
        subject,
        from_email,
        to_emails,
        cc_emails,
        bcc_emails,
        sent_at,
        snippet: message.snippet.clone(),
        body_text: bodies.text,
        body_html: bodies.html,
        labels: message.label_ids.clone(),
        has_attachments: bodies.has_attachments,
        size_estimate: message.size_estimate,
        is_read: !message.label_ids.iter().any(|l| l == "UNREAD"),
    }
}

#[derive(Debug, Default)]
struct ExtractedBodies {
    text: Option<String>,
    html: Option<String>,
    has_attachments: bool,
}

/// Depth-first MIME walk: first-found-wins per body type, attachment flag
/// sticky across the whole tree.
fn walk_parts(part: &GmailPayload, out: &mut ExtractedBodies) {
    let mime_type = part.mime_type.as_deref().unwrap_or_default();
    let body_data = part.body.as_ref().and_then(|b| b.data.as_deref());

    if mime_type == "text/plain" && out.text.is_none() {
        out.text = body_data.and_then(decode_body);
    } else if mime_type == "text/html" && out.html.is_none() {
        out.html = body_data.and_then(decode_body);
    }

    let has_filename = part.filename.as_deref().is_some_and(|f| !f.is_empty());
    let has_attachment_ref = part
        .body
        .as_ref()
        .is_some_and(|b| b.attachment_id.is_some());
    if has_filename && has_attachment_ref {
        out.has_attachments = true;
    }

    if let Some(parts) = &part.parts {
        for sub in parts {
            walk_parts(sub, out);
        }
    }
}

/// Case-insensitive header lookup.
fn header_value<'a>(headers: &'a [GmailHeader], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str())
}

/// Split a recipient header into individual addresses.
fn split_addresses(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|addr| addr.trim().to_string())
        .filter(|addr| !addr.is_empty())
        .collect()
}

/// Decode a Gmail base64url body segment.
fn decode_body(data: &str) -> Option<String> {
    let bytes = URL_SAFE
        .decode(data)
        .or_else(|_| URL_SAFE_NO_PAD.decode(data))
        .ok()?;
    String::from_utf8(bytes).ok()
}

/// Resolve the sent-at instant, preferring the provider's internalDate
/// (epoch milliseconds) over the Date header.
fn parse_sent_at(internal_date: Option<&str>, date_header: Option<&str>) -> Option<DateTime<Utc>> {
    if let Some(millis) = internal_date.and_then(|raw| raw.parse::<i64>().ok())
        && let Some(instant) = DateTime::from_timestamp_millis(millis)
    {
        return Some(instant);
    }

    date_header
        .and_then(|raw| DateTime::parse_from_rfc2822(raw).ok())
        .map(|dt| dt.with_timezone(&Utc))
}
