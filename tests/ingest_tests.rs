//! Integration tests for email ingestion: dedup, watermark behavior,
//! failure-isolated categorization, and reply sending.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE;
use chrono::{Duration, Utc};
use finbox::categorize::CategorizationGateway;
use finbox::config::CategorizationConfig;
use finbox::connectors::GmailConnector;
use finbox::ingest::{MessageIngestor, ReplyError, ReplyRequest};
use finbox::models::Provider;
use finbox::models::connection::ConnectionStatus;
use finbox::repositories::token::TokenPayload;
use finbox::repositories::{ConnectionRepository, EmailRepository, TokenRepository};
use finbox::threads::ThreadAssembler;
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[path = "test_utils/mod.rs"]
mod test_utils;

fn gmail_against(mock: &MockServer, db: sea_orm::DatabaseConnection) -> GmailConnector {
    let config = test_utils::test_config();
    GmailConnector::from_config(&config, db, test_utils::test_crypto_key())
        .expect("connector builds")
        .with_endpoints(
            "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
            format!("{}/token", mock.uri()),
            format!("{}/userinfo", mock.uri()),
            format!("{}/gmail/v1", mock.uri()),
        )
}

fn ingestor_against(
    mock: &MockServer,
    db: sea_orm::DatabaseConnection,
    categorization: CategorizationConfig,
) -> MessageIngestor {
    MessageIngestor::new(
        gmail_against(mock, db.clone()),
        EmailRepository::new(db.clone()),
        ConnectionRepository::new(db),
        CategorizationGateway::new(categorization),
    )
}

async fn seed_connected(db: &sea_orm::DatabaseConnection, user_id: &Uuid) {
    let tokens = TokenRepository::new(db.clone(), test_utils::test_crypto_key());
    let token = tokens
        .upsert(
            user_id,
            Provider::Gmail,
            &TokenPayload {
                access_token: "access-1".to_string(),
                refresh_token: Some("refresh-1".to_string()),
                token_type: "Bearer".to_string(),
                expires_at: Utc::now() + Duration::hours(1),
                scope: None,
            },
        )
        .await
        .expect("token seeds");

    ConnectionRepository::new(db.clone())
        .upsert(
            user_id,
            Provider::Gmail,
            ConnectionStatus::Connected,
            Some(token.id),
            Some(json!({ "email": "me@example.com" })),
        )
        .await
        .expect("connection seeds");
}

fn gmail_message(id: &str, thread_id: &str, sent_at_ms: i64, from: &str) -> serde_json::Value {
    json!({
        "id": id,
        "threadId": thread_id,
        "labelIds": ["INBOX", "UNREAD"],
        "snippet": format!("snippet of {}", id),
        "internalDate": sent_at_ms.to_string(),
        "sizeEstimate": 1500,
        "payload": {
            "mimeType": "multipart/alternative",
            "filename": "",
            "headers": [
                { "name": "Subject", "value": format!("Subject {}", id) },
                { "name": "From", "value": from },
                { "name": "To", "value": "me@example.com" }
            ],
            "parts": [
                {
                    "mimeType": "text/plain",
                    "filename": "",
                    "headers": [],
                    "body": { "size": 11, "data": URL_SAFE.encode(format!("body of {}", id)) }
                }
            ]
        }
    })
}

async fn mount_list(mock: &MockServer, ids: &[(&str, &str)]) {
    let messages: Vec<serde_json::Value> = ids
        .iter()
        .map(|(id, thread)| json!({ "id": id, "threadId": thread }))
        .collect();

    Mock::given(method("GET"))
        .and(path("/gmail/v1/users/me/messages"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "messages": messages })),
        )
        .mount(mock)
        .await;
}

async fn mount_message(mock: &MockServer, body: serde_json::Value, expected_calls: Option<u64>) {
    let id = body["id"].as_str().unwrap().to_string();
    let mock_builder = Mock::given(method("GET"))
        .and(path(format!("/gmail/v1/users/me/messages/{}", id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(body));

    match expected_calls {
        Some(count) => mock_builder.expect(count).mount(mock).await,
        None => mock_builder.mount(mock).await,
    }
}

#[tokio::test]
async fn fetch_without_connection_returns_empty_and_writes_nothing() {
    let db = test_utils::setup_test_db().await;
    let mock = MockServer::start().await;

    let ingestor = ingestor_against(&mock, db.conn.clone(), CategorizationConfig::default());
    let user_id = Uuid::new_v4();

    let fetched = ingestor.fetch(user_id, 50, true).await;
    assert!(fetched.is_empty());

    let emails = EmailRepository::new(db.conn.clone());
    assert!(emails.list_all(&user_id).await.unwrap().is_empty());

    let connection = ConnectionRepository::new(db.conn.clone())
        .find(&user_id, Provider::Gmail)
        .await
        .unwrap();
    assert!(connection.is_none());
}

#[tokio::test]
async fn fetch_ingests_deduplicates_and_updates_last_sync() {
    let db = test_utils::setup_test_db().await;
    let mock = MockServer::start().await;

    let t0 = Utc::now().timestamp_millis() - 60_000;
    let t1 = t0 + 30_000;

    mount_list(&mock, &[("m1", "T1"), ("m2", "T1")]).await;
    // Each detail is fetched exactly once across both fetch calls: the
    // second call short-circuits on the existence check
    mount_message(&mock, gmail_message("m1", "T1", t0, "Alice <alice@x.com>"), Some(1)).await;
    mount_message(&mock, gmail_message("m2", "T1", t1, "Bob <bob@x.com>"), Some(1)).await;

    let ingestor = ingestor_against(&mock, db.conn.clone(), CategorizationConfig::default());
    let user_id = Uuid::new_v4();
    seed_connected(&db.conn, &user_id).await;

    let first = ingestor.fetch(user_id, 2, true).await;
    assert_eq!(first.len(), 2);

    // Overlapping second fetch: same provider ids come back, nothing
    // duplicates
    let second = ingestor.fetch(user_id, 2, true).await;
    assert!(second.is_empty());

    let emails = EmailRepository::new(db.conn.clone());
    let stored = emails.list_all(&user_id).await.unwrap();
    assert_eq!(stored.len(), 2);
    assert!(stored.iter().all(|e| e.thread_id == "T1"));

    // Thread projection sees one thread of two, latest member on top
    let assembler = ThreadAssembler::new(emails);
    let threads = assembler.list_threads(&user_id, 50, 0).await.unwrap();
    assert_eq!(threads.len(), 1);
    assert_eq!(threads[0].email_count, 2);
    assert_eq!(
        threads[0].latest_date_sent.unwrap().timestamp_millis(),
        t1
    );

    let connection = ConnectionRepository::new(db.conn.clone())
        .find(&user_id, Provider::Gmail)
        .await
        .unwrap()
        .unwrap();
    assert!(connection.last_sync_at.is_some());
}

#[tokio::test]
async fn incremental_fetch_constrains_query_to_watermark() {
    let db = test_utils::setup_test_db().await;
    let mock = MockServer::start().await;

    let user_id = Uuid::new_v4();
    seed_connected(&db.conn, &user_id).await;

    // Seed one stored email to establish the watermark
    let watermark = Utc::now() - Duration::minutes(10);
    let emails = EmailRepository::new(db.conn.clone());
    let seeded = finbox::repositories::email::NewEmail {
        provider: Provider::Gmail,
        provider_message_id: "m0".to_string(),
        thread_id: "T0".to_string(),
        subject: Some("seeded".to_string()),
        from_email: None,
        to_emails: vec![],
        cc_emails: vec![],
        bcc_emails: vec![],
        sent_at: Some(watermark),
        snippet: None,
        body_text: None,
        body_html: None,
        labels: vec![],
        has_attachments: false,
        size_estimate: None,
        is_read: true,
    };
    emails.upsert(&user_id, &seeded).await.unwrap();

    // The list call must carry q=after:<watermark unix seconds>
    Mock::given(method("GET"))
        .and(path("/gmail/v1/users/me/messages"))
        .and(query_param("q", format!("after:{}", watermark.timestamp())))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "messages": [] })))
        .expect(1)
        .mount(&mock)
        .await;

    let ingestor = ingestor_against(&mock, db.conn.clone(), CategorizationConfig::default());
    let fetched = ingestor.fetch(user_id, 50, true).await;
    assert!(fetched.is_empty());
}

#[tokio::test]
async fn provider_listing_failure_yields_empty_sync() {
    let db = test_utils::setup_test_db().await;
    let mock = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/gmail/v1/users/me/messages"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&mock)
        .await;

    let user_id = Uuid::new_v4();
    seed_connected(&db.conn, &user_id).await;

    let ingestor = ingestor_against(&mock, db.conn.clone(), CategorizationConfig::default());
    let fetched = ingestor.fetch(user_id, 50, true).await;

    assert!(fetched.is_empty());
}

#[tokio::test]
async fn categorization_failure_never_fails_ingestion() {
    let db = test_utils::setup_test_db().await;
    let mock = MockServer::start().await;

    let t0 = Utc::now().timestamp_millis();
    mount_list(&mock, &[("m1", "T1")]).await;
    mount_message(&mock, gmail_message("m1", "T1", t0, "a@x.com"), None).await;

    // Categorization API is configured but failing
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("model overloaded"))
        .mount(&mock)
        .await;

    let categorization = CategorizationConfig {
        api_key: Some("sk-test".to_string()),
        api_base: mock.uri(),
        ..Default::default()
    };

    let user_id = Uuid::new_v4();
    seed_connected(&db.conn, &user_id).await;

    let ingestor = ingestor_against(&mock, db.conn.clone(), categorization);
    let fetched = ingestor.fetch(user_id, 10, true).await;

    assert_eq!(fetched.len(), 1);

    let stored = EmailRepository::new(db.conn.clone())
        .find_by_provider_message_id(&user_id, "m1")
        .await
        .unwrap()
        .unwrap();
    assert!(stored.category.is_none());
    assert!(stored.categorized_at.is_none());
}

#[tokio::test]
async fn successful_categorization_is_written_back() {
    let db = test_utils::setup_test_db().await;
    let mock = MockServer::start().await;

    let t0 = Utc::now().timestamp_millis();
    mount_list(&mock, &[("m1", "T1")]).await;
    mount_message(&mock, gmail_message("m1", "T1", t0, "a@x.com"), None).await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{
                "message": {
                    "content": "{\"category\": \"CLIENT_COMMUNICATION\", \"confidence\": 0.9, \"reasoning\": \"client email\"}"
                }
            }]
        })))
        .mount(&mock)
        .await;

    let categorization = CategorizationConfig {
        api_key: Some("sk-test".to_string()),
        api_base: mock.uri(),
        ..Default::default()
    };

    let user_id = Uuid::new_v4();
    seed_connected(&db.conn, &user_id).await;

    let ingestor = ingestor_against(&mock, db.conn.clone(), categorization);
    ingestor.fetch(user_id, 10, true).await;

    let stored = EmailRepository::new(db.conn.clone())
        .find_by_provider_message_id(&user_id, "m1")
        .await
        .unwrap()
        .unwrap();

    assert_eq!(stored.category.as_deref(), Some("CLIENT_COMMUNICATION"));
    assert_eq!(stored.category_confidence, Some(0.9));
    assert_eq!(stored.category_prompt_version.as_deref(), Some("1.0"));
    assert!(stored.categorized_at.is_some());
}

#[tokio::test]
async fn send_reply_synthesizes_sent_record_without_refetch() {
    let db = test_utils::setup_test_db().await;
    let mock = MockServer::start().await;

    let user_id = Uuid::new_v4();
    seed_connected(&db.conn, &user_id).await;

    let emails = EmailRepository::new(db.conn.clone());
    let original = emails
        .upsert(
            &user_id,
            &finbox::repositories::email::NewEmail {
                provider: Provider::Gmail,
                provider_message_id: "orig-1".to_string(),
                thread_id: "T1".to_string(),
                subject: Some("Quarterly numbers".to_string()),
                from_email: Some("Jordan Lee <jordan@client.com>".to_string()),
                to_emails: vec!["me@example.com".to_string()],
                cc_emails: vec![],
                bcc_emails: vec![],
                sent_at: Some(Utc::now() - Duration::hours(1)),
                snippet: None,
                body_text: Some("please review".to_string()),
                body_html: None,
                labels: vec!["INBOX".to_string()],
                has_attachments: false,
                size_estimate: None,
                is_read: false,
            },
        )
        .await
        .unwrap();

    // The send endpoint is hit exactly once; no message GET may happen
    Mock::given(method("POST"))
        .and(path("/gmail/v1/users/me/messages/send"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "sent-1",
            "threadId": "T1",
            "labelIds": ["SENT"]
        })))
        .expect(1)
        .mount(&mock)
        .await;

    let ingestor = ingestor_against(&mock, db.conn.clone(), CategorizationConfig::default());

    let sent = ingestor
        .send_reply(
            user_id,
            original.id,
            ReplyRequest {
                reply_body: "Looks good, thanks!".to_string(),
                ..Default::default()
            },
        )
        .await
        .expect("reply succeeds");

    assert_eq!(sent.provider_message_id, "sent-1");
    assert_eq!(sent.thread_id, "T1");
    assert_eq!(sent.subject.as_deref(), Some("Re: Quarterly numbers"));
    assert!(sent.is_read);
    assert_eq!(sent.from_email.as_deref(), Some("me@example.com"));

    let labels = sent.labels.clone().unwrap();
    assert!(labels.as_array().unwrap().iter().any(|l| l == "SENT"));

    // Default recipient is the original sender's bare address
    let to = sent.to_emails.clone().unwrap();
    assert_eq!(to.as_array().unwrap()[0], "jordan@client.com");

    // Exactly one stored record for the sent id
    let stored = emails
        .find_by_provider_message_id(&user_id, "sent-1")
        .await
        .unwrap();
    assert!(stored.is_some());
    assert_eq!(emails.list_all(&user_id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn send_reply_fails_cleanly() {
    let db = test_utils::setup_test_db().await;
    let mock = MockServer::start().await;

    let user_id = Uuid::new_v4();
    seed_connected(&db.conn, &user_id).await;

    let emails = EmailRepository::new(db.conn.clone());
    let original = emails
        .upsert(
            &user_id,
            &finbox::repositories::email::NewEmail {
                provider: Provider::Gmail,
                provider_message_id: "orig-1".to_string(),
                thread_id: "T1".to_string(),
                subject: Some("Hello".to_string()),
                from_email: Some("a@x.com".to_string()),
                to_emails: vec![],
                cc_emails: vec![],
                bcc_emails: vec![],
                sent_at: None,
                snippet: None,
                body_text: None,
                body_html: None,
                labels: vec![],
                has_attachments: false,
                size_estimate: None,
                is_read: false,
            },
        )
        .await
        .unwrap();

    let ingestor = ingestor_against(&mock, db.conn.clone(), CategorizationConfig::default());

    // Empty body: validation failure before anything else
    let result = ingestor
        .send_reply(
            user_id,
            original.id,
            ReplyRequest {
                reply_body: "   ".to_string(),
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(result, Err(ReplyError::EmptyBody)));

    // Unknown original: not found
    let result = ingestor
        .send_reply(
            user_id,
            Uuid::new_v4(),
            ReplyRequest {
                reply_body: "hi".to_string(),
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(result, Err(ReplyError::OriginalNotFound)));

    // Provider failure: SendFailed and no storage mutation
    Mock::given(method("POST"))
        .and(path("/gmail/v1/users/me/messages/send"))
        .respond_with(ResponseTemplate::new(500).set_body_string("smtp broke"))
        .mount(&mock)
        .await;

    let result = ingestor
        .send_reply(
            user_id,
            original.id,
            ReplyRequest {
                reply_body: "hi".to_string(),
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(result, Err(ReplyError::SendFailed(_))));
    assert_eq!(emails.list_all(&user_id).await.unwrap().len(), 1);
}
