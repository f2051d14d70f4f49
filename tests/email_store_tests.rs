//! Integration tests for the email store: upsert-on-dedup-key semantics,
//! read-state updates, and the incremental-sync watermark.

use chrono::{Duration, Utc};
use finbox::categorize::Categorization;
use finbox::models::Provider;
use finbox::repositories::EmailRepository;
use finbox::repositories::email::NewEmail;
use uuid::Uuid;

#[path = "test_utils/mod.rs"]
mod test_utils;

fn new_email(provider_message_id: &str, thread_id: &str, sent_at_offset_min: i64) -> NewEmail {
    NewEmail {
        provider: Provider::Gmail,
        provider_message_id: provider_message_id.to_string(),
        thread_id: thread_id.to_string(),
        subject: Some(format!("subject {}", provider_message_id)),
        from_email: Some("sender@example.com".to_string()),
        to_emails: vec!["me@example.com".to_string()],
        cc_emails: vec![],
        bcc_emails: vec![],
        sent_at: Some(Utc::now() - Duration::minutes(sent_at_offset_min)),
        snippet: Some("snippet".to_string()),
        body_text: Some("body".to_string()),
        body_html: None,
        labels: vec!["INBOX".to_string(), "UNREAD".to_string()],
        has_attachments: false,
        size_estimate: Some(1000),
        is_read: false,
    }
}

#[tokio::test]
async fn reupsert_updates_in_place_and_preserves_categorization() {
    let db = test_utils::setup_test_db().await;
    let emails = EmailRepository::new(db.conn.clone());
    let user_id = Uuid::new_v4();

    let first = emails.upsert(&user_id, &new_email("m1", "T1", 30)).await.unwrap();

    emails
        .set_category(
            &user_id,
            &first.id,
            &Categorization {
                category: "FINANCIAL_REPORTING".to_string(),
                confidence: 0.8,
                reasoning: None,
            },
            "1.0",
        )
        .await
        .unwrap();

    // Re-ingest the same provider message with updated content
    let mut updated = new_email("m1", "T1", 30);
    updated.subject = Some("updated subject".to_string());
    updated.is_read = true;

    let second = emails.upsert(&user_id, &updated).await.unwrap();

    // Same row: id stable, content refreshed, categorization untouched
    assert_eq!(second.id, first.id);
    assert_eq!(second.subject.as_deref(), Some("updated subject"));
    assert!(second.is_read);
    assert_eq!(second.category.as_deref(), Some("FINANCIAL_REPORTING"));
    assert_eq!(second.category_confidence, Some(0.8));

    assert_eq!(emails.list_all(&user_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn dedup_key_is_scoped_per_user() {
    let db = test_utils::setup_test_db().await;
    let emails = EmailRepository::new(db.conn.clone());

    let user_a = Uuid::new_v4();
    let user_b = Uuid::new_v4();

    emails.upsert(&user_a, &new_email("m1", "T1", 10)).await.unwrap();
    emails.upsert(&user_b, &new_email("m1", "T1", 10)).await.unwrap();

    assert_eq!(emails.list_all(&user_a).await.unwrap().len(), 1);
    assert_eq!(emails.list_all(&user_b).await.unwrap().len(), 1);
    assert!(emails.exists(&user_a, "m1").await.unwrap());
    assert!(!emails.exists(&user_a, "m2").await.unwrap());
}

#[tokio::test]
async fn repeated_upserts_store_one_row_per_distinct_provider_id() {
    let db = test_utils::setup_test_db().await;
    let emails = EmailRepository::new(db.conn.clone());
    let user_id = Uuid::new_v4();

    // Overlapping windows replay the same ids in different orders
    for id in ["m1", "m2", "m3", "m2", "m1", "m3", "m1"] {
        emails.upsert(&user_id, &new_email(id, "T1", 5)).await.unwrap();
    }

    assert_eq!(emails.list_all(&user_id).await.unwrap().len(), 3);
}

#[tokio::test]
async fn read_state_updates() {
    let db = test_utils::setup_test_db().await;
    let emails = EmailRepository::new(db.conn.clone());
    let user_id = Uuid::new_v4();

    let m1 = emails.upsert(&user_id, &new_email("m1", "T1", 20)).await.unwrap();
    emails.upsert(&user_id, &new_email("m2", "T1", 10)).await.unwrap();
    emails.upsert(&user_id, &new_email("m3", "T2", 5)).await.unwrap();

    assert!(emails.mark_read(&user_id, &m1.id).await.unwrap());
    assert!(!emails.mark_read(&user_id, &Uuid::new_v4()).await.unwrap());

    // Another user's rows are out of reach
    assert!(!emails.mark_read(&Uuid::new_v4(), &m1.id).await.unwrap());

    let marked = emails.mark_thread_read(&user_id, "T1").await.unwrap();
    assert_eq!(marked, 2);

    let t2 = emails.find_by_thread(&user_id, "T2").await.unwrap();
    assert!(!t2[0].is_read);
}

#[tokio::test]
async fn watermark_is_latest_sent_at_and_ignores_undated_rows() {
    let db = test_utils::setup_test_db().await;
    let emails = EmailRepository::new(db.conn.clone());
    let user_id = Uuid::new_v4();

    assert!(emails.latest_sent_at(&user_id, Provider::Gmail).await.unwrap().is_none());

    let newest = Utc::now() - Duration::minutes(5);
    let mut m1 = new_email("m1", "T1", 60);
    m1.sent_at = Some(newest - Duration::minutes(55));
    let mut m2 = new_email("m2", "T1", 5);
    m2.sent_at = Some(newest);
    let mut undated = new_email("m3", "T2", 0);
    undated.sent_at = None;

    emails.upsert(&user_id, &m1).await.unwrap();
    emails.upsert(&user_id, &m2).await.unwrap();
    emails.upsert(&user_id, &undated).await.unwrap();

    let watermark = emails
        .latest_sent_at(&user_id, Provider::Gmail)
        .await
        .unwrap()
        .expect("watermark present");

    assert_eq!(watermark.timestamp(), newest.timestamp());
}
