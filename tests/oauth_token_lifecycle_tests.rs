//! Integration tests for the OAuth token lifecycle: code exchange, expiry
//! margin behavior, proactive refresh, refresh-token preservation, and
//! disconnect idempotence.

use chrono::{Duration, Utc};
use finbox::connectors::broker::CredentialBroker;
use finbox::connectors::{ConnectorError, GmailConnector};
use finbox::models::Provider;
use finbox::models::connection::ConnectionStatus;
use finbox::repositories::token::TokenPayload;
use finbox::repositories::{ConnectionRepository, TokenRepository};
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[path = "test_utils/mod.rs"]
mod test_utils;

fn connector_against(
    mock: &MockServer,
    db: sea_orm::DatabaseConnection,
) -> GmailConnector {
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

async fn seed_connected(
    db: &sea_orm::DatabaseConnection,
    user_id: &Uuid,
    access_token: &str,
    refresh_token: Option<&str>,
    expires_in_seconds: i64,
) {
    let tokens = TokenRepository::new(db.clone(), test_utils::test_crypto_key());
    let token = tokens
        .upsert(
            user_id,
            Provider::Gmail,
            &TokenPayload {
                access_token: access_token.to_string(),
                refresh_token: refresh_token.map(|t| t.to_string()),
                token_type: "Bearer".to_string(),
                expires_at: Utc::now() + Duration::seconds(expires_in_seconds),
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
            None,
        )
        .await
        .expect("connection seeds");
}

#[tokio::test]
async fn exchange_code_persists_tokens_and_connects() {
    let db = test_utils::setup_test_db().await;
    let mock = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "t1",
            "refresh_token": "r1",
            "token_type": "Bearer",
            "expires_in": 3600,
            "scope": "https://www.googleapis.com/auth/gmail.readonly"
        })))
        .expect(1)
        .mount(&mock)
        .await;

    Mock::given(method("GET"))
        .and(path("/userinfo"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "email": "user@example.com" })),
        )
        .expect(1)
        .mount(&mock)
        .await;

    let connector = connector_against(&mock, db.conn.clone());
    let user_id = Uuid::new_v4();

    let before = Utc::now();
    let connection = connector
        .exchange_code(user_id, "auth-code")
        .await
        .expect("exchange succeeds");

    assert_eq!(connection.status, "connected");
    assert!(connection.oauth_token_id.is_some());
    let metadata = connection.metadata.expect("metadata recorded");
    assert_eq!(metadata["email"], "user@example.com");

    let tokens = TokenRepository::new(db.conn.clone(), test_utils::test_crypto_key());
    let stored = tokens
        .find(&user_id, Provider::Gmail)
        .await
        .expect("query works")
        .expect("token stored");

    let decrypted = tokens.decrypt(&stored).expect("decrypts");
    assert_eq!(decrypted.access_token, "t1");
    assert_eq!(decrypted.refresh_token.as_deref(), Some("r1"));

    // Ciphertext at rest must not be the plaintext
    assert_ne!(stored.access_token_ciphertext, b"t1".to_vec());

    let expires_at = stored.expires_at.with_timezone(&Utc);
    assert!(expires_at >= before + Duration::seconds(3590));
    assert!(expires_at <= Utc::now() + Duration::seconds(3610));
}

#[tokio::test]
async fn exchange_applies_default_lifetime_when_expiry_missing() {
    let db = test_utils::setup_test_db().await;
    let mock = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "t1",
            "refresh_token": "r1",
            "token_type": "Bearer"
        })))
        .mount(&mock)
        .await;

    Mock::given(method("GET"))
        .and(path("/userinfo"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "email": "u@e.com" })))
        .mount(&mock)
        .await;

    let connector = connector_against(&mock, db.conn.clone());
    let user_id = Uuid::new_v4();

    let before = Utc::now();
    connector
        .exchange_code(user_id, "auth-code")
        .await
        .expect("exchange succeeds");

    let tokens = TokenRepository::new(db.conn.clone(), test_utils::test_crypto_key());
    let stored = tokens
        .find(&user_id, Provider::Gmail)
        .await
        .unwrap()
        .unwrap();

    // Default lifetime is 3600s from now
    let expires_at = stored.expires_at.with_timezone(&Utc);
    assert!(expires_at >= before + Duration::seconds(3590));
    assert!(expires_at <= Utc::now() + Duration::seconds(3610));
}

#[tokio::test]
async fn rejected_exchange_surfaces_reason() {
    let db = test_utils::setup_test_db().await;
    let mock = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(
            ResponseTemplate::new(400).set_body_string(r#"{"error": "invalid_grant"}"#),
        )
        .mount(&mock)
        .await;

    let connector = connector_against(&mock, db.conn.clone());
    let result = connector.exchange_code(Uuid::new_v4(), "bad-code").await;

    match result {
        Err(ConnectorError::Rejected(reason)) => assert!(reason.contains("invalid_grant")),
        other => panic!("expected Rejected, got {:?}", other.map(|c| c.status)),
    }
}

#[tokio::test]
async fn fresh_credential_skips_network_refresh() {
    let db = test_utils::setup_test_db().await;
    let mock = MockServer::start().await;

    // Any hit on the token endpoint fails the test
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&mock)
        .await;

    let user_id = Uuid::new_v4();
    seed_connected(&db.conn, &user_id, "t1", Some("r1"), 3600).await;

    let connector = connector_against(&mock, db.conn.clone());
    assert!(connector.ensure_fresh(user_id).await);
}

#[tokio::test]
async fn missing_credential_is_not_fresh() {
    let db = test_utils::setup_test_db().await;
    let mock = MockServer::start().await;

    let connector = connector_against(&mock, db.conn.clone());
    assert!(!connector.ensure_fresh(Uuid::new_v4()).await);
}

#[tokio::test]
async fn expired_without_refresh_token_requires_reauth() {
    let db = test_utils::setup_test_db().await;
    let mock = MockServer::start().await;

    let user_id = Uuid::new_v4();
    seed_connected(&db.conn, &user_id, "t1", None, -1).await;

    let connector = connector_against(&mock, db.conn.clone());
    assert!(!connector.ensure_fresh(user_id).await);

    let connection = ConnectionRepository::new(db.conn.clone())
        .find(&user_id, Provider::Gmail)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(connection.status, "refresh_required");
}

#[tokio::test]
async fn refresh_preserves_unrotated_refresh_token() {
    let db = test_utils::setup_test_db().await;
    let mock = MockServer::start().await;

    // Inside the 300s margin, so a refresh happens; Google omits the refresh
    // token in the grant response
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "t2",
            "token_type": "Bearer",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&mock)
        .await;

    let user_id = Uuid::new_v4();
    seed_connected(&db.conn, &user_id, "t1", Some("r1"), 60).await;

    let connector = connector_against(&mock, db.conn.clone());
    assert!(connector.ensure_fresh(user_id).await);

    let tokens = TokenRepository::new(db.conn.clone(), test_utils::test_crypto_key());
    let stored = tokens
        .find(&user_id, Provider::Gmail)
        .await
        .unwrap()
        .unwrap();
    let decrypted = tokens.decrypt(&stored).expect("decrypts");

    assert_eq!(decrypted.access_token, "t2");
    assert_eq!(decrypted.refresh_token.as_deref(), Some("r1"));
    assert!(stored.expires_at.with_timezone(&Utc) > Utc::now() + Duration::seconds(3000));
}

#[tokio::test]
async fn refresh_adopts_rotated_refresh_token() {
    let db = test_utils::setup_test_db().await;
    let mock = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "t2",
            "refresh_token": "r2",
            "token_type": "Bearer",
            "expires_in": 3600
        })))
        .mount(&mock)
        .await;

    let user_id = Uuid::new_v4();
    seed_connected(&db.conn, &user_id, "t1", Some("r1"), 60).await;

    let connector = connector_against(&mock, db.conn.clone());
    assert!(connector.ensure_fresh(user_id).await);

    let tokens = TokenRepository::new(db.conn.clone(), test_utils::test_crypto_key());
    let stored = tokens
        .find(&user_id, Provider::Gmail)
        .await
        .unwrap()
        .unwrap();
    let decrypted = tokens.decrypt(&stored).expect("decrypts");

    assert_eq!(decrypted.refresh_token.as_deref(), Some("r2"));
}

#[tokio::test]
async fn rejected_refresh_marks_refresh_required() {
    let db = test_utils::setup_test_db().await;
    let mock = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(
            ResponseTemplate::new(400).set_body_string(r#"{"error": "invalid_grant"}"#),
        )
        .mount(&mock)
        .await;

    let user_id = Uuid::new_v4();
    seed_connected(&db.conn, &user_id, "t1", Some("r1"), 60).await;

    let connector = connector_against(&mock, db.conn.clone());
    assert!(!connector.ensure_fresh(user_id).await);

    let connection = ConnectionRepository::new(db.conn.clone())
        .find(&user_id, Provider::Gmail)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(connection.status, "refresh_required");
}

#[tokio::test]
async fn transient_refresh_failure_leaves_connection_connected() {
    let db = test_utils::setup_test_db().await;
    let mock = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream unavailable"))
        .mount(&mock)
        .await;

    let user_id = Uuid::new_v4();
    seed_connected(&db.conn, &user_id, "t1", Some("r1"), 60).await;

    let connector = connector_against(&mock, db.conn.clone());
    assert!(!connector.ensure_fresh(user_id).await);

    let connection = ConnectionRepository::new(db.conn.clone())
        .find(&user_id, Provider::Gmail)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(connection.status, "connected");
}

#[tokio::test]
async fn valid_token_returns_plaintext_access_token() {
    let db = test_utils::setup_test_db().await;
    let mock = MockServer::start().await;

    let user_id = Uuid::new_v4();
    seed_connected(&db.conn, &user_id, "t1", Some("r1"), 3600).await;

    let connector = connector_against(&mock, db.conn.clone());
    assert_eq!(connector.valid_token(user_id).await.as_deref(), Some("t1"));

    // And None for a user with nothing stored
    assert_eq!(connector.valid_token(Uuid::new_v4()).await, None);
}

#[tokio::test]
async fn disconnect_is_idempotent() {
    let db = test_utils::setup_test_db().await;
    let mock = MockServer::start().await;

    let user_id = Uuid::new_v4();
    seed_connected(&db.conn, &user_id, "t1", Some("r1"), 3600).await;

    let connector = connector_against(&mock, db.conn.clone());

    let first = connector.disconnect(user_id).await.expect("first succeeds");
    assert!(first);

    let second = connector.disconnect(user_id).await.expect("second succeeds");
    assert!(!second);

    let connection = ConnectionRepository::new(db.conn.clone())
        .find(&user_id, Provider::Gmail)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(connection.status, "disconnected");
    assert!(connection.oauth_token_id.is_none());

    let tokens = TokenRepository::new(db.conn.clone(), test_utils::test_crypto_key());
    assert!(tokens.find(&user_id, Provider::Gmail).await.unwrap().is_none());

    // Never-connected user: disconnect is still a success
    let fresh_user = connector.disconnect(Uuid::new_v4()).await;
    assert!(matches!(fresh_user, Ok(false)));
}
