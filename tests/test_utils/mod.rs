//! Shared helpers for integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use finbox::config::AppConfig;
use finbox::crypto::CryptoKey;
use finbox::migration::{Migrator, MigratorTrait};
use finbox::server::AppState;
use sea_orm::{Database, DatabaseConnection};
use tempfile::TempDir;

/// A migrated SQLite database living in a temp directory.
///
/// Keep the struct alive for the duration of the test; dropping it removes
/// the underlying file.
pub struct TestDb {
    pub conn: DatabaseConnection,
    _dir: TempDir,
}

pub async fn setup_test_db() -> TestDb {
    let dir = tempfile::tempdir().expect("create temp dir");
    let db_path = dir.path().join("finbox_test.db");
    let url = format!("sqlite://{}?mode=rwc", db_path.display());

    let conn = Database::connect(url)
        .await
        .expect("connect to test database");

    Migrator::up(&conn, None).await.expect("apply migrations");

    TestDb { conn, _dir: dir }
}

pub fn test_crypto_key() -> CryptoKey {
    CryptoKey::new(vec![7u8; 32]).expect("valid test key")
}

/// Base test configuration with OAuth credentials filled in.
pub fn test_config() -> AppConfig {
    AppConfig {
        jwt_secret: Some("integration-test-secret".to_string()),
        google_client_id: Some("google-client-id".to_string()),
        google_client_secret: Some("google-client-secret".to_string()),
        google_redirect_uri: Some("https://api.example.com/google-auth/callback".to_string()),
        slack_client_id: Some("slack-client-id".to_string()),
        slack_client_secret: Some("slack-client-secret".to_string()),
        slack_redirect_uri: Some("https://api.example.com/slack-auth/callback".to_string()),
        frontend_url: "https://app.example.com".to_string(),
        ..Default::default()
    }
}

pub fn test_app_state(config: AppConfig, db: DatabaseConnection) -> AppState {
    AppState {
        config: Arc::new(config),
        db,
        crypto_key: test_crypto_key(),
    }
}

/// Issue a bearer JWT accepted by the test configuration.
pub fn issue_jwt(secret: &str, user_id: &uuid::Uuid, email: &str) -> String {
    use jsonwebtoken::{EncodingKey, Header, encode};

    let exp = (chrono::Utc::now() + chrono::Duration::hours(1)).timestamp();
    let claims = serde_json::json!({ "sub": user_id.to_string(), "email": email, "exp": exp });

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .expect("token encodes")
}
