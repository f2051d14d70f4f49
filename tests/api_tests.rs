//! HTTP-level integration tests: auth middleware, inbox views, OAuth flow
//! start, and callback redirects, against a server bound to a random port.

use anyhow::{Context, Result as AnyhowResult};
use finbox::server::create_app;
use reqwest::StatusCode;
use serde_json::Value;
use tokio::net::TcpListener;
use uuid::Uuid;

#[path = "test_utils/mod.rs"]
mod test_utils;

struct TestServer {
    url: String,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    join_handle: Option<tokio::task::JoinHandle<AnyhowResult<()>>>,
}

impl TestServer {
    async fn shutdown(mut self) -> AnyhowResult<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.join_handle.take() {
            handle.await.context("server task join failed")??;
        }
        Ok(())
    }
}

async fn spawn_test_app(state: finbox::server::AppState) -> TestServer {
    let app = create_app(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let url = format!("http://{}", addr);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let join_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .context("server error")
    });

    TestServer {
        url,
        shutdown_tx: Some(shutdown_tx),
        join_handle: Some(join_handle),
    }
}

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .expect("client builds")
}

#[tokio::test]
async fn public_routes_do_not_require_auth() {
    let db = test_utils::setup_test_db().await;
    let server = spawn_test_app(test_utils::test_app_state(
        test_utils::test_config(),
        db.conn.clone(),
    ))
    .await;

    let response = client()
        .get(format!("{}/", server.url))
        .send()
        .await
        .expect("request succeeds");
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.expect("json");
    assert_eq!(body["service"], "finbox");

    let response = client()
        .get(format!("{}/health", server.url))
        .send()
        .await
        .expect("request succeeds");
    assert_eq!(response.status(), StatusCode::OK);

    server.shutdown().await.expect("clean shutdown");
}

#[tokio::test]
async fn protected_routes_reject_missing_or_bad_tokens() {
    let db = test_utils::setup_test_db().await;
    let server = spawn_test_app(test_utils::test_app_state(
        test_utils::test_config(),
        db.conn.clone(),
    ))
    .await;

    // Missing token
    let response = client()
        .get(format!("{}/inbox/", server.url))
        .send()
        .await
        .expect("request succeeds");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "application/problem+json"
    );
    let body: Value = response.json().await.expect("json");
    assert_eq!(body["code"], "UNAUTHORIZED");

    // Wrong secret
    let bad_token = test_utils::issue_jwt("wrong-secret", &Uuid::new_v4(), "u@e.com");
    let response = client()
        .get(format!("{}/inbox/", server.url))
        .bearer_auth(bad_token)
        .send()
        .await
        .expect("request succeeds");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    server.shutdown().await.expect("clean shutdown");
}

#[tokio::test]
async fn empty_inbox_and_connections_views() {
    let db = test_utils::setup_test_db().await;
    let config = test_utils::test_config();
    let secret = config.jwt_secret.clone().unwrap();
    let server = spawn_test_app(test_utils::test_app_state(config, db.conn.clone())).await;

    let user_id = Uuid::new_v4();
    let token = test_utils::issue_jwt(&secret, &user_id, "user@example.com");

    let response = client()
        .get(format!("{}/inbox/", server.url))
        .bearer_auth(&token)
        .send()
        .await
        .expect("request succeeds");
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.expect("json");
    assert_eq!(body["thread_count"], 0);
    assert_eq!(body["total_emails"], 0);
    assert_eq!(body["source"], "database");

    let response = client()
        .get(format!("{}/connections", server.url))
        .bearer_auth(&token)
        .send()
        .await
        .expect("request succeeds");
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.expect("json");
    assert_eq!(body["connections"].as_array().unwrap().len(), 0);

    // Status for a never-connected provider
    let response = client()
        .get(format!("{}/google-auth/status", server.url))
        .bearer_auth(&token)
        .send()
        .await
        .expect("request succeeds");
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.expect("json");
    assert_eq!(body["authenticated"], false);
    assert_eq!(body["connection_status"], "disconnected");

    server.shutdown().await.expect("clean shutdown");
}

#[tokio::test]
async fn missing_email_and_thread_return_404() {
    let db = test_utils::setup_test_db().await;
    let config = test_utils::test_config();
    let secret = config.jwt_secret.clone().unwrap();
    let server = spawn_test_app(test_utils::test_app_state(config, db.conn.clone())).await;

    let token = test_utils::issue_jwt(&secret, &Uuid::new_v4(), "user@example.com");

    let response = client()
        .get(format!("{}/inbox/email/{}", server.url, Uuid::new_v4()))
        .bearer_auth(&token)
        .send()
        .await
        .expect("request succeeds");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: Value = response.json().await.expect("json");
    assert_eq!(body["code"], "NOT_FOUND");

    let response = client()
        .get(format!("{}/inbox/thread/does-not-exist", server.url))
        .bearer_auth(&token)
        .send()
        .await
        .expect("request succeeds");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = client()
        .put(format!("{}/inbox/email/{}/read", server.url, Uuid::new_v4()))
        .bearer_auth(&token)
        .send()
        .await
        .expect("request succeeds");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    server.shutdown().await.expect("clean shutdown");
}

#[tokio::test]
async fn oauth_login_returns_url_with_persisted_state() {
    let db = test_utils::setup_test_db().await;
    let config = test_utils::test_config();
    let secret = config.jwt_secret.clone().unwrap();
    let server = spawn_test_app(test_utils::test_app_state(config, db.conn.clone())).await;

    let user_id = Uuid::new_v4();
    let token = test_utils::issue_jwt(&secret, &user_id, "user@example.com");

    let response = client()
        .get(format!("{}/google-auth/", server.url))
        .bearer_auth(&token)
        .send()
        .await
        .expect("request succeeds");
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = response.json().await.expect("json");
    let authorization_url = body["authorization_url"].as_str().unwrap();
    assert!(authorization_url.starts_with("https://accounts.google.com/"));
    assert!(authorization_url.contains("access_type=offline"));
    assert!(authorization_url.contains("prompt=consent"));

    // The state parameter round-trips back to the initiating user
    let url = url::Url::parse(authorization_url).unwrap();
    let state_token = url
        .query_pairs()
        .find(|(k, _)| k == "state")
        .map(|(_, v)| v.to_string())
        .expect("state present");

    let state_repo = finbox::repositories::OAuthStateRepository::new(db.conn.clone());
    let consumed = state_repo
        .consume(finbox::models::Provider::Gmail, &state_token)
        .await
        .expect("lookup works")
        .expect("state persisted");
    assert_eq!(consumed.user_id, user_id);

    server.shutdown().await.expect("clean shutdown");
}

#[tokio::test]
async fn callback_redirects_on_missing_code_or_unknown_state() {
    let db = test_utils::setup_test_db().await;
    let server = spawn_test_app(test_utils::test_app_state(
        test_utils::test_config(),
        db.conn.clone(),
    ))
    .await;

    // Missing code
    let response = client()
        .get(format!("{}/google-auth/callback?state=abc", server.url))
        .send()
        .await
        .expect("request succeeds");
    assert!(response.status().is_redirection());
    let location = response.headers().get("location").unwrap().to_str().unwrap();
    assert_eq!(location, "https://app.example.com/settings?error=no_code");

    // Missing state
    let response = client()
        .get(format!("{}/google-auth/callback?code=abc", server.url))
        .send()
        .await
        .expect("request succeeds");
    let location = response.headers().get("location").unwrap().to_str().unwrap();
    assert_eq!(location, "https://app.example.com/settings?error=no_state");

    // Unknown state
    let response = client()
        .get(format!(
            "{}/google-auth/callback?code=abc&state=never-issued",
            server.url
        ))
        .send()
        .await
        .expect("request succeeds");
    let location = response.headers().get("location").unwrap().to_str().unwrap();
    assert_eq!(
        location,
        "https://app.example.com/settings?error=invalid_state"
    );

    server.shutdown().await.expect("clean shutdown");
}

#[tokio::test]
async fn reply_validation_errors_are_structured() {
    let db = test_utils::setup_test_db().await;
    let config = test_utils::test_config();
    let secret = config.jwt_secret.clone().unwrap();
    let server = spawn_test_app(test_utils::test_app_state(config, db.conn.clone())).await;

    let token = test_utils::issue_jwt(&secret, &Uuid::new_v4(), "user@example.com");

    // Empty body fails validation before anything touches the provider
    let response = client()
        .post(format!(
            "{}/inbox/email/{}/reply",
            server.url,
            Uuid::new_v4()
        ))
        .bearer_auth(&token)
        .json(&serde_json::json!({ "reply_body": "" }))
        .send()
        .await
        .expect("request succeeds");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.expect("json");
    assert_eq!(body["code"], "VALIDATION_FAILED");

    // Non-empty body but unknown original: 404
    let response = client()
        .post(format!(
            "{}/inbox/email/{}/reply",
            server.url,
            Uuid::new_v4()
        ))
        .bearer_auth(&token)
        .json(&serde_json::json!({ "reply_body": "hello" }))
        .send()
        .await
        .expect("request succeeds");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    server.shutdown().await.expect("clean shutdown");
}
