//! Slack connector
//!
//! Implements the CredentialBroker trait for Slack OAuth v2. Slack user
//! tokens carry no refresh mechanism, so an expiring credential transitions
//! the connection straight to refresh_required and the user redoes the
//! authorization flow.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use reqwest::Client;
use serde::Deserialize;
use url::Url;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::connectors::broker::{ConnectorError, CredentialBroker};
use crate::crypto::CryptoKey;
use crate::models::Provider;
use crate::models::connection::{self, ConnectionStatus};
use crate::repositories::token::TokenPayload;
use crate::repositories::{ConnectionRepository, TokenRepository};
use sea_orm::DatabaseConnection;

/// Default Slack OAuth scopes
pub const DEFAULT_SLACK_SCOPES: &[&str] = &[
    "channels:read",
    "channels:history",
    "users:read",
    "team:read",
];

/// Slack OAuth endpoints
const SLACK_AUTHORIZE_URL: &str = "https://slack.com/oauth/v2/authorize";
const SLACK_TOKEN_URL: &str = "https://slack.com/api/oauth.v2.access";
const SLACK_AUTH_TEST_URL: &str = "https://slack.com/api/auth.test";

/// Slack tokens do not expire in practice; store a far-future expiry so the
/// shared refresh gate leaves them alone.
const SLACK_TOKEN_LIFETIME_DAYS: i64 = 365;

/// Slack OAuth v2 access response envelope
#[derive(Debug, Deserialize)]
struct SlackTokenResponse {
    ok: bool,
    error: Option<String>,
    access_token: Option<String>,
    token_type: Option<String>,
    scope: Option<String>,
    team: Option<SlackTeam>,
}

/// Slack team info embedded in the OAuth response
#[derive(Debug, Deserialize)]
struct SlackTeam {
    id: Option<String>,
    name: Option<String>,
}

/// Slack auth.test response
#[derive(Debug, Deserialize)]
struct SlackAuthTestResponse {
    ok: bool,
}

/// Slack connector implementation
pub struct SlackConnector {
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    scopes: Vec<String>,
    http_client: Client,
    tokens: TokenRepository,
    connections: ConnectionRepository,
    refresh_margin: Duration,
    authorize_url: String,
    token_url: String,
    auth_test_url: String,
}

impl SlackConnector {
    fn build_http_client() -> Client {
        Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client")
    }

    /// Create a Slack connector from application configuration.
    pub fn from_config(
        config: &AppConfig,
        db: DatabaseConnection,
        crypto_key: CryptoKey,
    ) -> Result<Self, ConnectorError> {
        let client_id = config.slack_client_id.clone().ok_or_else(|| {
            ConnectorError::Configuration("FINBOX_SLACK_CLIENT_ID is not set".to_string())
        })?;
        let client_secret = config.slack_client_secret.clone().ok_or_else(|| {
            ConnectorError::Configuration("FINBOX_SLACK_CLIENT_SECRET is not set".to_string())
        })?;
        let redirect_uri = config.slack_redirect_uri.clone().ok_or_else(|| {
            ConnectorError::Configuration("FINBOX_SLACK_REDIRECT_URI is not set".to_string())
        })?;

        Ok(Self {
            client_id,
            client_secret,
            redirect_uri,
            scopes: DEFAULT_SLACK_SCOPES.iter().map(|s| s.to_string()).collect(),
            http_client: Self::build_http_client(),
            tokens: TokenRepository::new(db.clone(), crypto_key),
            connections: ConnectionRepository::new(db),
            refresh_margin: Duration::seconds(config.token_refresh.margin_seconds as i64),
            authorize_url: SLACK_AUTHORIZE_URL.to_string(),
            token_url: SLACK_TOKEN_URL.to_string(),
            auth_test_url: SLACK_AUTH_TEST_URL.to_string(),
        })
    }

    /// Override the Slack endpoints (used by tests with a mock server).
    pub fn with_endpoints(
        mut self,
        authorize_url: String,
        token_url: String,
        auth_test_url: String,
    ) -> Self {
        self.authorize_url = authorize_url;
        self.token_url = token_url;
        self.auth_test_url = auth_test_url;
        self
    }

    /// Slack scopes are comma-joined, unlike Google's space-joined set.
    fn get_scopes(&self) -> String {
        self.scopes.join(",")
    }

    /// Test whether the stored token is accepted by Slack's auth.test.
    pub async fn test_connection(&self, user_id: Uuid) -> bool {
        let Some(token) = self.valid_token(user_id).await else {
            return false;
        };

        let response = self
            .http_client
            .get(&self.auth_test_url)
            .header("Authorization", format!("Bearer {}", token))
            .send()
            .await;

        match response {
            Ok(response) => response
                .json::<SlackAuthTestResponse>()
                .await
                .map(|body| body.ok)
                .unwrap_or(false),
            Err(err) => {
                tracing::warn!(user_id = %user_id, error = %err, "Slack auth.test failed");
                false
            }
        }
    }
}

#[async_trait]
impl CredentialBroker for SlackConnector {
    fn provider(&self) -> Provider {
        Provider::Slack
    }

    fn tokens(&self) -> &TokenRepository {
        &self.tokens
    }

    fn connections(&self) -> &ConnectionRepository {
        &self.connections
    }

    fn refresh_margin(&self) -> Duration {
        self.refresh_margin
    }

    fn authorization_url(&self, state: &str) -> Result<Url, ConnectorError> {
        let mut url = Url::parse(&self.authorize_url)
            .map_err(|e| ConnectorError::Configuration(format!("Invalid authorize URL: {}", e)))?;

        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("scope", &self.get_scopes())
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("state", state);

        Ok(url)
    }

    async fn exchange_code(
        &self,
        user_id: Uuid,
        code: &str,
    ) -> Result<connection::Model, ConnectorError> {
        if code.is_empty() {
            return Err(ConnectorError::NoCode);
        }

        let params = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
        ];

        let response = self
            .http_client
            .post(&self.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| ConnectorError::Network(format!("Token request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ConnectorError::Http {
                status: status.as_u16(),
                body,
            });
        }

        // Slack reports failures inside a 200 envelope
        let token_response: SlackTokenResponse = response.json().await.map_err(|e| {
            ConnectorError::InvalidResponse(format!("Failed to parse token response: {}", e))
        })?;

        if !token_response.ok {
            let reason = token_response
                .error
                .unwrap_or_else(|| "unknown error".to_string());
            return Err(ConnectorError::Rejected(reason));
        }

        let access_token = token_response.access_token.ok_or_else(|| {
            ConnectorError::InvalidResponse("No access token in Slack response".to_string())
        })?;

        tracing::info!(user_id = %user_id, "Authenticated Slack user");

        let now = Utc::now();
        let payload = TokenPayload {
            access_token,
            // Slack OAuth v2 issues no refresh tokens
            refresh_token: None,
            token_type: token_response
                .token_type
                .unwrap_or_else(|| "Bearer".to_string()),
            expires_at: now + Duration::days(SLACK_TOKEN_LIFETIME_DAYS),
            scope: token_response.scope.or_else(|| Some(self.get_scopes())),
        };

        let token = self
            .tokens
            .upsert(&user_id, Provider::Slack, &payload)
            .await
            .map_err(ConnectorError::store)?;

        let mut metadata = serde_json::json!({
            "scopes": self.scopes,
            "connected_at": now.to_rfc3339(),
        });
        if let Some(team) = token_response.team {
            metadata["team_id"] = serde_json::json!(team.id);
            metadata["team_name"] = serde_json::json!(team.name);
        }

        self.connections
            .upsert(
                &user_id,
                Provider::Slack,
                ConnectionStatus::Connected,
                Some(token.id),
                Some(metadata),
            )
            .await
            .map_err(ConnectorError::store)
    }

    async fn refresh_credential(
        &self,
        _user_id: Uuid,
        _refresh_token: &str,
    ) -> Result<(), ConnectorError> {
        // No refresh grant exists for Slack OAuth v2 user tokens. The shared
        // refresh gate only reaches this when a refresh token is somehow
        // stored; reject so the connection flips to refresh_required.
        Err(ConnectorError::Rejected(
            "Slack tokens cannot be refreshed; re-authorization is required".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::Database;

    async fn test_connector() -> SlackConnector {
        let db = Database::connect("sqlite::memory:").await.expect("db");
        let key = CryptoKey::new(vec![0u8; 32]).expect("key");
        let config = AppConfig {
            slack_client_id: Some("slack-client".to_string()),
            slack_client_secret: Some("slack-secret".to_string()),
            slack_redirect_uri: Some("https://api.example.com/slack-auth/callback".to_string()),
            ..Default::default()
        };

        SlackConnector::from_config(&config, db, key).expect("connector")
    }

    #[tokio::test]
    async fn authorize_url_uses_comma_joined_scopes() {
        let connector = test_connector().await;
        let url = connector.authorization_url("slack-state").expect("url");

        assert!(url.as_str().starts_with("https://slack.com/oauth/v2/authorize"));

        let scope = url
            .query_pairs()
            .find(|(k, _)| k == "scope")
            .map(|(_, v)| v.to_string())
            .expect("scope present");
        assert_eq!(scope, "channels:read,channels:history,users:read,team:read");

        let state = url
            .query_pairs()
            .find(|(k, _)| k == "state")
            .map(|(_, v)| v.to_string())
            .expect("state present");
        assert_eq!(state, "slack-state");
    }

    #[tokio::test]
    async fn empty_code_fails_before_any_network_call() {
        let connector = test_connector().await;
        let result = connector.exchange_code(Uuid::new_v4(), "").await;

        assert!(matches!(result, Err(ConnectorError::NoCode)));
    }

    #[tokio::test]
    async fn refresh_is_always_rejected() {
        let connector = test_connector().await;
        let result = connector
            .refresh_credential(Uuid::new_v4(), "unexpected-refresh-token")
            .await;

        assert!(matches!(result, Err(ConnectorError::Rejected(_))));
    }
}
