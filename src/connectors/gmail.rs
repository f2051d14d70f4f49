//! Gmail connector
//!
//! Implements the CredentialBroker trait for Gmail plus the Gmail REST
//! message API (list/get/send) consumed by the ingest layer.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use reqwest::Client;
use serde::Deserialize;
use url::Url;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::connectors::broker::{ConnectorError, CredentialBroker};
use crate::connectors::expiry::expiry_from_expires_in;
use crate::crypto::CryptoKey;
use crate::models::Provider;
use crate::models::connection::{self, ConnectionStatus};
use crate::repositories::token::TokenPayload;
use crate::repositories::{ConnectionRepository, TokenRepository};
use sea_orm::DatabaseConnection;

/// Default Gmail OAuth scopes
pub const DEFAULT_GMAIL_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/gmail.readonly",
    "https://www.googleapis.com/auth/gmail.send",
    "openid",
    "email",
    "profile",
];

/// Gmail OAuth endpoints
const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v2/userinfo";

/// Gmail API base endpoint
const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1";

/// Google OAuth token response
#[derive(Debug, Deserialize)]
struct GoogleTokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    expires_in: Option<u64>,
    refresh_token: Option<String>,
    scope: Option<String>,
}

/// Google userinfo response
#[derive(Debug, Deserialize)]
struct GoogleUserinfo {
    email: String,
}

/// Gmail message list response
#[derive(Debug, Deserialize)]
pub struct GmailMessageList {
    pub messages: Option<Vec<GmailMessageRef>>,
    #[serde(rename = "nextPageToken")]
    pub next_page_token: Option<String>,
}

/// Gmail message reference (id + thread)
#[derive(Debug, Clone, Deserialize)]
pub struct GmailMessageRef {
    pub id: String,
    #[serde(rename = "threadId")]
    pub thread_id: Option<String>,
}

/// Full Gmail message
#[derive(Debug, Clone, Deserialize)]
pub struct GmailMessage {
    pub id: String,
    #[serde(rename = "threadId")]
    pub thread_id: Option<String>,
    #[serde(rename = "labelIds", default)]
    pub label_ids: Vec<String>,
    pub snippet: Option<String>,
    #[serde(rename = "internalDate")]
    pub internal_date: Option<String>,
    #[serde(rename = "sizeEstimate")]
    pub size_estimate: Option<i64>,
    pub payload: Option<GmailPayload>,
}

/// Gmail MIME payload node
#[derive(Debug, Clone, Deserialize)]
pub struct GmailPayload {
    #[serde(rename = "mimeType")]
    pub mime_type: Option<String>,
    pub filename: Option<String>,
    #[serde(default)]
    pub headers: Vec<GmailHeader>,
    pub body: Option<GmailBody>,
    pub parts: Option<Vec<GmailPayload>>,
}

/// Gmail message header
#[derive(Debug, Clone, Deserialize)]
pub struct GmailHeader {
    pub name: String,
    pub value: String,
}

/// Gmail MIME body node
#[derive(Debug, Clone, Deserialize)]
pub struct GmailBody {
    #[serde(rename = "attachmentId")]
    pub attachment_id: Option<String>,
    pub size: Option<i64>,
    pub data: Option<String>,
}

/// Response from a Gmail send call
#[derive(Debug, Clone, Deserialize)]
pub struct GmailSentMessage {
    pub id: String,
    #[serde(rename = "threadId")]
    pub thread_id: Option<String>,
    #[serde(rename = "labelIds", default)]
    pub label_ids: Vec<String>,
}

/// Gmail connector implementation
pub struct GmailConnector {
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    scopes: Vec<String>,
    http_client: Client,
    tokens: TokenRepository,
    connections: ConnectionRepository,
    refresh_margin: Duration,
    default_lifetime: Duration,
    auth_url: String,
    token_url: String,
    userinfo_url: String,
    api_base: String,
}

impl GmailConnector {
    fn build_http_client() -> Client {
        Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client")
    }

    /// Create a Gmail connector from application configuration.
    pub fn from_config(
        config: &AppConfig,
        db: DatabaseConnection,
        crypto_key: CryptoKey,
    ) -> Result<Self, ConnectorError> {
        let client_id = config.google_client_id.clone().ok_or_else(|| {
            ConnectorError::Configuration("FINBOX_GOOGLE_CLIENT_ID is not set".to_string())
        })?;
        let client_secret = config.google_client_secret.clone().ok_or_else(|| {
            ConnectorError::Configuration("FINBOX_GOOGLE_CLIENT_SECRET is not set".to_string())
        })?;
        let redirect_uri = config.google_redirect_uri.clone().ok_or_else(|| {
            ConnectorError::Configuration("FINBOX_GOOGLE_REDIRECT_URI is not set".to_string())
        })?;

        let scopes = match &config.gmail_scopes {
            Some(raw) => raw.split_whitespace().map(|s| s.to_string()).collect(),
            None => DEFAULT_GMAIL_SCOPES.iter().map(|s| s.to_string()).collect(),
        };

        Ok(Self {
            client_id,
            client_secret,
            redirect_uri,
            scopes,
            http_client: Self::build_http_client(),
            tokens: TokenRepository::new(db.clone(), crypto_key),
            connections: ConnectionRepository::new(db),
            refresh_margin: Duration::seconds(config.token_refresh.margin_seconds as i64),
            default_lifetime: Duration::seconds(
                config.token_refresh.default_lifetime_seconds as i64,
            ),
            auth_url: GOOGLE_AUTH_URL.to_string(),
            token_url: GOOGLE_TOKEN_URL.to_string(),
            userinfo_url: GOOGLE_USERINFO_URL.to_string(),
            api_base: GMAIL_API_BASE.to_string(),
        })
    }

    /// Override the Google endpoints (used by tests with a mock server).
    pub fn with_endpoints(
        mut self,
        auth_url: String,
        token_url: String,
        userinfo_url: String,
        api_base: String,
    ) -> Self {
        self.auth_url = auth_url;
        self.token_url = token_url;
        self.userinfo_url = userinfo_url;
        self.api_base = api_base;
        self
    }

    /// Get Gmail scopes as a space-separated string
    fn get_scopes(&self) -> String {
        self.scopes.join(" ")
    }

    /// Build the Gmail OAuth authorization URL.
    ///
    /// `access_type=offline` together with `prompt=consent` guarantees the
    /// refresh token is issued even on repeat consent.
    fn build_authorize_url(&self, state: &str) -> Result<Url, ConnectorError> {
        let mut url = Url::parse(&self.auth_url)
            .map_err(|e| ConnectorError::Configuration(format!("Invalid auth URL: {}", e)))?;

        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", &self.get_scopes())
            .append_pair("access_type", "offline")
            .append_pair("prompt", "consent")
            .append_pair("include_granted_scopes", "true")
            .append_pair("state", state);

        Ok(url)
    }

    /// Map an error response, honoring rate-limit and quota signals.
    async fn error_from_response(response: reqwest::Response) -> ConnectorError {
        let status = response.status().as_u16();

        if status == 401 {
            let body = response.text().await.unwrap_or_default();
            return ConnectorError::Unauthorized(body);
        }

        if status == 429 {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok())
                .unwrap_or(60);
            return ConnectorError::RateLimited { retry_after };
        }

        if status == 403 {
            let retry_after_header = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok());

            // Gmail reports some quota exhaustion as 403 rather than 429
            let body = response.text().await.unwrap_or_default();
            let body_lower = body.to_lowercase();

            let quota_error_patterns = [
                "userratelimitexceeded",
                "ratelimitexceeded",
                "quotaexceeded",
                "daily limit",
            ];

            if quota_error_patterns
                .iter()
                .any(|pattern| body_lower.contains(pattern))
            {
                return ConnectorError::RateLimited {
                    retry_after: retry_after_header.unwrap_or(60),
                };
            }

            return ConnectorError::Http { status, body };
        }

        let body = response.text().await.unwrap_or_default();
        ConnectorError::Http { status, body }
    }

    /// Exchange authorization code for access token
    async fn exchange_code_for_token(
        &self,
        code: &str,
    ) -> Result<GoogleTokenResponse, ConnectorError> {
        let mut params = HashMap::new();
        params.insert("client_id", self.client_id.as_str());
        params.insert("client_secret", self.client_secret.as_str());
        params.insert("code", code);
        params.insert("grant_type", "authorization_code");
        params.insert("redirect_uri", self.redirect_uri.as_str());

        let response = self
            .http_client
            .post(&self.token_url)
            .header("Accept", "application/json")
            .form(&params)
            .send()
            .await
            .map_err(|e| ConnectorError::Network(format!("Token request failed: {}", e)))?;

        if !response.status().is_success() {
            let err = Self::error_from_response(response).await;
            return Err(match err {
                ConnectorError::Http { status, body } if (400..500).contains(&status) => {
                    ConnectorError::Rejected(format!("token exchange failed ({}): {}", status, body))
                }
                other => other,
            });
        }

        response.json::<GoogleTokenResponse>().await.map_err(|e| {
            ConnectorError::InvalidResponse(format!("Failed to parse token response: {}", e))
        })
    }

    /// Refresh access token
    async fn refresh_access_token(
        &self,
        refresh_token: &str,
    ) -> Result<GoogleTokenResponse, ConnectorError> {
        let mut params = HashMap::new();
        params.insert("client_id", self.client_id.as_str());
        params.insert("client_secret", self.client_secret.as_str());
        params.insert("refresh_token", refresh_token);
        params.insert("grant_type", "refresh_token");

        let response = self
            .http_client
            .post(&self.token_url)
            .header("Accept", "application/json")
            .form(&params)
            .send()
            .await
            .map_err(|e| ConnectorError::Network(format!("Token refresh request failed: {}", e)))?;

        if !response.status().is_success() {
            let err = Self::error_from_response(response).await;
            return Err(match err {
                ConnectorError::Http { status, body } if (400..500).contains(&status) => {
                    ConnectorError::Rejected(format!("token refresh failed ({}): {}", status, body))
                }
                other => other,
            });
        }

        response.json::<GoogleTokenResponse>().await.map_err(|e| {
            ConnectorError::InvalidResponse(format!("Failed to parse refresh response: {}", e))
        })
    }

    /// Get user email from the Google userinfo endpoint
    async fn get_user_email(&self, access_token: &str) -> Result<String, ConnectorError> {
        let response = self
            .http_client
            .get(&self.userinfo_url)
            .header("Authorization", format!("Bearer {}", access_token))
            .send()
            .await
            .map_err(|e| ConnectorError::Network(format!("Failed to fetch userinfo: {}", e)))?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let userinfo: GoogleUserinfo = response.json().await.map_err(|e| {
            ConnectorError::InvalidResponse(format!("Failed to parse userinfo response: {}", e))
        })?;

        Ok(userinfo.email)
    }

    /// List message ids, optionally constrained by a Gmail search query
    pub async fn list_message_ids(
        &self,
        access_token: &str,
        query: Option<&str>,
        max_results: u32,
    ) -> Result<Vec<GmailMessageRef>, ConnectorError> {
        let mut url = Url::parse(&format!("{}/users/me/messages", self.api_base))
            .map_err(|e| ConnectorError::Configuration(format!("Invalid API base: {}", e)))?;

        url.query_pairs_mut()
            .append_pair("maxResults", &max_results.to_string());
        if let Some(query) = query {
            url.query_pairs_mut().append_pair("q", query);
        }

        let response = self
            .http_client
            .get(url)
            .header("Authorization", format!("Bearer {}", access_token))
            .send()
            .await
            .map_err(|e| ConnectorError::Network(format!("Failed to list messages: {}", e)))?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let list: GmailMessageList = response.json().await.map_err(|e| {
            ConnectorError::InvalidResponse(format!("Failed to parse message list: {}", e))
        })?;

        Ok(list.messages.unwrap_or_default())
    }

    /// Fetch a full message by id
    pub async fn get_message(
        &self,
        access_token: &str,
        message_id: &str,
    ) -> Result<GmailMessage, ConnectorError> {
        let url = format!("{}/users/me/messages/{}", self.api_base, message_id);

        let response = self
            .http_client
            .get(&url)
            .header("Authorization", format!("Bearer {}", access_token))
            .send()
            .await
            .map_err(|e| ConnectorError::Network(format!("Failed to fetch message: {}", e)))?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        response.json::<GmailMessage>().await.map_err(|e| {
            ConnectorError::InvalidResponse(format!("Failed to parse message: {}", e))
        })
    }

    /// Send a raw RFC 2822 message into an existing thread.
    ///
    /// `raw` is the base64url-encoded message; `thread_id` makes the provider
    /// group the reply with its conversation.
    pub async fn send_message(
        &self,
        access_token: &str,
        raw: &str,
        thread_id: &str,
    ) -> Result<GmailSentMessage, ConnectorError> {
        let url = format!("{}/users/me/messages/send", self.api_base);

        let body = serde_json::json!({
            "raw": raw,
            "threadId": thread_id,
        });

        let response = self
            .http_client
            .post(&url)
            .header("Authorization", format!("Bearer {}", access_token))
            .json(&body)
            .send()
            .await
            .map_err(|e| ConnectorError::Network(format!("Failed to send message: {}", e)))?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        response.json::<GmailSentMessage>().await.map_err(|e| {
            ConnectorError::InvalidResponse(format!("Failed to parse send response: {}", e))
        })
    }
}

#[async_trait]
impl CredentialBroker for GmailConnector {
    fn provider(&self) -> Provider {
        Provider::Gmail
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
        let url = self.build_authorize_url(state)?;
        tracing::debug!("Generated Gmail OAuth authorize URL");
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

        let token_response = self.exchange_code_for_token(code).await?;

        // Resolve the account email for connection metadata
        let email = self.get_user_email(&token_response.access_token).await?;

        tracing::info!(user_id = %user_id, email = %email, "Authenticated Gmail user");

        let now = Utc::now();
        let expires_at =
            expiry_from_expires_in(now, token_response.expires_in, self.default_lifetime);

        let payload = TokenPayload {
            access_token: token_response.access_token,
            refresh_token: token_response.refresh_token,
            token_type: token_response
                .token_type
                .unwrap_or_else(|| "Bearer".to_string()),
            expires_at,
            scope: token_response.scope.or_else(|| Some(self.get_scopes())),
        };

        let token = self
            .tokens
            .upsert(&user_id, Provider::Gmail, &payload)
            .await
            .map_err(ConnectorError::store)?;

        let metadata = serde_json::json!({
            "scopes": self.scopes,
            "email": email,
            "connected_at": now.to_rfc3339(),
        });

        self.connections
            .upsert(
                &user_id,
                Provider::Gmail,
                ConnectionStatus::Connected,
                Some(token.id),
                Some(metadata),
            )
            .await
            .map_err(ConnectorError::store)
    }

    async fn refresh_credential(
        &self,
        user_id: Uuid,
        refresh_token: &str,
    ) -> Result<(), ConnectorError> {
        let token_response = self.refresh_access_token(refresh_token).await?;

        let now = Utc::now();
        let expires_at =
            expiry_from_expires_in(now, token_response.expires_in, self.default_lifetime);

        // Google does not always return a new refresh token; a None here
        // leaves the stored one in place.
        let payload = TokenPayload {
            access_token: token_response.access_token,
            refresh_token: token_response.refresh_token,
            token_type: token_response
                .token_type
                .unwrap_or_else(|| "Bearer".to_string()),
            expires_at,
            scope: token_response.scope,
        };

        self.tokens
            .upsert(&user_id, Provider::Gmail, &payload)
            .await
            .map_err(ConnectorError::store)?;

        Ok(())
    }
}
