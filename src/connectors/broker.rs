//! Credential broker trait definition
//!
//! Defines the standard interface every provider connector implements for the
//! OAuth authorization-code flow, plus the shared refresh-gate logic that
//! keeps one credential fresh per (user, provider).

use async_trait::async_trait;
use chrono::{Duration, Utc};
use thiserror::Error;
use url::Url;
use uuid::Uuid;

use crate::connectors::expiry::{needs_refresh, normalize_utc};
use crate::models::Provider;
use crate::models::connection::{self, ConnectionStatus};
use crate::repositories::{ConnectionRepository, TokenRepository};

/// Connector-specific error types for structured error handling
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("no authorization code provided")]
    NoCode,

    #[error("provider rejected the request: {0}")]
    Rejected(String),

    #[error("authentication failed: {0}")]
    Unauthorized(String),

    #[error("rate limit exceeded: retry after {retry_after}s")]
    RateLimited { retry_after: u64 },

    #[error("network error: {0}")]
    Network(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("HTTP error {status}: {body}")]
    Http { status: u16, body: String },

    #[error("storage error: {0}")]
    Store(String),
}

impl ConnectorError {
    /// Wrap a storage-layer failure.
    pub fn store<E: std::fmt::Display>(err: E) -> Self {
        ConnectorError::Store(err.to_string())
    }

    /// Whether the failure is transient (network, rate limit) as opposed to a
    /// provider actively refusing the credential.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ConnectorError::Network(_) | ConnectorError::RateLimited { .. }
        ) || matches!(self, ConnectorError::Http { status, .. } if *status >= 500)
    }
}

#[async_trait]
pub trait CredentialBroker: Send + Sync {
    /// The provider this broker manages.
    fn provider(&self) -> Provider;

    /// Credential persistence for this broker.
    fn tokens(&self) -> &TokenRepository;

    /// Connection registry for this broker.
    fn connections(&self) -> &ConnectionRepository;

    /// Safety window before expiry that triggers a proactive refresh.
    fn refresh_margin(&self) -> Duration;

    /// Build the provider authorization URL for the given opaque state.
    ///
    /// The state round-trips through the provider and is the only way the
    /// unauthenticated callback recovers the initiating user. No side
    /// effects.
    fn authorization_url(&self, state: &str) -> Result<Url, ConnectorError>;

    /// Exchange an authorization code for tokens, persist them, and mark the
    /// connection as connected.
    async fn exchange_code(
        &self,
        user_id: Uuid,
        code: &str,
    ) -> Result<connection::Model, ConnectorError>;

    /// Provider-specific refresh exchange. Implementations persist the new
    /// access token and expiry, preserving the stored refresh token unless
    /// the provider rotated it.
    async fn refresh_credential(
        &self,
        user_id: Uuid,
        refresh_token: &str,
    ) -> Result<(), ConnectorError>;

    /// The refresh gate: true when a valid (possibly just-refreshed) access
    /// token is stored for this user, false when the caller must surface a
    /// reconnect.
    ///
    /// A single UTC `now` drives both the margin test and the refresh
    /// decision.
    async fn ensure_fresh(&self, user_id: Uuid) -> bool {
        let provider = self.provider();

        let credential = match self.tokens().find(&user_id, provider).await {
            Ok(Some(credential)) => credential,
            Ok(None) => {
                tracing::debug!(user_id = %user_id, provider = %provider, "No credential stored");
                return false;
            }
            Err(err) => {
                tracing::error!(
                    user_id = %user_id,
                    provider = %provider,
                    error = %err,
                    "Failed to load credential"
                );
                return false;
            }
        };

        let now = Utc::now();
        let expires_at = normalize_utc(credential.expires_at);

        if !needs_refresh(expires_at, now, self.refresh_margin()) {
            return true;
        }

        let decrypted = match self.tokens().decrypt(&credential) {
            Ok(decrypted) => decrypted,
            Err(err) => {
                tracing::error!(
                    user_id = %user_id,
                    provider = %provider,
                    error = %err,
                    "Failed to decrypt credential"
                );
                return false;
            }
        };

        let Some(refresh_token) = decrypted.refresh_token.filter(|t| !t.is_empty()) else {
            tracing::warn!(
                user_id = %user_id,
                provider = %provider,
                "Credential expiring with no refresh token, marking refresh_required"
            );
            let _ = self
                .connections()
                .mark_status(&user_id, provider, ConnectionStatus::RefreshRequired)
                .await;
            return false;
        };

        match self.refresh_credential(user_id, &refresh_token).await {
            Ok(()) => {
                tracing::info!(user_id = %user_id, provider = %provider, "Refreshed credential");
                metrics::counter!("token_refresh_success_total").increment(1);
                true
            }
            Err(err) if err.is_transient() => {
                tracing::warn!(
                    user_id = %user_id,
                    provider = %provider,
                    error = %err,
                    "Transient refresh failure, will retry on next access"
                );
                metrics::counter!("token_refresh_transient_failure_total").increment(1);
                false
            }
            Err(err) => {
                tracing::error!(
                    user_id = %user_id,
                    provider = %provider,
                    error = %err,
                    "Refresh rejected, marking refresh_required"
                );
                metrics::counter!("token_refresh_permanent_failure_total").increment(1);
                let _ = self
                    .connections()
                    .mark_status(&user_id, provider, ConnectionStatus::RefreshRequired)
                    .await;
                false
            }
        }
    }

    /// Convenience composition of [`Self::ensure_fresh`] and a credential
    /// read; `None` on any failure path.
    async fn valid_token(&self, user_id: Uuid) -> Option<String> {
        if !self.ensure_fresh(user_id).await {
            return None;
        }

        let credential = self
            .tokens()
            .find(&user_id, self.provider())
            .await
            .ok()
            .flatten()?;

        self.tokens()
            .decrypt(&credential)
            .ok()
            .map(|decrypted| decrypted.access_token)
    }

    /// Delete the credential and reset the connection to disconnected.
    ///
    /// Idempotent: disconnecting with nothing connected is a success.
    async fn disconnect(&self, user_id: Uuid) -> Result<bool, ConnectorError> {
        let provider = self.provider();

        self.tokens()
            .delete(&user_id, provider)
            .await
            .map_err(ConnectorError::store)?;

        let existed = self
            .connections()
            .disconnect(&user_id, provider)
            .await
            .map_err(ConnectorError::store)?;

        Ok(existed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(ConnectorError::Network("timeout".into()).is_transient());
        assert!(ConnectorError::RateLimited { retry_after: 60 }.is_transient());
        assert!(
            ConnectorError::Http {
                status: 503,
                body: "unavailable".into()
            }
            .is_transient()
        );

        assert!(!ConnectorError::Rejected("invalid_grant".into()).is_transient());
        assert!(
            !ConnectorError::Http {
                status: 400,
                body: "bad request".into()
            }
            .is_transient()
        );
        assert!(!ConnectorError::NoCode.is_transient());
    }
}
