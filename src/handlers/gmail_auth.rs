//! # Gmail OAuth Handlers
//!
//! Endpoints for connecting, inspecting, and disconnecting a user's Gmail
//! account. The callback is unauthenticated (the browser arrives straight
//! from Google) and always redirects back to the frontend with a
//! success/error query parameter.

use axum::{
    extract::{Query, State},
    response::{Json, Redirect},
};
use chrono::Utc;

use crate::auth::AuthUser;
use crate::connectors::broker::{ConnectorError, CredentialBroker};
use crate::error::ApiError;
use crate::handlers::types::{
    AuthStatusResponse, AuthorizeUrlResponse, MessageResponse, OAuthCallbackQuery,
};
use crate::handlers::validate_authorize_url;
use crate::models::Provider;
use crate::models::connection::ConnectionStatus;
use crate::repositories::OAuthStateRepository;
use crate::server::AppState;

/// Start the Gmail OAuth flow
///
/// Returns the Google authorization URL for the frontend to redirect the
/// user to. The generated state token is persisted so the callback can
/// recover this user.
#[utoipa::path(
    get,
    path = "/google-auth/",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Authorization URL generated", body = AuthorizeUrlResponse),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 500, description = "OAuth is not configured", body = ApiError)
    ),
    tag = "gmail-auth"
)]
pub async fn login(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<AuthorizeUrlResponse>, ApiError> {
    let connector = state.gmail_connector()?;

    let state_repo = OAuthStateRepository::new(state.db.clone());
    let oauth_state = state_repo
        .create(user.user_id, Provider::Gmail)
        .await
        .map_err(|err| {
            tracing::error!(error = %err, "Failed to persist OAuth state");
            ApiError::from(err)
        })?;

    let authorization_url = connector
        .authorization_url(&oauth_state.state)
        .map_err(|err| {
            tracing::error!(error = %err, "Failed to generate Gmail authorize URL");
            ApiError::new(
                axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_SERVER_ERROR",
                "Failed to generate authorization URL",
            )
        })?;

    validate_authorize_url(&authorization_url)?;

    tracing::info!(user_id = %user.user_id, "Gmail OAuth flow initiated");

    Ok(Json(AuthorizeUrlResponse {
        authorization_url: authorization_url.to_string(),
        message: "Use this URL to redirect the user to Google OAuth".to_string(),
    }))
}

/// Handle the Google OAuth callback
///
/// Unauthenticated: the user id is recovered by consuming the persisted
/// state token. Always redirects to the frontend.
#[utoipa::path(
    get,
    path = "/google-auth/callback",
    params(OAuthCallbackQuery),
    responses(
        (status = 303, description = "Redirect to frontend with success or error parameter")
    ),
    tag = "gmail-auth"
)]
pub async fn callback(
    State(state): State<AppState>,
    Query(query): Query<OAuthCallbackQuery>,
) -> Redirect {
    let frontend = &state.config.frontend_url;

    let Some(code) = query.code.filter(|c| !c.is_empty()) else {
        return Redirect::to(&format!("{}/settings?error=no_code", frontend));
    };
    let Some(state_token) = query.state.filter(|s| !s.is_empty()) else {
        return Redirect::to(&format!("{}/settings?error=no_state", frontend));
    };

    let state_repo = OAuthStateRepository::new(state.db.clone());
    let oauth_state = match state_repo.consume(Provider::Gmail, &state_token).await {
        Ok(Some(oauth_state)) => oauth_state,
        Ok(None) => {
            tracing::warn!("Gmail callback with unknown or expired state");
            return Redirect::to(&format!("{}/settings?error=invalid_state", frontend));
        }
        Err(err) => {
            tracing::error!(error = %err, "Failed to look up OAuth state");
            return Redirect::to(&format!("{}/settings?error=callback_failed", frontend));
        }
    };

    let connector = match state.gmail_connector() {
        Ok(connector) => connector,
        Err(_) => {
            return Redirect::to(&format!("{}/settings?error=callback_failed", frontend));
        }
    };

    match connector.exchange_code(oauth_state.user_id, &code).await {
        Ok(_) => {
            tracing::info!(user_id = %oauth_state.user_id, "Gmail connected");
            Redirect::to(&format!("{}/settings?success=gmail_connected", frontend))
        }
        Err(ConnectorError::Rejected(reason)) => {
            tracing::warn!(user_id = %oauth_state.user_id, reason = %reason, "Gmail exchange rejected");
            Redirect::to(&format!("{}/settings?error=oauth_rejected", frontend))
        }
        Err(err) => {
            tracing::error!(user_id = %oauth_state.user_id, error = %err, "Gmail exchange failed");
            Redirect::to(&format!("{}/settings?error=callback_failed", frontend))
        }
    }
}

/// Gmail connection status
///
/// Token-info summary read from storage; distinguishes "no valid token,
/// reconnect" from "connected".
#[utoipa::path(
    get,
    path = "/google-auth/status",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Connection status summary", body = AuthStatusResponse),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError)
    ),
    tag = "gmail-auth"
)]
pub async fn status(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<AuthStatusResponse>, ApiError> {
    let connections = state.connection_repo();
    let tokens = state.token_repo();

    let connection = connections.find(&user.user_id, Provider::Gmail).await?;
    let token = tokens.find(&user.user_id, Provider::Gmail).await?;

    let connection_status = connection
        .as_ref()
        .map(|c| c.status.clone())
        .unwrap_or_else(|| ConnectionStatus::Disconnected.as_str().to_string());

    let authenticated = connection_status == ConnectionStatus::Connected.as_str()
        && token
            .as_ref()
            .is_some_and(|t| t.expires_at.with_timezone(&Utc) > Utc::now());

    Ok(Json(AuthStatusResponse {
        authenticated,
        connection_status,
        expires_at: token.as_ref().map(|t| t.expires_at.with_timezone(&Utc)),
        scope: token.as_ref().and_then(|t| t.scope.clone()),
        has_refresh_token: token
            .as_ref()
            .is_some_and(|t| t.refresh_token_ciphertext.is_some()),
        last_sync_at: connection
            .as_ref()
            .and_then(|c| c.last_sync_at)
            .map(|dt| dt.with_timezone(&Utc)),
    }))
}

/// Disconnect Gmail
///
/// Deletes the stored credential and resets the connection. Idempotent:
/// calling with nothing connected is a success.
#[utoipa::path(
    post,
    path = "/google-auth/logout",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Disconnected", body = MessageResponse),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError)
    ),
    tag = "gmail-auth"
)]
pub async fn logout(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<MessageResponse>, ApiError> {
    let connector = state.gmail_connector()?;

    connector.disconnect(user.user_id).await.map_err(|err| {
        tracing::error!(user_id = %user.user_id, error = %err, "Gmail disconnect failed");
        ApiError::new(
            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_SERVER_ERROR",
            "Failed to disconnect Gmail",
        )
    })?;

    Ok(Json(MessageResponse {
        message: "Gmail disconnected successfully".to_string(),
    }))
}
