//! # API Handlers
//!
//! This module contains all the HTTP endpoint handlers for the Finbox API.

pub mod connections;
pub mod gmail_auth;
pub mod inbox;
pub mod slack_auth;
pub mod types;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use url::Url;

use crate::error::ApiError;
use crate::models::ServiceInfo;
use crate::server::AppState;

/// Root handler that returns basic service information
#[utoipa::path(
    get,
    path = "/",
    responses(
        (status = 200, description = "Service information", body = ServiceInfo)
    ),
    tag = "root"
)]
pub async fn root() -> Json<ServiceInfo> {
    Json(ServiceInfo::default())
}

/// Health check verifying database connectivity
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy"),
        (status = 503, description = "Database unavailable", body = ApiError)
    ),
    tag = "root"
)]
pub async fn health(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    crate::db::health_check(&state.db).await.map_err(|err| {
        tracing::error!(error = %err, "Health check failed");
        ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "SERVICE_UNAVAILABLE",
            "Database unavailable",
        )
    })?;

    Ok(Json(serde_json::json!({ "status": "healthy" })))
}

/// Validate an authorization URL meets OAuth 2.0 and security requirements
pub(crate) fn validate_authorize_url(url: &Url) -> Result<(), ApiError> {
    // Must be HTTPS
    if url.scheme() != "https" {
        return Err(ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_SERVER_ERROR",
            "Connector bug: Generated authorization URL must use HTTPS",
        ));
    }

    // Must not include fragment component per OAuth 2.0 RFC 6749 section 3.1
    if url.fragment().is_some() {
        return Err(ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_SERVER_ERROR",
            "Connector bug: Generated authorization URL must not include fragment component",
        ));
    }

    // Maximum length 2048 characters
    if url.as_str().len() > 2048 {
        return Err(ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_SERVER_ERROR",
            "Connector bug: Generated authorization URL exceeds maximum length of 2048 characters",
        ));
    }

    Ok(())
}
