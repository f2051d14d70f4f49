//! # Connections Handlers
//!
//! Listing of a user's provider connections, independent of whether the
//! stored credentials are currently valid.

use axum::{extract::State, response::Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::server::AppState;

/// Connection information for API responses
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ConnectionInfo {
    /// Provider slug (e.g., "gmail", "slack")
    pub provider: String,
    /// Status of the connection (connected|disconnected|refresh_required)
    pub status: String,
    /// Whether a credential is currently referenced
    pub has_credential: bool,
    /// Timestamp of the last completed sync
    pub last_sync_at: Option<DateTime<Utc>>,
    /// Provider-specific metadata
    pub metadata: serde_json::Value,
    /// When the connection was first created
    pub connected_at: DateTime<Utc>,
}

impl From<crate::models::connection::Model> for ConnectionInfo {
    fn from(model: crate::models::connection::Model) -> Self {
        Self {
            provider: model.provider,
            status: model.status,
            has_credential: model.oauth_token_id.is_some(),
            last_sync_at: model.last_sync_at.map(|dt| dt.with_timezone(&Utc)),
            metadata: model.metadata.unwrap_or_default(),
            connected_at: model.created_at.with_timezone(&Utc),
        }
    }
}

/// Response wrapper for connections listing
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ConnectionsResponse {
    /// List of the user's connections
    pub connections: Vec<ConnectionInfo>,
}

/// Lists the authenticated user's provider connections
#[utoipa::path(
    get,
    path = "/connections",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "List of connections", body = ConnectionsResponse),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError)
    ),
    tag = "connections"
)]
pub async fn list_connections(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<ConnectionsResponse>, ApiError> {
    let connections = state.connection_repo().list(&user.user_id).await?;

    Ok(Json(ConnectionsResponse {
        connections: connections.into_iter().map(Into::into).collect(),
    }))
}
