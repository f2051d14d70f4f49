//! Connection entity model
//!
//! This module contains the SeaORM entity model for the connections table,
//! which records which providers a user has linked and in what state,
//! independent of whether the stored credential is currently valid.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Connection entity tying a user to a provider.
///
/// `status == "connected"` implies `oauth_token_id` is set; disconnecting
/// clears both in a single update.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "connections")]
pub struct Model {
    /// Unique identifier for the connection (primary key)
    #[sea_orm(primary_key)]
    pub id: Uuid,

    /// Owning user
    pub user_id: Uuid,

    /// Provider slug ("gmail" or "slack")
    pub provider: String,

    /// Status of the connection (connected|disconnected|refresh_required)
    pub status: String,

    /// Reference to the active credential, if any
    pub oauth_token_id: Option<Uuid>,

    /// Timestamp of the most recent completed sync
    pub last_sync_at: Option<DateTimeWithTimeZone>,

    /// Provider-specific opaque metadata (e.g. Slack team info)
    #[sea_orm(column_type = "JsonBinary")]
    pub metadata: Option<JsonValue>,

    /// Timestamp when the connection was created
    pub created_at: DateTimeWithTimeZone,

    /// Timestamp when the connection was last updated
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

/// Connection status values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    RefreshRequired,
}

impl ConnectionStatus {
    /// Canonical string representation stored in the status column.
    pub const fn as_str(self) -> &'static str {
        match self {
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::RefreshRequired => "refresh_required",
        }
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
