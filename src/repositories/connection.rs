//! Connection repository for database operations
//!
//! This module provides the ConnectionRepository struct which encapsulates
//! SeaORM operations for the connections table: the authoritative record of
//! per-user, per-provider connection status.

use anyhow::Result;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::models::Provider;
use crate::models::connection::{self, ConnectionStatus, Entity as Connection};

/// Repository for connection database operations
#[derive(Debug, Clone)]
pub struct ConnectionRepository {
    db: DatabaseConnection,
}

impl ConnectionRepository {
    /// Creates a new ConnectionRepository instance
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Finds the connection for a (user, provider) pair
    pub async fn find(
        &self,
        user_id: &Uuid,
        provider: Provider,
    ) -> Result<Option<connection::Model>> {
        Ok(Connection::find()
            .filter(connection::Column::UserId.eq(*user_id))
            .filter(connection::Column::Provider.eq(provider.as_str()))
            .one(&self.db)
            .await?)
    }

    /// Lists all connections for a user ordered by creation time
    pub async fn list(&self, user_id: &Uuid) -> Result<Vec<connection::Model>> {
        Ok(Connection::find()
            .filter(connection::Column::UserId.eq(*user_id))
            .order_by_asc(connection::Column::CreatedAt)
            .order_by_asc(connection::Column::Id)
            .all(&self.db)
            .await?)
    }

    /// Creates or updates the connection for a (user, provider) pair.
    ///
    /// `oauth_token_id` and `metadata` overwrite stored values only when
    /// provided; status is always written. Use [`Self::disconnect`] to clear
    /// the credential reference.
    pub async fn upsert(
        &self,
        user_id: &Uuid,
        provider: Provider,
        status: ConnectionStatus,
        oauth_token_id: Option<Uuid>,
        metadata: Option<JsonValue>,
    ) -> Result<connection::Model> {
        let now = Utc::now();

        match self.find(user_id, provider).await? {
            Some(existing) => {
                let mut active: connection::ActiveModel = existing.into();
                active.status = Set(status.as_str().to_string());
                if let Some(token_id) = oauth_token_id {
                    active.oauth_token_id = Set(Some(token_id));
                }
                if let Some(meta) = metadata {
                    active.metadata = Set(Some(meta));
                }
                active.updated_at = Set(now.into());

                Ok(active.update(&self.db).await?)
            }
            None => {
                let active = connection::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    user_id: Set(*user_id),
                    provider: Set(provider.as_str().to_string()),
                    status: Set(status.as_str().to_string()),
                    oauth_token_id: Set(oauth_token_id),
                    last_sync_at: Set(None),
                    metadata: Set(metadata),
                    created_at: Set(now.into()),
                    updated_at: Set(now.into()),
                };

                Ok(active.insert(&self.db).await?)
            }
        }
    }

    /// Transitions the connection status without touching the credential
    /// reference or metadata
    pub async fn mark_status(
        &self,
        user_id: &Uuid,
        provider: Provider,
        status: ConnectionStatus,
    ) -> Result<bool> {
        let Some(existing) = self.find(user_id, provider).await? else {
            return Ok(false);
        };

        let mut active: connection::ActiveModel = existing.into();
        active.status = Set(status.as_str().to_string());
        active.updated_at = Set(Utc::now().into());
        active.update(&self.db).await?;

        Ok(true)
    }

    /// Disconnects a provider: status becomes `disconnected` and the
    /// credential reference is cleared in the same update.
    ///
    /// Returns false when no connection existed; disconnecting twice is a
    /// success both times.
    pub async fn disconnect(&self, user_id: &Uuid, provider: Provider) -> Result<bool> {
        let Some(existing) = self.find(user_id, provider).await? else {
            return Ok(false);
        };

        let mut active: connection::ActiveModel = existing.into();
        active.status = Set(ConnectionStatus::Disconnected.as_str().to_string());
        active.oauth_token_id = Set(None);
        active.updated_at = Set(Utc::now().into());
        active.update(&self.db).await?;

        tracing::info!(user_id = %user_id, provider = %provider, "Disconnected provider");

        Ok(true)
    }

    /// Updates last_sync_at to now
    pub async fn touch_sync(&self, user_id: &Uuid, provider: Provider) -> Result<bool> {
        let Some(existing) = self.find(user_id, provider).await? else {
            return Ok(false);
        };

        let now = Utc::now();
        let mut active: connection::ActiveModel = existing.into();
        active.last_sync_at = Set(Some(now.into()));
        active.updated_at = Set(now.into());
        active.update(&self.db).await?;

        Ok(true)
    }

    /// Lists user ids with a connected connection for the given provider.
    ///
    /// Used by the polling loop to decide which mailboxes to sync each tick.
    pub async fn connected_user_ids(&self, provider: Provider) -> Result<Vec<Uuid>> {
        let rows: Vec<(Uuid,)> = Connection::find()
            .filter(connection::Column::Provider.eq(provider.as_str()))
            .filter(connection::Column::Status.eq(ConnectionStatus::Connected.as_str()))
            .select_only()
            .column(connection::Column::UserId)
            .into_tuple()
            .all(&self.db)
            .await?;

        Ok(rows.into_iter().map(|(user_id,)| user_id).collect())
    }
}
