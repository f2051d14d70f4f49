//! # OAuth State Repository
//!
//! This module provides database operations for OAuth state management.
//! OAuth callbacks arrive unauthenticated, so the state token persisted here
//! is the only link back to the user who initiated the flow.

use chrono::{Duration, Utc};
use rand::Rng;
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use uuid::Uuid;

use crate::models::Provider;
use crate::models::oauth_state::{self, ActiveModel, Entity, Model};

/// Lifetime of an in-flight OAuth state token.
const STATE_TTL_MINUTES: i64 = 15;

/// Repository for OAuth state database operations
pub struct OAuthStateRepository {
    db: DatabaseConnection,
}

impl OAuthStateRepository {
    /// Create a new OAuth state repository
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Create a new OAuth state record with a fresh random token
    pub async fn create(
        &self,
        user_id: Uuid,
        provider: Provider,
    ) -> Result<Model, sea_orm::DbErr> {
        let now = Utc::now();

        let new_state = ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            provider: Set(provider.as_str().to_string()),
            state: Set(generate_state_token()),
            expires_at: Set(now + Duration::minutes(STATE_TTL_MINUTES)),
            created_at: Set(now),
        };

        new_state.insert(&self.db).await
    }

    /// Find and consume an OAuth state (delete it after retrieval).
    ///
    /// Expired states are treated as absent. Consumption makes replayed
    /// callbacks fail on their second attempt.
    pub async fn consume(
        &self,
        provider: Provider,
        state: &str,
    ) -> Result<Option<Model>, sea_orm::DbErr> {
        let found = Entity::find()
            .filter(oauth_state::Column::Provider.eq(provider.as_str()))
            .filter(oauth_state::Column::State.eq(state))
            .filter(oauth_state::Column::ExpiresAt.gt(Utc::now()))
            .one(&self.db)
            .await?;

        if let Some(model) = &found {
            Entity::delete_by_id(model.id).exec(&self.db).await?;
        }

        Ok(found)
    }

    /// Remove expired state rows; returns the number deleted
    pub async fn purge_expired(&self) -> Result<u64, sea_orm::DbErr> {
        let result = Entity::delete_many()
            .filter(oauth_state::Column::ExpiresAt.lte(Utc::now()))
            .exec(&self.db)
            .await?;

        Ok(result.rows_affected)
    }
}

/// Generate a cryptographically secure random state token
fn generate_state_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill(&mut bytes);

    base64_url::encode(&bytes)
}
