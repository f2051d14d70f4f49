//! # OAuth State Model
//!
//! This module contains the OAuth state entity for storing OAuth flow state
//! tokens. The state token round-trips through the provider and is consumed
//! at the callback to recover the initiating user.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// OAuth state entity for in-flight authorization flows
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "oauth_states")]
pub struct Model {
    /// Primary key UUID
    #[sea_orm(primary_key)]
    pub id: Uuid,

    /// User who initiated the flow
    pub user_id: Uuid,

    /// Provider name ("gmail" or "slack")
    pub provider: String,

    /// State token generated for CSRF protection and user recovery
    pub state: String,

    /// Expiration timestamp
    pub expires_at: chrono::DateTime<chrono::Utc>,

    /// When the state was created
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
