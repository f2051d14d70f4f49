//! Token repository for database operations
//!
//! This module provides the TokenRepository struct which encapsulates SeaORM
//! operations for the oauth_tokens table. Tokens are encrypted before they
//! touch the database and decrypted on the way out; callers only ever see
//! plaintext through [`DecryptedTokens`].

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
};
use uuid::Uuid;

use crate::crypto::{CryptoKey, decrypt_token, encrypt_token};
use crate::models::Provider;
use crate::models::oauth_token::{self, Entity as OAuthToken};

/// Plaintext view of a stored credential.
#[derive(Debug, Clone)]
pub struct DecryptedTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
}

/// New or refreshed token material to persist.
#[derive(Debug, Clone)]
pub struct TokenPayload {
    pub access_token: String,
    /// `None` preserves any previously stored refresh token; providers that
    /// rotate refresh tokens pass `Some`.
    pub refresh_token: Option<String>,
    pub token_type: String,
    pub expires_at: DateTime<Utc>,
    pub scope: Option<String>,
}

/// Repository for OAuth credential database operations
#[derive(Debug, Clone)]
pub struct TokenRepository {
    db: DatabaseConnection,
    crypto_key: CryptoKey,
}

impl TokenRepository {
    /// Creates a new TokenRepository instance
    pub fn new(db: DatabaseConnection, crypto_key: CryptoKey) -> Self {
        Self { db, crypto_key }
    }

    /// Finds the credential for a (user, provider) pair
    pub async fn find(
        &self,
        user_id: &Uuid,
        provider: Provider,
    ) -> Result<Option<oauth_token::Model>> {
        Ok(OAuthToken::find()
            .filter(oauth_token::Column::UserId.eq(*user_id))
            .filter(oauth_token::Column::Provider.eq(provider.as_str()))
            .one(&self.db)
            .await?)
    }

    /// Decrypts token material from a credential model
    pub fn decrypt(&self, token: &oauth_token::Model) -> Result<DecryptedTokens> {
        let access_token = decrypt_token(
            &self.crypto_key,
            &token.user_id,
            &token.provider,
            &token.access_token_ciphertext,
        )
        .map_err(|e| {
            tracing::error!(
                user_id = %token.user_id,
                provider = %token.provider,
                "Access token decryption failed"
            );
            anyhow!("Token decryption failed: {}", e)
        })?;

        let refresh_token = token
            .refresh_token_ciphertext
            .as_ref()
            .map(|ciphertext| {
                decrypt_token(&self.crypto_key, &token.user_id, &token.provider, ciphertext)
            })
            .transpose()
            .map_err(|e| {
                tracing::error!(
                    user_id = %token.user_id,
                    provider = %token.provider,
                    "Refresh token decryption failed"
                );
                anyhow!("Token decryption failed: {}", e)
            })?;

        Ok(DecryptedTokens {
            access_token,
            refresh_token,
        })
    }

    /// Creates or updates the credential for a (user, provider) pair.
    ///
    /// The expiry is UTC-normalized by construction (`DateTime<Utc>` in the
    /// payload). An existing refresh token survives the update unless the
    /// payload carries a replacement.
    pub async fn upsert(
        &self,
        user_id: &Uuid,
        provider: Provider,
        payload: &TokenPayload,
    ) -> Result<oauth_token::Model> {
        let access_ciphertext = encrypt_token(
            &self.crypto_key,
            user_id,
            provider.as_str(),
            &payload.access_token,
        )
        .map_err(|e| anyhow!("Token encryption failed: {}", e))?;

        let refresh_ciphertext = payload
            .refresh_token
            .as_deref()
            .map(|token| encrypt_token(&self.crypto_key, user_id, provider.as_str(), token))
            .transpose()
            .map_err(|e| anyhow!("Token encryption failed: {}", e))?;

        let now = Utc::now();

        match self.find(user_id, provider).await? {
            Some(existing) => {
                let mut active: oauth_token::ActiveModel = existing.into();
                active.access_token_ciphertext = Set(access_ciphertext);
                if let Some(ciphertext) = refresh_ciphertext {
                    active.refresh_token_ciphertext = Set(Some(ciphertext));
                }
                active.token_type = Set(payload.token_type.clone());
                active.expires_at = Set(payload.expires_at.into());
                if payload.scope.is_some() {
                    active.scope = Set(payload.scope.clone());
                }
                active.updated_at = Set(now.into());

                Ok(active.update(&self.db).await?)
            }
            None => {
                let active = oauth_token::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    user_id: Set(*user_id),
                    provider: Set(provider.as_str().to_string()),
                    access_token_ciphertext: Set(access_ciphertext),
                    refresh_token_ciphertext: Set(refresh_ciphertext),
                    token_type: Set(payload.token_type.clone()),
                    expires_at: Set(payload.expires_at.into()),
                    scope: Set(payload.scope.clone()),
                    created_at: Set(now.into()),
                    updated_at: Set(now.into()),
                };

                Ok(active.insert(&self.db).await?)
            }
        }
    }

    /// Deletes the credential for a (user, provider) pair.
    ///
    /// Returns the number of rows removed; deleting a missing credential is
    /// not an error.
    pub async fn delete(&self, user_id: &Uuid, provider: Provider) -> Result<u64> {
        let result = OAuthToken::delete_many()
            .filter(oauth_token::Column::UserId.eq(*user_id))
            .filter(oauth_token::Column::Provider.eq(provider.as_str()))
            .exec(&self.db)
            .await?;

        Ok(result.rows_affected)
    }
}
