//! # Data Models
//!
//! This module contains all the data models used throughout the Finbox API.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod connection;
pub mod email;
pub mod oauth_state;
pub mod oauth_token;

pub use connection::Entity as Connection;
pub use email::Entity as Email;
pub use oauth_state::Entity as OAuthState;
pub use oauth_token::Entity as OAuthToken;

/// Supported OAuth providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Gmail,
    Slack,
}

impl Provider {
    /// Canonical slug stored in provider columns.
    pub const fn as_str(self) -> &'static str {
        match self {
            Provider::Gmail => "gmail",
            Provider::Slack => "slack",
        }
    }

    /// Parse a provider slug.
    pub fn from_slug(slug: &str) -> Option<Self> {
        match slug {
            "gmail" => Some(Provider::Gmail),
            "slack" => Some(Provider::Slack),
            _ => None,
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "finbox".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
