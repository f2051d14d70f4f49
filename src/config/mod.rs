//! Configuration loading for the Finbox API.
//!
//! Loads layered `.env` files and environment variables prefixed with
//! `FINBOX_`, producing a typed [`AppConfig`].

use std::{collections::BTreeMap, env, net::SocketAddr, path::PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application configuration derived from `FINBOX_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AppConfig {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_api_bind_addr")]
    pub api_bind_addr: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_acquire_timeout_ms")]
    pub db_acquire_timeout_ms: u64,
    #[serde(default = "default_frontend_url")]
    pub frontend_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwt_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crypto_key: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub google_client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub google_client_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub google_redirect_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gmail_scopes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slack_client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slack_client_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slack_redirect_uri: Option<String>,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub token_refresh: TokenRefreshConfig,
    #[serde(default)]
    pub categorization: CategorizationConfig,
}

/// Background email polling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct PollingConfig {
    /// Poll tick interval in seconds (default: 60)
    #[serde(default = "default_polling_tick_seconds")]
    pub tick_seconds: u64,

    /// Maximum messages fetched per user per tick (default: 50)
    #[serde(default = "default_polling_batch_size")]
    pub batch_size: u32,

    /// Maximum number of users synced concurrently per tick (default: 4)
    #[serde(default = "default_polling_concurrency")]
    pub concurrency: u32,
}

/// Token refresh behavior shared by all credential brokers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct TokenRefreshConfig {
    /// Safety margin before expiry that triggers a proactive refresh
    /// (default: 300 seconds)
    #[serde(default = "default_token_refresh_margin_seconds")]
    pub margin_seconds: u64,

    /// Assumed token lifetime when the provider omits expires_in
    /// (default: 3600 seconds)
    #[serde(default = "default_token_default_lifetime_seconds")]
    pub default_lifetime_seconds: u64,
}

/// LLM categorization configuration.
///
/// Categorization is best-effort: a missing API key disables it without
/// affecting ingestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct CategorizationConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default = "default_categorization_api_base")]
    pub api_base: String,
    #[serde(default = "default_categorization_model")]
    pub model: String,
    #[serde(default = "default_categorization_temperature")]
    pub temperature: f64,
    #[serde(default = "default_categorization_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_categorization_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_categorization_prompt_version")]
    pub prompt_version: String,
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load environment file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
    #[error("invalid api bind address '{value}': {source}")]
    InvalidBindAddr {
        value: String,
        source: std::net::AddrParseError,
    },
    #[error("crypto key is invalid base64: {error}")]
    InvalidCryptoKeyBase64 { error: String },
    #[error("crypto key must decode to exactly 32 bytes, got {length} bytes")]
    InvalidCryptoKeyLength { length: usize },
    #[error("polling tick interval must be between 10 and 3600 seconds, got {value}")]
    InvalidPollingTickInterval { value: u64 },
    #[error("polling concurrency must be between 1 and 20, got {value}")]
    InvalidPollingConcurrency { value: u32 },
    #[error("token refresh margin must be between 30 and 3600 seconds, got {value}")]
    InvalidTokenRefreshMargin { value: u64 },
    #[error("token default lifetime must be at least 60 seconds, got {value}")]
    InvalidTokenDefaultLifetime { value: u64 },
    #[error("categorization timeout must be between 1 and 120 seconds, got {value}")]
    InvalidCategorizationTimeout { value: u64 },
}

impl AppConfig {
    /// Parse the configured bind address.
    pub fn bind_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        self.api_bind_addr.parse()
    }

    /// Returns a redacted JSON representation (secrets are redacted).
    pub fn redacted_json(&self) -> serde_json::Result<String> {
        let mut config = self.clone();
        if config.jwt_secret.is_some() {
            config.jwt_secret = Some("[REDACTED]".to_string());
        }
        if config.crypto_key.is_some() {
            config.crypto_key = Some(b"[REDACTED]".to_vec());
        }
        if config.google_client_secret.is_some() {
            config.google_client_secret = Some("[REDACTED]".to_string());
        }
        if config.slack_client_secret.is_some() {
            config.slack_client_secret = Some("[REDACTED]".to_string());
        }
        if config.categorization.api_key.is_some() {
            config.categorization.api_key = Some("[REDACTED]".to_string());
        }
        serde_json::to_string(&config)
    }

    /// Validate all configuration sections.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bind_addr().map_err(|source| ConfigError::InvalidBindAddr {
            value: self.api_bind_addr.clone(),
            source,
        })?;

        if let Some(key) = &self.crypto_key
            && key.len() != 32
        {
            return Err(ConfigError::InvalidCryptoKeyLength { length: key.len() });
        }

        self.polling.validate()?;
        self.token_refresh.validate()?;
        self.categorization.validate()?;

        Ok(())
    }
}

impl PollingConfig {
    /// Validate polling configuration bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_seconds < 10 || self.tick_seconds > 3600 {
            return Err(ConfigError::InvalidPollingTickInterval {
                value: self.tick_seconds,
            });
        }

        if self.concurrency == 0 || self.concurrency > 20 {
            return Err(ConfigError::InvalidPollingConcurrency {
                value: self.concurrency,
            });
        }

        Ok(())
    }
}

impl TokenRefreshConfig {
    /// Validate token refresh configuration bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.margin_seconds < 30 || self.margin_seconds > 3600 {
            return Err(ConfigError::InvalidTokenRefreshMargin {
                value: self.margin_seconds,
            });
        }

        if self.default_lifetime_seconds < 60 {
            return Err(ConfigError::InvalidTokenDefaultLifetime {
                value: self.default_lifetime_seconds,
            });
        }

        Ok(())
    }
}

impl CategorizationConfig {
    /// Validate categorization configuration bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_seconds == 0 || self.timeout_seconds > 120 {
            return Err(ConfigError::InvalidCategorizationTimeout {
                value: self.timeout_seconds,
            });
        }

        Ok(())
    }

    /// Whether a usable API key is configured.
    pub fn is_enabled(&self) -> bool {
        self.api_key.as_deref().is_some_and(|key| !key.is_empty())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            api_bind_addr: default_api_bind_addr(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            database_url: default_database_url(),
            db_max_connections: default_db_max_connections(),
            db_acquire_timeout_ms: default_db_acquire_timeout_ms(),
            frontend_url: default_frontend_url(),
            jwt_secret: None,
            crypto_key: None,
            google_client_id: None,
            google_client_secret: None,
            google_redirect_uri: None,
            gmail_scopes: None,
            slack_client_id: None,
            slack_client_secret: None,
            slack_redirect_uri: None,
            polling: PollingConfig::default(),
            token_refresh: TokenRefreshConfig::default(),
            categorization: CategorizationConfig::default(),
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            tick_seconds: default_polling_tick_seconds(),
            batch_size: default_polling_batch_size(),
            concurrency: default_polling_concurrency(),
        }
    }
}

impl Default for TokenRefreshConfig {
    fn default() -> Self {
        Self {
            margin_seconds: default_token_refresh_margin_seconds(),
            default_lifetime_seconds: default_token_default_lifetime_seconds(),
        }
    }
}

impl Default for CategorizationConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: default_categorization_api_base(),
            model: default_categorization_model(),
            temperature: default_categorization_temperature(),
            max_tokens: default_categorization_max_tokens(),
            timeout_seconds: default_categorization_timeout_seconds(),
            prompt_version: default_categorization_prompt_version(),
        }
    }
}

fn default_profile() -> String {
    "dev".to_string()
}

fn default_api_bind_addr() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_database_url() -> String {
    "postgres://localhost:5432/finbox".to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_acquire_timeout_ms() -> u64 {
    5_000
}

fn default_frontend_url() -> String {
    "http://localhost:5173".to_string()
}

fn default_polling_tick_seconds() -> u64 {
    60
}

fn default_polling_batch_size() -> u32 {
    50
}

fn default_polling_concurrency() -> u32 {
    4
}

fn default_token_refresh_margin_seconds() -> u64 {
    300
}

fn default_token_default_lifetime_seconds() -> u64 {
    3_600
}

fn default_categorization_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_categorization_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_categorization_temperature() -> f64 {
    0.1
}

fn default_categorization_max_tokens() -> u32 {
    200
}

fn default_categorization_timeout_seconds() -> u64 {
    10
}

fn default_categorization_prompt_version() -> String {
    "1.0".to_string()
}

/// Loader that merges layered `.env` files with process environment.
pub struct ConfigLoader {
    base_dir: PathBuf,
}

impl ConfigLoader {
    /// Creates a new loader rooted at the current working directory.
    pub fn new() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Creates a loader rooted at the provided directory (useful for tests).
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Loads and validates configuration.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let (mut layered, profile_hint) = self.collect_layered_env()?;

        // Overlay process environment last so it wins.
        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix("FINBOX_") {
                layered.insert(stripped.to_string(), value);
            }
        }

        let profile = layered
            .remove("PROFILE")
            .filter(|v| !v.is_empty())
            .unwrap_or(profile_hint);
        let api_bind_addr = layered
            .remove("API_BIND_ADDR")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_api_bind_addr);
        let log_level = layered
            .remove("LOG_LEVEL")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_log_level);
        let log_format = layered
            .remove("LOG_FORMAT")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_log_format);
        let database_url = layered
            .remove("DATABASE_URL")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_database_url);
        let db_max_connections = layered
            .remove("DB_MAX_CONNECTIONS")
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(default_db_max_connections);
        let db_acquire_timeout_ms = layered
            .remove("DB_ACQUIRE_TIMEOUT_MS")
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(default_db_acquire_timeout_ms);
        let frontend_url = layered
            .remove("FRONTEND_URL")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_frontend_url);
        let jwt_secret = layered.remove("JWT_SECRET").filter(|v| !v.is_empty());

        let crypto_key = if let Some(key_str) = layered.remove("CRYPTO_KEY") {
            use base64::{Engine as _, engine::general_purpose};
            let decoded = general_purpose::STANDARD.decode(&key_str).map_err(|e| {
                ConfigError::InvalidCryptoKeyBase64 {
                    error: e.to_string(),
                }
            })?;
            if decoded.len() != 32 {
                return Err(ConfigError::InvalidCryptoKeyLength {
                    length: decoded.len(),
                });
            }
            Some(decoded)
        } else {
            None
        };

        let google_client_id = remove_trimmed(&mut layered, "GOOGLE_CLIENT_ID");
        let google_client_secret = remove_trimmed(&mut layered, "GOOGLE_CLIENT_SECRET");
        let google_redirect_uri = remove_trimmed(&mut layered, "GOOGLE_REDIRECT_URI");
        let gmail_scopes = remove_trimmed(&mut layered, "GMAIL_SCOPES");
        let slack_client_id = remove_trimmed(&mut layered, "SLACK_CLIENT_ID");
        let slack_client_secret = remove_trimmed(&mut layered, "SLACK_CLIENT_SECRET");
        let slack_redirect_uri = remove_trimmed(&mut layered, "SLACK_REDIRECT_URI");

        let polling = PollingConfig {
            tick_seconds: layered
                .remove("POLLING_TICK_SECONDS")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_polling_tick_seconds),
            batch_size: layered
                .remove("POLLING_BATCH_SIZE")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_polling_batch_size),
            concurrency: layered
                .remove("POLLING_CONCURRENCY")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_polling_concurrency),
        };

        let token_refresh = TokenRefreshConfig {
            margin_seconds: layered
                .remove("TOKEN_REFRESH_MARGIN_SECONDS")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_token_refresh_margin_seconds),
            default_lifetime_seconds: layered
                .remove("TOKEN_DEFAULT_LIFETIME_SECONDS")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_token_default_lifetime_seconds),
        };

        let categorization = CategorizationConfig {
            api_key: remove_trimmed(&mut layered, "OPENAI_API_KEY"),
            api_base: layered
                .remove("CATEGORIZATION_API_BASE")
                .filter(|v| !v.is_empty())
                .unwrap_or_else(default_categorization_api_base),
            model: layered
                .remove("CATEGORIZATION_MODEL")
                .filter(|v| !v.is_empty())
                .unwrap_or_else(default_categorization_model),
            temperature: layered
                .remove("CATEGORIZATION_TEMPERATURE")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_categorization_temperature),
            max_tokens: layered
                .remove("CATEGORIZATION_MAX_TOKENS")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_categorization_max_tokens),
            timeout_seconds: layered
                .remove("CATEGORIZATION_TIMEOUT_SECONDS")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_categorization_timeout_seconds),
            prompt_version: layered
                .remove("CATEGORIZATION_PROMPT_VERSION")
                .filter(|v| !v.is_empty())
                .unwrap_or_else(default_categorization_prompt_version),
        };

        let config = AppConfig {
            profile,
            api_bind_addr,
            log_level,
            log_format,
            database_url,
            db_max_connections,
            db_acquire_timeout_ms,
            frontend_url,
            jwt_secret,
            crypto_key,
            google_client_id,
            google_client_secret,
            google_redirect_uri,
            gmail_scopes,
            slack_client_id,
            slack_client_secret,
            slack_redirect_uri,
            polling,
            token_refresh,
            categorization,
        };

        config.validate()?;

        Ok(config)
    }

    fn collect_layered_env(&self) -> Result<(BTreeMap<String, String>, String), ConfigError> {
        let mut values = BTreeMap::new();

        self.merge_dotenv(self.base_dir.join(".env"), &mut values)?;
        self.merge_dotenv(self.base_dir.join(".env.local"), &mut values)?;

        let profile = env::var("FINBOX_PROFILE")
            .ok()
            .or_else(|| values.get("PROFILE").cloned())
            .unwrap_or_else(default_profile);

        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}", &profile)),
            &mut values,
        )?;
        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}.local", &profile)),
            &mut values,
        )?;

        Ok((values, profile))
    }

    fn merge_dotenv(
        &self,
        path: PathBuf,
        values: &mut BTreeMap<String, String>,
    ) -> Result<(), ConfigError> {
        match dotenvy::from_path_iter(&path) {
            Ok(iter) => {
                for item in iter {
                    let (key, value) = item.map_err(|source| ConfigError::EnvFile {
                        path: path.clone(),
                        source,
                    })?;
                    if let Some(stripped) = key.strip_prefix("FINBOX_") {
                        values.insert(stripped.to_string(), value);
                    }
                }
                Ok(())
            }
            Err(dotenvy::Error::Io(ref io_err))
                if io_err.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok(())
            }
            Err(err) => Err(ConfigError::EnvFile { path, source: err }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn remove_trimmed(layered: &mut BTreeMap<String, String>, key: &str) -> Option<String> {
    layered.remove(key).and_then(|val| {
        let trimmed = val.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.polling.tick_seconds, 60);
        assert_eq!(config.token_refresh.margin_seconds, 300);
    }

    #[test]
    fn polling_bounds_rejected() {
        let config = PollingConfig {
            tick_seconds: 5,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = PollingConfig {
            concurrency: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn refresh_margin_bounds_rejected() {
        let config = TokenRefreshConfig {
            margin_seconds: 10,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn categorization_disabled_without_key() {
        let config = CategorizationConfig::default();
        assert!(!config.is_enabled());

        let config = CategorizationConfig {
            api_key: Some("sk-test".to_string()),
            ..Default::default()
        };
        assert!(config.is_enabled());
    }

    #[test]
    fn redacted_json_hides_secrets() {
        let config = AppConfig {
            jwt_secret: Some("super-secret".to_string()),
            google_client_secret: Some("g-secret".to_string()),
            ..Default::default()
        };

        let json = config.redacted_json().expect("serializes");
        assert!(!json.contains("super-secret"));
        assert!(!json.contains("g-secret"));
        assert!(json.contains("[REDACTED]"));
    }

    #[test]
    fn loader_reads_layered_env_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(
            dir.path().join(".env"),
            "FINBOX_FRONTEND_URL=https://inbox.example.com\nFINBOX_POLLING_TICK_SECONDS=120\n",
        )
        .expect("write env");

        let loader = ConfigLoader::with_base_dir(dir.path().to_path_buf());
        let config = loader.load().expect("loads");

        assert_eq!(config.frontend_url, "https://inbox.example.com");
        assert_eq!(config.polling.tick_seconds, 120);
    }
}
