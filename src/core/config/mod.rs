//! Layered application configuration.
//!
//! Sources, lowest precedence first:
//! 1. compiled defaults
//! 2. `supportdesk.toml` (or the file named by `SUPPORTDESK_CONFIG`)
//! 3. `SUPPORTDESK_*` environment variables, `__` separating nested keys
//!    (`SUPPORTDESK_SERVER__PORT=9000`)
//! 4. the conventional secret variables `DATABASE_URL`, `AUTH_JWT_SECRET`,
//!    `LLM_API_KEY` and `TRACE_API_KEY`

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_FILE: &str = "supportdesk.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] figment::Error),
    #[error("missing required setting `{0}`")]
    Missing(&'static str),
    #[error("invalid setting `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthSettings,
    pub llm: LlmConfig,
    pub observability: ObservabilityConfig,
    pub cache: CacheConfig,
    pub test_data: TestDataConfig,
    #[serde(default)]
    pub cors_allowed_origins: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 10,
        }
    }
}

/// Settings for validating tokens minted by the hosted auth provider.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthSettings {
    pub jwt_secret: String,
    pub audience: Option<String>,
    pub issuer: Option<String>,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            audience: Some("authenticated".to_string()),
            issuer: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.2,
            timeout_secs: 60,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub enabled: bool,
    pub endpoint: String,
    pub api_key: String,
    pub project: String,
    pub sample_rate: f64,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: "https://api.smith.langchain.com".to_string(),
            api_key: String::new(),
            project: "supportdesk".to_string(),
            sample_rate: 1.0,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
    pub ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_seconds: 30 }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TestDataConfig {
    pub default_expiry_hours: i64,
    pub max_batch_size: usize,
    /// Zero disables the in-process cleanup loop.
    pub cleanup_interval_secs: u64,
    pub cron_secret: Option<String>,
}

impl Default for TestDataConfig {
    fn default() -> Self {
        Self {
            default_expiry_hours: 24,
            max_batch_size: 500,
            cleanup_interval_secs: 0,
            cron_secret: None,
        }
    }
}

impl AppConfig {
    pub fn figment() -> Figment {
        let file = std::env::var("SUPPORTDESK_CONFIG")
            .unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());

        Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(file))
            .merge(Env::prefixed("SUPPORTDESK_").split("__"))
            .merge(
                Env::raw()
                    .only(&["DATABASE_URL"])
                    .map(|_| "database.url".into()),
            )
            .merge(
                Env::raw()
                    .only(&["AUTH_JWT_SECRET"])
                    .map(|_| "auth.jwt_secret".into()),
            )
            .merge(Env::raw().only(&["LLM_API_KEY"]).map(|_| "llm.api_key".into()))
            .merge(
                Env::raw()
                    .only(&["TRACE_API_KEY"])
                    .map(|_| "observability.api_key".into()),
            )
    }

    pub fn load() -> Result<Self, ConfigError> {
        let config: AppConfig = Self::figment().extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.url.trim().is_empty() {
            return Err(ConfigError::Missing("database.url"));
        }
        if self.auth.jwt_secret.trim().is_empty() {
            return Err(ConfigError::Missing("auth.jwt_secret"));
        }
        if !(0.0..=1.0).contains(&self.observability.sample_rate) {
            return Err(ConfigError::Invalid {
                key: "observability.sample_rate",
                reason: format!("{} is outside 0.0..=1.0", self.observability.sample_rate),
            });
        }
        if self.test_data.default_expiry_hours <= 0 {
            return Err(ConfigError::Invalid {
                key: "test_data.default_expiry_hours",
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}
