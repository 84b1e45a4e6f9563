//! Application configuration module
//! Handles environment variable loading, configuration validation, and application settings
//!
//! Everything is read once at startup into [`AppConfig`] and handed to
//! constructors; nothing below the binary reads the environment itself.

use std::env;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: Environment,
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub logging: LoggingConfig,
    pub gateway: GatewayConfig,
    pub credits: CreditsConfig,
}

/// Deployment environment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl Environment {
    pub fn from_env() -> Self {
        match env::var("ENVIRONMENT")
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
            .as_str()
        {
            "production" | "prod" => Environment::Production,
            "staging" => Environment::Staging,
            _ => Environment::Development,
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: u64,   // seconds
    pub idle_timeout: Option<u64>, // seconds
    pub run_migrations: bool,
}

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// `None` keeps rate and pending-payment storage in process
    pub redis_url: Option<String>,
    pub max_connections: u32,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Plain,
}

/// Card payment gateway settings
#[derive(Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    pub status_url: String,
    pub client_id: String,
    pub username: String,
    pub password: String,
    pub test_mode: bool,
    pub language: String,
    pub timeout_secs: u64,
}

/// Credit and payment-flow settings
#[derive(Clone)]
pub struct CreditsConfig {
    /// Currency the ledger is kept in
    pub base_currency: String,
    /// Public URL of this backend, used to build the gateway callback URL
    pub backend_base_url: String,
    pub callback_path: String,
    pub payment_description: String,
    /// HMAC key for correlation tokens
    pub correlation_secret: String,
    pub legacy_webhook_enabled: bool,
    pub pending_sweep_enabled: bool,
    pub pending_ttl_secs: u64,
    pub pending_sweep_interval_secs: u64,
    pub rate_cache_ttl_secs: u64,
    pub rate_provider_timeout_secs: u64,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenv::dotenv().ok();

        Ok(AppConfig {
            environment: Environment::from_env(),
            server: ServerConfig::from_env()?,
            database: DatabaseConfig::from_env()?,
            cache: CacheConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
            gateway: GatewayConfig::from_env()?,
            credits: CreditsConfig::from_env()?,
        })
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.database.validate()?;
        self.cache.validate()?;
        self.logging.validate()?;
        self.gateway.validate()?;
        self.credits.validate()?;

        if self.environment.is_production() && self.gateway.test_mode {
            tracing::warn!("Payment gateway is in test mode in a production environment");
        }

        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: &str) -> Result<T, ConfigError> {
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue(name.to_string()))
}

fn bool_var(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(value) => matches!(
            value.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => default,
    }
}

fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ServerConfig {
            host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: parse_var("SERVER_PORT", "8000")?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue(
                "SERVER_PORT cannot be 0".to_string(),
            ));
        }

        if self.host.is_empty() {
            return Err(ConfigError::InvalidValue(
                "SERVER_HOST cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(DatabaseConfig {
            url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::MissingVariable("DATABASE_URL".to_string()))?,
            max_connections: parse_var("DB_MAX_CONNECTIONS", "20")?,
            min_connections: parse_var("DB_MIN_CONNECTIONS", "5")?,
            connection_timeout: parse_var("DB_CONNECTION_TIMEOUT", "30")?,
            idle_timeout: env::var("DB_IDLE_TIMEOUT")
                .ok()
                .and_then(|val| val.parse().ok()),
            run_migrations: bool_var("DB_RUN_MIGRATIONS", true),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::InvalidValue("DATABASE_URL".to_string()));
        }

        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()));
        }

        if self.min_connections > self.max_connections {
            return Err(ConfigError::InvalidValue(
                "DB_MIN_CONNECTIONS must be <= DB_MAX_CONNECTIONS".to_string(),
            ));
        }

        Ok(())
    }
}

impl CacheConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(CacheConfig {
            redis_url: env::var("REDIS_URL")
                .ok()
                .map(|url| url.trim().to_string())
                .filter(|url| !url.is_empty()),
            max_connections: parse_var("CACHE_MAX_CONNECTIONS", "10")?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(url) = &self.redis_url {
            if !url.starts_with("redis://") && !url.starts_with("rediss://") {
                return Err(ConfigError::InvalidValue(
                    "REDIS_URL must start with redis:// or rediss://".to_string(),
                ));
            }
        }

        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue(
                "CACHE_MAX_CONNECTIONS".to_string(),
            ));
        }

        Ok(())
    }
}

impl LoggingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "plain".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Plain,
            },
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];
        if !valid_levels.contains(&self.level.to_uppercase().as_str()) {
            return Err(ConfigError::InvalidValue("LOG_LEVEL".to_string()));
        }

        Ok(())
    }
}

impl GatewayConfig {
    /// Missing credentials are allowed here; the gateway client reports
    /// itself unconfigured and payment initiation fails with a configuration error.
    pub fn from_env() -> Result<Self, ConfigError> {
        let base_url = env::var("PAYMENT_GATEWAY_BASE_URL")
            .unwrap_or_default()
            .trim_end_matches('/')
            .to_string();
        let status_url = env::var("PAYMENT_GATEWAY_STATUS_URL").unwrap_or_else(|_| {
            if base_url.is_empty() {
                String::new()
            } else {
                format!("{}/api/VPOS/GetPaymentStatus", base_url)
            }
        });

        Ok(GatewayConfig {
            base_url,
            status_url,
            client_id: env::var("PAYMENT_GATEWAY_CLIENT_ID").unwrap_or_default(),
            username: env::var("PAYMENT_GATEWAY_USERNAME").unwrap_or_default(),
            password: env::var("PAYMENT_GATEWAY_PASSWORD").unwrap_or_default(),
            test_mode: bool_var("PAYMENT_GATEWAY_TEST_MODE", true),
            language: env::var("PAYMENT_GATEWAY_LANGUAGE").unwrap_or_else(|_| "en".to_string()),
            timeout_secs: parse_var("PAYMENT_GATEWAY_TIMEOUT_SECS", "30")?,
        })
    }

    pub fn is_configured(&self) -> bool {
        !self.base_url.is_empty()
            && !self.status_url.is_empty()
            && !self.client_id.is_empty()
            && !self.username.is_empty()
            && !self.password.is_empty()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.base_url.is_empty() && !is_http_url(&self.base_url) {
            return Err(ConfigError::InvalidValue(
                "PAYMENT_GATEWAY_BASE_URL must be a valid URL".to_string(),
            ));
        }

        if !self.status_url.is_empty() && !is_http_url(&self.status_url) {
            return Err(ConfigError::InvalidValue(
                "PAYMENT_GATEWAY_STATUS_URL must be a valid URL".to_string(),
            ));
        }

        if self.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "PAYMENT_GATEWAY_TIMEOUT_SECS".to_string(),
            ));
        }

        Ok(())
    }
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("base_url", &self.base_url)
            .field("status_url", &self.status_url)
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field("password", &"***")
            .field("test_mode", &self.test_mode)
            .field("language", &self.language)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl CreditsConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(CreditsConfig {
            base_currency: env::var("BASE_CURRENCY")
                .unwrap_or_else(|_| "USD".to_string())
                .trim()
                .to_uppercase(),
            backend_base_url: env::var("BACKEND_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8000".to_string())
                .trim_end_matches('/')
                .to_string(),
            callback_path: env::var("PAYMENT_CALLBACK_PATH")
                .unwrap_or_else(|_| "/api/payments/callback".to_string()),
            payment_description: env::var("PAYMENT_DESCRIPTION")
                .unwrap_or_else(|_| "Credit refill".to_string()),
            correlation_secret: env::var("CORRELATION_SECRET")
                .map_err(|_| ConfigError::MissingVariable("CORRELATION_SECRET".to_string()))?,
            legacy_webhook_enabled: bool_var("LEGACY_WEBHOOK_ENABLED", false),
            pending_sweep_enabled: bool_var("PENDING_PAYMENT_SWEEP_ENABLED", false),
            pending_ttl_secs: parse_var("PENDING_PAYMENT_TTL_SECS", "604800")?,
            pending_sweep_interval_secs: parse_var("PENDING_PAYMENT_SWEEP_INTERVAL_SECS", "3600")?,
            rate_cache_ttl_secs: parse_var("RATE_CACHE_TTL_SECS", "3600")?,
            rate_provider_timeout_secs: parse_var("RATE_PROVIDER_TIMEOUT_SECS", "5")?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_currency.len() != 3
            || !self.base_currency.chars().all(|c| c.is_ascii_alphabetic())
        {
            return Err(ConfigError::InvalidValue(
                "BASE_CURRENCY must be a 3-letter ISO code".to_string(),
            ));
        }

        if !is_http_url(&self.backend_base_url) {
            return Err(ConfigError::InvalidValue(
                "BACKEND_BASE_URL must be a valid URL".to_string(),
            ));
        }

        if !self.callback_path.starts_with('/') {
            return Err(ConfigError::InvalidValue(
                "PAYMENT_CALLBACK_PATH must start with '/'".to_string(),
            ));
        }

        if self.correlation_secret.len() < 16 {
            return Err(ConfigError::ValidationFailed(
                "CORRELATION_SECRET must be at least 16 characters".to_string(),
            ));
        }

        if self.pending_ttl_secs == 0 || self.pending_sweep_interval_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "PENDING_PAYMENT_TTL_SECS and PENDING_PAYMENT_SWEEP_INTERVAL_SECS must be positive"
                    .to_string(),
            ));
        }

        if self.rate_cache_ttl_secs == 0 || self.rate_provider_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "RATE_CACHE_TTL_SECS and RATE_PROVIDER_TIMEOUT_SECS must be positive".to_string(),
            ));
        }

        Ok(())
    }

    /// Absolute URL the gateway redirects/posts to after payment
    pub fn callback_url(&self) -> String {
        format!("{}{}", self.backend_base_url, self.callback_path)
    }

    /// How long an unclaimed pending payment may live. `None` unless the
    /// sweeper is enabled, so disabling it never drops records.
    pub fn pending_retention(&self) -> Option<std::time::Duration> {
        self.pending_sweep_enabled
            .then(|| std::time::Duration::from_secs(self.pending_ttl_secs))
    }
}

impl std::fmt::Debug for CreditsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CreditsConfig")
            .field("base_currency", &self.base_currency)
            .field("backend_base_url", &self.backend_base_url)
            .field("callback_path", &self.callback_path)
            .field("correlation_secret", &"***")
            .field("legacy_webhook_enabled", &self.legacy_webhook_enabled)
            .field("pending_sweep_enabled", &self.pending_sweep_enabled)
            .field("pending_ttl_secs", &self.pending_ttl_secs)
            .finish()
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid value for configuration: {0}")]
    InvalidValue(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}
