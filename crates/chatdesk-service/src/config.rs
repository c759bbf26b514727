//! Chatdesk configuration.
//!
//! Configuration is loaded from environment variables. All sensitive fields
//! are redacted in Debug output. The server and the maintenance tool share
//! the storage, content and seed blocks; only the server needs the signing
//! secret.

use common::config::{self, ConfigError, DatabaseConfig};
use common::secret::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;

/// Default HTTP bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8090";

/// Default environment name.
pub const DEFAULT_ENVIRONMENT: &str = "development";

/// Default bearer token lifetime (24 hours).
pub const DEFAULT_TOKEN_TTL_SECONDS: i64 = 86_400;

/// Longest bearer token lifetime accepted (30 days).
pub const MAX_TOKEN_TTL_SECONDS: i64 = 2_592_000;

/// Minimum signing secret length in bytes (HS256).
pub const MIN_SIGNING_SECRET_BYTES: usize = 32;

/// Default maximum upload size (20 MiB).
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

/// Default log verbosity when `RUST_LOG` is unset.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default presence OFFLINE grace window.
pub const DEFAULT_PRESENCE_GRACE_MS: u64 = 5_000;

/// Longest accepted presence grace window (5 minutes).
pub const MAX_PRESENCE_GRACE_MS: u64 = 300_000;

/// Default per-session outbound queue depth.
pub const DEFAULT_SESSION_BUFFER: usize = 64;

/// Default batch size for repair and backfill jobs.
pub const DEFAULT_REPAIR_BATCH_SIZE: u32 = 500;

/// Largest accepted repair batch.
pub const MAX_REPAIR_BATCH_SIZE: u32 = 10_000;

/// Default bootstrap tenant.
pub const DEFAULT_SEED_TENANT_NAME: &str = "Empresa Padrão";

/// Default bootstrap administrator username.
pub const DEFAULT_SEED_ADMIN_USERNAME: &str = "admin";

/// Default bcrypt cost for stored credentials.
pub const DEFAULT_BCRYPT_COST: u32 = 12;

/// Accepted bcrypt cost range.
pub const MIN_BCRYPT_COST: u32 = 10;
pub const MAX_BCRYPT_COST: u32 = 14;

/// Message content settings shared by the write path and repair jobs.
#[derive(Debug, Clone)]
pub struct ContentConfig {
    /// Extra blocked placeholder words, appended to the built-in list.
    pub blocked_placeholders: Vec<String>,

    /// Rows per batch for repair and backfill jobs.
    pub repair_batch_size: u32,
}

impl ContentConfig {
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let repair_batch_size = config::parse_or(
            vars,
            "CHATDESK_REPAIR_BATCH_SIZE",
            DEFAULT_REPAIR_BATCH_SIZE,
        )?;
        if repair_batch_size == 0 || repair_batch_size > MAX_REPAIR_BATCH_SIZE {
            return Err(ConfigError::invalid(
                "CHATDESK_REPAIR_BATCH_SIZE",
                format!("must be between 1 and {MAX_REPAIR_BATCH_SIZE}, got {repair_batch_size}"),
            ));
        }

        Ok(Self {
            blocked_placeholders: config::list(vars, "CHATDESK_BLOCKED_PLACEHOLDERS"),
            repair_batch_size,
        })
    }
}

/// Bootstrap tenant and administrator.
#[derive(Clone)]
pub struct SeedConfig {
    pub tenant_name: String,
    pub admin_username: String,
    /// When absent, bootstrap generates a random credential.
    pub admin_password: Option<SecretString>,
    pub bcrypt_cost: u32,
}

impl fmt::Debug for SeedConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SeedConfig")
            .field("tenant_name", &self.tenant_name)
            .field("admin_username", &self.admin_username)
            .field(
                "admin_password",
                &self.admin_password.as_ref().map(|_| "[REDACTED]"),
            )
            .field("bcrypt_cost", &self.bcrypt_cost)
            .finish()
    }
}

impl SeedConfig {
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let tenant_name = vars
            .get("CHATDESK_SEED_TENANT_NAME")
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| DEFAULT_SEED_TENANT_NAME.to_string());

        let admin_username = vars
            .get("CHATDESK_SEED_ADMIN_USERNAME")
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| DEFAULT_SEED_ADMIN_USERNAME.to_string());

        let admin_password = vars
            .get("CHATDESK_SEED_ADMIN_PASSWORD")
            .filter(|password| !password.is_empty())
            .map(|password| SecretString::from(password.clone()));

        let bcrypt_cost = config::parse_or(vars, "CHATDESK_BCRYPT_COST", DEFAULT_BCRYPT_COST)?;
        if !(MIN_BCRYPT_COST..=MAX_BCRYPT_COST).contains(&bcrypt_cost) {
            return Err(ConfigError::invalid(
                "CHATDESK_BCRYPT_COST",
                format!("must be between {MIN_BCRYPT_COST} and {MAX_BCRYPT_COST}, got {bcrypt_cost}"),
            ));
        }

        Ok(Self {
            tenant_name,
            admin_username,
            admin_password,
            bcrypt_cost,
        })
    }
}

/// Server configuration.
#[derive(Clone)]
pub struct Config {
    pub database: DatabaseConfig,

    /// Server bind address (default: "0.0.0.0:8090").
    pub bind_address: String,

    /// Deployment environment name.
    pub environment: String,

    /// Origins allowed to call the API cross-origin. Empty disables CORS.
    pub cors_allowed_origins: Vec<String>,

    /// Cache connection string. Accepted for deployment parity; the core keeps
    /// presence in process memory.
    pub redis_url: Option<SecretString>,

    /// HS256 signing secret for bearer tokens.
    pub signing_secret: SecretString,

    pub token_ttl_seconds: i64,

    /// Request body limit.
    pub max_upload_bytes: usize,

    /// Fallback log filter level when `RUST_LOG` is unset.
    pub log_level: String,

    pub presence_grace: Duration,

    /// Per-session outbound queue depth.
    pub session_buffer: usize,

    pub content: ContentConfig,

    pub seed: SeedConfig,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database", &self.database)
            .field("bind_address", &self.bind_address)
            .field("environment", &self.environment)
            .field("cors_allowed_origins", &self.cors_allowed_origins)
            .field("redis_url", &self.redis_url.as_ref().map(|_| "[REDACTED]"))
            .field("signing_secret", &"[REDACTED]")
            .field("token_ttl_seconds", &self.token_ttl_seconds)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .field("log_level", &self.log_level)
            .field("presence_grace", &self.presence_grace)
            .field("session_buffer", &self.session_buffer)
            .field("content", &self.content)
            .field("seed", &self.seed)
            .finish()
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let database = DatabaseConfig::from_vars(vars)?;

        let signing_secret = config::required(vars, "CHATDESK_SIGNING_SECRET")?;
        if signing_secret.len() < MIN_SIGNING_SECRET_BYTES {
            return Err(ConfigError::invalid(
                "CHATDESK_SIGNING_SECRET",
                format!("must be at least {MIN_SIGNING_SECRET_BYTES} bytes"),
            ));
        }

        let token_ttl_seconds = config::parse_or(
            vars,
            "CHATDESK_TOKEN_TTL_SECONDS",
            DEFAULT_TOKEN_TTL_SECONDS,
        )?;
        if token_ttl_seconds <= 0 || token_ttl_seconds > MAX_TOKEN_TTL_SECONDS {
            return Err(ConfigError::invalid(
                "CHATDESK_TOKEN_TTL_SECONDS",
                format!("must be between 1 and {MAX_TOKEN_TTL_SECONDS}, got {token_ttl_seconds}"),
            ));
        }

        let bind_address = vars
            .get("BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let environment = vars
            .get("CHATDESK_ENVIRONMENT")
            .cloned()
            .unwrap_or_else(|| DEFAULT_ENVIRONMENT.to_string());

        let redis_url = vars
            .get("REDIS_URL")
            .filter(|url| !url.trim().is_empty())
            .map(|url| SecretString::from(url.clone()));

        let max_upload_bytes = config::parse_or(
            vars,
            "CHATDESK_MAX_UPLOAD_BYTES",
            DEFAULT_MAX_UPLOAD_BYTES,
        )?;
        if max_upload_bytes == 0 {
            return Err(ConfigError::invalid(
                "CHATDESK_MAX_UPLOAD_BYTES",
                "must be greater than 0",
            ));
        }

        let log_level = vars
            .get("CHATDESK_LOG_LEVEL")
            .cloned()
            .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());

        let grace_ms = config::parse_or(
            vars,
            "CHATDESK_PRESENCE_GRACE_MS",
            DEFAULT_PRESENCE_GRACE_MS,
        )?;
        if grace_ms > MAX_PRESENCE_GRACE_MS {
            return Err(ConfigError::invalid(
                "CHATDESK_PRESENCE_GRACE_MS",
                format!("must not exceed {MAX_PRESENCE_GRACE_MS}, got {grace_ms}"),
            ));
        }

        let session_buffer =
            config::parse_or(vars, "CHATDESK_SESSION_BUFFER", DEFAULT_SESSION_BUFFER)?;
        if session_buffer == 0 {
            return Err(ConfigError::invalid(
                "CHATDESK_SESSION_BUFFER",
                "must be greater than 0",
            ));
        }

        Ok(Config {
            database,
            bind_address,
            environment,
            cors_allowed_origins: config::list(vars, "CHATDESK_CORS_ORIGINS"),
            redis_url,
            signing_secret: SecretString::from(signing_secret),
            token_ttl_seconds,
            max_upload_bytes,
            log_level,
            presence_grace: Duration::from_millis(grace_ms),
            session_buffer,
            content: ContentConfig::from_vars(vars)?,
            seed: SeedConfig::from_vars(vars)?,
        })
    }

    /// Signing secret bytes for the token issuer.
    pub fn signing_key(&self) -> &[u8] {
        self.signing_secret.expose_secret().as_bytes()
    }
}

/// Maintenance tool configuration. Needs storage access only.
#[derive(Debug, Clone)]
pub struct MaintenanceConfig {
    pub database: DatabaseConfig,
    pub log_level: String,
    pub content: ContentConfig,
    pub seed: SeedConfig,
}

impl MaintenanceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        Ok(Self {
            database: DatabaseConfig::from_vars(vars)?,
            log_level: vars
                .get("CHATDESK_LOG_LEVEL")
                .cloned()
                .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
            content: ContentConfig::from_vars(vars)?,
            seed: SeedConfig::from_vars(vars)?,
        })
    }
}
