//! Application configuration module
//!
//! Handles loading and validating configuration from environment variables.

use serde::Deserialize;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: Ipv4Addr,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: Ipv4Addr::new(0, 0, 0, 0), // Bind to 0.0.0.0 for Docker
            port: 3000,
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub max_pool_size: usize,
    pub require_tls: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: String::new(),
            database: "postgres".to_string(),
            max_pool_size: 10,
            require_tls: false,
        }
    }
}

/// CORS configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["http://localhost:3001".to_string()],
        }
    }
}

/// Which store implementation backs the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(StoreBackend::Postgres),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(ConfigError::InvalidValue(format!(
                "STORE_BACKEND must be 'postgres' or 'memory', got '{}'",
                other
            ))),
        }
    }
}

/// Storage locations and backend selection
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StoreBackend,
    /// Pre-import table snapshots
    pub backup_dir: PathBuf,
    /// Export copies and fix artifacts
    pub audit_dir: PathBuf,
    /// Flat CSV snapshots scanned by `GET /orphans?source=snapshot`
    pub snapshot_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Postgres,
            backup_dir: PathBuf::from("backups"),
            audit_dir: PathBuf::from("audit"),
            snapshot_dir: PathBuf::from("snapshots"),
        }
    }
}

/// Governance log ingestion
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub log_dir: PathBuf,
    /// Seconds between background runs; 0 disables the background task
    pub interval_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("logs/governance"),
            interval_secs: 30,
        }
    }
}

/// Import/export limits
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Most recent governance log rows included in exports
    pub export_log_limit: usize,
    /// Whether `override=true` may bypass a bundle hash mismatch
    pub allow_hash_override: bool,
    pub max_upload_bytes: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            export_log_limit: 1000,
            allow_hash_override: true,
            max_upload_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Complete application settings
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub cors: CorsConfig,
    pub storage: StorageConfig,
    pub sync: SyncConfig,
    pub transfer: TransferConfig,
}

fn env_parsed<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

fn env_path(name: &str) -> Option<PathBuf> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
}

fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name)
        .ok()
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

impl Settings {
    /// Load settings from environment variables
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if it exists (ignore errors if file not found)
        let _ = dotenvy::dotenv();

        let server = ServerConfig {
            host: env_parsed("HOST").unwrap_or_else(|| ServerConfig::default().host),
            port: env_parsed("PORT").unwrap_or_else(|| ServerConfig::default().port),
        };

        // Try to load DATABASE_URL first (modern format), fall back to individual vars
        let database = if let Ok(database_url) = std::env::var("DATABASE_URL") {
            Self::parse_database_url(&database_url)?
        } else {
            let defaults = DatabaseConfig::default();
            DatabaseConfig {
                host: std::env::var("DB_HOST").unwrap_or(defaults.host),
                port: env_parsed("DB_PORT").unwrap_or(defaults.port),
                user: std::env::var("DB_USER").unwrap_or(defaults.user),
                password: std::env::var("DB_PASSWORD").unwrap_or_default(),
                database: std::env::var("DB_NAME").unwrap_or(defaults.database),
                max_pool_size: env_parsed("DB_MAX_CONNECTIONS").unwrap_or(defaults.max_pool_size),
                require_tls: env_flag("DB_REQUIRE_TLS").unwrap_or(false),
            }
        };

        let cors = CorsConfig {
            allowed_origins: std::env::var("ALLOWED_ORIGINS")
                .ok()
                .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or_else(|| CorsConfig::default().allowed_origins),
        };

        let storage_defaults = StorageConfig::default();
        let storage = StorageConfig {
            backend: match std::env::var("STORE_BACKEND") {
                Ok(value) => value.parse()?,
                Err(_) => storage_defaults.backend,
            },
            backup_dir: env_path("BACKUP_DIR").unwrap_or(storage_defaults.backup_dir),
            audit_dir: env_path("AUDIT_DIR").unwrap_or(storage_defaults.audit_dir),
            snapshot_dir: env_path("SNAPSHOT_DIR").unwrap_or(storage_defaults.snapshot_dir),
        };

        let sync_defaults = SyncConfig::default();
        let sync = SyncConfig {
            log_dir: env_path("GOVERNANCE_LOG_DIR").unwrap_or(sync_defaults.log_dir),
            interval_secs: env_parsed("SYNC_INTERVAL_SECS").unwrap_or(sync_defaults.interval_secs),
        };

        let transfer_defaults = TransferConfig::default();
        let transfer = TransferConfig {
            export_log_limit: env_parsed("EXPORT_LOG_LIMIT").unwrap_or(transfer_defaults.export_log_limit),
            allow_hash_override: env_flag("ALLOW_HASH_OVERRIDE")
                .unwrap_or(transfer_defaults.allow_hash_override),
            max_upload_bytes: env_parsed("MAX_UPLOAD_BYTES").unwrap_or(transfer_defaults.max_upload_bytes),
        };

        Ok(Self {
            server,
            database,
            cors,
            storage,
            sync,
            transfer,
        })
    }

    /// Parse a DATABASE_URL connection string (postgresql://...)
    fn parse_database_url(url: &str) -> Result<DatabaseConfig, ConfigError> {
        let parsed = url::Url::parse(url).map_err(|_| {
            ConfigError::InvalidValue("Invalid DATABASE_URL format (expected postgresql://...)".to_string())
        })?;

        let host = parsed
            .host_str()
            .ok_or_else(|| ConfigError::InvalidValue("Missing host in DATABASE_URL".to_string()))?
            .to_string();

        let sslmode_require = parsed
            .query_pairs()
            .any(|(k, v)| k == "sslmode" && (v == "require" || v == "verify-full"));
        // Managed Postgres providers only accept TLS
        let require_tls = sslmode_require || host.contains("neon.tech");

        Ok(DatabaseConfig {
            port: parsed.port().unwrap_or(5432),
            user: parsed.username().to_string(),
            password: parsed.password().map(|p| p.to_string()).unwrap_or_default(),
            database: parsed.path().trim_start_matches('/').to_string(),
            max_pool_size: env_parsed("DB_MAX_CONNECTIONS").unwrap_or(10),
            require_tls,
            host,
        })
    }
}
