//! # Engine Configuration
//!
//! Configuration for the storage adapter and the sync cadence.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     TESSERA_STORAGE_BACKEND=sqlite                                     │
//! │     TESSERA_DB_PATH=./data/tessera.db                                  │
//! │     TESSERA_SYNC_PERIOD_MS=5000                                        │
//! │     TESSERA_NAMESPACE=alice                                            │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/tessera/sync.toml (Linux)                                │
//! │     ~/Library/Application Support/dev.tessera.tessera/sync.toml (macOS)│
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     memory backend, 30s period, "default" namespace                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # sync.toml
//! [storage]
//! backend = "sqlite"   # memory | sqlite
//! path = "./data/tessera.db"
//! max_connections = 5
//!
//! [sync]
//! period_ms = 30000
//! namespace = "default"
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tessera_core::DEFAULT_NAMESPACE;
use tessera_db::{ConfigPort, DbConfig, MemoryStorage, SqliteStorage, StoragePort};
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Storage Settings
// =============================================================================

/// Which adapter backs the local replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// Process memory; data is lost on exit.
    #[default]
    Memory,

    /// SQLite file via sqlx.
    Sqlite,
}

impl std::fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageBackend::Memory => write!(f, "memory"),
            StorageBackend::Sqlite => write!(f, "sqlite"),
        }
    }
}

impl std::str::FromStr for StorageBackend {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" | "mem" => Ok(StorageBackend::Memory),
            "sqlite" => Ok(StorageBackend::Sqlite),
            other => Err(SyncError::InvalidConfig(format!(
                "Unknown storage backend: '{}'. Valid options: memory, sqlite",
                other
            ))),
        }
    }
}

/// Local storage settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageSettings {
    #[serde(default)]
    pub backend: StorageBackend,

    /// Database file (sqlite backend only).
    #[serde(default)]
    pub path: Option<PathBuf>,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

impl Default for StorageSettings {
    fn default() -> Self {
        StorageSettings {
            backend: StorageBackend::default(),
            path: None,
            max_connections: default_max_connections(),
        }
    }
}

// =============================================================================
// Sync Settings
// =============================================================================

/// Sync cadence and partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Interval between periodic ticks (milliseconds).
    #[serde(default = "default_period_ms")]
    pub period_ms: u64,

    /// Namespace selected right after initialization.
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

fn default_period_ms() -> u64 {
    30_000
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            period_ms: default_period_ms(),
            namespace: default_namespace(),
        }
    }
}

impl SyncSettings {
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }
}

// =============================================================================
// Engine Configuration
// =============================================================================

/// Complete engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub storage: StorageSettings,

    #[serde(default)]
    pub sync: SyncSettings,
}

impl EngineConfig {
    /// Loads configuration from file and environment.
    ///
    /// ## Load Order
    /// 1. Start with defaults
    /// 2. Load from TOML file if it exists
    /// 3. Override with environment variables
    /// 4. Validate
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading engine config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load engine config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Engine config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if self.sync.period_ms == 0 {
            return Err(SyncError::InvalidConfig(
                "sync.period_ms must be greater than 0".into(),
            ));
        }

        if self.sync.namespace.trim().is_empty() {
            return Err(SyncError::InvalidConfig("sync.namespace must not be empty".into()));
        }

        if self.storage.backend == StorageBackend::Sqlite && self.storage.path.is_none() {
            return Err(SyncError::InvalidConfig(
                "storage.path is required for the sqlite backend".into(),
            ));
        }

        if self.storage.max_connections == 0 {
            return Err(SyncError::InvalidConfig(
                "storage.max_connections must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Applies overrides from a variable lookup (the process environment in
    /// [`EngineConfig::load`]).
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(backend) = lookup("TESSERA_STORAGE_BACKEND") {
            match backend.parse() {
                Ok(parsed) => {
                    debug!(backend = %backend, "Overriding storage backend from environment");
                    self.storage.backend = parsed;
                }
                Err(e) => warn!("Ignoring TESSERA_STORAGE_BACKEND: {}", e),
            }
        }

        if let Some(path) = lookup("TESSERA_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.storage.path = Some(PathBuf::from(path));
        }

        if let Some(period) = lookup("TESSERA_SYNC_PERIOD_MS") {
            if let Ok(ms) = period.parse::<u64>() {
                self.sync.period_ms = ms;
            }
        }

        if let Some(namespace) = lookup("TESSERA_NAMESPACE") {
            self.sync.namespace = namespace;
        }
    }

    /// Returns the default config file path.
    ///
    /// ## Platform Paths
    /// - Linux: `~/.config/tessera/sync.toml`
    /// - macOS: `~/Library/Application Support/dev.tessera.tessera/sync.toml`
    /// - Windows: `C:\Users\<User>\AppData\Roaming\tessera\tessera\config\sync.toml`
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("dev", "tessera", "tessera")
            .map(|dirs| dirs.config_dir().join("sync.toml"))
    }
}

// =============================================================================
// Storage Construction
// =============================================================================

/// Builds the configured storage adapter. It is not yet initialized.
pub async fn open_storage(settings: &StorageSettings) -> SyncResult<Arc<dyn StoragePort>> {
    match settings.backend {
        StorageBackend::Memory => {
            info!("Using in-memory storage");
            Ok(Arc::new(MemoryStorage::new()))
        }
        StorageBackend::Sqlite => {
            let path = settings.path.clone().ok_or_else(|| {
                SyncError::InvalidConfig("storage.path is required for the sqlite backend".into())
            })?;
            info!(?path, "Using SQLite storage");
            let config = DbConfig::new(path).max_connections(settings.max_connections);
            let storage = SqliteStorage::open(config).await?;
            Ok(Arc::new(storage))
        }
    }
}

/// Config port view of a storage adapter.
pub fn config_port_of(storage: &Arc<dyn StoragePort>) -> Arc<dyn ConfigPort> {
    Arc::clone(storage).config_port()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.sync.period(), Duration::from_secs(30));
        assert_eq!(config.sync.namespace, DEFAULT_NAMESPACE);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_backend_parsing() {
        assert_eq!("sqlite".parse::<StorageBackend>().unwrap(), StorageBackend::Sqlite);
        assert_eq!("MEMORY".parse::<StorageBackend>().unwrap(), StorageBackend::Memory);
        assert!("redis".parse::<StorageBackend>().is_err());
    }

    #[test]
    fn test_config_serialization() {
        let mut config = EngineConfig::default();
        config.storage.backend = StorageBackend::Sqlite;
        config.storage.path = Some(PathBuf::from("/tmp/tessera.db"));
        config.sync.period_ms = 5_000;

        let toml = toml::to_string_pretty(&config).unwrap();
        assert!(toml.contains("backend = \"sqlite\""));
        assert!(toml.contains("period_ms = 5000"));

        let parsed: EngineConfig = toml::from_str(&toml).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let parsed: EngineConfig = toml::from_str("[sync]\nnamespace = \"alice\"\n").unwrap();
        assert_eq!(parsed.sync.namespace, "alice");
        assert_eq!(parsed.sync.period_ms, 30_000);
        assert_eq!(parsed.storage.max_connections, 5);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = EngineConfig::default();
        config.sync.period_ms = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.sync.namespace = "  ".into();
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.storage.backend = StorageBackend::Sqlite;
        assert!(matches!(config.validate(), Err(SyncError::InvalidConfig(_))));
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("TESSERA_STORAGE_BACKEND", "sqlite"),
            ("TESSERA_DB_PATH", "/data/t.db"),
            ("TESSERA_SYNC_PERIOD_MS", "250"),
            ("TESSERA_NAMESPACE", "bob"),
        ]
        .into_iter()
        .collect();

        let mut config = EngineConfig::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.storage.backend, StorageBackend::Sqlite);
        assert_eq!(config.storage.path, Some(PathBuf::from("/data/t.db")));
        assert_eq!(config.sync.period_ms, 250);
        assert_eq!(config.sync.namespace, "bob");
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_open_memory_storage() {
        let storage = open_storage(&StorageSettings::default()).await.unwrap();
        storage.initialize().await.unwrap();
        assert_eq!(storage.namespace().await, DEFAULT_NAMESPACE);

        let config = config_port_of(&storage);
        config.set("k", true.into()).await.unwrap();
        assert!(storage.contains("k").await.unwrap());
    }
}
