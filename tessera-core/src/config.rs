//! Configuration system for Tessera.
//!
//! Uses `figment` for layered configuration: defaults -> user config file ->
//! workspace config file -> environment -> explicit overrides. Configuration is
//! loaded from `~/.config/tessera/config.toml` and/or `.tessera/config.toml` in
//! the workspace directory.
//!
//! [`Settings`] is plain data. [`Configuration`] pairs the settings with the
//! storage backend they select and is what every create/load/split/validate
//! call receives by reference. There is no process-wide configuration.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::storage::{BlobStore, FileStore, InMemoryStore};

/// Top-level settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub validation: ValidationSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Which storage backend artifacts are persisted to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// Process-local map; nothing survives the process.
    Memory,
    /// One file per artifact under `storage.root`.
    #[default]
    File,
}

/// Storage configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageSettings {
    #[serde(default)]
    pub backend: StorageBackend,
    /// Root directory for the file backend. Defaults to the platform data dir.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
}

impl StorageSettings {
    /// Resolve the directory the file backend writes to.
    pub fn resolved_root(&self) -> PathBuf {
        self.root.clone().unwrap_or_else(default_storage_root)
    }
}

/// Cross-validation defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationSettings {
    /// Number of folds validated concurrently (1 = sequential).
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    /// Default number of folds.
    #[serde(default = "default_folds")]
    pub folds: usize,
    /// Seed for shuffling records before splitting. `None` keeps insertion order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shuffle_seed: Option<u64>,
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            folds: default_folds(),
            shuffle_seed: None,
        }
    }
}

fn default_parallelism() -> usize {
    1
}

fn default_folds() -> usize {
    5
}

/// Logging configuration consumed by the CLI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Default filter directive for stderr output.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Also write JSON logs to a daily rolling file.
    #[serde(default)]
    pub json_file: bool,
    /// Directory for JSON log files. Defaults to `<data dir>/logs`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_file: false,
            log_dir: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("dev", "tessera", "tessera")
}

/// Default storage root: the platform data directory, or `.tessera/store`.
pub fn default_storage_root() -> PathBuf {
    project_dirs()
        .map(|d| d.data_dir().join("store"))
        .unwrap_or_else(|| PathBuf::from(".tessera").join("store"))
}

/// Default directory for JSON log files.
pub fn default_log_dir() -> PathBuf {
    project_dirs()
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from(".tessera").join("logs"))
}

/// Load settings from all layers.
pub fn load_settings(
    workspace: Option<&Path>,
    overrides: Option<&Settings>,
) -> Result<Settings, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(Settings::default()));

    // User-level config
    if let Some(dirs) = project_dirs() {
        let user_config = dirs.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    // Workspace-level config
    if let Some(ws) = workspace {
        let ws_config = ws.join(".tessera").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // Environment variables (TESSERA_STORAGE__BACKEND, TESSERA_VALIDATION__PARALLELISM, ...)
    figment = figment.merge(Env::prefixed("TESSERA_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}

/// Read-only runtime configuration: settings plus the storage backend they select.
///
/// Clones share the same backend instance, so two handles created from clones
/// of one `Configuration` see each other's saved artifacts.
#[derive(Clone)]
pub struct Configuration {
    settings: Arc<Settings>,
    store: Arc<dyn BlobStore>,
}

impl Configuration {
    /// Build a configuration, constructing the backend named in `settings`.
    pub fn new(settings: Settings) -> Result<Self, ConfigError> {
        if settings.validation.parallelism == 0 {
            return Err(ConfigError::Invalid {
                message: "validation.parallelism must be at least 1".into(),
            });
        }
        if settings.validation.folds < 2 {
            return Err(ConfigError::Invalid {
                message: "validation.folds must be at least 2".into(),
            });
        }

        let store: Arc<dyn BlobStore> = match settings.storage.backend {
            StorageBackend::Memory => Arc::new(InMemoryStore::new()),
            StorageBackend::File => {
                let root = settings.storage.resolved_root();
                std::fs::create_dir_all(&root).map_err(|source| ConfigError::StorageRoot {
                    path: root.clone(),
                    source,
                })?;
                Arc::new(FileStore::new(root))
            }
        };
        tracing::debug!(backend = ?settings.storage.backend, "Configuration ready");

        Ok(Self {
            settings: Arc::new(settings),
            store,
        })
    }

    /// Pair settings with an existing backend instance.
    pub fn with_store(settings: Settings, store: Arc<dyn BlobStore>) -> Self {
        Self {
            settings: Arc::new(settings),
            store,
        }
    }

    /// Default settings over a fresh in-memory backend.
    pub fn in_memory() -> Self {
        let settings = Settings {
            storage: StorageSettings {
                backend: StorageBackend::Memory,
                root: None,
            },
            ..Settings::default()
        };
        Self::with_store(settings, Arc::new(InMemoryStore::new()))
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn store(&self) -> &dyn BlobStore {
        self.store.as_ref()
    }

    /// Whether two configurations reach the same backend instance.
    pub fn shares_store_with(&self, other: &Configuration) -> bool {
        Arc::ptr_eq(&self.store, &other.store)
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Configuration")
            .field("settings", &self.settings)
            .field("store", &self.store)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageKey;
    use figment::Jail;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.storage.backend, StorageBackend::File);
        assert_eq!(settings.validation.parallelism, 1);
        assert_eq!(settings.validation.folds, 5);
        assert!(settings.validation.shuffle_seed.is_none());
        assert_eq!(settings.logging.level, "info");
        assert!(!settings.logging.json_file);
    }

    #[test]
    fn test_settings_serde_roundtrip() {
        let mut settings = Settings::default();
        settings.validation.shuffle_seed = Some(42);
        settings.storage.root = Some(PathBuf::from("/tmp/tessera"));
        let json = serde_json::to_string(&settings).unwrap();
        let parsed: Settings = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, settings);
    }

    #[test]
    fn test_partial_settings_fill_defaults() {
        let parsed: Settings =
            serde_json::from_str(r#"{"validation": {"parallelism": 3}}"#).unwrap();
        assert_eq!(parsed.validation.parallelism, 3);
        assert_eq!(parsed.validation.folds, 5);
        assert_eq!(parsed.storage.backend, StorageBackend::File);
    }

    #[test]
    fn test_load_settings_layers_workspace_and_env() {
        Jail::expect_with(|jail| {
            jail.create_dir(".tessera")?;
            jail.create_file(
                ".tessera/config.toml",
                r#"
                [storage]
                backend = "memory"

                [validation]
                folds = 10
                parallelism = 2
                "#,
            )?;
            jail.set_env("TESSERA_VALIDATION__PARALLELISM", "4");

            let settings = load_settings(Some(jail.directory()), None).map_err(|e| *e)?;
            assert_eq!(settings.storage.backend, StorageBackend::Memory);
            assert_eq!(settings.validation.folds, 10);
            assert_eq!(settings.validation.parallelism, 4);
            Ok(())
        });
    }

    #[test]
    fn test_load_settings_overrides_win() {
        Jail::expect_with(|jail| {
            jail.set_env("TESSERA_VALIDATION__FOLDS", "7");
            let mut overrides = Settings::default();
            overrides.validation.folds = 3;
            let settings =
                load_settings(Some(jail.directory()), Some(&overrides)).map_err(|e| *e)?;
            assert_eq!(settings.validation.folds, 3);
            Ok(())
        });
    }

    #[test]
    fn test_configuration_rejects_zero_parallelism() {
        let mut settings = Settings::default();
        settings.storage.backend = StorageBackend::Memory;
        settings.validation.parallelism = 0;
        assert!(matches!(
            Configuration::new(settings),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn test_file_backend_creates_root() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("nested").join("store");
        let settings = Settings {
            storage: StorageSettings {
                backend: StorageBackend::File,
                root: Some(root.clone()),
            },
            ..Settings::default()
        };
        let config = Configuration::new(settings).unwrap();
        assert!(root.is_dir());

        let key = StorageKey::new("dataframe", "d").unwrap();
        config.store().put(&key, b"x").unwrap();
        assert!(root.join("dataframe").join("d.blob").is_file());
    }

    #[test]
    fn test_clones_share_backend() {
        let config = Configuration::in_memory();
        let clone = config.clone();
        assert!(config.shares_store_with(&clone));
        assert!(!config.shares_store_with(&Configuration::in_memory()));

        let key = StorageKey::new("dataframe", "shared").unwrap();
        config.store().put(&key, b"1").unwrap();
        assert!(clone.store().exists(&key).unwrap());
    }
}
