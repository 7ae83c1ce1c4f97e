//! Configuration management for the schema catalog
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (catalog.toml)
//! - Environment variables (CATALOG__*)
//!
//! ## Example config file (catalog.toml):
//! ```toml
//! [cache]
//! max_branch_cache_size = 10000
//! branch_cache_expiry_secs = 3600
//!
//! [storage]
//! data_file = "./catalog-data.json"
//!
//! [files]
//! directory = "./catalog-files"
//!
//! [registry]
//! default_compatibility = "BACKWARD"
//! default_validation_level = "ALL"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use config_crate::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

use crate::compatibility::{SchemaCompatibility, SchemaValidationLevel};

/// Main configuration for the schema catalog
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogConfig {
    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub files: FilesConfig,

    #[serde(default)]
    pub registry: RegistryConfig,
}

/// Branch cache bounds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Branches held, each cached under its name and its id
    #[serde(default = "default_max_branch_cache_size")]
    pub max_branch_cache_size: u64,

    #[serde(default = "default_branch_cache_expiry_secs")]
    pub branch_cache_expiry_secs: u64,
}

/// Row storage settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// JSON snapshot the in-memory storage loads from and saves to
    #[serde(default = "default_data_file")]
    pub data_file: PathBuf,
}

/// Uploaded file settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilesConfig {
    #[serde(default = "default_files_directory")]
    pub directory: PathBuf,
}

/// Defaults applied to newly registered schemas
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default)]
    pub default_compatibility: SchemaCompatibility,

    #[serde(default)]
    pub default_validation_level: SchemaValidationLevel,
}

fn default_max_branch_cache_size() -> u64 {
    10_000
}

fn default_branch_cache_expiry_secs() -> u64 {
    3600
}

fn default_data_file() -> PathBuf {
    PathBuf::from("catalog-data.json")
}

fn default_files_directory() -> PathBuf {
    PathBuf::from("catalog-files")
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_branch_cache_size: default_max_branch_cache_size(),
            branch_cache_expiry_secs: default_branch_cache_expiry_secs(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_file: default_data_file(),
        }
    }
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            directory: default_files_directory(),
        }
    }
}

impl CacheConfig {
    pub fn expiry(&self) -> Duration {
        Duration::from_secs(self.branch_cache_expiry_secs)
    }
}

impl CatalogConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load configuration, layering `config_path` over the default locations
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        let config_locations = ["catalog.toml", ".catalog.toml", "config/catalog.toml"];

        for location in config_locations {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        if let Some(config_dir) = directories::ProjectDirs::from("dev", "schema-catalog", "catalog") {
            let xdg_config = config_dir.config_dir().join("catalog.toml");
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        if let Some(path) = config_path {
            builder = builder.add_source(File::from(path.to_path_buf()).required(true));
        }

        // CATALOG__CACHE__MAX_BRANCH_CACHE_SIZE=500
        builder = builder.add_source(
            Environment::with_prefix("CATALOG")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Save configuration to a file
    pub fn save(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }
}
