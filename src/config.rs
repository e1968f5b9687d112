//! Configuration management for the spec registry
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (spec-registry.toml)
//! - Environment variables (SPEC_REGISTRY__*)
//!
//! ## Example config file (spec-registry.toml):
//! ```toml
//! [storage]
//! root = "./data"
//! default_format = "yaml"
//!
//! [locking]
//! timeout_ms = 5000
//! retries = 3
//!
//! [audit]
//! enabled = true
//! dir = "./data/audit"
//!
//! [defaults]
//! actor = "api-team"
//! ```

use std::path::PathBuf;
use std::time::Duration;

use config_crate::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

use crate::document::SpecFormat;

/// Main configuration for the spec registry
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub locking: LockingConfig,

    #[serde(default)]
    pub audit: AuditConfig,

    #[serde(default)]
    pub defaults: DefaultsConfig,
}

/// Where documents and metadata live
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory of the document store
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,

    /// Format for newly created documents
    #[serde(default)]
    pub default_format: SpecFormat,
}

/// Write lock behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockingConfig {
    /// Total time to wait for a lock
    #[serde(default = "default_lock_timeout_ms")]
    pub timeout_ms: u64,

    /// Extra attempts within that time
    #[serde(default = "default_lock_retries")]
    pub retries: u32,
}

/// Audit trail settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Directory for audit logs (default: `<storage.root>/audit`)
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

/// Defaults applied when a caller leaves something out
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Actor recorded when none is given
    #[serde(default = "default_actor")]
    pub actor: String,
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("./data")
}

fn default_lock_timeout_ms() -> u64 {
    5000
}

fn default_lock_retries() -> u32 {
    3
}

fn default_true() -> bool {
    true
}

fn default_actor() -> String {
    "spec-registry".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
            default_format: SpecFormat::Json,
        }
    }
}

impl Default for LockingConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_lock_timeout_ms(),
            retries: default_lock_retries(),
        }
    }
}

impl LockingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: None,
        }
    }
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            actor: default_actor(),
        }
    }
}

impl RegistryConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load configuration, layering an explicit file over the default locations
    pub fn load_from(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        let config_locations = [
            "spec-registry.toml",
            ".spec-registry.toml",
            "config/spec-registry.toml",
        ];

        for location in config_locations {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        // Load from XDG config directory
        if let Some(config_dir) = directories::ProjectDirs::from("dev", "familiar", "spec-registry") {
            let xdg_config = config_dir.config_dir().join("spec-registry.toml");
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // SPEC_REGISTRY__STORAGE__ROOT=/srv/specs
        builder = builder.add_source(
            Environment::with_prefix("SPEC_REGISTRY")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Save configuration to a file
    pub fn save(&self, path: &str) -> std::io::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Storage root, resolved against the working directory
    pub fn storage_root(&self) -> PathBuf {
        if self.storage.root.is_absolute() {
            self.storage.root.clone()
        } else {
            std::env::current_dir()
                .unwrap_or_default()
                .join(&self.storage.root)
        }
    }

    pub fn audit_dir(&self) -> PathBuf {
        self.audit
            .dir
            .clone()
            .unwrap_or_else(|| self.storage_root().join("audit"))
    }
}
