//! Runtime configuration system
//!
//! Centralized configuration for the ownership subsystem and its allocation
//! tracking. Values come from defaults, an optional TOML file (`toml-config`
//! feature) and `REFGROUP_*` environment variables, in that order.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::memory::config::{MemoryConfig, ViolationAction};

/// Complete runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Ownership subsystem configuration
    pub memory: MemoryConfig,
}

impl RuntimeConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self {
            memory: MemoryConfig::from_env(),
        }
    }

    /// Load configuration from TOML file
    #[cfg(feature = "toml-config")]
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::io(path.display().to_string(), e))?;
        toml::from_str(&contents).map_err(|e| Error::config(e.to_string()))
    }

    /// Load configuration from TOML file (stub when toml feature is disabled)
    #[cfg(not(feature = "toml-config"))]
    pub fn from_file(_path: &Path) -> Result<Self> {
        Err(Error::config(
            "TOML support not enabled. Enable the 'toml-config' feature.",
        ))
    }

    /// Save configuration to TOML file
    #[cfg(feature = "toml-config")]
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self).map_err(|e| Error::config(e.to_string()))?;
        std::fs::write(path, contents).map_err(|e| Error::io(path.display().to_string(), e))
    }

    /// Save configuration to TOML file (stub when toml feature is disabled)
    #[cfg(not(feature = "toml-config"))]
    pub fn save_to_file(&self, _path: &Path) -> Result<()> {
        Err(Error::config(
            "TOML support not enabled. Enable the 'toml-config' feature.",
        ))
    }

    /// Merge with environment variables (env vars take precedence)
    pub fn merge_with_env(mut self) -> Self {
        let env_config = Self::from_env();

        if std::env::var("REFGROUP_ON_VIOLATION").is_ok() {
            self.memory.on_violation = env_config.memory.on_violation;
        }

        if std::env::var("REFGROUP_TRACK_ALLOCATIONS").is_ok() {
            self.memory.track_allocations = env_config.memory.track_allocations;
        }

        if std::env::var("REFGROUP_TRACK_HISTORY").is_ok() {
            self.memory.max_history = env_config.memory.max_history;
        }

        self
    }
}

/// Global runtime configuration manager
pub struct ConfigManager {
    config: RwLock<RuntimeConfig>,
}

impl ConfigManager {
    pub fn new() -> Self {
        Self {
            config: RwLock::new(RuntimeConfig::default()),
        }
    }

    /// Initialize from environment and optional config file
    pub fn init(&self, config_file: Option<PathBuf>) -> Result<()> {
        let mut config = if let Some(path) = config_file {
            RuntimeConfig::from_file(&path)?
        } else {
            RuntimeConfig::default()
        };

        config = config.merge_with_env();
        refgroup_metrics::get_profiler().set_max_history_size(config.memory.max_history);

        *self.config.write() = config;
        Ok(())
    }

    /// Get current configuration
    pub fn get(&self) -> RuntimeConfig {
        self.config.read().clone()
    }

    /// Update configuration
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut RuntimeConfig),
    {
        let mut config = self.config.write();
        f(&mut config);
    }

    /// Get memory config
    pub fn memory(&self) -> MemoryConfig {
        self.config.read().memory.clone()
    }

    /// Reaction to invariant violations
    pub fn on_violation(&self) -> ViolationAction {
        self.config.read().memory.on_violation
    }

    /// Check if group allocations are recorded in the profiler
    pub fn is_tracking_enabled(&self) -> bool {
        self.config.read().memory.track_allocations
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Global configuration manager instance
static GLOBAL_CONFIG: once_cell::sync::Lazy<ConfigManager> = once_cell::sync::Lazy::new(|| {
    let manager = ConfigManager::new();
    #[cfg(feature = "toml-config")]
    {
        let default_config_path = PathBuf::from("refgroup.toml");
        if default_config_path.exists() {
            if let Err(err) = manager.init(Some(default_config_path)) {
                tracing::warn!(error = %err, "ignoring refgroup.toml");
                let _ = manager.init(None);
            }
        } else {
            let _ = manager.init(None);
        }
    }
    #[cfg(not(feature = "toml-config"))]
    {
        let _ = manager.init(None);
    }
    manager
});

/// Get the global configuration manager
pub fn get_config() -> &'static ConfigManager {
    &GLOBAL_CONFIG
}
