//! Plugin configuration.
//!
//! Read from `uiredirect.toml` next to the plugin. Every key is optional; a
//! missing file yields the defaults.
//!
//! ```toml
//! log_filter = "uiredirect=debug"
//! fence_timeout_ms = 1000
//! clear_color = [0.0, 0.0, 0.0, 1.0]
//! signature_table = "signatures.json"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::gpu::{ClearColor, DEFAULT_CLEAR_COLOR};
use crate::logging::LoggingConfig;

/// File name looked up next to the plugin module
pub const CONFIG_FILE_NAME: &str = "uiredirect.toml";

/// Configuration for the plugin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginConfig {
    /// `EnvFilter` directive, overridden by `RUST_LOG`
    pub log_filter: String,
    /// Tag column of every log line
    pub log_tag: String,
    /// Upper bound for one D3D12 fence wait
    pub fence_timeout_ms: u64,
    /// Upper bound for waiting on the init worker at teardown
    pub init_timeout_ms: u64,
    /// Colour reclaimed UI textures are cleared to
    pub clear_color: ClearColor,
    /// Whether to install the lighting patch
    pub lighting_patch: bool,
    /// Whether to write the engine's system resolution
    pub resolution_sync: bool,
    /// JSON signature table replacing the built-in one
    pub signature_table: Option<PathBuf>,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            log_filter: "info".to_string(),
            log_tag: "uiredirect".to_string(),
            fence_timeout_ms: 2000,
            init_timeout_ms: 10_000,
            clear_color: DEFAULT_CLEAR_COLOR,
            lighting_patch: true,
            resolution_sync: true,
            signature_table: None,
        }
    }
}

impl PluginConfig {
    /// Create a new configuration builder
    pub fn builder() -> PluginConfigBuilder {
        PluginConfigBuilder::default()
    }

    /// Load from a TOML file. A missing file gives the defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Config file {} not found, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };

        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.fence_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "fence_timeout_ms must be positive".to_string(),
            ));
        }
        if self.clear_color.iter().any(|c| !(0.0..=1.0).contains(c)) {
            return Err(Error::InvalidConfig(format!(
                "clear_color components must be within 0..=1, got {:?}",
                self.clear_color
            )));
        }
        Ok(())
    }

    pub fn fence_timeout(&self) -> Duration {
        Duration::from_millis(self.fence_timeout_ms)
    }

    pub fn init_timeout(&self) -> Duration {
        Duration::from_millis(self.init_timeout_ms)
    }

    pub fn logging(&self) -> LoggingConfig {
        LoggingConfig {
            filter: self.log_filter.clone(),
            tag: self.log_tag.clone(),
        }
    }
}

/// Builder for PluginConfig
#[derive(Debug, Clone, Default)]
pub struct PluginConfigBuilder {
    log_filter: Option<String>,
    log_tag: Option<String>,
    fence_timeout_ms: Option<u64>,
    init_timeout_ms: Option<u64>,
    clear_color: Option<ClearColor>,
    lighting_patch: Option<bool>,
    resolution_sync: Option<bool>,
    signature_table: Option<PathBuf>,
}

impl PluginConfigBuilder {
    pub fn log_filter<S: Into<String>>(mut self, filter: S) -> Self {
        self.log_filter = Some(filter.into());
        self
    }

    pub fn log_tag<S: Into<String>>(mut self, tag: S) -> Self {
        self.log_tag = Some(tag.into());
        self
    }

    pub fn fence_timeout(mut self, timeout: Duration) -> Self {
        self.fence_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn init_timeout(mut self, timeout: Duration) -> Self {
        self.init_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn clear_color(mut self, color: ClearColor) -> Self {
        self.clear_color = Some(color);
        self
    }

    /// Enable or disable the lighting patch
    pub fn lighting_patch(mut self, enabled: bool) -> Self {
        self.lighting_patch = Some(enabled);
        self
    }

    /// Enable or disable writing the system resolution
    pub fn resolution_sync(mut self, enabled: bool) -> Self {
        self.resolution_sync = Some(enabled);
        self
    }

    pub fn signature_table<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.signature_table = Some(path.into());
        self
    }

    /// Build the configuration
    pub fn build(self) -> PluginConfig {
        let default = PluginConfig::default();
        PluginConfig {
            log_filter: self.log_filter.unwrap_or(default.log_filter),
            log_tag: self.log_tag.unwrap_or(default.log_tag),
            fence_timeout_ms: self.fence_timeout_ms.unwrap_or(default.fence_timeout_ms),
            init_timeout_ms: self.init_timeout_ms.unwrap_or(default.init_timeout_ms),
            clear_color: self.clear_color.unwrap_or(default.clear_color),
            lighting_patch: self.lighting_patch.unwrap_or(default.lighting_patch),
            resolution_sync: self.resolution_sync.unwrap_or(default.resolution_sync),
            signature_table: self.signature_table.or(default.signature_table),
        }
    }
}
