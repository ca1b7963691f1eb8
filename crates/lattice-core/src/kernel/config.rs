use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::kernel::constants::{
    DEFAULT_DIAGNOSTICS_CAPACITY, FRAMEWORK_VENDOR, FRAMEWORK_VERSION, PROP_FRAMEWORK_STORAGE,
    PROP_FRAMEWORK_VENDOR, PROP_FRAMEWORK_VERSION,
};
use crate::properties::{Properties, PropertyError};

/// Supported launch configuration file formats
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConfigFormat {
    /// JSON format (.json)
    Json,
    /// YAML format (.yaml, .yml) - requires "yaml-config" feature
    #[cfg(feature = "yaml-config")]
    Yaml,
    /// TOML format (.toml) - requires "toml-config" feature
    #[cfg(feature = "toml-config")]
    Toml,
}

impl ConfigFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ConfigFormat::Json => "json",
            #[cfg(feature = "yaml-config")]
            ConfigFormat::Yaml => "yaml",
            #[cfg(feature = "toml-config")]
            ConfigFormat::Toml => "toml",
        }
    }

    /// Determine format from file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| match ext.to_lowercase().as_str() {
                "json" => Some(ConfigFormat::Json),
                #[cfg(feature = "yaml-config")]
                "yaml" | "yml" => Some(ConfigFormat::Yaml),
                #[cfg(feature = "toml-config")]
                "toml" => Some(ConfigFormat::Toml),
                _ => None,
            })
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read launch configuration '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unknown or unsupported config format for path: {path}")]
    UnsupportedFormat { path: PathBuf },

    #[error("Failed to parse {format} launch configuration: {message}")]
    Parse { format: &'static str, message: String },

    #[error("Invalid framework properties: {0}")]
    Properties(#[from] PropertyError),
}

fn default_diagnostics_capacity() -> usize {
    DEFAULT_DIAGNOSTICS_CAPACITY
}

/// Launch configuration for a framework instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameworkConfig {
    /// Launch properties, visible through `BundleContext::property`.
    pub properties: HashMap<String, Value>,
    /// Root directory for persistent bundle data.
    pub storage_location: Option<PathBuf>,
    /// Default timeout for bundle start/stop; `None` waits forever.
    pub start_stop_timeout_ms: Option<u64>,
    /// Platform flags passed to the shared-library loader (0 = defaults).
    pub library_load_flags: i32,
    #[serde(default = "default_diagnostics_capacity")]
    pub diagnostics_capacity: usize,
}

impl Default for FrameworkConfig {
    fn default() -> Self {
        Self {
            properties: HashMap::new(),
            storage_location: None,
            start_stop_timeout_ms: None,
            library_load_flags: 0,
            diagnostics_capacity: DEFAULT_DIAGNOSTICS_CAPACITY,
        }
    }
}

impl FrameworkConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_property(mut self, key: impl Into<String>, value: Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    pub fn with_storage_location(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage_location = Some(path.into());
        self
    }

    pub fn with_start_stop_timeout(mut self, timeout: Duration) -> Self {
        self.start_stop_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn start_stop_timeout(&self) -> Option<Duration> {
        self.start_stop_timeout_ms.map(Duration::from_millis)
    }

    /// Loads a configuration file, picking the format from its extension.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let format = ConfigFormat::from_path(path)
            .ok_or_else(|| ConfigError::UnsupportedFormat { path: path.to_path_buf() })?;
        let data = fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        Self::parse(&data, format)
    }

    pub fn parse(data: &str, format: ConfigFormat) -> Result<Self, ConfigError> {
        match format {
            ConfigFormat::Json => serde_json::from_str(data)
                .map_err(|e| ConfigError::Parse { format: "JSON", message: e.to_string() }),
            #[cfg(feature = "yaml-config")]
            ConfigFormat::Yaml => serde_yaml::from_str(data)
                .map_err(|e| ConfigError::Parse { format: "YAML", message: e.to_string() }),
            #[cfg(feature = "toml-config")]
            ConfigFormat::Toml => toml::from_str(data)
                .map_err(|e| ConfigError::Parse { format: "TOML", message: e.to_string() }),
        }
    }

    /// Builds the framework property dictionary: launch properties plus the
    /// built-in keys, which cannot be overridden.
    pub fn framework_properties(&self) -> Result<Properties, ConfigError> {
        let mut props = Properties::from_map(self.properties.clone())?;
        props.insert(PROP_FRAMEWORK_VERSION, Value::from(FRAMEWORK_VERSION));
        props.insert(PROP_FRAMEWORK_VENDOR, Value::from(FRAMEWORK_VENDOR));
        if let Some(storage) = &self.storage_location {
            props.insert(PROP_FRAMEWORK_STORAGE, Value::from(storage.display().to_string()));
        }
        Ok(props)
    }
}
