use serde::Deserialize;
use std::path::Path;

use super::ConfigError;

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration. Values present
/// here override the environment.
///
/// # Example YAML structure
/// ```yaml
/// plugins:
///   search_path: "/opt/tickflow/plugins:/usr/local/lib/tickflow"
///   include_builtin: true
///
/// network:
///   max_in_flight: 32
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub plugins: Option<PluginsYaml>,
    pub network: Option<NetworkYaml>,
}

/// Plugin discovery from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct PluginsYaml {
    /// Colon-separated plugin directories
    pub search_path: Option<String>,
    /// Register the built-in module before the search path
    pub include_builtin: Option<bool>,
}

/// Network tuning from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct NetworkYaml {
    /// Pending timestamps per asynchronous source
    pub max_in_flight: Option<usize>,
}

impl YamlConfig {
    /// Load YAML configuration from a file
    ///
    /// # Errors
    /// Returns an error if:
    /// - The file cannot be read
    /// - The YAML is malformed
    /// - Fields have invalid types
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let config: YamlConfig =
            serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))?;

        Ok(config)
    }
}
