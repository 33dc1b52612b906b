//! Configuration module for the tickflow host
//!
//! Configuration comes from YAML files and environment variables.
//! Priority: YAML > ENV vars > .env values > defaults. The `.env` file is
//! loaded by the binary at startup; the core never reads the environment
//! itself.
//!
//! # Environment
//! - `TICKFLOW_PLUGIN_PATHS`: colon-separated plugin directories
//! - `TICKFLOW_INCLUDE_BUILTIN`: register the built-in module (`true`/`false`)
//! - `TICKFLOW_MAX_IN_FLIGHT`: pending timestamps per asynchronous source
//!
//! # Example
//! ```rust,no_run
//! use tickflow::FacadeConfig;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = FacadeConfig::from_env()?;
//!
//! // Load from YAML file on top of the environment
//! let config = FacadeConfig::from_file(Path::new("tickflow.yaml"))?;
//! println!("{:?}", config.plugin_directories());
//! # Ok(())
//! # }
//! ```

use std::env;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use crate::network::DEFAULT_MAX_IN_FLIGHT;

mod yaml;

pub use yaml::{NetworkYaml, PluginsYaml, YamlConfig};

/// Plugin search path variable
pub const ENV_PLUGIN_PATHS: &str = "TICKFLOW_PLUGIN_PATHS";
/// Built-in module toggle variable
pub const ENV_INCLUDE_BUILTIN: &str = "TICKFLOW_INCLUDE_BUILTIN";
/// Per-source in-flight limit variable
pub const ENV_MAX_IN_FLIGHT: &str = "TICKFLOW_MAX_IN_FLIGHT";

/// Runs of `:` separate search path entries
static PATH_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(":+").expect("static regex is valid"));

/// Errors raised while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("Failed to parse YAML config: {0}")]
    Parse(String),

    #[error("Invalid value for {name}: {value}")]
    InvalidEnv { name: &'static str, value: String },

    #[error("max_in_flight must be at least 1")]
    ZeroInFlight,
}

/// Session configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FacadeConfig {
    /// Colon-separated plugin directories; empty entries are skipped
    pub plugin_search_path: String,
    /// Register the built-in module before scanning the search path
    pub include_builtin: bool,
    /// Pending timestamps per asynchronous source in the local network
    pub max_in_flight: usize,
}

impl Default for FacadeConfig {
    fn default() -> Self {
        Self {
            plugin_search_path: String::new(),
            include_builtin: true,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }
}

impl FacadeConfig {
    /// Configuration with a search path and defaults for everything else
    pub fn with_search_path(search_path: impl Into<String>) -> Self {
        Self {
            plugin_search_path: search_path.into(),
            ..Default::default()
        }
    }

    /// Load configuration from environment variables over defaults
    ///
    /// # Errors
    /// Returns an error if a variable is set to a value of the wrong format.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(search_path) = env::var(ENV_PLUGIN_PATHS) {
            config.plugin_search_path = search_path;
        }
        if let Ok(value) = env::var(ENV_INCLUDE_BUILTIN) {
            config.include_builtin = parse_bool(&value).ok_or(ConfigError::InvalidEnv {
                name: ENV_INCLUDE_BUILTIN,
                value,
            })?;
        }
        if let Ok(value) = env::var(ENV_MAX_IN_FLIGHT) {
            config.max_in_flight = value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                name: ENV_MAX_IN_FLIGHT,
                value,
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file with the environment as base
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    ///
    /// # Errors
    /// Returns an error if:
    /// - The YAML file cannot be read or is malformed
    /// - Environment variables have invalid formats
    /// - The merged configuration is invalid
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let yaml_config = YamlConfig::from_file(path)?;

        let mut config = Self::from_env()?;
        config.apply_yaml(yaml_config);
        config.validate()?;

        Ok(config)
    }

    fn apply_yaml(&mut self, yaml: YamlConfig) {
        if let Some(plugins) = yaml.plugins {
            if let Some(search_path) = plugins.search_path {
                self.plugin_search_path = search_path;
            }
            if let Some(include_builtin) = plugins.include_builtin {
                self.include_builtin = include_builtin;
            }
        }
        if let Some(max_in_flight) = yaml.network.and_then(|n| n.max_in_flight) {
            self.max_in_flight = max_in_flight;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_in_flight == 0 {
            return Err(ConfigError::ZeroInFlight);
        }
        Ok(())
    }

    /// Plugin directories in search order
    ///
    /// Splits on runs of `:` and drops empty entries, so `"a::b:"` yields
    /// `["a", "b"]`.
    pub fn plugin_directories(&self) -> Vec<PathBuf> {
        PATH_SEPARATOR
            .split(&self.plugin_search_path)
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(PathBuf::from)
            .collect()
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use tempfile::TempDir;

    // Helper to clean up environment variables
    fn cleanup_env_vars() {
        unsafe {
            env::remove_var(ENV_PLUGIN_PATHS);
            env::remove_var(ENV_INCLUDE_BUILTIN);
            env::remove_var(ENV_MAX_IN_FLIGHT);
        }
    }

    #[test]
    fn test_plugin_directories_collapse_separators() {
        let config = FacadeConfig::with_search_path("/opt/a::/opt/b:::/opt/c:");
        assert_eq!(
            config.plugin_directories(),
            vec![
                PathBuf::from("/opt/a"),
                PathBuf::from("/opt/b"),
                PathBuf::from("/opt/c")
            ]
        );
    }

    #[test]
    fn test_plugin_directories_empty() {
        assert!(FacadeConfig::default().plugin_directories().is_empty());
        assert!(FacadeConfig::with_search_path(":::").plugin_directories().is_empty());
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool(" off "), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        cleanup_env_vars();

        let config = FacadeConfig::from_env().unwrap();
        assert_eq!(config, FacadeConfig::default());
        assert!(config.include_builtin);
        assert_eq!(config.max_in_flight, DEFAULT_MAX_IN_FLIGHT);
    }

    #[test]
    #[serial]
    fn test_from_env_values() {
        cleanup_env_vars();
        unsafe {
            env::set_var(ENV_PLUGIN_PATHS, "/env/plugins");
            env::set_var(ENV_INCLUDE_BUILTIN, "false");
            env::set_var(ENV_MAX_IN_FLIGHT, "3");
        }

        let config = FacadeConfig::from_env().unwrap();
        assert_eq!(config.plugin_search_path, "/env/plugins");
        assert!(!config.include_builtin);
        assert_eq!(config.max_in_flight, 3);

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_env_invalid_values() {
        cleanup_env_vars();

        unsafe { env::set_var(ENV_MAX_IN_FLIGHT, "lots") };
        let err = FacadeConfig::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { name: ENV_MAX_IN_FLIGHT, .. }));

        unsafe { env::set_var(ENV_MAX_IN_FLIGHT, "0") };
        assert!(matches!(FacadeConfig::from_env(), Err(ConfigError::ZeroInFlight)));

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_yaml_overrides_env() {
        cleanup_env_vars();

        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let yaml_content = r#"
plugins:
  search_path: "/yaml/plugins"
"#;
        fs::write(&config_path, yaml_content).unwrap();

        unsafe {
            env::set_var(ENV_PLUGIN_PATHS, "/env/plugins");
            env::set_var(ENV_MAX_IN_FLIGHT, "5");
        }

        let config = FacadeConfig::from_file(&config_path).unwrap();

        // YAML overrides ENV
        assert_eq!(config.plugin_search_path, "/yaml/plugins");
        // ENV value
        assert_eq!(config.max_in_flight, 5);
        // Default value
        assert!(config.include_builtin);

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_rejects_zero_in_flight() {
        cleanup_env_vars();

        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");
        fs::write(&config_path, "network:\n  max_in_flight: 0\n").unwrap();

        let err = FacadeConfig::from_file(&config_path).unwrap_err();
        assert_eq!(err.to_string(), "max_in_flight must be at least 1");
    }

    #[test]
    #[serial]
    fn test_from_file_missing_file() {
        cleanup_env_vars();

        let result = FacadeConfig::from_file(Path::new("/nonexistent/config.yaml"));

        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to read config file")
        );
    }
}
