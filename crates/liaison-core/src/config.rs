//! Configuration management for Liaison
//!
//! Handles loading and saving the application configuration: the assistant
//! CLI invocation, timing knobs, and the default working directory.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Environment variable that overrides the configured assistant binary path.
pub const CLI_PATH_ENV: &str = "LIAISON_ASSISTANT_CLI";

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to the assistant CLI binary
    pub cli_path: String,
    /// Default working directory for brand-new sessions (absolute, or
    /// relative to the home directory)
    pub default_working_dir: Option<String>,
    /// Hard wall-clock ceiling for one turn, in seconds
    pub turn_timeout_secs: u64,
    /// How long a pending permission request may stay unresolved before it
    /// is treated as denied, in seconds
    pub permission_timeout_secs: u64,
    /// Cadence of status ticks while the process is silent, in seconds
    pub status_tick_secs: u64,
    /// Extra system prompt appended to every assistant invocation
    pub append_system_prompt: Option<String>,
    /// Favorite directories offered in the switch menu (relative to home)
    pub favorite_dirs: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cli_path: "claude".to_string(),
            default_working_dir: None,
            turn_timeout_secs: 300,
            permission_timeout_secs: 900,
            status_tick_secs: 3,
            append_system_prompt: None,
            favorite_dirs: Vec::new(),
        }
    }
}

impl Config {
    /// Default config file path: `<config_dir>/liaison/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("liaison").join("config.toml"))
    }

    /// Load configuration from the default location.
    ///
    /// A missing file yields the defaults; the `LIAISON_ASSISTANT_CLI`
    /// environment variable overrides the configured binary path either way.
    pub fn load() -> Result<Self> {
        let config = match Self::default_path() {
            Some(path) if path.exists() => Self::load_from(&path)?,
            _ => Self::default(),
        };
        Ok(config.with_env_overrides())
    }

    /// Load configuration from a specific file
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("failed to parse {}: {}", path.display(), e)))
    }

    /// Save configuration to a specific file, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn with_env_overrides(mut self) -> Self {
        if let Ok(path) = std::env::var(CLI_PATH_ENV) {
            if !path.is_empty() {
                self.cli_path = path;
            }
        }
        self
    }

    /// Resolved default working directory, falling back to the home directory
    pub fn resolved_default_dir(&self) -> Option<PathBuf> {
        match &self.default_working_dir {
            Some(dir) => {
                let path = PathBuf::from(dir);
                if path.is_absolute() {
                    Some(path)
                } else {
                    dirs::home_dir().map(|h| h.join(path))
                }
            }
            None => dirs::home_dir(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.cli_path, "claude");
        assert_eq!(config.turn_timeout_secs, 300);
        assert_eq!(config.permission_timeout_secs, 900);
        assert_eq!(config.status_tick_secs, 3);
        assert!(config.favorite_dirs.is_empty());
    }

    #[test]
    fn test_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.cli_path = "/usr/local/bin/assistant".to_string();
        config.turn_timeout_secs = 120;
        config.favorite_dirs = vec!["projects/api".to_string()];
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.cli_path, "/usr/local/bin/assistant");
        assert_eq!(loaded.turn_timeout_secs, 120);
        assert_eq!(loaded.favorite_dirs, vec!["projects/api".to_string()]);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "cli_path = \"my-assistant\"\n").unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.cli_path, "my-assistant");
        assert_eq!(loaded.turn_timeout_secs, 300);
    }

    #[test]
    fn test_bad_toml_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "cli_path = [not toml").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
