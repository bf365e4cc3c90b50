//! Scratch Configuration Module
//!
//! Persistent settings for the backing interpreter and engine deadlines.
//! Config is stored in `~/.config/scratch/config.toml`.
//!
//! ## Priority Order (highest to lowest)
//!
//! 1. CLI flags (applied by the binary)
//! 2. Environment variables (`SCRATCH_PROGRAM`, `SCRATCH_FRAGMENT_TIMEOUT`)
//! 3. Config file (`~/.config/scratch/config.toml`)
//! 4. Defaults

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ScratchError};

/// Placeholder replaced by the fragment source in [`ProcessConfig::fragment_template`]
pub const CODE_PLACEHOLDER: &str = "{code}";
/// Placeholder replaced by the end marker in [`ProcessConfig::fragment_template`]
pub const MARKER_PLACEHOLDER: &str = "{marker}";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ScratchConfig {
    /// Backing interpreter settings
    #[serde(default)]
    pub process: ProcessConfig,

    /// Engine deadlines
    #[serde(default)]
    pub engine: EngineConfig,
}

/// How the backing REPL process is launched and fed
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProcessConfig {
    /// Interpreter program
    pub program: String,

    /// Interpreter arguments
    pub args: Vec<String>,

    /// Text written to stdin per fragment.
    ///
    /// Must print `{marker} <status>` on its own line once the fragment is done.
    pub fragment_template: String,

    /// End-of-fragment marker printed by the template
    pub end_marker: String,

    /// Per-fragment timeout in seconds
    pub fragment_timeout_secs: u64,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            program: "sh".to_string(),
            args: Vec::new(),
            fragment_template: "{\n{code}\n} 2>&1\necho \"{marker} $?\"\n".to_string(),
            end_marker: "__SCRATCH_END__".to_string(),
            fragment_timeout_secs: 60,
        }
    }
}

impl ProcessConfig {
    pub fn fragment_timeout(&self) -> Duration {
        Duration::from_secs(self.fragment_timeout_secs)
    }

    /// Render the stdin payload for one fragment
    pub fn render(&self, code: &str) -> String {
        self.fragment_template
            .replace(MARKER_PLACEHOLDER, &self.end_marker)
            .replace(CODE_PLACEHOLDER, code)
    }
}

/// Engine deadlines
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Deadline for the stop-and-wait teardown handshake (ms)
    pub teardown_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            teardown_timeout_ms: 2_000,
        }
    }
}

impl EngineConfig {
    pub fn teardown_timeout(&self) -> Duration {
        Duration::from_millis(self.teardown_timeout_ms)
    }
}

impl ScratchConfig {
    /// Get the config directory path
    ///
    /// Returns `~/.config/scratch/` on Unix, `%APPDATA%/scratch/` on Windows
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("scratch")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Load configuration from the default location
    ///
    /// Returns default config if the file doesn't exist.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from an explicit path
    ///
    /// Returns default config if the file doesn't exist.
    /// Returns error if the file exists but is malformed.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| ScratchError::ConfigError {
            reason: format!("Failed to read config file: {}", e),
        })?;

        toml::from_str(&content).map_err(|e| ScratchError::ConfigError {
            reason: format!("Failed to parse config file: {}", e),
        })
    }

    /// Save configuration to an explicit path, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            if !dir.exists() {
                fs::create_dir_all(dir).map_err(|e| ScratchError::ConfigError {
                    reason: format!("Failed to create config directory: {}", e),
                })?;
            }
        }

        let content = toml::to_string_pretty(self).map_err(|e| ScratchError::ConfigError {
            reason: format!("Failed to serialize config: {}", e),
        })?;

        fs::write(path, content).map_err(|e| ScratchError::ConfigError {
            reason: format!("Failed to write config file: {}", e),
        })
    }

    /// Merge with environment variables
    ///
    /// Environment variables take precedence over config file values.
    /// Empty or unparsable values are ignored.
    pub fn with_env(mut self) -> Self {
        if let Ok(program) = std::env::var("SCRATCH_PROGRAM") {
            if !program.is_empty() {
                self.process.program = program;
            }
        }

        if let Ok(timeout) = std::env::var("SCRATCH_FRAGMENT_TIMEOUT") {
            if let Ok(secs) = timeout.trim().parse::<u64>() {
                self.process.fragment_timeout_secs = secs;
            }
        }

        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;
    use tempfile::TempDir;

    #[test]
    fn test_config_path_contains_scratch() {
        let path = ScratchConfig::config_path();
        assert!(path.to_string_lossy().contains("scratch"));
        assert!(path.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn test_defaults() {
        let config = ScratchConfig::default();
        assert_eq!(config.process.program, "sh");
        assert_eq!(config.engine.teardown_timeout(), Duration::from_secs(2));
        assert_eq!(config.process.fragment_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_render_substitutes_code_and_marker() {
        let config = ProcessConfig::default();
        let rendered = config.render("echo hi");
        assert!(rendered.contains("echo hi"));
        assert!(rendered.contains("echo \"__SCRATCH_END__ $?\""));
        assert!(!rendered.contains(CODE_PLACEHOLDER));
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("config.toml");

        let mut config = ScratchConfig::default();
        config.process.program = "bash".into();
        config.process.args = vec!["--norc".into()];
        config.engine.teardown_timeout_ms = 500;

        config.save_to(&path).unwrap();
        let loaded = ScratchConfig::load_from(&path).unwrap();

        assert_eq!(config, loaded);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, "[process]\nprogram = \"dash\"\n").unwrap();

        let loaded = ScratchConfig::load_from(&path).unwrap();
        assert_eq!(loaded.process.program, "dash");
        assert_eq!(loaded.process.end_marker, "__SCRATCH_END__");
        assert_eq!(loaded.engine, EngineConfig::default());
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, "[process\nprogram = ").unwrap();

        let err = ScratchConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, ScratchError::ConfigError { .. }));
    }

    #[test]
    fn test_missing_file_returns_default() {
        let temp_dir = TempDir::new().unwrap();
        let loaded = ScratchConfig::load_from(&temp_dir.path().join("absent.toml")).unwrap();
        assert_eq!(loaded, ScratchConfig::default());
    }

    #[test]
    #[serial]
    fn test_env_overrides_config() {
        env::set_var("SCRATCH_PROGRAM", "zsh");
        env::set_var("SCRATCH_FRAGMENT_TIMEOUT", "5");

        let config = ScratchConfig::default().with_env();
        assert_eq!(config.process.program, "zsh");
        assert_eq!(config.process.fragment_timeout_secs, 5);

        env::remove_var("SCRATCH_PROGRAM");
        env::remove_var("SCRATCH_FRAGMENT_TIMEOUT");
    }

    #[test]
    #[serial]
    fn test_env_ignores_empty_and_garbage() {
        env::set_var("SCRATCH_PROGRAM", "");
        env::set_var("SCRATCH_FRAGMENT_TIMEOUT", "soon");

        let config = ScratchConfig::default().with_env();
        assert_eq!(config.process.program, "sh");
        assert_eq!(config.process.fragment_timeout_secs, 60);

        env::remove_var("SCRATCH_PROGRAM");
        env::remove_var("SCRATCH_FRAGMENT_TIMEOUT");
    }
}
