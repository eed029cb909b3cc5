//! Configuration file structures for jsworker.
//!
//! This module defines structures for TOML configuration files:
//! - [`ConfigFile`]: Top-level configuration file structure
//! - [`PreloadEntry`]: A script or module loaded before the entry point

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::RuntimeConfig;

/// Top-level configuration file structure.
///
/// # Example
///
/// ```toml
/// [runtime.engine]
/// enable_print = true
/// memory_limit_mb = 64
///
/// [runtime.execution]
/// timeout_ms = 1000
///
/// [[preload]]
/// path = "./lib/prelude.js"
///
/// [[preload]]
/// path = "./lib/router.mjs"
/// kind = "module"
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ConfigFile {
    /// Runtime configuration (engine + execution settings).
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Sources to load, in order, before the entry point.
    #[serde(default)]
    pub preload: Vec<PreloadEntry>,
}

impl ConfigFile {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigFileError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigFileError::Io {
            path: path.as_ref().display().to_string(),
            source: e,
        })?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string cannot be parsed as TOML.
    pub fn from_toml(content: &str) -> Result<Self, ConfigFileError> {
        toml::from_str(content).map_err(|e| ConfigFileError::Parse {
            message: e.to_string(),
        })
    }
}

/// How a preloaded file is evaluated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PreloadKind {
    /// Evaluated in the global scope.
    #[default]
    Script,
    /// Evaluated as an ES module; its imports go through the module loader.
    Module,
}

/// A source file to load at startup.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PreloadEntry {
    /// Path to the source file.
    pub path: String,

    /// Script or module.
    #[serde(default)]
    pub kind: PreloadKind,
}

/// Configuration file errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    /// Failed to read configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse configuration file.
    #[error("Failed to parse config file: {message}")]
    Parse { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_file() {
        let config = ConfigFile::default();

        assert!(!config.runtime.engine.enable_print);
        assert!(config.preload.is_empty());
    }

    #[test]
    fn test_parse_minimal_config() {
        let toml = r"
            [runtime.execution]
            timeout_ms = 200
        ";

        let config = ConfigFile::from_toml(toml).unwrap();

        assert_eq!(config.runtime.execution.timeout_ms, Some(200));
        // Defaults applied
        assert_eq!(config.runtime.engine.max_stack_size_kb, 1024);
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            [runtime.engine]
            enable_print = true
            memory_limit_mb = 32
            max_stack_size_kb = 256
            gc_threshold_kb = 512

            [runtime.execution]
            timeout_ms = 1000

            [[preload]]
            path = "./prelude.js"

            [[preload]]
            path = "./router.mjs"
            kind = "module"
        "#;

        let config = ConfigFile::from_toml(toml).unwrap();

        assert!(config.runtime.engine.enable_print);
        assert_eq!(config.runtime.engine.memory_limit_mb, 32);
        assert_eq!(config.runtime.engine.max_stack_size_kb, 256);
        assert_eq!(config.runtime.engine.gc_threshold_kb, Some(512));
        assert_eq!(config.runtime.execution.timeout_ms, Some(1000));
        assert_eq!(config.preload.len(), 2);
        assert_eq!(config.preload[0].kind, PreloadKind::Script);
        assert_eq!(config.preload[1].path, "./router.mjs");
        assert_eq!(config.preload[1].kind, PreloadKind::Module);
    }

    #[test]
    fn test_parse_unknown_kind() {
        let toml = r#"
            [[preload]]
            path = "./types.ts"
            kind = "typescript"
        "#;
        assert!(ConfigFile::from_toml(toml).is_err());
    }

    #[test]
    fn test_parse_invalid_toml() {
        let invalid = "this is not valid toml [";
        let result = ConfigFile::from_toml(invalid);
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_file() {
        let err = ConfigFile::from_file("/nonexistent/jsworker.toml").unwrap_err();
        assert!(matches!(err, ConfigFileError::Io { .. }));
    }
}
