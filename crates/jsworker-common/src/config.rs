//! Configuration structures for jsworker.
//!
//! This module defines configuration options for various components:
//! - [`RuntimeConfig`]: Top-level configuration containing all settings
//! - [`EngineConfig`]: Per-instance QuickJS runtime settings
//! - [`ExecutionConfig`]: Per-call execution limits

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::WorkerError;

/// Top-level runtime configuration.
///
/// This structure contains all configuration options for a worker.
/// It can be loaded from a TOML config file or built in code.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RuntimeConfig {
    /// Engine instance configuration.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Per-call execution configuration.
    #[serde(default)]
    pub execution: ExecutionConfig,
}

impl RuntimeConfig {
    /// Reject settings QuickJS cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::InvalidConfig`] for a zero stack size or a zero
    /// per-call timeout.
    pub fn validate(&self) -> Result<(), WorkerError> {
        if self.engine.max_stack_size_kb == 0 {
            return Err(WorkerError::invalid_config(
                "engine.max_stack_size_kb must be greater than zero",
            ));
        }
        if self.execution.timeout_ms == Some(0) {
            return Err(WorkerError::invalid_config(
                "execution.timeout_ms must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Engine instance configuration.
///
/// These settings are applied to the QuickJS runtime backing each
/// execution context when it is created.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Install the `$print` debug function into the global scope.
    #[serde(default)]
    pub enable_print: bool,

    /// Heap limit per instance in megabytes. Zero means unlimited.
    #[serde(default)]
    pub memory_limit_mb: u32,

    /// Maximum native stack used by script execution, in kilobytes.
    #[serde(default = "defaults::max_stack_size_kb")]
    pub max_stack_size_kb: u32,

    /// Allocation volume that triggers a garbage collection, in kilobytes.
    ///
    /// Unset keeps the engine default.
    #[serde(default)]
    pub gc_threshold_kb: Option<u32>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enable_print: false,
            memory_limit_mb: 0,
            max_stack_size_kb: defaults::max_stack_size_kb(),
            gc_threshold_kb: None,
        }
    }
}

impl EngineConfig {
    /// Heap limit in bytes, or `None` when unlimited.
    pub fn memory_limit_bytes(&self) -> Option<usize> {
        (self.memory_limit_mb > 0).then(|| (self.memory_limit_mb as usize) * 1024 * 1024)
    }

    /// Stack limit in bytes.
    pub fn max_stack_size_bytes(&self) -> usize {
        (self.max_stack_size_kb as usize) * 1024
    }

    /// GC threshold in bytes, if configured.
    pub fn gc_threshold_bytes(&self) -> Option<usize> {
        self.gc_threshold_kb.map(|kb| (kb as usize) * 1024)
    }
}

/// Per-call execution configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ExecutionConfig {
    /// Deadline for a single load or send call, in milliseconds.
    ///
    /// Script code still running when the deadline passes is interrupted
    /// the same way a terminate request interrupts it.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl ExecutionConfig {
    /// Get the timeout as a `Duration`.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// Default value functions for serde.
mod defaults {
    pub const fn max_stack_size_kb() -> u32 {
        1024
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RuntimeConfig::default();

        assert!(!config.engine.enable_print);
        assert_eq!(config.engine.memory_limit_mb, 0);
        assert_eq!(config.engine.max_stack_size_kb, 1024);
        assert!(config.engine.gc_threshold_kb.is_none());
        assert!(config.execution.timeout_ms.is_none());
    }

    #[test]
    fn test_validate() {
        assert!(RuntimeConfig::default().validate().is_ok());

        let mut config = RuntimeConfig::default();
        config.engine.max_stack_size_kb = 0;
        assert!(matches!(
            config.validate(),
            Err(WorkerError::InvalidConfig { .. })
        ));

        let mut config = RuntimeConfig::default();
        config.execution.timeout_ms = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_byte_conversions() {
        let config = EngineConfig {
            memory_limit_mb: 16,
            max_stack_size_kb: 512,
            gc_threshold_kb: Some(256),
            ..Default::default()
        };

        assert_eq!(config.memory_limit_bytes(), Some(16 * 1024 * 1024));
        assert_eq!(config.max_stack_size_bytes(), 512 * 1024);
        assert_eq!(config.gc_threshold_bytes(), Some(256 * 1024));
        assert_eq!(EngineConfig::default().memory_limit_bytes(), None);
    }

    #[test]
    fn test_config_serialization() {
        let config = RuntimeConfig {
            execution: ExecutionConfig {
                timeout_ms: Some(250),
            },
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: RuntimeConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(deserialized.execution.timeout_ms, Some(250));
        assert_eq!(
            config.engine.max_stack_size_kb,
            deserialized.engine.max_stack_size_kb
        );
    }

    #[test]
    fn test_execution_timeout() {
        let config = ExecutionConfig {
            timeout_ms: Some(500),
        };

        assert_eq!(config.timeout(), Some(Duration::from_millis(500)));
        assert_eq!(ExecutionConfig::default().timeout(), None);
    }

    #[test]
    fn test_partial_deserialization() {
        let json = r#"{"engine": {"enable_print": true}}"#;
        let config: RuntimeConfig = serde_json::from_str(json).unwrap();

        // Explicitly set value
        assert!(config.engine.enable_print);
        // Default values for unspecified fields
        assert_eq!(config.engine.max_stack_size_kb, 1024);
        assert!(config.execution.timeout_ms.is_none());
    }
}
