//! Common types, errors, and configuration for jsworker.
//!
//! This crate provides shared functionality used across the jsworker workspace:
//! - Error types using `thiserror` for type-safe error handling
//! - Configuration structures for engine and execution settings
//! - TOML configuration file loading for the CLI

pub mod config;
pub mod config_file;
pub mod error;

pub use config::{EngineConfig, ExecutionConfig, RuntimeConfig};
pub use config_file::{ConfigFile, ConfigFileError, PreloadEntry, PreloadKind};
pub use error::WorkerError;
