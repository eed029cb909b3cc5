//! Error types for jsworker.
//!
//! [`WorkerError`] covers every failure a worker can surface to its caller,
//! from compiling script source to tearing down the execution context.

use thiserror::Error;

/// Errors surfaced by workers and engine instances.
///
/// Script failures carry the formatted diagnostic produced by the exception
/// formatter, so the `Display` text of those variants is exactly what is
/// recorded as the instance's last exception.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkerError {
    /// Source failed to compile; no statement was executed.
    #[error("{diagnostic}")]
    Compile {
        /// Formatted diagnostic (location, source excerpt, stack).
        diagnostic: String,
    },

    /// An uncaught exception escaped script execution.
    #[error("{diagnostic}")]
    Runtime {
        /// Formatted diagnostic (location, source excerpt, stack).
        diagnostic: String,
    },

    /// Execution was stopped by a terminate request.
    #[error("{diagnostic}")]
    Interrupted {
        /// Formatted diagnostic of the interruption.
        diagnostic: String,
    },

    /// Execution ran past the configured per-call deadline.
    #[error("Execution timeout after {duration_ms}ms")]
    ExecutionTimeout {
        /// The timeout duration in milliseconds.
        duration_ms: u64,
    },

    /// A message was sent before the script registered a receiver.
    #[error("jsworker: callback not registered with {callback}")]
    CallbackNotRegistered {
        /// Name of the script-side registration function.
        callback: String,
    },

    /// A module or one of its imports could not be resolved to source text.
    #[error("Module resolution failed for '{url}': {reason}")]
    ModuleResolution {
        /// The module URL that failed to resolve.
        url: String,
        /// Why resolution failed.
        reason: String,
    },

    /// The engine could not be brought up. There is no recovery path.
    #[error("Engine fatal error: {reason}")]
    EngineFatal {
        /// Description of the failure.
        reason: String,
    },

    /// The worker was disposed; its execution context no longer exists.
    #[error("jsworker: worker has been disposed")]
    Disposed,

    /// Every 32-bit instance identifier has been handed out.
    #[error("Instance identifiers exhausted")]
    IdsExhausted,

    /// Invalid configuration was provided.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// Description of the configuration error.
        reason: String,
    },
}

impl WorkerError {
    /// Create a new `Compile` error.
    pub fn compile(diagnostic: impl Into<String>) -> Self {
        Self::Compile {
            diagnostic: diagnostic.into(),
        }
    }

    /// Create a new `Runtime` error.
    pub fn runtime(diagnostic: impl Into<String>) -> Self {
        Self::Runtime {
            diagnostic: diagnostic.into(),
        }
    }

    /// Create a new `Interrupted` error.
    pub fn interrupted(diagnostic: impl Into<String>) -> Self {
        Self::Interrupted {
            diagnostic: diagnostic.into(),
        }
    }

    /// Create a new `CallbackNotRegistered` error.
    pub fn callback_not_registered(callback: impl Into<String>) -> Self {
        Self::CallbackNotRegistered {
            callback: callback.into(),
        }
    }

    /// Create a new `ModuleResolution` error.
    pub fn module_resolution(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ModuleResolution {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Create a new `EngineFatal` error.
    pub fn engine_fatal(reason: impl Into<String>) -> Self {
        Self::EngineFatal {
            reason: reason.into(),
        }
    }

    /// Create a new `InvalidConfig` error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// The formatted script diagnostic, if this error carries one.
    pub fn diagnostic(&self) -> Option<&str> {
        match self {
            Self::Compile { diagnostic }
            | Self::Runtime { diagnostic }
            | Self::Interrupted { diagnostic } => Some(diagnostic),
            _ => None,
        }
    }

    /// Returns `true` if script execution was cut short by terminate or a deadline.
    pub fn is_interrupted(&self) -> bool {
        matches!(
            self,
            Self::Interrupted { .. } | Self::ExecutionTimeout { .. }
        )
    }

    /// Returns `true` if the caller may retry or continue using the worker.
    ///
    /// Only engine bring-up failures and disposal are final.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            Self::EngineFatal { .. } | Self::Disposed | Self::IdsExhausted
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = WorkerError::callback_not_registered("$recv");
        assert_eq!(
            err.to_string(),
            "jsworker: callback not registered with $recv"
        );

        let err = WorkerError::ExecutionTimeout { duration_ms: 50 };
        assert_eq!(err.to_string(), "Execution timeout after 50ms");
    }

    #[test]
    fn test_diagnostic_is_display_text() {
        let err = WorkerError::compile("test.js:1\n1+\n^^\nSyntaxError\n");
        assert_eq!(err.to_string(), "test.js:1\n1+\n^^\nSyntaxError\n");
        assert_eq!(err.diagnostic(), Some("test.js:1\n1+\n^^\nSyntaxError\n"));
        assert_eq!(WorkerError::Disposed.diagnostic(), None);
    }

    #[test]
    fn test_is_interrupted() {
        assert!(WorkerError::interrupted("interrupted").is_interrupted());
        assert!(WorkerError::ExecutionTimeout { duration_ms: 1 }.is_interrupted());
        assert!(!WorkerError::runtime("boom").is_interrupted());
    }

    #[test]
    fn test_is_recoverable() {
        assert!(WorkerError::compile("x").is_recoverable());
        assert!(WorkerError::module_resolution("a.js", "missing").is_recoverable());
        assert!(!WorkerError::engine_fatal("no runtime").is_recoverable());
        assert!(!WorkerError::Disposed.is_recoverable());
    }
}
