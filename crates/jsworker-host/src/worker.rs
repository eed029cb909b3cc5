//! The host handle.
//!
//! A [`Worker`] wraps one [`EngineInstance`] for application code. It is
//! configured through [`WorkerBuilder`] and creates its instance lazily on
//! the first load or send. All methods take `&self`, so a worker can be
//! shared behind an `Arc` and terminated from another thread while a call
//! is blocked.
//!
//! Load, Send and SendSync hold the worker mutex for their whole duration.
//! Host callbacks run inside that window; calling back into the same worker
//! from a callback deadlocks.

use std::mem;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tracing::{debug, instrument};

use jsworker_common::{RuntimeConfig, WorkerError};
use jsworker_core::{EngineInstance, HostCallbacks, InstanceId, Registry, TerminateHandle};

use crate::logging::PrintLog;

enum WorkerState {
    Uninit,
    Live(EngineInstance),
    Disposed { last_exception: String },
}

/// Configures a [`Worker`].
#[derive(Debug, Default)]
pub struct WorkerBuilder {
    config: RuntimeConfig,
    callbacks: HostCallbacks,
    registry: Option<Arc<Registry>>,
}

impl WorkerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole runtime configuration.
    #[must_use]
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Install `$print` in the script global scope.
    #[must_use]
    pub fn enable_print(mut self, enable: bool) -> Self {
        self.config.engine.enable_print = enable;
        self
    }

    /// Handle messages script code sends with `$send`.
    #[must_use]
    pub fn handle_send(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.callbacks = self.callbacks.with_send(f);
        self
    }

    /// Answer messages script code sends with `$sendSync`.
    #[must_use]
    pub fn handle_send_sync(mut self, f: impl Fn(&str) -> String + Send + Sync + 'static) -> Self {
        self.callbacks = self.callbacks.with_send_sync(f);
        self
    }

    /// Supply module source text by fully qualified URL.
    #[must_use]
    pub fn module_source(
        mut self,
        f: impl Fn(&str) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        self.callbacks = self.callbacks.with_module_source(f);
        self
    }

    /// Resolve `(specifier, importer)` pairs to module URLs.
    #[must_use]
    pub fn resolve_module_url(
        mut self,
        f: impl Fn(&str, &str) -> String + Send + Sync + 'static,
    ) -> Self {
        self.callbacks = self.callbacks.with_resolve_module_url(f);
        self
    }

    /// Receive `$print` output instead of stdout.
    #[must_use]
    pub fn print_sink(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.callbacks = self.callbacks.with_print(f);
        self
    }

    /// Capture `$print` output in `log`. Implies [`WorkerBuilder::enable_print`].
    #[must_use]
    pub fn print_log(self, log: &PrintLog) -> Self {
        self.enable_print(true).print_sink(log.sink())
    }

    /// Register in `registry` instead of the process-wide one.
    #[must_use]
    pub fn registry(mut self, registry: Arc<Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn build(self) -> Worker {
        Worker {
            config: self.config,
            callbacks: self.callbacks,
            registry: self.registry.unwrap_or_else(Registry::global),
            state: Mutex::new(WorkerState::Uninit),
            terminate: OnceLock::new(),
        }
    }
}

/// Host handle for one script execution context.
pub struct Worker {
    config: RuntimeConfig,
    callbacks: HostCallbacks,
    registry: Arc<Registry>,
    state: Mutex<WorkerState>,
    terminate: OnceLock<TerminateHandle>,
}

impl Worker {
    /// Start configuring a worker.
    pub fn builder() -> WorkerBuilder {
        WorkerBuilder::new()
    }

    /// Evaluate a classic script.
    ///
    /// # Errors
    ///
    /// See [`EngineInstance::load_script`]. Returns [`WorkerError::Disposed`]
    /// after [`Worker::dispose`].
    #[instrument(skip(self, source))]
    pub fn load_script(&self, name: &str, source: &str) -> Result<(), WorkerError> {
        self.with_instance(|instance| instance.load_script(name, source))?
    }

    /// Load the module at `url` and its imports.
    ///
    /// # Errors
    ///
    /// See [`EngineInstance::load_module`]. Returns [`WorkerError::Disposed`]
    /// after [`Worker::dispose`].
    #[instrument(skip(self))]
    pub fn load_module(&self, url: &str) -> Result<(), WorkerError> {
        self.with_instance(|instance| instance.load_module(url))?
    }

    /// Deliver `message` to the script's `$recv` callback.
    ///
    /// # Errors
    ///
    /// See [`EngineInstance::send`]. Returns [`WorkerError::Disposed`]
    /// after [`Worker::dispose`].
    pub fn send(&self, message: &str) -> Result<(), WorkerError> {
        self.with_instance(|instance| instance.send(message))?
    }

    /// Deliver `message` to the script's `$recvSync` callback and return its
    /// answer, or a diagnostic string.
    pub fn send_sync(&self, message: &str) -> String {
        self.with_instance(|instance| instance.send_sync(message))
            .unwrap_or_else(|e| e.to_string())
    }

    /// Stop script code running in this worker. A no-op before first use.
    pub fn terminate(&self) {
        match self.terminate.get() {
            Some(handle) => handle.terminate(),
            None => debug!("Terminate ignored, worker not started"),
        }
    }

    /// Release the execution context. Idempotent.
    pub fn dispose(&self) {
        let mut state = self.state.lock();
        let previous = mem::replace(
            &mut *state,
            WorkerState::Disposed {
                last_exception: String::new(),
            },
        );
        match previous {
            WorkerState::Live(mut instance) => {
                instance.dispose();
                *state = WorkerState::Disposed {
                    last_exception: instance.last_exception().to_owned(),
                };
            }
            disposed @ WorkerState::Disposed { .. } => *state = disposed,
            WorkerState::Uninit => {}
        }
    }

    /// Formatted text of the most recent failure, or `""`.
    pub fn last_exception(&self) -> String {
        match &*self.state.lock() {
            WorkerState::Uninit => String::new(),
            WorkerState::Live(instance) => instance.last_exception().to_owned(),
            WorkerState::Disposed { last_exception } => last_exception.clone(),
        }
    }

    /// Registry id, once the instance exists.
    pub fn id(&self) -> Option<InstanceId> {
        match &*self.state.lock() {
            WorkerState::Live(instance) => Some(instance.id()),
            _ => None,
        }
    }

    pub fn is_disposed(&self) -> bool {
        matches!(*self.state.lock(), WorkerState::Disposed { .. })
    }

    fn with_instance<T>(
        &self,
        f: impl FnOnce(&mut EngineInstance) -> T,
    ) -> Result<T, WorkerError> {
        let mut state = self.state.lock();
        if matches!(*state, WorkerState::Uninit) {
            let instance = EngineInstance::init_in(
                &self.config,
                self.callbacks.clone(),
                self.registry.clone(),
            )?;
            let _ = self.terminate.set(instance.terminate_handle());
            *state = WorkerState::Live(instance);
        }
        match &mut *state {
            WorkerState::Live(instance) => Ok(f(instance)),
            _ => Err(WorkerError::Disposed),
        }
    }
}

impl Default for Worker {
    fn default() -> Self {
        WorkerBuilder::new().build()
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id())
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn isolated() -> WorkerBuilder {
        Worker::builder().registry(Arc::new(Registry::new()))
    }

    #[test]
    fn test_instance_is_created_lazily() {
        let registry = Arc::new(Registry::new());
        let worker = Worker::builder().registry(registry.clone()).build();

        assert!(worker.id().is_none());
        assert!(registry.is_empty());

        worker.load_script("a.js", "var a = 1;").unwrap();
        assert!(registry.contains(worker.id().unwrap()));
    }

    #[test]
    fn test_terminate_before_first_use_is_noop() {
        let worker = isolated().build();
        worker.terminate();

        assert!(worker.load_script("a.js", "var a = 1;").is_ok());
    }

    #[test]
    fn test_dispose_keeps_last_exception() {
        let worker = isolated().build();
        let err = worker.load_script("bad.js", "1+").unwrap_err();

        worker.dispose();
        worker.dispose();

        assert!(worker.is_disposed());
        assert_eq!(worker.last_exception(), err.to_string());
        assert_eq!(worker.load_script("a.js", "1"), Err(WorkerError::Disposed));
        assert_eq!(worker.send("x"), Err(WorkerError::Disposed));
        assert_eq!(worker.send_sync("x"), "jsworker: worker has been disposed");
    }

    #[test]
    fn test_dispose_before_first_use() {
        let registry = Arc::new(Registry::new());
        let worker = Worker::builder().registry(registry.clone()).build();
        worker.dispose();

        assert!(worker.is_disposed());
        assert_eq!(worker.load_module("m.js"), Err(WorkerError::Disposed));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_print_log() {
        let log = PrintLog::new("test");
        let worker = isolated().print_log(&log).build();

        worker.load_script("p.js", "$print('hello', 42);").unwrap();

        assert_eq!(log.messages(), vec!["hello 42".to_string()]);
    }
}
