//! Engine instance lifecycle.
//!
//! An [`EngineInstance`] owns one execution context running on its own
//! thread. Every operation is forwarded to that thread and waited for, so
//! calls on one instance are serialized. Only [`EngineInstance::terminate`]
//! and a [`TerminateHandle`] bypass the queue; they flip a flag the engine
//! polls while script code runs.
//!
//! Dispose tears down in this order:
//!
//! 1. The registry entry is removed, so late boundary calls find nothing.
//! 2. The owner thread releases script handles, then the context, then the
//!    runtime.
//! 3. The owner thread is joined.

use std::sync::Arc;
use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle};

use tracing::{debug, error, info, instrument, warn};

use jsworker_common::{RuntimeConfig, WorkerError};

use crate::engine::{self, InterruptState};
use crate::isolate::{self, Command, SyncReply};
use crate::{HostCallbacks, InstanceId, Registry};

/// A live execution context and its host bindings.
pub struct EngineInstance {
    id: InstanceId,
    registry: Arc<Registry>,
    commands: Option<Sender<Command>>,
    thread: Option<JoinHandle<()>>,
    interrupt: Arc<InterruptState>,
    last_exception: String,
}

impl EngineInstance {
    /// Create an instance registered in the process-wide registry.
    ///
    /// # Errors
    ///
    /// See [`EngineInstance::init_in`].
    pub fn init(config: &RuntimeConfig, callbacks: HostCallbacks) -> Result<Self, WorkerError> {
        Self::init_in(config, callbacks, Registry::global())
    }

    /// Create an instance registered in `registry`.
    ///
    /// Bootstraps the engine on first use, then creates a fresh context
    /// with the boundary functions installed.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::InvalidConfig`] for unusable settings,
    /// [`WorkerError::IdsExhausted`] if the registry cannot issue
    /// another id, or [`WorkerError::EngineFatal`] if the context cannot be
    /// created. Nothing stays registered on failure.
    #[instrument(skip_all)]
    pub fn init_in(
        config: &RuntimeConfig,
        callbacks: HostCallbacks,
        registry: Arc<Registry>,
    ) -> Result<Self, WorkerError> {
        config.validate()?;
        engine::global_init();
        let id = registry.register(callbacks)?;
        let interrupt = Arc::new(InterruptState::default());

        match isolate::spawn(id, registry.clone(), config.clone(), interrupt.clone()) {
            Ok((commands, thread)) => {
                info!(instance_id = %id, "Engine instance created");
                Ok(Self {
                    id,
                    registry,
                    commands: Some(commands),
                    thread: Some(thread),
                    interrupt,
                    last_exception: String::new(),
                })
            }
            Err(e) => {
                registry.remove(id);
                error!(instance_id = %id, error = %e, "Engine instance failed to start");
                Err(e)
            }
        }
    }

    /// The registry id of this instance.
    pub fn id(&self) -> InstanceId {
        self.id
    }

    /// Evaluate a classic script. `name` is used in diagnostics.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::Compile`] for syntax errors,
    /// [`WorkerError::Runtime`] for uncaught exceptions, and
    /// [`WorkerError::Interrupted`] or [`WorkerError::ExecutionTimeout`] when
    /// execution was stopped.
    #[instrument(skip(self, source), fields(instance_id = %self.id))]
    pub fn load_script(&mut self, name: &str, source: &str) -> Result<(), WorkerError> {
        let result = self.request(|reply| Command::LoadScript {
            name: name.to_owned(),
            source: source.to_owned(),
            reply,
        });
        self.record(result)
    }

    /// Fetch, link and evaluate the module at `url` and everything it imports.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::ModuleResolution`] when a source cannot be
    /// obtained, otherwise the same errors as [`EngineInstance::load_script`].
    #[instrument(skip(self), fields(instance_id = %self.id))]
    pub fn load_module(&mut self, url: &str) -> Result<(), WorkerError> {
        let result = self.request(|reply| Command::LoadModule {
            url: url.to_owned(),
            reply,
        });
        self.record(result)
    }

    /// Deliver `message` to the function registered with `$recv`.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::CallbackNotRegistered`] if script has not
    /// called `$recv`, or the exception thrown by the callback.
    pub fn send(&mut self, message: &str) -> Result<(), WorkerError> {
        let result = self.request(|reply| Command::Send {
            message: message.to_owned(),
            reply,
        });
        self.record(result)
    }

    /// Deliver `message` to the function registered with `$recvSync` and
    /// return its answer.
    ///
    /// Never fails. Missing callbacks, non-string results and exceptions are
    /// answered with a fixed diagnostic; exceptions are also recorded in
    /// [`EngineInstance::last_exception`].
    pub fn send_sync(&mut self, message: &str) -> String {
        let Some(commands) = &self.commands else {
            return WorkerError::Disposed.to_string();
        };

        let (reply, response) = mpsc::channel::<SyncReply>();
        let sent = commands.send(Command::SendSync {
            message: message.to_owned(),
            reply,
        });
        let reply = match sent {
            Ok(()) => response.recv().map_err(|_| engine_gone()),
            Err(_) => Err(engine_gone()),
        };

        match reply {
            Ok(SyncReply { response, failure }) => {
                if let Some(failure) = failure {
                    self.last_exception = failure.to_string();
                }
                response
            }
            Err(e) => {
                let text = e.to_string();
                self.last_exception.clone_from(&text);
                text
            }
        }
    }

    /// Stop script code currently running in this instance.
    ///
    /// Callable from any thread. A request that arrives while no script is
    /// running is discarded when the next call starts.
    pub fn terminate(&self) {
        debug!(instance_id = %self.id, "Terminate requested");
        self.interrupt.request_terminate();
    }

    /// A cloneable, thread-safe handle for [`EngineInstance::terminate`].
    pub fn terminate_handle(&self) -> TerminateHandle {
        TerminateHandle {
            id: self.id,
            interrupt: self.interrupt.clone(),
        }
    }

    /// Formatted text of the most recent failure, or `""` if none occurred.
    pub fn last_exception(&self) -> &str {
        &self.last_exception
    }

    /// Returns `true` once [`EngineInstance::dispose`] has run.
    pub fn is_disposed(&self) -> bool {
        self.commands.is_none()
    }

    /// Release the context and unregister the instance. Idempotent.
    pub fn dispose(&mut self) {
        let Some(commands) = self.commands.take() else {
            return;
        };

        self.registry.remove(self.id);
        let _ = commands.send(Command::Shutdown);
        drop(commands);

        if let Some(thread) = self.thread.take() {
            if thread.thread().id() == thread::current().id() {
                warn!(instance_id = %self.id, "Dispose called from the engine thread, not joining");
            } else if thread.join().is_err() {
                error!(instance_id = %self.id, "Engine thread panicked");
            }
        }
        info!(instance_id = %self.id, "Engine instance disposed");
    }

    fn request(
        &self,
        make: impl FnOnce(Sender<Result<(), WorkerError>>) -> Command,
    ) -> Result<(), WorkerError> {
        let commands = self.commands.as_ref().ok_or(WorkerError::Disposed)?;
        let (reply, response) = mpsc::channel();
        commands.send(make(reply)).map_err(|_| engine_gone())?;
        response.recv().map_err(|_| engine_gone())?
    }

    fn record(&mut self, result: Result<(), WorkerError>) -> Result<(), WorkerError> {
        if let Err(e) = &result {
            if *e != WorkerError::Disposed {
                self.last_exception = e.to_string();
            }
        }
        result
    }
}

impl Drop for EngineInstance {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for EngineInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineInstance")
            .field("id", &self.id)
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

/// Requests termination of an instance from any thread.
#[derive(Debug, Clone)]
pub struct TerminateHandle {
    id: InstanceId,
    interrupt: Arc<InterruptState>,
}

impl TerminateHandle {
    /// See [`EngineInstance::terminate`].
    pub fn terminate(&self) {
        debug!(instance_id = %self.id, "Terminate requested");
        self.interrupt.request_terminate();
    }
}

fn engine_gone() -> WorkerError {
    WorkerError::engine_fatal("Engine thread is no longer running")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(registry: &Arc<Registry>) -> EngineInstance {
        EngineInstance::init_in(&RuntimeConfig::default(), HostCallbacks::new(), registry.clone())
            .unwrap()
    }

    #[test]
    fn test_init_registers_and_dispose_unregisters() {
        let registry = Arc::new(Registry::new());
        let mut instance = instance(&registry);
        let id = instance.id();

        assert!(registry.contains(id));
        instance.dispose();
        assert!(!registry.contains(id));
        assert!(instance.is_disposed());

        instance.dispose();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_invalid_config_registers_nothing() {
        let registry = Arc::new(Registry::new());
        let mut config = RuntimeConfig::default();
        config.engine.max_stack_size_kb = 0;

        let err = EngineInstance::init_in(&config, HostCallbacks::new(), registry.clone())
            .unwrap_err();

        assert!(matches!(err, WorkerError::InvalidConfig { .. }));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_drop_unregisters() {
        let registry = Arc::new(Registry::new());
        let id = instance(&registry).id();
        assert!(!registry.contains(id));
    }

    #[test]
    fn test_calls_after_dispose() {
        let registry = Arc::new(Registry::new());
        let mut instance = instance(&registry);
        instance.dispose();

        assert_eq!(instance.load_script("a.js", "1"), Err(WorkerError::Disposed));
        assert_eq!(instance.send("x"), Err(WorkerError::Disposed));
        assert_eq!(instance.send_sync("x"), WorkerError::Disposed.to_string());
        assert_eq!(instance.last_exception(), "");
    }

    #[test]
    fn test_terminate_while_idle_is_discarded() {
        let registry = Arc::new(Registry::new());
        let mut instance = instance(&registry);

        instance.terminate();
        assert!(instance.load_script("a.js", "var a = 1;").is_ok());
    }
}
