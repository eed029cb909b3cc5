//! The owner thread of one execution context.
//!
//! A QuickJS runtime and context must stay on the thread that created them.
//! [`spawn`] starts a dedicated thread that builds both, installs the
//! boundary functions and module loader, then executes [`Command`]s one at a
//! time until it is told to shut down.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rquickjs::{CatchResultExt, Context, Runtime};
use tracing::{debug, warn};

use jsworker_common::{RuntimeConfig, WorkerError};

use crate::boundary::{self, Receivers};
use crate::engine::{self, InterruptCause, InterruptState};
use crate::exception::{self, Captured, SourceMap};
use crate::loader::{self, ModuleFailure};
use crate::{InstanceId, Registry, channel};

/// Work for the owner thread.
pub(crate) enum Command {
    LoadScript {
        name: String,
        source: String,
        reply: Sender<Result<(), WorkerError>>,
    },
    LoadModule {
        url: String,
        reply: Sender<Result<(), WorkerError>>,
    },
    Send {
        message: String,
        reply: Sender<Result<(), WorkerError>>,
    },
    SendSync {
        message: String,
        reply: Sender<SyncReply>,
    },
    Shutdown,
}

/// Outcome of a synchronous send.
///
/// `response` is always present; `failure` records an exception thrown by
/// the script-side callback.
#[derive(Debug)]
pub(crate) struct SyncReply {
    pub(crate) response: String,
    pub(crate) failure: Option<WorkerError>,
}

impl SyncReply {
    pub(crate) fn ok(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            failure: None,
        }
    }
}

/// Result of a command that a later failure can still overturn.
pub(crate) trait CallOutcome {
    /// Record `error` unless the call already failed.
    fn or_failure(self, error: WorkerError) -> Self;
}

impl CallOutcome for Result<(), WorkerError> {
    fn or_failure(self, error: WorkerError) -> Self {
        self.and(Err(error))
    }
}

impl CallOutcome for SyncReply {
    fn or_failure(mut self, error: WorkerError) -> Self {
        self.failure.get_or_insert(error);
        self
    }
}

/// Engine state owned by the instance thread.
pub(crate) struct IsolateCore {
    pub(crate) id: InstanceId,
    pub(crate) registry: Arc<Registry>,
    pub(crate) receivers: Rc<Receivers>,
    pub(crate) sources: SourceMap,
    pub(crate) module_failure: ModuleFailure,
    interrupt: Arc<InterruptState>,
    timeout: Option<Duration>,
    last_script: RefCell<String>,
    // Declared before `runtime` so the context is freed first.
    pub(crate) context: Context,
    runtime: Runtime,
}

impl IsolateCore {
    fn new(
        id: InstanceId,
        registry: Arc<Registry>,
        config: &RuntimeConfig,
        interrupt: Arc<InterruptState>,
    ) -> Result<Self, WorkerError> {
        let (runtime, context) = engine::create_runtime(&config.engine, interrupt.clone())?;

        let sources = SourceMap::default();
        let module_failure = ModuleFailure::default();
        loader::install(
            &runtime,
            id,
            registry.clone(),
            sources.clone(),
            module_failure.clone(),
        );

        let receivers = Rc::new(Receivers::default());
        context
            .with(|ctx| {
                boundary::install(
                    &ctx,
                    id,
                    &registry,
                    &receivers,
                    config.engine.enable_print,
                )
            })
            .map_err(|e| {
                WorkerError::engine_fatal(format!("Failed to install boundary functions: {e}"))
            })?;

        Ok(Self {
            id,
            registry,
            receivers,
            sources,
            module_failure,
            interrupt,
            timeout: config.execution.timeout(),
            last_script: RefCell::new(crate::exception::ANONYMOUS_SCRIPT.to_owned()),
            context,
            runtime,
        })
    }

    fn run(self, commands: &Receiver<Command>) {
        while let Ok(command) = commands.recv() {
            match command {
                Command::LoadScript {
                    name,
                    source,
                    reply,
                } => {
                    let result = self.call(|core| loader::load_script(core, &name, &source));
                    let _ = reply.send(result);
                }
                Command::LoadModule { url, reply } => {
                    let result = self.call(|core| loader::load_module(core, &url));
                    let _ = reply.send(result);
                }
                Command::Send { message, reply } => {
                    let result = self.call(|core| channel::send(core, &message));
                    let _ = reply.send(result);
                }
                Command::SendSync { message, reply } => {
                    let result = self.call(|core| channel::send_sync(core, &message));
                    let _ = reply.send(result);
                }
                Command::Shutdown => break,
            }
        }
        self.shutdown();
    }

    /// Run one call with interruption armed, then flush promise jobs it queued.
    ///
    /// A job stopped by terminate or the deadline fails the call.
    fn call<T: CallOutcome>(&self, f: impl FnOnce(&Self) -> T) -> T {
        self.interrupt.arm(self.timeout);
        let out = f(self);
        let interrupted = self.drain_jobs();
        self.interrupt.disarm();
        match interrupted {
            Some(error) => out.or_failure(error),
            None => out,
        }
    }

    /// Run queued jobs until none remain. Returns the first interruption.
    fn drain_jobs(&self) -> Option<WorkerError> {
        let mut interrupted = None;
        loop {
            match self.runtime.execute_pending_job() {
                Ok(true) => {}
                Ok(false) => break,
                Err(_) => {
                    // The job left its exception pending; it must be taken
                    // before the next job runs or the context is released.
                    let error = self.context.with(|ctx| {
                        let caught = Err::<(), _>(rquickjs::Error::Exception)
                            .catch(&ctx)
                            .err()?;
                        let name = self.last_script();
                        let captured = exception::capture(&ctx, caught, &self.sources, &name);
                        self.interrupted(captured)
                    });
                    match error {
                        Some(error) if interrupted.is_none() => {
                            warn!(instance_id = %self.id, error = %error, "Pending job interrupted");
                            interrupted = Some(error);
                        }
                        Some(_) => {}
                        None => {
                            warn!(instance_id = %self.id, "Pending job threw an uncaught exception");
                        }
                    }
                }
            }
        }
        interrupted
    }

    /// The interruption behind `captured`, if terminate or the deadline
    /// stopped the code that raised it.
    fn interrupted(&self, captured: Captured) -> Option<WorkerError> {
        let cause = self.interrupt.take_cause()?;
        Some(classify(Some(cause), captured))
    }

    /// Classify a captured failure into the error returned to the host.
    pub(crate) fn failure(&self, captured: Captured) -> WorkerError {
        classify(self.interrupt.take_cause(), captured)
    }

    /// Name of the most recently loaded script.
    ///
    /// QuickJS reports every evaluated script under the same anonymous file
    /// name, so failures raised later from callbacks are attributed to it.
    pub(crate) fn last_script(&self) -> String {
        self.last_script.borrow().clone()
    }

    pub(crate) fn set_last_script(&self, name: &str) {
        name.clone_into(&mut self.last_script.borrow_mut());
    }

    fn shutdown(self) {
        // Persistent handles must be released while the runtime is alive.
        self.receivers.clear();
        debug!(instance_id = %self.id, "Execution context released");
    }
}

fn classify(cause: Option<InterruptCause>, captured: Captured) -> WorkerError {
    let diagnostic = captured.diagnostic.format();
    match cause {
        Some(InterruptCause::Terminate) => WorkerError::interrupted(diagnostic),
        Some(InterruptCause::Deadline(timeout)) => WorkerError::ExecutionTimeout {
            duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        },
        None if captured.compile_error => WorkerError::compile(diagnostic),
        None => WorkerError::runtime(diagnostic),
    }
}

/// Start the owner thread for instance `id` and wait for it to come up.
///
/// # Errors
///
/// Returns [`WorkerError::EngineFatal`] if the thread cannot be spawned or
/// the engine fails to initialize on it.
pub(crate) fn spawn(
    id: InstanceId,
    registry: Arc<Registry>,
    config: RuntimeConfig,
    interrupt: Arc<InterruptState>,
) -> Result<(Sender<Command>, JoinHandle<()>), WorkerError> {
    let (command_tx, command_rx) = mpsc::channel::<Command>();
    let (ready_tx, ready_rx) = mpsc::channel::<Result<(), WorkerError>>();

    let handle = thread::Builder::new()
        .name(format!("jsworker-{id}"))
        .spawn(move || match IsolateCore::new(id, registry, &config, interrupt) {
            Ok(core) => {
                let _ = ready_tx.send(Ok(()));
                core.run(&command_rx);
            }
            Err(e) => {
                let _ = ready_tx.send(Err(e));
            }
        })
        .map_err(|e| WorkerError::engine_fatal(format!("Failed to spawn engine thread: {e}")))?;

    match ready_rx.recv() {
        Ok(Ok(())) => Ok((command_tx, handle)),
        Ok(Err(e)) => {
            let _ = handle.join();
            Err(e)
        }
        Err(_) => Err(WorkerError::engine_fatal(
            "Engine thread exited during initialization",
        )),
    }
}
