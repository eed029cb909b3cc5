//! QuickJS engine bootstrap and per-instance runtime construction.
//!
//! The process-wide [`Engine`] is created exactly once, no matter how many
//! instances are started concurrently. Each instance then gets its own
//! QuickJS runtime configured from [`EngineConfig`], wired to an
//! [`InterruptState`] so that terminate requests and call deadlines can stop
//! running script code from another thread.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rquickjs::{Context, Runtime};
use tracing::{debug, info};

use jsworker_common::{EngineConfig, WorkerError};

/// Name reported by [`version`].
pub const ENGINE_NAME: &str = "QuickJS";

/// Binding layer version reported by [`version`].
const BINDING: &str = "rquickjs 0.9";

static ENGINE: OnceLock<Engine> = OnceLock::new();
static BOOTSTRAP_RUNS: AtomicUsize = AtomicUsize::new(0);

/// Process-wide engine state.
#[derive(Debug)]
pub struct Engine {
    version: String,
    initialized_at: Instant,
}

impl Engine {
    /// Engine version string.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// When the bootstrap ran.
    pub fn initialized_at(&self) -> Instant {
        self.initialized_at
    }
}

/// Bootstrap the engine once per process and return it.
///
/// Safe to call from any number of threads; the bootstrap body runs once
/// and every caller observes its result.
pub fn global_init() -> &'static Engine {
    ENGINE.get_or_init(|| {
        BOOTSTRAP_RUNS.fetch_add(1, Ordering::SeqCst);
        let engine = Engine {
            version: format!("{ENGINE_NAME} ({BINDING}, jsworker {})", env!("CARGO_PKG_VERSION")),
            initialized_at: Instant::now(),
        };
        info!(version = %engine.version, "Engine initialized");
        engine
    })
}

/// The engine version, e.g. `"QuickJS (rquickjs 0.9, jsworker 0.1.0)"`.
pub fn version() -> &'static str {
    global_init().version()
}

/// How many times the bootstrap body has executed in this process.
pub fn bootstrap_runs() -> usize {
    BOOTSTRAP_RUNS.load(Ordering::SeqCst)
}

/// Why running script code was stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptCause {
    /// A terminate request arrived.
    Terminate,
    /// The per-call deadline passed.
    Deadline(Duration),
}

/// Interruption signals shared between an instance's owner thread and the
/// threads that may ask it to stop.
///
/// The QuickJS interrupt handler polls [`InterruptState::poll`] at the
/// engine's own safe points.
#[derive(Debug, Default)]
pub struct InterruptState {
    terminate: AtomicBool,
    deadline: Mutex<Option<(Instant, Duration)>>,
    cause: Mutex<Option<InterruptCause>>,
}

impl InterruptState {
    /// Ask currently running script code to stop.
    pub fn request_terminate(&self) {
        self.terminate.store(true, Ordering::SeqCst);
    }

    /// Prepare for a new call: drop stale requests and set the deadline.
    pub(crate) fn arm(&self, timeout: Option<Duration>) {
        self.terminate.store(false, Ordering::SeqCst);
        *self.cause.lock() = None;
        *self.deadline.lock() = timeout.map(|t| (Instant::now() + t, t));
    }

    /// Clear the deadline after a call returns.
    pub(crate) fn disarm(&self) {
        *self.deadline.lock() = None;
    }

    /// The cause of the last interruption during the current call, if any.
    pub(crate) fn take_cause(&self) -> Option<InterruptCause> {
        self.cause.lock().take()
    }

    fn poll(&self) -> bool {
        if self.terminate.swap(false, Ordering::SeqCst) {
            *self.cause.lock() = Some(InterruptCause::Terminate);
            return true;
        }
        let deadline = *self.deadline.lock();
        let expired = deadline.and_then(|(at, timeout)| (Instant::now() >= at).then_some(timeout));
        if let Some(timeout) = expired {
            *self.cause.lock() = Some(InterruptCause::Deadline(timeout));
            return true;
        }
        false
    }
}

/// Create the QuickJS runtime and full context backing one instance.
///
/// # Errors
///
/// Returns [`WorkerError::EngineFatal`] if QuickJS cannot allocate the
/// runtime or context.
pub(crate) fn create_runtime(
    config: &EngineConfig,
    interrupt: Arc<InterruptState>,
) -> Result<(Runtime, Context), WorkerError> {
    let runtime = Runtime::new()
        .map_err(|e| WorkerError::engine_fatal(format!("Failed to create QuickJS runtime: {e}")))?;

    if let Some(limit) = config.memory_limit_bytes() {
        runtime.set_memory_limit(limit);
    }
    runtime.set_max_stack_size(config.max_stack_size_bytes());
    if let Some(threshold) = config.gc_threshold_bytes() {
        runtime.set_gc_threshold(threshold);
    }
    runtime.set_interrupt_handler(Some(Box::new(move || interrupt.poll())));

    let context = Context::full(&runtime)
        .map_err(|e| WorkerError::engine_fatal(format!("Failed to create QuickJS context: {e}")))?;

    debug!(
        memory_limit_mb = config.memory_limit_mb,
        max_stack_size_kb = config.max_stack_size_kb,
        "QuickJS runtime created"
    );

    Ok((runtime, context))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_bootstrap_runs_once_under_concurrency() {
        let handles: Vec<_> = (0..16)
            .map(|_| thread::spawn(|| global_init() as *const Engine as usize))
            .collect();

        let addrs: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert!(addrs.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(bootstrap_runs(), 1);
    }

    #[test]
    fn test_version() {
        assert!(version().starts_with(ENGINE_NAME));
        assert_eq!(version(), global_init().version());
    }

    #[test]
    fn test_terminate_request_is_consumed_once() {
        let state = InterruptState::default();
        state.request_terminate();

        assert!(state.poll());
        assert!(!state.poll());
        assert_eq!(state.take_cause(), Some(InterruptCause::Terminate));
        assert_eq!(state.take_cause(), None);
    }

    #[test]
    fn test_arm_discards_stale_terminate() {
        let state = InterruptState::default();
        state.request_terminate();
        state.arm(None);

        assert!(!state.poll());
        assert_eq!(state.take_cause(), None);
    }

    #[test]
    fn test_deadline() {
        let state = InterruptState::default();
        state.arm(Some(Duration::ZERO));

        assert!(state.poll());
        assert_eq!(
            state.take_cause(),
            Some(InterruptCause::Deadline(Duration::ZERO))
        );

        state.disarm();
        assert!(!state.poll());
    }

    #[test]
    fn test_create_runtime() {
        let config = EngineConfig {
            memory_limit_mb: 16,
            gc_threshold_kb: Some(256),
            ..Default::default()
        };
        let result = create_runtime(&config, Arc::new(InterruptState::default()));
        assert!(result.is_ok());
    }
}
