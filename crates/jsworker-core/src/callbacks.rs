//! Host callbacks reachable from script code.
//!
//! The engine never holds a reference to host objects. Instead the owner
//! thread of an instance looks its [`HostCallbacks`] up in the
//! [`Registry`](crate::Registry) by numeric id whenever a boundary function
//! fires.

use std::fmt;
use std::sync::Arc;

/// Handles messages from `$send` calls.
pub type SendCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Handles messages from `$sendSync` calls; the return value goes back to script.
pub type SendSyncCallback = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Maps a fully qualified module URL to its source text.
pub type ModuleSourceCallback = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Maps `(specifier, importer)` to a fully qualified module URL.
pub type ResolveModuleUrlCallback = Arc<dyn Fn(&str, &str) -> String + Send + Sync>;

/// Receives one line of `$print` output.
pub type PrintCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// The host side of one engine instance.
#[derive(Clone, Default)]
pub struct HostCallbacks {
    /// Receives `$send` messages. Unset messages are dropped.
    pub handle_send: Option<SendCallback>,

    /// Answers `$sendSync` messages. Unset answers with a fixed diagnostic.
    pub handle_send_sync: Option<SendSyncCallback>,

    /// Supplies module source text. Required for module loading.
    pub module_source: Option<ModuleSourceCallback>,

    /// Resolves import specifiers. Unset falls back to relative URL joining.
    pub resolve_module_url: Option<ResolveModuleUrlCallback>,

    /// Receives `$print` output. Unset writes to stdout.
    pub print: Option<PrintCallback>,
}

impl HostCallbacks {
    /// Create an empty callback set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the `$send` handler.
    #[must_use]
    pub fn with_send(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.handle_send = Some(Arc::new(f));
        self
    }

    /// Set the `$sendSync` handler.
    #[must_use]
    pub fn with_send_sync(mut self, f: impl Fn(&str) -> String + Send + Sync + 'static) -> Self {
        self.handle_send_sync = Some(Arc::new(f));
        self
    }

    /// Set the module source resolver.
    #[must_use]
    pub fn with_module_source(
        mut self,
        f: impl Fn(&str) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        self.module_source = Some(Arc::new(f));
        self
    }

    /// Set the module URL resolver.
    #[must_use]
    pub fn with_resolve_module_url(
        mut self,
        f: impl Fn(&str, &str) -> String + Send + Sync + 'static,
    ) -> Self {
        self.resolve_module_url = Some(Arc::new(f));
        self
    }

    /// Set the `$print` sink.
    #[must_use]
    pub fn with_print(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.print = Some(Arc::new(f));
        self
    }
}

impl fmt::Debug for HostCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostCallbacks")
            .field("handle_send", &self.handle_send.is_some())
            .field("handle_send_sync", &self.handle_send_sync.is_some())
            .field("module_source", &self.module_source.is_some())
            .field("resolve_module_url", &self.resolve_module_url.is_some())
            .field("print", &self.print.is_some())
            .finish()
    }
}
