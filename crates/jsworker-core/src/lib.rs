//! Embedding core for jsworker.
//!
//! This crate hosts QuickJS execution contexts and connects them to host
//! code:
//! - [`EngineInstance`]: one execution context, its lifecycle and messaging
//! - [`Registry`]: id-based indirection from script boundary calls to host
//!   callbacks
//! - [`HostCallbacks`]: the functions script code can reach
//! - [`Diagnostic`]: formatted script failures
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────┐   commands    ┌──────────────────────────┐
//! │      EngineInstance       │ ────────────▶ │      owner thread        │
//! │  (host side, any thread)  │ ◀──────────── │  Runtime + Context       │
//! └───────────────────────────┘    replies    │  $recv / $recvSync slots │
//!        │ terminate()                        └──────────────────────────┘
//!        ▼                                                │ $send, $sendSync,
//!  InterruptState (polled by the engine)                  │ imports, $print
//!                                                         ▼
//!                                          Registry: InstanceId → HostCallbacks
//! ```

mod boundary;
pub mod callbacks;
mod channel;
pub mod engine;
pub mod exception;
pub mod instance;
mod isolate;
mod loader;
pub mod registry;

pub use boundary::{PRINT, RECV, RECV_SYNC, SEND, SEND_SYNC};
pub use callbacks::HostCallbacks;
pub use channel::{HANDLE_SEND_SYNC_UNSET, NON_STRING_RESPONSE, RECV_SYNC_NOT_REGISTERED};
pub use engine::{global_init, version};
pub use exception::{Diagnostic, Location};
pub use instance::{EngineInstance, TerminateHandle};
pub use loader::resolve_specifier;
pub use registry::{InstanceId, Registry};
