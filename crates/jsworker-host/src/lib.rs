//! Host handle for jsworker.
//!
//! This crate is what application code embeds:
//!
//! - [`worker`]: [`Worker`], a lazily started, thread-safe handle to one
//!   script execution context, and its [`WorkerBuilder`]
//! - [`logging`]: sinks for script `$print` output
//!
//! # Example
//!
//! ```no_run
//! use jsworker_host::Worker;
//!
//! let worker = Worker::builder()
//!     .handle_send(|msg| println!("script said {msg}"))
//!     .build();
//!
//! worker
//!     .load_script("main.js", "$recv(function (m) { $send(m.toUpperCase()); });")
//!     .unwrap();
//! worker.send("hello").unwrap();
//! ```

pub mod logging;
pub mod worker;

pub use logging::{PrintEntry, PrintLog, stdout_sink};
pub use worker::{Worker, WorkerBuilder};
