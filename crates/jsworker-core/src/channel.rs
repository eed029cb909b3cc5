//! Host-to-script messaging.
//!
//! `send` delivers a string to the function registered with `$recv` and
//! reports failures as errors. `send_sync` delivers to the `$recvSync`
//! function and always yields a string; problems on that path are answered
//! with one of the fixed diagnostics below.

use rquickjs::{CatchResultExt, Value};
use tracing::trace;

use jsworker_common::WorkerError;

use crate::boundary::{RECV, RECV_SYNC};
use crate::exception;
use crate::isolate::{IsolateCore, SyncReply};

/// Answer to `send_sync` when no `$recvSync` function is registered.
pub const RECV_SYNC_NOT_REGISTERED: &str = "jsworker: callback not registered with $recvSync";

/// Answer to `send_sync` when the `$recvSync` function returns a non-string
/// or throws.
pub const NON_STRING_RESPONSE: &str = "jsworker: non-string return value";

/// Answer to `$sendSync` when the host has no synchronous handler.
pub const HANDLE_SEND_SYNC_UNSET: &str = "jsworker: handle_send_sync is not set";

pub(crate) fn send(core: &IsolateCore, message: &str) -> Result<(), WorkerError> {
    core.context.with(|ctx| {
        let callback = core
            .receivers
            .recv(&ctx)
            .map_err(|e| WorkerError::engine_fatal(format!("Lost {RECV} callback: {e}")))?
            .ok_or_else(|| WorkerError::callback_not_registered(RECV))?;

        trace!(instance_id = %core.id, len = message.len(), "Delivering message");
        callback
            .call::<_, ()>((message,))
            .catch(&ctx)
            .map_err(|caught| {
                let name = core.last_script();
                core.failure(exception::capture(&ctx, caught, &core.sources, &name))
            })
    })
}

pub(crate) fn send_sync(core: &IsolateCore, message: &str) -> SyncReply {
    core.context.with(|ctx| {
        let callback = match core.receivers.recv_sync(&ctx) {
            Ok(Some(callback)) => callback,
            Ok(None) => return SyncReply::ok(RECV_SYNC_NOT_REGISTERED),
            Err(e) => {
                return SyncReply {
                    response: NON_STRING_RESPONSE.to_owned(),
                    failure: Some(WorkerError::engine_fatal(format!(
                        "Lost {RECV_SYNC} callback: {e}"
                    ))),
                };
            }
        };

        trace!(instance_id = %core.id, len = message.len(), "Delivering sync message");
        match callback.call::<_, Value>((message,)).catch(&ctx) {
            Ok(value) => {
                let text = value.as_string().and_then(|s| s.to_string().ok());
                SyncReply::ok(text.unwrap_or_else(|| NON_STRING_RESPONSE.to_owned()))
            }
            Err(caught) => {
                let name = core.last_script();
                SyncReply {
                    response: NON_STRING_RESPONSE.to_owned(),
                    failure: Some(core.failure(exception::capture(
                        &ctx,
                        caught,
                        &core.sources,
                        &name,
                    ))),
                }
            }
        }
    })
}
