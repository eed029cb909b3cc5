//! Native functions installed on the script global object.
//!
//! Every function captures only the instance id and the registry. Host
//! callbacks are looked up per call, so a function that fires after its
//! instance was disposed finds nothing and does nothing.

use std::cell::RefCell;
use std::io::{self, Write};
use std::rc::Rc;
use std::sync::Arc;

use rquickjs::convert::Coerced;
use rquickjs::prelude::Rest;
use rquickjs::{Ctx, Function, Persistent};
use tracing::{debug, trace};

use crate::channel::HANDLE_SEND_SYNC_UNSET;
use crate::{InstanceId, Registry};

/// Writes its arguments, space separated, as one line.
pub const PRINT: &str = "$print";
/// Registers the asynchronous message receiver.
pub const RECV: &str = "$recv";
/// Registers the synchronous message receiver.
pub const RECV_SYNC: &str = "$recvSync";
/// Delivers a string to the host asynchronous handler.
pub const SEND: &str = "$send";
/// Delivers a string to the host synchronous handler and returns its answer.
pub const SEND_SYNC: &str = "$sendSync";

type Slot = RefCell<Option<Persistent<Function<'static>>>>;

/// Script functions registered through `$recv` and `$recvSync`.
///
/// Lives on the owner thread; registering again replaces the previous
/// function.
#[derive(Default)]
pub(crate) struct Receivers {
    recv: Slot,
    recv_sync: Slot,
}

impl Receivers {
    pub(crate) fn recv<'js>(&self, ctx: &Ctx<'js>) -> rquickjs::Result<Option<Function<'js>>> {
        Self::restore(&self.recv, ctx)
    }

    pub(crate) fn recv_sync<'js>(
        &self,
        ctx: &Ctx<'js>,
    ) -> rquickjs::Result<Option<Function<'js>>> {
        Self::restore(&self.recv_sync, ctx)
    }

    pub(crate) fn clear(&self) {
        self.recv.borrow_mut().take();
        self.recv_sync.borrow_mut().take();
    }

    fn restore<'js>(slot: &Slot, ctx: &Ctx<'js>) -> rquickjs::Result<Option<Function<'js>>> {
        let saved = slot.borrow().clone();
        saved.map(|f| f.restore(ctx)).transpose()
    }
}

/// Install the boundary functions on the global object of `ctx`.
///
/// `$print` is only installed when `enable_print` is set.
pub(crate) fn install<'js>(
    ctx: &Ctx<'js>,
    id: InstanceId,
    registry: &Arc<Registry>,
    receivers: &Rc<Receivers>,
    enable_print: bool,
) -> rquickjs::Result<()> {
    let globals = ctx.globals();

    if enable_print {
        let registry = registry.clone();
        globals.set(
            PRINT,
            Function::new(ctx.clone(), move |args: Rest<Coerced<String>>| {
                let line = args
                    .0
                    .into_iter()
                    .map(|c| c.0)
                    .collect::<Vec<_>>()
                    .join(" ");
                print_line(&registry, id, &line);
            })?,
        )?;
    }

    let slots = receivers.clone();
    globals.set(
        RECV,
        Function::new(ctx.clone(), move |ctx: Ctx<'js>, callback: Function<'js>| {
            slots.recv.replace(Some(Persistent::save(&ctx, callback)));
            trace!(instance_id = %id, "Async receiver registered");
        })?,
    )?;

    let slots = receivers.clone();
    globals.set(
        RECV_SYNC,
        Function::new(ctx.clone(), move |ctx: Ctx<'js>, callback: Function<'js>| {
            slots.recv_sync.replace(Some(Persistent::save(&ctx, callback)));
            trace!(instance_id = %id, "Sync receiver registered");
        })?,
    )?;

    let host = registry.clone();
    globals.set(
        SEND,
        Function::new(ctx.clone(), move |message: String| {
            let handler = host.lookup(id).and_then(|c| c.handle_send.clone());
            match handler {
                Some(handle_send) => handle_send(&message),
                None => debug!(instance_id = %id, "Dropping $send message, no handler"),
            }
        })?,
    )?;

    let host = registry.clone();
    globals.set(
        SEND_SYNC,
        Function::new(ctx.clone(), move |message: String| -> String {
            let handler = host.lookup(id).and_then(|c| c.handle_send_sync.clone());
            match handler {
                Some(handle_send_sync) => handle_send_sync(&message),
                None => HANDLE_SEND_SYNC_UNSET.to_owned(),
            }
        })?,
    )?;

    Ok(())
}

fn print_line(registry: &Registry, id: InstanceId, line: &str) {
    trace!(instance_id = %id, line, "$print");
    match registry.lookup(id).and_then(|c| c.print.clone()) {
        Some(print) => print(line),
        None => {
            let mut out = io::stdout().lock();
            let _ = writeln!(out, "{line}");
            let _ = out.flush();
        }
    }
}
