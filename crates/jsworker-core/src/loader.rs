//! Script and module loading.
//!
//! Classic scripts are evaluated in sloppy mode on the global scope. Modules
//! are fetched from the host by URL, declared, linked and evaluated; nested
//! imports go through [`HostResolver`] and [`HostLoader`], which consult the
//! registry on every request.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use rquickjs::context::EvalOptions;
use rquickjs::loader::{Loader, Resolver};
use rquickjs::module::Declared;
use rquickjs::{CatchResultExt, Ctx, Module, Runtime};
use tracing::{debug, warn};
use url::Url;

use jsworker_common::WorkerError;

use crate::exception::{self, SourceMap};
use crate::isolate::IsolateCore;
use crate::{InstanceId, Registry};

/// First module that could not be fetched during the current load.
#[derive(Debug, Clone, Default)]
pub(crate) struct ModuleFailure(Arc<Mutex<Option<(String, String)>>>);

impl ModuleFailure {
    fn record(&self, url: &str, reason: &str) {
        self.0
            .lock()
            .get_or_insert_with(|| (url.to_owned(), reason.to_owned()));
    }

    fn take(&self) -> Option<(String, String)> {
        self.0.lock().take()
    }

    fn clear(&self) {
        self.0.lock().take();
    }
}

pub(crate) fn load_script(core: &IsolateCore, name: &str, source: &str) -> Result<(), WorkerError> {
    let start = Instant::now();
    core.sources.insert(name, source);
    core.set_last_script(name);

    core.context.with(|ctx| {
        let mut options = EvalOptions::default();
        options.strict = false;
        ctx.eval_with_options::<(), _>(source, options)
            .catch(&ctx)
            .map_err(|caught| core.failure(exception::capture(&ctx, caught, &core.sources, name)))
    })?;

    debug!(
        instance_id = %core.id,
        script = name,
        elapsed_us = start.elapsed().as_micros(),
        "Script evaluated"
    );
    Ok(())
}

pub(crate) fn load_module(core: &IsolateCore, url: &str) -> Result<(), WorkerError> {
    let start = Instant::now();
    let source = fetch_source(&core.registry, core.id, url)
        .map_err(|reason| WorkerError::module_resolution(url, reason))?;
    core.sources.insert(url, &source);
    core.module_failure.clear();

    core.context.with(|ctx| {
        Module::declare(ctx.clone(), url, source)
            .and_then(|module| module.eval())
            .and_then(|(_, promise)| promise.finish::<()>())
            .catch(&ctx)
            .map_err(|caught| {
                let captured = exception::capture(&ctx, caught, &core.sources, url);
                match core.module_failure.take() {
                    Some((failed, reason)) => WorkerError::module_resolution(failed, reason),
                    None => core.failure(captured),
                }
            })
    })?;

    debug!(
        instance_id = %core.id,
        module = url,
        elapsed_us = start.elapsed().as_micros(),
        "Module evaluated"
    );
    Ok(())
}

/// Install the import hooks for instance `id` on `runtime`.
pub(crate) fn install(
    runtime: &Runtime,
    id: InstanceId,
    registry: Arc<Registry>,
    sources: SourceMap,
    failure: ModuleFailure,
) {
    runtime.set_loader(
        HostResolver {
            id,
            registry: registry.clone(),
        },
        HostLoader {
            id,
            registry,
            sources,
            failure,
        },
    );
}

fn fetch_source(registry: &Registry, id: InstanceId, url: &str) -> Result<String, String> {
    let callbacks = registry
        .lookup(id)
        .ok_or_else(|| "instance is no longer registered".to_owned())?;
    let module_source = callbacks
        .module_source
        .as_ref()
        .ok_or_else(|| "no module source resolver is configured".to_owned())?;
    module_source(url).ok_or_else(|| "module source not found".to_owned())
}

/// Resolves import specifiers with the host callback, or [`resolve_specifier`].
pub(crate) struct HostResolver {
    id: InstanceId,
    registry: Arc<Registry>,
}

impl Resolver for HostResolver {
    fn resolve<'js>(&mut self, _ctx: &Ctx<'js>, base: &str, name: &str) -> rquickjs::Result<String> {
        let custom = self
            .registry
            .lookup(self.id)
            .and_then(|c| c.resolve_module_url.clone());
        let resolved = match custom {
            Some(resolve) => resolve(name, base),
            None => resolve_specifier(name, base),
        };
        debug!(instance_id = %self.id, specifier = name, importer = base, %resolved, "Import resolved");
        Ok(resolved)
    }
}

/// Fetches imported module source from the host.
pub(crate) struct HostLoader {
    id: InstanceId,
    registry: Arc<Registry>,
    sources: SourceMap,
    failure: ModuleFailure,
}

impl Loader for HostLoader {
    fn load<'js>(&mut self, ctx: &Ctx<'js>, name: &str) -> rquickjs::Result<Module<'js, Declared>> {
        match fetch_source(&self.registry, self.id, name) {
            Ok(source) => {
                self.sources.insert(name, &source);
                Module::declare(ctx.clone(), name, source)
            }
            Err(reason) => {
                warn!(instance_id = %self.id, module = name, %reason, "Import failed");
                self.failure.record(name, &reason);
                Err(rquickjs::Error::new_loading(name))
            }
        }
    }
}

/// Default import resolution.
///
/// Relative specifiers (`./`, `../`, `/`) are joined with the importer,
/// as a URL when the importer parses as one and lexically otherwise. Bare
/// specifiers are returned unchanged.
pub fn resolve_specifier(specifier: &str, importer: &str) -> String {
    let relative =
        specifier.starts_with("./") || specifier.starts_with("../") || specifier.starts_with('/');
    if !relative {
        return specifier.to_owned();
    }

    if let Ok(joined) = Url::parse(importer).and_then(|base| base.join(specifier)) {
        return joined.into();
    }

    let absolute_specifier = specifier.starts_with('/');
    let base_dir = if absolute_specifier {
        ""
    } else {
        importer.rsplit_once('/').map_or("", |(dir, _)| dir)
    };
    let absolute = absolute_specifier || base_dir.starts_with('/');

    let mut segments: Vec<&str> = Vec::new();
    for part in base_dir.split('/').chain(specifier.split('/')) {
        match part {
            "" | "." => {}
            ".." => {
                if segments.last().is_some_and(|s| *s != "..") {
                    segments.pop();
                } else if !absolute {
                    segments.push("..");
                }
            }
            part => segments.push(part),
        }
    }

    let joined = segments.join("/");
    if absolute { format!("/{joined}") } else { joined }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_specifier_is_unchanged() {
        assert_eq!(resolve_specifier("lodash", "https://x.test/a.js"), "lodash");
        assert_eq!(resolve_specifier("std:fs", "main.js"), "std:fs");
    }

    #[test]
    fn test_url_importer() {
        assert_eq!(
            resolve_specifier("./b.js", "https://x.test/m/a.js"),
            "https://x.test/m/b.js"
        );
        assert_eq!(
            resolve_specifier("../c.js", "https://x.test/m/n/a.js"),
            "https://x.test/m/c.js"
        );
        assert_eq!(
            resolve_specifier("/root.js", "https://x.test/m/a.js"),
            "https://x.test/root.js"
        );
    }

    #[test]
    fn test_path_importer() {
        assert_eq!(resolve_specifier("./b.js", "lib/a.js"), "lib/b.js");
        assert_eq!(resolve_specifier("../c.js", "lib/x/a.js"), "lib/c.js");
        assert_eq!(resolve_specifier("./b.js", "a.js"), "b.js");
        assert_eq!(resolve_specifier("../../x.js", "a.js"), "../../x.js");
        assert_eq!(resolve_specifier("/abs.js", "lib/a.js"), "/abs.js");
        assert_eq!(resolve_specifier("../b.js", "/srv/app/a.js"), "/srv/b.js");
        assert_eq!(resolve_specifier("../../../b.js", "/srv/a.js"), "/b.js");
    }

    #[test]
    fn test_module_failure_keeps_first() {
        let failure = ModuleFailure::default();
        failure.record("a.js", "first");
        failure.record("b.js", "second");

        assert_eq!(failure.take(), Some(("a.js".into(), "first".into())));
        assert_eq!(failure.take(), None);
    }
}
