//! jsworker CLI entry point.
//!
//! Runs a script or ES module inside a [`Worker`], optionally preceded by
//! preloaded files from a config file, then delivers messages to it.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use jsworker_common::{ConfigFile, PreloadEntry, PreloadKind, RuntimeConfig};
use jsworker_host::{Worker, stdout_sink};

/// Run JavaScript in an isolated QuickJS worker.
#[derive(Debug, Parser)]
#[command(name = "jsworker", version, about)]
struct Args {
    /// TOML config file with runtime settings and preloads.
    #[arg(long, env = "JSWORKER_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Load ENTRY as an ES module instead of a classic script.
    #[arg(long)]
    module: bool,

    /// Install `$print`, writing to stdout.
    #[arg(long)]
    print: bool,

    /// Per-call deadline in milliseconds.
    #[arg(long, value_name = "MS")]
    timeout_ms: Option<u64>,

    /// Deliver MSG to the `$recv` callback after loading. Repeatable.
    #[arg(long = "send", value_name = "MSG")]
    send: Vec<String>,

    /// Deliver MSG to the `$recvSync` callback and print the answer. Repeatable.
    #[arg(long = "send-sync", value_name = "MSG")]
    send_sync: Vec<String>,

    /// Script or module to run.
    entry: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,jsworker=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let (config_file, base_dir) = match &args.config {
        Some(path) => {
            let config = ConfigFile::from_file(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?;
            let base = path.parent().map(Path::to_path_buf).unwrap_or_default();
            (config, base)
        }
        None => (ConfigFile::default(), PathBuf::new()),
    };

    let mut runtime = config_file.runtime;
    if args.print {
        runtime.engine.enable_print = true;
    }
    if args.timeout_ms.is_some() {
        runtime.execution.timeout_ms = args.timeout_ms;
    }
    runtime.validate().context("Invalid runtime configuration")?;

    info!(
        entry = %args.entry.display(),
        module = args.module,
        preload = config_file.preload.len(),
        "Starting jsworker"
    );

    let worker = Arc::new(build_worker(runtime));

    let terminator = worker.clone();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, terminating script");
            terminator.terminate();
        }
    });

    let preload = config_file.preload;
    tokio::task::spawn_blocking(move || run(&worker, &args, &preload, &base_dir))
        .await
        .context("Worker task panicked")?
}

fn build_worker(runtime: RuntimeConfig) -> Worker {
    Worker::builder()
        .config(runtime)
        .print_sink(stdout_sink())
        .handle_send(|message| info!(msg = message, "$send"))
        .handle_send_sync(|message| {
            info!(msg = message, "$sendSync");
            message.to_owned()
        })
        .module_source(|url| match fs::read_to_string(url) {
            Ok(source) => Some(source),
            Err(e) => {
                warn!(url, error = %e, "Module source unavailable");
                None
            }
        })
        .build()
}

fn run(
    worker: &Worker,
    args: &Args,
    preload: &[PreloadEntry],
    base_dir: &Path,
) -> anyhow::Result<()> {
    for entry in preload {
        let path = base_dir.join(&entry.path);
        load(worker, &path, entry.kind == PreloadKind::Module)
            .with_context(|| format!("Failed to preload {}", path.display()))?;
    }

    load(worker, &args.entry, args.module)
        .with_context(|| format!("Failed to run {}", args.entry.display()))?;

    for message in &args.send {
        worker
            .send(message)
            .with_context(|| format!("Failed to deliver message {message:?}"))?;
    }
    for message in &args.send_sync {
        println!("{}", worker.send_sync(message));
    }

    worker.dispose();
    Ok(())
}

fn load(worker: &Worker, path: &Path, module: bool) -> anyhow::Result<()> {
    let name = path.to_string_lossy();
    if module {
        worker.load_module(&name)?;
    } else {
        let source = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        worker.load_script(&name, &source)?;
    }
    Ok(())
}
