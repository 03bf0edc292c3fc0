//! Shared plumbing for the rbak tools: the event [`controller`], runtime and logging
//! bootstrap ([`run`]), the protocol [`version`], worker log forwarding and parallel
//! tree removal.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub mod config;
pub mod controller;
pub mod remote_tracing;
pub mod rm;
pub mod version;

pub use config::{OutputConfig, RuntimeConfig, TracingConfig};
pub use controller::{Aborted, Controller, Event, Trigger};
pub use rm::{make_writable, rm};

fn build_runtime(runtime: RuntimeConfig) -> std::io::Result<tokio::runtime::Runtime> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if runtime.max_workers > 0 {
        builder.worker_threads(runtime.max_workers);
    }
    if runtime.max_blocking_threads > 0 {
        builder.max_blocking_threads(runtime.max_blocking_threads);
    }
    builder.build()
}

fn init_tracing(output: OutputConfig, tracing_config: TracingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(output.level_directive()));
    let fmt_layer = tracing_config.stdout.then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_writer(std::io::stdout)
    });
    // a subscriber may already be installed (e.g. by a test harness)
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(tracing_config.remote_layer)
        .try_init();
}

/// Build the tokio runtime, install logging and run `func` to completion.
///
/// Errors are logged with their full context chain and turned into `None` so the
/// binaries can map them to a non-zero exit status.
pub fn run<Fut, T>(
    output: OutputConfig,
    runtime: RuntimeConfig,
    tracing_config: TracingConfig,
    func: impl FnOnce() -> Fut,
) -> Option<T>
where
    Fut: std::future::Future<Output = anyhow::Result<T>>,
{
    init_tracing(output, tracing_config);
    let runtime = match build_runtime(runtime) {
        Ok(runtime) => runtime,
        Err(error) => {
            tracing::error!("failed to start the tokio runtime: {:#}", &error);
            return None;
        }
    };
    match runtime.block_on(func()) {
        Ok(value) => Some(value),
        Err(error) => {
            tracing::error!("{:#}", &error);
            None
        }
    }
}
