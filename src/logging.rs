//! Operational logging setup.
//!
//! Tracing output goes to stderr (text or JSON lines) and, once a project is
//! initialized, to a daily rolling file under `.stagehand/logs/`. The audit
//! log is separate and remains the authoritative record of a run.

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer, Registry, fmt, layer::SubscriberExt, util::SubscriberInitExt,
};

/// File name prefix for the rolling operational log.
pub const LOG_FILE_PREFIX: &str = "stagehand.log";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Filter used when `RUST_LOG` is not set.
pub fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "stagehand=debug,info"
    } else {
        "stagehand=warn"
    }
}

/// Install the global subscriber. The returned guard flushes the file writer
/// on drop and must live until the process exits.
pub fn init_tracing(verbose: bool, format: LogFormat, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let console_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    layers.push(match format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_filter(console_filter)
            .boxed(),
        LogFormat::Text => fmt::layer()
            .compact()
            .with_target(false)
            .with_writer(std::io::stderr)
            .with_filter(console_filter)
            .boxed(),
    });

    let mut guard = None;
    if let Some(dir) = log_dir.filter(|d| d.is_dir()) {
        let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
        let (writer, file_guard) = tracing_appender::non_blocking(appender);
        layers.push(
            fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(EnvFilter::new("stagehand=debug"))
                .boxed(),
        );
        guard = Some(file_guard);
    }

    if let Err(err) = tracing_subscriber::registry().with(layers).try_init() {
        eprintln!("tracing already initialized: {}", err);
    }
    guard
}
