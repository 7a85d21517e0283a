//! Logging initialization using the `tracing` ecosystem.
//!
//! Console output is human-readable by default, or one JSON object per line
//! with `--log-json` so relay events (`seq`, `attempts`, `missing`, ...) can be
//! shipped as structured fields. The optional daily-rotated file under
//! `log_dir` is always JSON. `RUST_LOG` overrides the level.

use tracing::Subscriber;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the global tracing subscriber. Call once at program start.
///
/// - `log_level`: used when `RUST_LOG` is not set (e.g. `"info"`)
/// - `log_dir`: optional directory for daily-rotating JSON log files
/// - `file_prefix`: log file prefix (e.g. `"tb-runner"`)
/// - `json`: emit JSON on the console too
pub fn init_logging(log_level: &str, log_dir: Option<&str>, file_prefix: &str, json: bool) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let file_layer = log_dir.map(|dir| {
        fmt::layer()
            .json()
            .with_writer(tracing_appender::rolling::daily(dir, file_prefix))
            .with_thread_ids(true)
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer(json, std::io::stdout))
        .with(file_layer)
        .init();
}

fn console_layer<S, W>(json: bool, writer: W) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    if json {
        fmt::layer().json().with_target(true).with_writer(writer).boxed()
    } else {
        fmt::layer().with_target(true).with_ansi(true).with_writer(writer).boxed()
    }
}
