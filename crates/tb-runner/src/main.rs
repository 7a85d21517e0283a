//! # tb-runner
//!
//! Entry point for tickerbridge: relays a Binance WebSocket stream to a Redis
//! pub/sub channel until SIGINT or SIGTERM.
//!
//! # Usage
//!
//! ```bash
//! tb-runner --bi stream.binance.com:9443 --redis 127.0.0.1:6379 --redis-channel BinanceAPI
//! tb-runner --config relay.json --log-level debug --log-json
//! HTTPS_PROXY=http://proxy:3128 tb-runner --bi stream.binance.com:9443
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tb_core::config::AppConfig;
use tb_relay::Supervisor;
use tracing::info;

/// Binance WebSocket to Redis pub/sub relay.
#[derive(Parser, Debug)]
#[command(name = "tb-runner", about = "Binance WebSocket to Redis pub/sub relay")]
struct Cli {
    /// Configuration file path (JSON). Flags below override it.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Upstream host:port; the endpoint becomes wss://<host:port>/ws.
    #[arg(long)]
    bi: Option<String>,

    /// Redis host:port.
    #[arg(long)]
    redis: Option<String>,

    /// Redis password.
    #[arg(long)]
    redis_pw: Option<String>,

    /// Redis database number.
    #[arg(long)]
    redis_db: Option<i64>,

    /// Redis pub/sub channel.
    #[arg(long)]
    redis_channel: Option<String>,

    /// Stream to subscribe to; repeat for several. Replaces the configured list.
    #[arg(long = "topic")]
    topics: Vec<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Optional log directory for file output (JSON lines).
    #[arg(long)]
    log_dir: Option<String>,

    /// Log to the console as JSON lines.
    #[arg(long)]
    log_json: bool,

    /// HTTP proxy for the upstream connection; overrides HTTPS_PROXY / HTTP_PROXY.
    #[arg(long)]
    proxy: Option<String>,
}

impl Cli {
    /// Layer the command-line flags over `config`.
    fn apply(&self, config: &mut AppConfig) {
        if let Some(bi) = &self.bi {
            config.feed.endpoint = if bi.contains("://") { bi.clone() } else { format!("wss://{bi}/ws") };
        }
        if let Some(redis) = &self.redis {
            config.bus.address = redis.clone();
        }
        if let Some(pw) = &self.redis_pw {
            config.bus.password = Some(pw.clone());
        }
        if let Some(db) = self.redis_db {
            config.bus.db = db;
        }
        if let Some(channel) = &self.redis_channel {
            config.bus.channel = channel.clone();
        }
        if !self.topics.is_empty() {
            config.feed.topics = self.topics.clone();
        }
        if let Some(proxy) = &self.proxy {
            config.feed.proxy = Some(proxy.clone());
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Initialize logging
    tb_core::logging::init_logging(&cli.log_level, cli.log_dir.as_deref(), "tb-runner", cli.log_json);

    // 2. Load configuration, then apply flag overrides
    let mut config = match &cli.config {
        Some(path) => {
            info!("loading config {}", path.display());
            tb_core::config::load_config(path)?
        }
        None => AppConfig::default(),
    };
    cli.apply(&mut config);
    config.validate()?;
    info!(
        endpoint = %config.feed.endpoint,
        topics = ?config.feed.topics,
        bus = %config.bus.address,
        db = config.bus.db,
        channel = %config.bus.channel,
        "tb-runner starting"
    );

    // 3. Run until a shutdown signal arrives
    let shutdown = shutdown_signal()?;
    let report = Supervisor::from_config(config)?.run(shutdown).await?;

    info!("relay stopped ({report}), goodbye");
    Ok(())
}

/// Resolves on ctrl-c or, on unix, SIGTERM.
///
/// Handlers are installed before returning, so a failure to install them is a
/// startup error rather than a silent loss of graceful shutdown.
#[cfg(unix)]
fn shutdown_signal() -> Result<impl std::future::Future<Output = ()>> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())?;
    Ok(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("SIGTERM received"),
            r = tokio::signal::ctrl_c() => match r {
                Ok(()) => info!("ctrl-c received"),
                Err(e) => tracing::error!("ctrl-c handler failed: {e}"),
            },
        }
    })
}

#[cfg(not(unix))]
fn shutdown_signal() -> Result<impl std::future::Future<Output = ()>> {
    Ok(async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("ctrl-c received"),
            Err(e) => tracing::error!("ctrl-c handler failed: {e}"),
        }
    })
}
