//! Configuration for the tickerbridge relay.
//!
//! Settings come from an optional JSON file; every field has a default, so an
//! empty object (or no file at all) yields the stock Binance → Redis relay.
//! The runner applies command-line overrides on top and then calls
//! [`AppConfig::validate`] before anything connects.
//!
//! # Example config
//!
//! ```json
//! {
//!   "feed": {
//!     "endpoint": "wss://stream.binance.com:9443/ws",
//!     "topics": ["!ticker@arr"],
//!     "heartbeat_interval_ms": 15000,
//!     "heartbeat_timeout_ms": 30000,
//!     "backoff": { "base_ms": 1000, "factor": 2, "max_ms": 30000, "jitter": 0.2 }
//!   },
//!   "bus": { "address": "127.0.0.1:6379", "db": 0, "channel": "BinanceAPI" },
//!   "relay": { "publish_retries": 3, "stats_interval_secs": 60 }
//! }
//! ```

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

use crate::backoff::BackoffPolicy;
use crate::error::TbError;
use crate::types::{DEFAULT_REQUEST_ID, DEFAULT_TOPIC, SubscriptionSpec};

pub const DEFAULT_ENDPOINT: &str = "wss://stream.binance.com:9443/ws";
pub const DEFAULT_BUS_ADDRESS: &str = "127.0.0.1:6379";
pub const DEFAULT_CHANNEL: &str = "BinanceAPI";

/// Top-level application config.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub feed: FeedConfig,
    pub bus: BusConfig,
    pub relay: PumpConfig,
}

impl AppConfig {
    /// Reject settings that cannot work, before entering steady state.
    pub fn validate(&self) -> Result<(), TbError> {
        self.feed.validate()?;
        self.bus.validate()?;
        self.relay.validate()?;
        Ok(())
    }
}

/// Retry delay settings, turned into a [`BackoffPolicy`] at startup.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub base_ms: u64,
    pub factor: u32,
    pub max_ms: u64,
    /// Fraction in `[0, 1)` by which a delay may be randomly shortened.
    pub jitter: f64,
}

impl BackoffConfig {
    pub fn policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_millis(self.base_ms),
            self.factor,
            Duration::from_millis(self.max_ms),
            self.jitter,
        )
    }

    fn validate(&self, what: &str) -> Result<(), TbError> {
        if self.base_ms == 0 {
            return Err(TbError::Config(format!("{what}.base_ms must be > 0")));
        }
        if self.factor == 0 {
            return Err(TbError::Config(format!("{what}.factor must be >= 1")));
        }
        if self.max_ms < self.base_ms {
            return Err(TbError::Config(format!("{what}.max_ms must be >= base_ms")));
        }
        if !(0.0..1.0).contains(&self.jitter) {
            return Err(TbError::Config(format!("{what}.jitter must be in [0, 1)")));
        }
        Ok(())
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self { base_ms: 1_000, factor: 2, max_ms: 30_000, jitter: 0.2 }
    }
}

/// Upstream connection settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// WebSocket URL (`ws://` or `wss://`).
    pub endpoint: String,
    /// Stream names to subscribe to.
    pub topics: Vec<String>,
    /// `id` field of the subscription request.
    pub request_id: u64,
    /// Extra HTTP headers for the WebSocket handshake.
    pub extra_headers: HashMap<String, String>,
    /// HTTP proxy (`http://[user:pass@]host:port`) to tunnel through. Unset
    /// falls back to `HTTPS_PROXY` / `HTTP_PROXY` / `NO_PROXY`.
    pub proxy: Option<String>,
    pub connect_timeout_ms: u64,
    /// How long to wait for the subscription ack.
    pub subscribe_timeout_ms: u64,
    /// Interval between outbound pings.
    pub heartbeat_interval_ms: u64,
    /// Max silence (no inbound traffic of any kind) before reconnecting.
    pub heartbeat_timeout_ms: u64,
    /// Upper bound on sending the close frame during shutdown or teardown.
    pub close_timeout_ms: u64,
    /// Capacity of the frame channel to the pump.
    pub frame_buffer: usize,
    pub backoff: BackoffConfig,
}

impl FeedConfig {
    pub fn subscription(&self) -> Result<SubscriptionSpec, TbError> {
        SubscriptionSpec::new(self.topics.iter().cloned(), self.request_id)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn subscribe_timeout(&self) -> Duration {
        Duration::from_millis(self.subscribe_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    fn validate(&self) -> Result<(), TbError> {
        let url = url::Url::parse(&self.endpoint)
            .map_err(|e| TbError::Config(format!("feed.endpoint {:?}: {e}", self.endpoint)))?;
        if url.scheme() != "ws" && url.scheme() != "wss" {
            return Err(TbError::Config(format!("feed.endpoint must be ws:// or wss://, got {}", url.scheme())));
        }
        self.subscription()?;
        if let Some(proxy) = &self.proxy {
            crate::ws::proxy::parse(proxy).map_err(|e| TbError::Config(format!("feed.{e}")))?;
        }
        for (name, ms) in [
            ("connect_timeout_ms", self.connect_timeout_ms),
            ("subscribe_timeout_ms", self.subscribe_timeout_ms),
            ("heartbeat_interval_ms", self.heartbeat_interval_ms),
            ("close_timeout_ms", self.close_timeout_ms),
        ] {
            if ms == 0 {
                return Err(TbError::Config(format!("feed.{name} must be > 0")));
            }
        }
        if self.heartbeat_timeout_ms <= self.heartbeat_interval_ms {
            return Err(TbError::Config("feed.heartbeat_timeout_ms must exceed heartbeat_interval_ms".into()));
        }
        if self.frame_buffer == 0 {
            return Err(TbError::Config("feed.frame_buffer must be > 0".into()));
        }
        self.backoff.validate("feed.backoff")
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            topics: vec![DEFAULT_TOPIC.to_string()],
            request_id: DEFAULT_REQUEST_ID,
            extra_headers: HashMap::new(),
            proxy: None,
            connect_timeout_ms: 10_000,
            subscribe_timeout_ms: 5_000,
            heartbeat_interval_ms: 15_000,
            heartbeat_timeout_ms: 30_000,
            close_timeout_ms: 1_000,
            frame_buffer: 1_024,
            backoff: BackoffConfig::default(),
        }
    }
}

/// Outbound Redis settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// `host:port` of the Redis server.
    pub address: String,
    pub password: Option<String>,
    pub db: i64,
    /// Pub/sub channel every frame is published to.
    pub channel: String,
}

impl BusConfig {
    fn validate(&self) -> Result<(), TbError> {
        if self.address.trim().is_empty() {
            return Err(TbError::Config("bus.address is empty".into()));
        }
        if self.channel.is_empty() {
            return Err(TbError::Config("bus.channel is empty".into()));
        }
        if self.db < 0 {
            return Err(TbError::Config(format!("bus.db must be >= 0, got {}", self.db)));
        }
        Ok(())
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_BUS_ADDRESS.to_string(),
            password: None,
            db: 0,
            channel: DEFAULT_CHANNEL.to_string(),
        }
    }
}

/// Relay pump settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PumpConfig {
    /// Extra attempts after the first failed publish of a frame.
    pub publish_retries: u32,
    /// Delay between publish attempts. Kept well below the feed's backoff.
    pub retry_backoff: BackoffConfig,
    /// Upper bound on a single publish call.
    pub publish_timeout_ms: u64,
    /// After shutdown, how long to keep draining frames already read.
    pub drain_timeout_ms: u64,
    /// Interval between stats log lines; 0 disables them.
    pub stats_interval_secs: u64,
}

impl PumpConfig {
    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn stats_interval(&self) -> Option<Duration> {
        (self.stats_interval_secs > 0).then(|| Duration::from_secs(self.stats_interval_secs))
    }

    fn validate(&self) -> Result<(), TbError> {
        if self.publish_timeout_ms == 0 {
            return Err(TbError::Config("relay.publish_timeout_ms must be > 0".into()));
        }
        self.retry_backoff.validate("relay.retry_backoff")
    }
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            publish_retries: 3,
            retry_backoff: BackoffConfig { base_ms: 50, factor: 2, max_ms: 1_000, jitter: 0.2 },
            publish_timeout_ms: 2_000,
            drain_timeout_ms: 2_000,
            stats_interval_secs: 60,
        }
    }
}

/// Load and parse a JSON config file.
pub fn load_config(path: &std::path::Path) -> anyhow::Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = serde_json::from_str(&content)?;
    Ok(config)
}
