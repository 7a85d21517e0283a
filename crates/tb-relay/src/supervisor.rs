//! Wires one feed connection to one pump and owns their lifecycle.

use std::future::Future;

use tb_core::config::AppConfig;
use tb_core::error::TbError;
use tb_core::ws::FeedConnection;
use tracing::info;

use crate::publisher::Publisher;
use crate::pump::{PumpReport, RelayPump};
use crate::redis_bus::RedisPublisher;

pub struct Supervisor<P> {
    config: AppConfig,
    publisher: P,
}

impl Supervisor<RedisPublisher> {
    /// The production wiring: Redis on the configured address and channel.
    pub fn from_config(config: AppConfig) -> Result<Self, TbError> {
        let publisher = RedisPublisher::new(&config.bus)?;
        Ok(Self::new(config, publisher))
    }
}

impl<P: Publisher> Supervisor<P> {
    pub fn new(config: AppConfig, publisher: P) -> Self {
        Self { config, publisher }
    }

    /// Start the feed and pump, then run until `shutdown` resolves.
    ///
    /// On shutdown the feed is stopped first; the pump drains what the feed
    /// already read and returns its report once both have finished.
    pub async fn run<F>(self, shutdown: F) -> Result<PumpReport, TbError>
    where
        F: Future<Output = ()>,
    {
        let Self { config, publisher } = self;
        config.validate()?;
        let spec = config.feed.subscription()?;

        let mut feed = FeedConnection::new(config.feed.clone());
        let frames = feed.start(spec)?;
        info!(
            endpoint = %config.feed.endpoint,
            bus = %config.bus.address,
            channel = %config.bus.channel,
            "[supervisor] relay running"
        );

        let pump = RelayPump::new(publisher, config.relay.clone()).run(frames, feed.shutdown_signal());
        tokio::pin!(pump);
        tokio::pin!(shutdown);

        let report = tokio::select! {
            report = &mut pump => report,
            _ = &mut shutdown => {
                info!("[supervisor] shutdown requested");
                feed.stop();
                (&mut pump).await
            }
        };

        feed.stop();
        feed.join().await;
        let stats = feed.stats().snapshot();
        info!(
            sessions = stats.sessions,
            connect_failures = stats.connect_failures,
            heartbeat_timeouts = stats.heartbeat_timeouts,
            decode_errors = stats.decode_errors,
            "[supervisor] stopped: {report}"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tb_core::config::{BackoffConfig, FeedConfig, PumpConfig};
    use tb_core::ws::mock::{Action, MockUpstream, Session};

    use super::*;
    use crate::memory::{Fault, MemoryPublisher};

    const WAIT: Duration = Duration::from_secs(5);

    fn test_config(endpoint: String) -> AppConfig {
        AppConfig {
            feed: FeedConfig {
                endpoint,
                subscribe_timeout_ms: 400,
                heartbeat_interval_ms: 100,
                heartbeat_timeout_ms: 300,
                close_timeout_ms: 200,
                backoff: BackoffConfig { base_ms: 20, factor: 2, max_ms: 100, jitter: 0.0 },
                ..FeedConfig::default()
            },
            relay: PumpConfig {
                retry_backoff: BackoffConfig { base_ms: 1, factor: 2, max_ms: 5, jitter: 0.0 },
                publish_timeout_ms: 200,
                drain_timeout_ms: 500,
                stats_interval_secs: 0,
                ..PumpConfig::default()
            },
            ..AppConfig::default()
        }
    }

    fn text(s: &str) -> Action {
        Action::Text(s.to_string())
    }

    /// Resolves once `bus` holds `n` frames (or after `WAIT`).
    async fn published(bus: MemoryPublisher, n: usize) {
        bus.wait_for(n, WAIT).await;
    }

    #[tokio::test]
    async fn relays_upstream_frames_in_order() {
        let mock = MockUpstream::start(vec![Session::streaming([
            text(r#""A""#),
            text(r#""B""#),
            text(r#""C""#),
            Action::Hold,
        ])])
        .await
        .unwrap();
        let bus = MemoryPublisher::new();
        let supervisor = Supervisor::new(test_config(mock.url()), bus.clone());

        let report = tokio::time::timeout(WAIT, supervisor.run(published(bus.clone(), 3)))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(bus.payloads(), vec![r#""A""#, r#""B""#, r#""C""#]);
        assert_eq!(report.published, 3);
        assert_eq!(report.gaps, 0);
        assert_eq!(report.last_seq, 3);
    }

    #[tokio::test]
    async fn survives_an_upstream_reconnect() {
        let mock = MockUpstream::start(vec![
            Session::streaming([text(r#""a""#), text(r#""b""#)]),
            Session::streaming([text(r#""c""#), Action::Hold]),
        ])
        .await
        .unwrap();
        let bus = MemoryPublisher::new();
        let supervisor = Supervisor::new(test_config(mock.url()), bus.clone());

        let report = tokio::time::timeout(WAIT, supervisor.run(published(bus.clone(), 3)))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(bus.seqs(), vec![1, 2, 3]);
        let sessions: Vec<u64> = bus.published().iter().map(|f| f.session).collect();
        assert_eq!(sessions, vec![1, 1, 2]);
        assert_eq!(report.published, 3);
        assert_eq!(report.gaps, 0);
        assert_eq!(mock.connections(), 2);
    }

    #[tokio::test]
    async fn updates_lost_to_a_failed_subscription_show_up_as_a_gap() {
        let mock = MockUpstream::start(vec![
            // An update arrives ahead of the answer, then the request is rejected.
            Session::Script(vec![
                Action::ExpectSubscribe,
                text(r#""x""#),
                text(r#"{"error":{"code":2,"msg":"Invalid request"},"id":1}"#),
                Action::Hold,
            ]),
            Session::streaming([text(r#""y""#), Action::Hold]),
        ])
        .await
        .unwrap();
        let bus = MemoryPublisher::new();
        let supervisor = Supervisor::new(test_config(mock.url()), bus.clone());

        let report = tokio::time::timeout(WAIT, supervisor.run(published(bus.clone(), 1)))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(bus.seqs(), vec![2]);
        assert_eq!(bus.payloads(), vec![r#""y""#]);
        assert_eq!(report.gaps, 1);
        assert_eq!(report.missing, 1);
        assert_eq!(report.last_seq, 2);
    }

    #[tokio::test]
    async fn upstream_close_frame_triggers_a_reconnect() {
        let mock = MockUpstream::start(vec![
            Session::streaming([text(r#""a""#), Action::Close]),
            Session::streaming([text(r#""b""#), Action::Hold]),
        ])
        .await
        .unwrap();
        let bus = MemoryPublisher::new();
        let supervisor = Supervisor::new(test_config(mock.url()), bus.clone());

        let report = tokio::time::timeout(WAIT, supervisor.run(published(bus.clone(), 2)))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(bus.payloads(), vec![r#""a""#, r#""b""#]);
        assert_eq!(report.gaps, 0);
        assert_eq!(mock.connections(), 2);
    }

    #[tokio::test]
    async fn undecodable_upstream_frame_shows_up_as_a_gap() {
        let mock = MockUpstream::start(vec![Session::streaming([
            text(r#""A""#),
            text("{broken"),
            text(r#""B""#),
            Action::Hold,
        ])])
        .await
        .unwrap();
        let bus = MemoryPublisher::new();
        let supervisor = Supervisor::new(test_config(mock.url()), bus.clone());

        let report = tokio::time::timeout(WAIT, supervisor.run(published(bus.clone(), 2)))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(bus.seqs(), vec![1, 3]);
        assert_eq!(report.gaps, 1);
        assert_eq!(report.missing, 1);
    }

    #[tokio::test]
    async fn bus_outage_drops_frames_but_keeps_relaying() {
        let mock = MockUpstream::start(vec![Session::streaming([
            text(r#""A""#),
            text(r#""B""#),
            Action::Hold,
        ])])
        .await
        .unwrap();
        let bus = MemoryPublisher::new();
        bus.fail_next(4, Fault::Unreachable);
        let supervisor = Supervisor::new(test_config(mock.url()), bus.clone());

        let report = tokio::time::timeout(WAIT, supervisor.run(published(bus.clone(), 1)))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(bus.payloads(), vec![r#""B""#]);
        assert_eq!(report.dropped, 1);
        assert_eq!(report.published, 1);
    }

    #[tokio::test]
    async fn shutdown_before_upstream_answers() {
        let mock = MockUpstream::start(vec![Session::Refuse; 100]).await.unwrap();
        let bus = MemoryPublisher::new();
        let supervisor = Supervisor::new(test_config(mock.url()), bus.clone());

        let report = tokio::time::timeout(
            WAIT,
            supervisor.run(tokio::time::sleep(Duration::from_millis(100))),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(report, PumpReport::default());
        assert!(bus.published().is_empty());
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_before_connecting() {
        let mut config = test_config("ws://127.0.0.1:1/ws".into());
        config.feed.topics = vec![];
        let supervisor = Supervisor::new(config, MemoryPublisher::new());

        let result = supervisor.run(std::future::ready(())).await;
        assert!(result.is_err());
    }
}
