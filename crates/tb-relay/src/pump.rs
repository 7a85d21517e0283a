//! Moves frames from the feed to the bus, one at a time, in sequence order.
//!
//! For each frame the pump:
//! 1. checks the sequence number (gaps are logged, stale numbers skipped);
//! 2. publishes it, retrying with a short backoff up to the configured budget;
//! 3. drops it with an error log once the budget is spent, then moves on.
//!
//! Once shutdown is signalled the pump keeps draining frames the feed already
//! read, one attempt each, until the stream ends or the drain timeout expires.

use std::fmt;
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use tb_core::Frame;
use tb_core::config::PumpConfig;
use tb_core::latency::LatencyHistogram;
use tb_core::sequence::{SeqCheck, SequenceTracker};
use tb_core::shutdown::ShutdownSignal;
use tb_core::time_util;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::publisher::{Publisher, PublishError};

/// Totals for one pump run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpReport {
    pub published: u64,
    /// Frames given up on after the retry budget was exhausted.
    pub dropped: u64,
    /// Discontinuities in the sequence.
    pub gaps: u64,
    /// Sequence numbers missing across all gaps.
    pub missing: u64,
    /// Frames skipped for carrying a number at or below the last one seen.
    pub duplicates: u64,
    pub last_seq: u64,
}

impl fmt::Display for PumpReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "published={} dropped={} gaps={} missing={} duplicates={} last_seq={}",
            self.published, self.dropped, self.gaps, self.missing, self.duplicates, self.last_seq,
        )
    }
}

pub struct RelayPump<P> {
    publisher: P,
    config: PumpConfig,
    tracker: SequenceTracker,
    latency: LatencyHistogram,
    published: u64,
    dropped: u64,
    session: u64,
}

impl<P: Publisher> RelayPump<P> {
    pub fn new(publisher: P, config: PumpConfig) -> Self {
        Self {
            publisher,
            config,
            tracker: SequenceTracker::new(),
            latency: LatencyHistogram::new(),
            published: 0,
            dropped: 0,
            session: 0,
        }
    }

    /// Relay `frames` until the stream ends, or until `shutdown` fires and the
    /// backlog has been drained.
    pub async fn run<S>(mut self, mut frames: S, mut shutdown: ShutdownSignal) -> PumpReport
    where
        S: Stream<Item = Frame> + Unpin,
    {
        info!(retries = self.config.publish_retries, timeout = ?self.config.publish_timeout(), "[relay] pump started");

        let stats_every = self.config.stats_interval();
        let mut ticker = tokio::time::interval(stats_every.unwrap_or(Duration::from_secs(3600)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.reset();

        let ended = loop {
            match next_event(&mut frames, &mut shutdown, &mut ticker, stats_every.is_some()).await {
                PumpEvent::Shutdown => break false,
                PumpEvent::Stats => self.log_stats(),
                PumpEvent::Frame(frame) => self.relay(frame, false, &shutdown).await,
                PumpEvent::Ended => break true,
            }
        };

        if !ended {
            self.drain(&mut frames, &shutdown).await;
        }

        let report = self.report();
        info!("[relay] pump stopped: {report}");
        report
    }

    fn report(&self) -> PumpReport {
        PumpReport {
            published: self.published,
            dropped: self.dropped,
            gaps: self.tracker.gaps(),
            missing: self.tracker.missing(),
            duplicates: self.tracker.stale(),
            last_seq: self.tracker.last(),
        }
    }

    /// Single attempt per frame, so the already-raised signal is never awaited.
    async fn drain<S>(&mut self, frames: &mut S, shutdown: &ShutdownSignal)
    where
        S: Stream<Item = Frame> + Unpin,
    {
        let timeout = self.config.drain_timeout();
        let deadline = Instant::now() + timeout;
        info!(?timeout, "[relay] shutdown requested, draining");
        loop {
            match tokio::time::timeout_at(deadline, frames.next()).await {
                Ok(Some(frame)) => self.relay(frame, true, shutdown).await,
                Ok(None) => break,
                Err(_) => {
                    warn!(?timeout, "[relay] drain timed out, abandoning backlog");
                    break;
                }
            }
        }
    }

    /// Check one frame's sequence number and publish it.
    async fn relay(&mut self, frame: Frame, draining: bool, shutdown: &ShutdownSignal) {
        match self.tracker.check_and_update(frame.seq) {
            SeqCheck::InOrder => {}
            SeqCheck::Gap { missing } => {
                warn!(seq = frame.seq, missing, "[relay] sequence gap");
            }
            SeqCheck::Stale { last } => {
                warn!(seq = frame.seq, last, "[relay] stale frame skipped");
                return;
            }
        }

        if frame.session != self.session {
            if self.session != 0 {
                info!(session = frame.session, seq = frame.seq, "[relay] upstream reconnected");
            }
            self.session = frame.session;
        }

        let attempts = if draining { 1 } else { self.config.publish_retries + 1 };
        match self.publish_with_retry(&frame, attempts, shutdown).await {
            Ok(()) => {
                self.published += 1;
                self.latency.record(time_util::elapsed_us(frame.received_at_us));
            }
            Err(e) => {
                self.dropped += 1;
                let reason = if !draining && shutdown.is_triggered() { "shutdown" } else { "retries exhausted" };
                error!(seq = frame.seq, attempts, reason, error = %e, "[relay] frame dropped");
            }
        }
    }

    async fn publish_with_retry(
        &mut self,
        frame: &Frame,
        attempts: u32,
        shutdown: &ShutdownSignal,
    ) -> Result<(), PublishError> {
        let timeout = self.config.publish_timeout();
        let mut backoff = self.config.retry_backoff.policy();
        let mut attempt = 1;
        loop {
            let err = match tokio::time::timeout(timeout, self.publisher.publish(frame)).await {
                Ok(Ok(ack)) => {
                    if ack.receivers == 0 {
                        debug!(seq = frame.seq, "[relay] published with no subscribers");
                    }
                    return Ok(());
                }
                Ok(Err(e)) => e,
                Err(_) => PublishError::Timeout(timeout),
            };
            if attempt >= attempts {
                return Err(err);
            }

            let delay = backoff.next_delay();
            warn!(seq = frame.seq, attempt, ?delay, error = %err, "[relay] publish failed, retrying");
            let mut shutdown = shutdown.clone();
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.wait() => return Err(err),
            }
            attempt += 1;
        }
    }

    fn log_stats(&mut self) {
        let report = self.report();
        match self.latency.summary() {
            Some(latency) => info!("[relay] {report} latency: {latency}"),
            None => info!("[relay] {report} (idle)"),
        }
        self.latency.reset();
    }
}

enum PumpEvent {
    Shutdown,
    Stats,
    Frame(Frame),
    Ended,
}

/// Wait for whatever the live loop should handle next.
///
/// Shutdown wins over everything, and a due stats tick wins over a ready
/// frame so that a standing backlog cannot starve the stats line.
async fn next_event<S>(
    frames: &mut S,
    shutdown: &mut ShutdownSignal,
    ticker: &mut Interval,
    stats_enabled: bool,
) -> PumpEvent
where
    S: Stream<Item = Frame> + Unpin,
{
    tokio::select! {
        biased;
        _ = shutdown.wait() => PumpEvent::Shutdown,
        _ = ticker.tick(), if stats_enabled => PumpEvent::Stats,
        frame = frames.next() => match frame {
            Some(frame) => PumpEvent::Frame(frame),
            None => PumpEvent::Ended,
        },
    }
}

#[cfg(test)]
mod tests {
    use tb_core::config::BackoffConfig;
    use tb_core::shutdown;
    use tokio::sync::mpsc;

    use super::*;
    use crate::memory::{Fault, MemoryPublisher};

    fn fast_config() -> PumpConfig {
        PumpConfig {
            publish_retries: 3,
            retry_backoff: BackoffConfig { base_ms: 1, factor: 2, max_ms: 5, jitter: 0.0 },
            publish_timeout_ms: 100,
            drain_timeout_ms: 200,
            stats_interval_secs: 0,
        }
    }

    fn frame(seq: u64) -> Frame {
        Frame::new(seq, 1, time_util::now_us(), format!("\"f{seq}\""))
    }

    fn frames(seqs: &[u64]) -> impl Stream<Item = Frame> + Unpin {
        futures_util::stream::iter(seqs.iter().copied().map(frame).collect::<Vec<_>>())
    }

    async fn run_all(publisher: &MemoryPublisher, config: PumpConfig, seqs: &[u64]) -> PumpReport {
        let (_trigger, signal) = shutdown::channel();
        RelayPump::new(publisher.clone(), config).run(frames(seqs), signal).await
    }

    #[tokio::test]
    async fn publishes_in_sequence_order() {
        let bus = MemoryPublisher::new();
        let report = run_all(&bus, fast_config(), &[1, 2, 3, 4, 5]).await;

        assert_eq!(bus.seqs(), vec![1, 2, 3, 4, 5]);
        assert_eq!(bus.payloads()[0], "\"f1\"");
        assert_eq!(report.published, 5);
        assert_eq!(report.gaps, 0);
        assert_eq!(report.dropped, 0);
        assert_eq!(report.last_seq, 5);
    }

    #[tokio::test]
    async fn gaps_report_the_number_of_lost_frames() {
        let bus = MemoryPublisher::new();
        let report = run_all(&bus, fast_config(), &[1, 2, 5, 6, 10]).await;

        assert_eq!(bus.seqs(), vec![1, 2, 5, 6, 10]);
        assert_eq!(report.gaps, 2);
        assert_eq!(report.missing, 5);
    }

    #[tokio::test]
    async fn first_frame_after_one_counts_as_a_gap() {
        let bus = MemoryPublisher::new();
        let report = run_all(&bus, fast_config(), &[4, 5]).await;
        assert_eq!(report.gaps, 1);
        assert_eq!(report.missing, 3);
    }

    #[tokio::test]
    async fn stale_frames_are_skipped() {
        let bus = MemoryPublisher::new();
        let report = run_all(&bus, fast_config(), &[1, 2, 2, 1, 3]).await;

        assert_eq!(bus.seqs(), vec![1, 2, 3]);
        assert_eq!(report.duplicates, 2);
        assert_eq!(report.published, 3);
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let bus = MemoryPublisher::new();
        bus.fail_next(2, Fault::Reject);
        let report = run_all(&bus, fast_config(), &[1, 2]).await;

        assert_eq!(bus.seqs(), vec![1, 2]);
        assert_eq!(bus.calls(), 4);
        assert_eq!(report.dropped, 0);
    }

    #[tokio::test]
    async fn exhausted_budget_drops_the_frame_once_and_moves_on() {
        let bus = MemoryPublisher::new();
        // First attempt plus three retries.
        bus.fail_next(4, Fault::Unreachable);
        let report = run_all(&bus, fast_config(), &[1, 2]).await;

        assert_eq!(bus.seqs(), vec![2]);
        assert_eq!(bus.calls(), 5);
        assert_eq!(report.dropped, 1);
        assert_eq!(report.published, 1);
        // A dropped frame is not a sequence gap.
        assert_eq!(report.gaps, 0);
        assert_eq!(report.last_seq, 2);
    }

    #[tokio::test]
    async fn zero_retries_means_a_single_attempt() {
        let bus = MemoryPublisher::new();
        bus.fail_next(1, Fault::Reject);
        let config = PumpConfig { publish_retries: 0, ..fast_config() };
        let report = run_all(&bus, config, &[1, 2]).await;

        assert_eq!(bus.seqs(), vec![2]);
        assert_eq!(bus.calls(), 2);
        assert_eq!(report.dropped, 1);
    }

    #[tokio::test]
    async fn hung_publish_times_out_and_is_retried() {
        let bus = MemoryPublisher::new();
        bus.fail_next(1, Fault::Hang);
        let report = run_all(&bus, fast_config(), &[1]).await;

        assert_eq!(bus.seqs(), vec![1]);
        assert_eq!(bus.calls(), 2);
        assert_eq!(report.dropped, 0);
    }

    #[tokio::test]
    async fn shutdown_drains_frames_already_read() {
        let bus = MemoryPublisher::new();
        let (tx, mut rx) = mpsc::channel(8);
        for seq in 1..=3 {
            tx.send(frame(seq)).await.unwrap();
        }
        drop(tx);
        let (trigger, signal) = shutdown::channel();
        trigger.trigger();

        let stream = futures_util::stream::poll_fn(move |cx| rx.poll_recv(cx));
        let report = RelayPump::new(bus.clone(), fast_config()).run(stream, signal).await;

        assert_eq!(bus.seqs(), vec![1, 2, 3]);
        assert_eq!(report.published, 3);
    }

    #[tokio::test]
    async fn drain_makes_a_single_attempt_per_frame() {
        let bus = MemoryPublisher::new();
        bus.fail_next(1, Fault::Reject);
        let (tx, mut rx) = mpsc::channel(8);
        tx.send(frame(1)).await.unwrap();
        tx.send(frame(2)).await.unwrap();
        drop(tx);
        let (trigger, signal) = shutdown::channel();
        trigger.trigger();

        let stream = futures_util::stream::poll_fn(move |cx| rx.poll_recv(cx));
        let report = RelayPump::new(bus.clone(), fast_config()).run(stream, signal).await;

        assert_eq!(bus.seqs(), vec![2]);
        assert_eq!(bus.calls(), 2);
        assert_eq!(report.dropped, 1);
    }

    #[tokio::test]
    async fn drain_gives_up_after_its_timeout() {
        let bus = MemoryPublisher::new();
        let (tx, mut rx) = mpsc::channel::<Frame>(8);
        tx.send(frame(1)).await.unwrap();
        let (trigger, signal) = shutdown::channel();
        trigger.trigger();

        // The sender stays alive, so the stream never ends on its own.
        let stream = futures_util::stream::poll_fn(move |cx| rx.poll_recv(cx));
        let started = Instant::now();
        let report = RelayPump::new(bus.clone(), fast_config()).run(stream, signal).await;

        assert_eq!(report.published, 1);
        assert!(started.elapsed() < Duration::from_secs(2));
        drop(tx);
    }

    #[tokio::test]
    async fn shutdown_while_idle_returns() {
        let bus = MemoryPublisher::new();
        let (tx, mut rx) = mpsc::channel::<Frame>(8);
        let (trigger, signal) = shutdown::channel();
        let stream = futures_util::stream::poll_fn(move |cx| rx.poll_recv(cx));
        let pump = tokio::spawn(RelayPump::new(bus.clone(), fast_config()).run(stream, signal));

        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.trigger();
        let report = tokio::time::timeout(Duration::from_secs(2), pump).await.unwrap().unwrap();
        assert_eq!(report, PumpReport::default());
        drop(tx);
    }

    #[tokio::test]
    async fn due_stats_tick_wins_over_a_backlog() {
        let (_trigger, mut signal) = shutdown::channel();
        let mut backlog = frames(&[1, 2, 3]);
        // First tick of a fresh interval is due immediately.
        let mut ticker = tokio::time::interval(Duration::from_millis(50));

        let first = next_event(&mut backlog, &mut signal, &mut ticker, true).await;
        assert!(matches!(first, PumpEvent::Stats));
        let second = next_event(&mut backlog, &mut signal, &mut ticker, true).await;
        assert!(matches!(second, PumpEvent::Frame(f) if f.seq == 1));
    }

    #[tokio::test]
    async fn stats_disabled_goes_straight_to_frames() {
        let (_trigger, mut signal) = shutdown::channel();
        let mut backlog = frames(&[7]);
        let mut ticker = tokio::time::interval(Duration::from_millis(50));

        let event = next_event(&mut backlog, &mut signal, &mut ticker, false).await;
        assert!(matches!(event, PumpEvent::Frame(f) if f.seq == 7));
        let event = next_event(&mut backlog, &mut signal, &mut ticker, false).await;
        assert!(matches!(event, PumpEvent::Ended));
    }

    #[test]
    fn report_display() {
        let report = PumpReport { published: 7, dropped: 1, gaps: 2, missing: 3, duplicates: 0, last_seq: 11 };
        assert_eq!(
            report.to_string(),
            "published=7 dropped=1 gaps=2 missing=3 duplicates=0 last_seq=11"
        );
    }
}
