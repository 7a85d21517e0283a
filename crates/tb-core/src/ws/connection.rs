//! One logical upstream subscription over a sequence of physical sockets.
//!
//! A `FeedConnection` runs as a tokio task that:
//! 1. Dials the endpoint (bounded by the connect timeout).
//! 2. Sends the subscription request and waits for the ack.
//! 3. Streams: the read loop tags every data message with the next sequence
//!    number and hands it to the [`FrameStream`]; the heartbeat loop pings on
//!    a fixed interval and tears the socket down if the upstream goes quiet.
//! 4. On any failure, closes the socket and redials after a backoff delay.
//!
//! Sequence numbers are never reset across reconnects, so the consumer can
//! spot discontinuities.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, Stream, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue, Request};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::envelope::{self, Envelope};
use super::proxy;
use super::stats::FeedStats;
use crate::backoff::BackoffPolicy;
use crate::config::FeedConfig;
use crate::error::{FeedError, TbError};
use crate::shutdown::{self, ShutdownSignal, ShutdownTrigger};
use crate::time_util;
use crate::types::{ConnectionState, Frame, SubscriptionSpec};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// The consumer side of a feed: an ordered, unbounded sequence of frames.
///
/// Ends only after [`FeedConnection::stop`] (or when the connection is
/// dropped), once every frame already read from the socket has been yielded.
#[derive(Debug)]
pub struct FrameStream {
    rx: mpsc::Receiver<Frame>,
}

impl FrameStream {
    /// Wait for the next frame. `None` means the feed has shut down.
    pub async fn next_frame(&mut self) -> Option<Frame> {
        self.rx.recv().await
    }
}

impl Stream for FrameStream {
    type Item = Frame;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Frame>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

/// Handle to a reconnecting upstream subscription.
pub struct FeedConnection {
    config: FeedConfig,
    stats: Arc<FeedStats>,
    state_tx: Option<watch::Sender<ConnectionState>>,
    state_rx: watch::Receiver<ConnectionState>,
    shutdown: ShutdownTrigger,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl FeedConnection {
    /// Create a new (not yet started) connection.
    pub fn new(config: FeedConfig) -> Self {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (shutdown, _) = shutdown::channel();
        Self {
            config,
            stats: Arc::new(FeedStats::default()),
            state_tx: Some(state_tx),
            state_rx,
            shutdown,
            task: None,
        }
    }

    /// Spawn the connection task and return the frame sequence.
    ///
    /// Fails if the connection was already started or the configured
    /// endpoint/headers cannot form a handshake request.
    pub fn start(&mut self, spec: SubscriptionSpec) -> Result<FrameStream, TbError> {
        build_request(&self.config)?;
        let state_tx = self.state_tx.take().ok_or(TbError::AlreadyStarted)?;
        let (frames_tx, rx) = mpsc::channel(self.config.frame_buffer.max(1));

        let driver = FeedDriver {
            backoff: self.config.backoff.policy(),
            config: self.config.clone(),
            spec,
            frames: frames_tx,
            state: state_tx,
            shutdown: self.shutdown.subscribe(),
            stats: Arc::clone(&self.stats),
            next_seq: 1,
            session: 0,
        };
        self.task = Some(tokio::spawn(driver.run()));
        Ok(FrameStream { rx })
    }

    /// Request a graceful shutdown. Returns immediately; see [`join`](Self::join).
    pub fn stop(&self) {
        if !self.shutdown.is_triggered() {
            info!("[feed] stop requested");
        }
        self.shutdown.trigger();
    }

    /// Wait for the connection task to finish.
    pub async fn join(&mut self) {
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Receiver that observes every state transition.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    pub fn stats(&self) -> Arc<FeedStats> {
        Arc::clone(&self.stats)
    }

    /// The cancellation signal raised by [`stop`](Self::stop), for components
    /// that must shut down together with this feed.
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.subscribe()
    }
}

/// How a session ended when it did not fail.
enum SessionEnd {
    Shutdown,
    ConsumerGone,
}

/// State owned by the background task.
struct FeedDriver {
    config: FeedConfig,
    spec: SubscriptionSpec,
    frames: mpsc::Sender<Frame>,
    state: watch::Sender<ConnectionState>,
    shutdown: ShutdownSignal,
    stats: Arc<FeedStats>,
    backoff: BackoffPolicy,
    next_seq: u64,
    session: u64,
}

impl FeedDriver {
    /// Main loop: session, backoff, repeat until shutdown.
    async fn run(mut self) {
        loop {
            match self.run_session().await {
                Ok(SessionEnd::Shutdown) => break,
                Ok(SessionEnd::ConsumerGone) => {
                    warn!("[feed] frame consumer went away, stopping");
                    break;
                }
                Err(e) => {
                    self.set_state(ConnectionState::Disconnected);
                    let delay = self.backoff.next_delay();
                    let attempt = self.backoff.attempt();
                    match e {
                        FeedError::Dial(_) | FeedError::Subscription(_) => {
                            self.stats.on_connect_failure(attempt);
                            warn!(attempt, ?delay, error = %e, "[feed] connect failed");
                        }
                        _ => {
                            self.stats.on_disconnect(attempt);
                            warn!(attempt, ?delay, error = %e, "[feed] connection lost");
                        }
                    }
                    let mut shutdown = self.shutdown.clone();
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.wait() => break,
                    }
                }
            }
        }
        self.set_state(ConnectionState::Disconnected);
        info!(last_seq = self.next_seq - 1, sessions = self.session, "[feed] stopped");
    }

    /// One physical connection: dial, subscribe, stream.
    async fn run_session(&mut self) -> Result<SessionEnd, FeedError> {
        let mut shutdown = self.shutdown.clone();
        if shutdown.is_triggered() {
            return Ok(SessionEnd::Shutdown);
        }

        self.set_state(ConnectionState::Connecting);
        self.stats.on_connect_attempt();
        info!(endpoint = %self.config.endpoint, attempt = self.backoff.attempt() + 1, "[feed] connecting");

        let ws = tokio::select! {
            r = dial(&self.config) => r?,
            _ = shutdown.wait() => return Ok(SessionEnd::Shutdown),
        };
        info!("[feed] connected");

        self.set_state(ConnectionState::Subscribing);
        let (sink, mut source) = ws.split();
        let writer = Mutex::new(sink);

        let subscribed = tokio::select! {
            r = self.subscribe(&writer, &mut source) => r.map(Some),
            _ = shutdown.wait() => Ok(None),
        };
        let early = match subscribed {
            Ok(Some(early)) => early,
            Ok(None) => {
                self.set_state(ConnectionState::Closing);
                close_socket(&writer, self.config.close_timeout()).await;
                return Ok(SessionEnd::Shutdown);
            }
            Err(e) => {
                close_socket(&writer, self.config.close_timeout()).await;
                return Err(e);
            }
        };

        self.session += 1;
        self.backoff.reset();
        self.stats.on_streaming();
        self.set_state(ConnectionState::Streaming);
        info!(session = self.session, topics = ?self.spec.topics(), "[feed] subscription acknowledged, streaming");

        let activity = Activity::new();
        let mut consumer_gone = false;
        for frame in early {
            if self.deliver(frame, &activity).await.is_err() {
                consumer_gone = true;
                break;
            }
        }

        let outcome = if consumer_gone {
            Ok(SessionEnd::ConsumerGone)
        } else {
            let stats = Arc::clone(&self.stats);
            let interval = self.config.heartbeat_interval();
            let timeout = self.config.heartbeat_timeout();
            tokio::select! {
                r = self.read_loop(&mut source, &activity, &mut shutdown) => r,
                e = heartbeat_loop(&writer, &activity, interval, timeout) => {
                    if matches!(e, FeedError::HeartbeatTimeout(_)) {
                        stats.on_heartbeat_timeout();
                        warn!(?timeout, "[feed] heartbeat timeout");
                    }
                    Err(e)
                }
            }
        };

        if matches!(outcome, Ok(SessionEnd::Shutdown)) {
            self.set_state(ConnectionState::Closing);
        }
        close_socket(&writer, self.config.close_timeout()).await;
        outcome
    }

    /// Send the subscription request and wait for its ack.
    ///
    /// Updates that arrive first are tagged and returned, to be delivered once
    /// the session is streaming.
    async fn subscribe(
        &mut self,
        writer: &Mutex<WsSink>,
        source: &mut WsSource,
    ) -> Result<Vec<Frame>, FeedError> {
        let request = self.spec.wire_request();
        debug!("[feed] subscribing: {request}");
        writer
            .lock()
            .await
            .send(Message::text(request))
            .await
            .map_err(|e| FeedError::Subscription(format!("send failed: {e}")))?;

        let id = self.spec.request_id();
        let timeout = self.config.subscribe_timeout();
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        let mut early = Vec::new();

        loop {
            let msg = tokio::select! {
                m = source.next() => m,
                _ = &mut deadline => {
                    return Err(FeedError::Subscription(format!("no ack within {timeout:?}")));
                }
            };
            let payload = match msg {
                Some(Ok(Message::Text(text))) => Bytes::copy_from_slice(text.as_bytes()),
                Some(Ok(Message::Binary(data))) => data,
                Some(Ok(Message::Close(frame))) => {
                    return Err(FeedError::Subscription(format!("closed before ack: {frame:?}")));
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(FeedError::Subscription(e.to_string())),
                None => return Err(FeedError::Subscription("stream ended before ack".into())),
            };

            match envelope::classify(&payload) {
                Ok(Envelope::Response(resp)) if resp.answers(id) => {
                    if let Some(err) = resp.error {
                        return Err(FeedError::Subscription(format!("rejected: {err}")));
                    }
                    if !resp.result {
                        return Err(FeedError::Subscription(format!(
                            "malformed ack: {}",
                            String::from_utf8_lossy(&payload)
                        )));
                    }
                    return Ok(early);
                }
                Ok(Envelope::Response(resp)) => {
                    debug!(id = ?resp.id, "[feed] ignoring unrelated response while subscribing");
                }
                Ok(Envelope::Update) => {
                    let seq = self.take_seq();
                    early.push(Frame::new(seq, self.session + 1, time_util::now_us(), payload));
                }
                Err(e) => self.discard(e),
            }
        }
    }

    /// Sole reader of the socket while streaming.
    async fn read_loop(
        &mut self,
        source: &mut WsSource,
        activity: &Activity,
        shutdown: &mut ShutdownSignal,
    ) -> Result<SessionEnd, FeedError> {
        loop {
            let msg = tokio::select! {
                biased;
                _ = shutdown.wait() => return Ok(SessionEnd::Shutdown),
                m = source.next() => m,
            };
            activity.touch();

            let payload = match msg {
                Some(Ok(Message::Text(text))) => Bytes::copy_from_slice(text.as_bytes()),
                Some(Ok(Message::Binary(data))) => data,
                Some(Ok(Message::Close(frame))) => {
                    return Err(FeedError::Closed(format!("close frame {frame:?}")));
                }
                // Ping, pong: liveness only. tungstenite queues the pong reply itself.
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(FeedError::Transport(e.to_string())),
                None => return Err(FeedError::Closed("stream ended".into())),
            };

            match envelope::classify(&payload) {
                Ok(Envelope::Update) => {
                    let seq = self.take_seq();
                    let frame = Frame::new(seq, self.session, time_util::now_us(), payload);
                    if self.deliver(frame, activity).await.is_err() {
                        return Ok(SessionEnd::ConsumerGone);
                    }
                }
                Ok(Envelope::Response(resp)) => match resp.error {
                    Some(err) => warn!(id = ?resp.id, error = %err, "[feed] upstream error response"),
                    None => debug!(id = ?resp.id, "[feed] upstream response"),
                },
                Err(e) => self.discard(e),
            }
        }
    }

    /// Hand a frame to the consumer, waiting for channel space.
    ///
    /// Time spent blocked here is not counted against the heartbeat.
    async fn deliver(&mut self, frame: Frame, activity: &Activity) -> Result<(), ()> {
        activity.set_delivering(true);
        let sent = self.frames.send(frame).await;
        activity.set_delivering(false);
        activity.touch();
        match sent {
            Ok(()) => {
                self.stats.on_frame_delivered();
                Ok(())
            }
            Err(_) => Err(()),
        }
    }

    /// Consume a sequence number for an undecodable message and drop it.
    fn discard(&mut self, err: FeedError) {
        let seq = self.take_seq();
        self.stats.on_decode_error();
        warn!(seq, error = %err, "[feed] discarding undecodable frame");
    }

    fn take_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.stats.on_seq_assigned(seq);
        seq
    }

    fn set_state(&self, next: ConnectionState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            debug!("[feed] state {prev} -> {next}");
        }
    }
}

/// Last time any inbound traffic was seen, plus whether the read loop is
/// parked on a full frame channel.
struct Activity {
    origin: Instant,
    last_ms: AtomicU64,
    delivering: AtomicBool,
}

impl Activity {
    fn new() -> Self {
        Self { origin: Instant::now(), last_ms: AtomicU64::new(0), delivering: AtomicBool::new(false) }
    }

    fn touch(&self) {
        let ms = u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.last_ms.store(ms, Ordering::Relaxed);
    }

    fn last(&self) -> Instant {
        self.origin + Duration::from_millis(self.last_ms.load(Ordering::Relaxed))
    }

    fn set_delivering(&self, on: bool) {
        self.delivering.store(on, Ordering::Relaxed);
    }

    fn is_delivering(&self) -> bool {
        self.delivering.load(Ordering::Relaxed)
    }
}

/// Ping on a fixed interval; fail once the upstream has been silent too long.
///
/// Only returns on failure. Each ping holds the writer lock for exactly one send.
async fn heartbeat_loop(
    writer: &Mutex<WsSink>,
    activity: &Activity,
    interval: Duration,
    timeout: Duration,
) -> FeedError {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let deadline = activity.last() + timeout;
        tokio::select! {
            _ = ticker.tick() => {
                let sent = writer.lock().await.send(Message::Ping(Bytes::new())).await;
                if let Err(e) = sent {
                    return FeedError::Transport(format!("ping failed: {e}"));
                }
            }
            _ = tokio::time::sleep_until(deadline) => {
                if activity.is_delivering() {
                    activity.touch();
                } else if activity.last() + timeout <= Instant::now() {
                    return FeedError::HeartbeatTimeout(timeout);
                }
            }
        }
    }
}

/// Best-effort close frame, bounded so a dead peer cannot stall teardown.
async fn close_socket(writer: &Mutex<WsSink>, timeout: Duration) {
    let closed = tokio::time::timeout(timeout, async { writer.lock().await.close().await }).await;
    if let Ok(Err(e)) = closed {
        debug!("[feed] close: {e}");
    }
}

/// Build the handshake request: endpoint plus any extra headers.
fn build_request(config: &FeedConfig) -> Result<Request<()>, TbError> {
    let mut request = config
        .endpoint
        .as_str()
        .into_client_request()
        .map_err(|e| TbError::Config(format!("feed.endpoint: {e}")))?;
    for (key, value) in &config.extra_headers {
        let name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|e| TbError::Config(format!("header {key:?}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| TbError::Config(format!("header {key:?} value: {e}")))?;
        request.headers_mut().insert(name, value);
    }
    Ok(request)
}

/// Establish the WebSocket connection (TLS for `wss://`), tunnelling through
/// an HTTP proxy when one is configured or set in the environment.
async fn dial(config: &FeedConfig) -> Result<WsStream, FeedError> {
    let request = build_request(config).map_err(|e| FeedError::Dial(e.to_string()))?;
    let endpoint = url::Url::parse(&config.endpoint).map_err(|e| FeedError::Dial(e.to_string()))?;
    let via = proxy::resolve(&endpoint, config.proxy.as_deref(), |key| std::env::var(key).ok())?;
    let timeout = config.connect_timeout();

    let connecting = async {
        let Some(via) = via else {
            return tokio_tungstenite::connect_async(request).await.map_err(|e| FeedError::Dial(e.to_string()));
        };
        let host = endpoint.host_str().ok_or_else(|| FeedError::Dial("endpoint has no host".into()))?;
        let port = endpoint.port_or_known_default().unwrap_or(443);
        debug!(proxy = %via.host_str().unwrap_or_default(), target = %host, port, "[feed] dialing via proxy");
        let tcp = proxy::tunnel(&via, host, port).await?;
        tokio_tungstenite::client_async_tls(request, tcp).await.map_err(|e| FeedError::Dial(e.to_string()))
    };
    match tokio::time::timeout(timeout, connecting).await {
        Ok(Ok((stream, _response))) => Ok(stream),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(FeedError::Dial(format!("timed out after {timeout:?}"))),
    }
}
