//! Scripted in-process upstream for tests.
//!
//! Each accepted TCP connection plays the next [`Session`] from the script.
//! Connections beyond the end of the script get a well-behaved default
//! (read the subscription, ack it, then keep reading until the client leaves).

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;

/// The standard Binance subscription ack for request id 1.
pub const ACK: &str = r#"{"result":null,"id":1}"#;

/// What one upstream connection does.
#[derive(Debug, Clone)]
pub enum Session {
    /// Accept the TCP connection and drop it before the WebSocket handshake.
    Refuse,
    /// Complete the handshake and run the actions in order; when they run
    /// out the socket is dropped without a close frame.
    Script(Vec<Action>),
}

/// One step of a scripted session.
#[derive(Debug, Clone)]
pub enum Action {
    /// Read until the client's subscription request arrives.
    ExpectSubscribe,
    /// Send [`ACK`].
    Ack,
    /// Send a text message.
    Text(String),
    /// Send a binary message.
    Binary(Vec<u8>),
    /// Sleep without reading, so client pings go unanswered.
    Pause(Duration),
    /// Send a close frame and end the session.
    Close,
    /// Keep reading (answering pings) until the client goes away.
    Hold,
}

impl Session {
    /// Subscribe, ack, then run `actions`.
    pub fn streaming(actions: impl IntoIterator<Item = Action>) -> Self {
        let mut steps = vec![Action::ExpectSubscribe, Action::Ack];
        steps.extend(actions);
        Self::Script(steps)
    }
}

/// A mock upstream listening on an ephemeral localhost port.
pub struct MockUpstream {
    addr: SocketAddr,
    connections: watch::Receiver<usize>,
    requests: Arc<Mutex<Vec<String>>>,
    task: tokio::task::JoinHandle<()>,
}

impl MockUpstream {
    pub async fn start(script: Vec<Session>) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (conn_tx, connections) = watch::channel(0usize);
        let requests = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&requests);

        let task = tokio::spawn(async move {
            let mut script = script.into_iter();
            while let Ok((tcp, _)) = listener.accept().await {
                let session = script
                    .next()
                    .unwrap_or_else(|| Session::streaming([Action::Hold]));
                conn_tx.send_modify(|n| *n += 1);
                tokio::spawn(play(tcp, session, Arc::clone(&recorded)));
            }
        });

        Ok(Self { addr, connections, requests, task })
    }

    /// `ws://` URL of the mock.
    pub fn url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    /// TCP connections accepted so far.
    pub fn connections(&self) -> usize {
        *self.connections.borrow()
    }

    /// Wait until at least `n` connections were accepted. Returns false on timeout.
    pub async fn wait_for_connections(&self, n: usize, timeout: Duration) -> bool {
        let mut rx = self.connections.clone();
        matches!(tokio::time::timeout(timeout, rx.wait_for(|c| *c >= n)).await, Ok(Ok(_)))
    }

    /// Subscription requests received, in arrival order.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl Drop for MockUpstream {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn play(tcp: TcpStream, session: Session, requests: Arc<Mutex<Vec<String>>>) {
    let actions = match session {
        Session::Refuse => return,
        Session::Script(actions) => actions,
    };
    let Ok(mut ws) = tokio_tungstenite::accept_async(tcp).await else {
        return;
    };

    for action in actions {
        match action {
            Action::ExpectSubscribe => loop {
                match ws.next().await {
                    Some(Ok(Message::Text(text))) => {
                        if let Ok(mut r) = requests.lock() {
                            r.push(text.as_str().to_owned());
                        }
                        break;
                    }
                    Some(Ok(_)) => continue,
                    _ => return,
                }
            },
            Action::Ack => {
                if ws.send(Message::text(ACK)).await.is_err() {
                    return;
                }
            }
            Action::Text(text) => {
                if ws.send(Message::text(text)).await.is_err() {
                    return;
                }
            }
            Action::Binary(data) => {
                if ws.send(Message::binary(data)).await.is_err() {
                    return;
                }
            }
            Action::Pause(d) => tokio::time::sleep(d).await,
            Action::Close => {
                let _ = ws.close(None).await;
                return;
            }
            Action::Hold => {
                while let Some(Ok(_)) = ws.next().await {}
                return;
            }
        }
    }
}
