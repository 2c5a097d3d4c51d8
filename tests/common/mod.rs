#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests, and https://github.com/rust-lang/rust-clippy/issues/13981"
)]
#![allow(
    unused,
    reason = "Not every test binary uses every helper"
)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashboard_realtime::ws::config::ReconnectConfig;
use dashboard_realtime::{Config, Endpoint};
use futures_util::{SinkExt as _, StreamExt as _};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

pub const WAIT: Duration = Duration::from_secs(2);

#[derive(Clone, Debug)]
enum Outbound {
    Text(String),
    /// Close every live socket with a going-away code
    Restart,
    /// Close every live socket with a normal-closure code
    Shutdown,
}

/// Mock dashboard WebSocket server.
///
/// Records every text frame the client sends, except keepalive pings, and answers pings
/// with `{"type":"pong"}` unless told not to.
pub struct MockWsServer {
    addr: SocketAddr,
    /// Broadcast to every connected client
    outbound: broadcast::Sender<Outbound>,
    /// Frames received from clients, in arrival order
    frames_rx: mpsc::UnboundedReceiver<Value>,
    /// Handshakes completed so far
    connections: Arc<AtomicUsize>,
    /// Pings received so far
    pings: Arc<AtomicUsize>,
    /// When false, TCP connections are dropped before the handshake
    accepting: Arc<AtomicBool>,
    answer_pings: Arc<AtomicBool>,
    close_codes: Arc<Mutex<Vec<u16>>>,
}

impl MockWsServer {
    /// Start a mock server on a random port.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (outbound, _) = broadcast::channel::<Outbound>(100);
        let (frames_tx, frames_rx) = mpsc::unbounded_channel::<Value>();
        let connections = Arc::new(AtomicUsize::new(0));
        let pings = Arc::new(AtomicUsize::new(0));
        let accepting = Arc::new(AtomicBool::new(true));
        let answer_pings = Arc::new(AtomicBool::new(true));
        let close_codes = Arc::new(Mutex::new(Vec::new()));

        let server = Self {
            addr,
            outbound: outbound.clone(),
            frames_rx,
            connections: Arc::clone(&connections),
            pings: Arc::clone(&pings),
            accepting: Arc::clone(&accepting),
            answer_pings: Arc::clone(&answer_pings),
            close_codes: Arc::clone(&close_codes),
        };

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                if !accepting.load(Ordering::SeqCst) {
                    drop(stream);
                    continue;
                }

                let Ok(ws_stream) = tokio_tungstenite::accept_async(stream).await else {
                    continue;
                };
                connections.fetch_add(1, Ordering::SeqCst);

                let (mut write, mut read) = ws_stream.split();
                let frames_tx = frames_tx.clone();
                let mut outbound_rx = outbound.subscribe();
                let pings = Arc::clone(&pings);
                let answer_pings = Arc::clone(&answer_pings);
                let close_codes = Arc::clone(&close_codes);

                tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            msg = read.next() => match msg {
                                Some(Ok(Message::Text(text))) => {
                                    let Ok(value) = serde_json::from_str::<Value>(&text) else {
                                        continue;
                                    };
                                    if value["action"] == "ping" {
                                        pings.fetch_add(1, Ordering::SeqCst);
                                        if answer_pings.load(Ordering::SeqCst) {
                                            let pong = json!({ "type": "pong" }).to_string();
                                            if write.send(Message::Text(pong.into())).await.is_err() {
                                                break;
                                            }
                                        }
                                    } else {
                                        drop(frames_tx.send(value));
                                    }
                                }
                                Some(Ok(Message::Close(frame))) => {
                                    if let Some(frame) = frame {
                                        close_codes.lock().unwrap().push(frame.code.into());
                                    }
                                    break;
                                }
                                Some(Ok(_)) => {}
                                _ => break,
                            },
                            msg = outbound_rx.recv() => match msg {
                                Ok(Outbound::Text(text)) => {
                                    if write.send(Message::Text(text.into())).await.is_err() {
                                        break;
                                    }
                                }
                                Ok(Outbound::Restart) => {
                                    let close = Message::Close(Some(CloseFrame {
                                        code: CloseCode::Away,
                                        reason: "server restart".into(),
                                    }));
                                    drop(write.send(close).await);
                                    break;
                                }
                                Ok(Outbound::Shutdown) => {
                                    let close = Message::Close(Some(CloseFrame {
                                        code: CloseCode::Normal,
                                        reason: "session ended".into(),
                                    }));
                                    drop(write.send(close).await);
                                    break;
                                }
                                Err(_) => break,
                            },
                        }
                    }
                });
            }
        });

        server
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(format!("http://{}", self.addr), "/ws")
    }

    /// Send a JSON frame to every connected client.
    pub fn send(&self, message: &Value) {
        self.send_raw(&message.to_string());
    }

    pub fn send_raw(&self, text: &str) {
        drop(self.outbound.send(Outbound::Text(text.to_owned())));
    }

    /// Close every live socket with a going-away code.
    pub fn drop_connections(&self) {
        drop(self.outbound.send(Outbound::Restart));
    }

    /// Close every live socket with a normal-closure code.
    pub fn close_connections(&self) {
        drop(self.outbound.send(Outbound::Shutdown));
    }

    pub fn set_accepting(&self, accepting: bool) {
        self.accepting.store(accepting, Ordering::SeqCst);
    }

    pub fn set_answer_pings(&self, answer: bool) {
        self.answer_pings.store(answer, Ordering::SeqCst);
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn pings(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    pub fn close_codes(&self) -> Vec<u16> {
        self.close_codes.lock().unwrap().clone()
    }

    /// Next non-ping frame sent by a client.
    pub async fn next_frame(&mut self) -> Option<Value> {
        timeout(WAIT, self.frames_rx.recv()).await.ok().flatten()
    }

    /// Next frame, which must be a subscribe for `channel`.
    pub async fn expect_subscribe(&mut self, channel: &str) {
        let frame = self.next_frame().await.unwrap();
        assert_eq!(
            frame,
            json!({ "action": "subscribe", "channel": channel }),
            "expected subscribe for {channel}"
        );
    }

    /// Wait until no frame arrives for `quiet`, returning what did arrive.
    pub async fn drain_frames(&mut self, quiet: Duration) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(Some(frame)) = timeout(quiet, self.frames_rx.recv()).await {
            frames.push(frame);
        }
        frames
    }

    /// Wait until at least `count` handshakes have completed.
    pub async fn wait_for_connections(&self, count: usize) -> bool {
        timeout(WAIT, async {
            while self.connections() < count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .is_ok()
    }
}

/// An endpoint nothing listens on.
pub async fn dead_endpoint() -> Endpoint {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    Endpoint::new(format!("ws://{addr}"), "/ws")
}

/// Fast timers so that reconnection tests finish quickly.
pub fn fast_config() -> Config {
    let mut config = Config::default();
    config.connect_timeout = Duration::from_secs(1);
    config.reconnect = ReconnectConfig::bounded(5)
        .with_backoff(Duration::from_millis(50), Duration::from_millis(200))
        .with_jitter(0.0);
    config.circuit_breaker.failure_threshold = 100;
    config.health_check = None;
    config
}
