use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use async_trait::async_trait;
use futures::{stream::SplitStream, SinkExt, StreamExt};
use shared::{domain::ConnectionState, error::SyncError};
use tokio::{net::TcpStream, sync::watch, sync::Mutex};
use tokio_tungstenite::{
    connect_async,
    tungstenite::protocol::Message,
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};
use url::Url;

use crate::settings::Settings;

pub(crate) type WsReader = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Write half of a connection. A seam so command transmission can be
/// exercised without a live socket.
#[async_trait]
pub trait FrameSink: Send {
    async fn send_text(&mut self, text: String) -> Result<(), SyncError>;
    async fn close(&mut self) -> Result<(), SyncError>;
}

struct WsSink(futures::stream::SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>);

#[async_trait]
impl FrameSink for WsSink {
    async fn send_text(&mut self, text: String) -> Result<(), SyncError> {
        self.0
            .send(Message::Text(text))
            .await
            .map_err(SyncError::transport)
    }

    async fn close(&mut self) -> Result<(), SyncError> {
        self.0.close().await.map_err(SyncError::transport)
    }
}

/// One transport instance and its lifecycle. Exactly one connection is
/// live per subscription; terminal states are final for this instance.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

struct ConnectionInner {
    url: Url,
    state: watch::Sender<ConnectionState>,
    sink: Mutex<Option<Box<dyn FrameSink>>>,
    detached: AtomicBool,
}

impl Connection {
    pub fn new(url: Url) -> Self {
        let (state, _) = watch::channel(ConnectionState::Idle);
        Self {
            inner: Arc::new(ConnectionInner {
                url,
                state,
                sink: Mutex::new(None),
                detached: AtomicBool::new(false),
            }),
        }
    }

    pub fn url(&self) -> &Url {
        &self.inner.url
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Advances the state machine if the step is legal; illegal steps are
    /// ignored so state can never regress or leave a terminal state.
    pub(crate) fn advance(&self, next: ConnectionState) -> bool {
        let mut advanced = false;
        self.inner.state.send_if_modified(|state| {
            if state.may_transition_to(next) {
                *state = next;
                advanced = true;
                true
            } else {
                false
            }
        });
        if advanced {
            debug!(url = %self.inner.url, state = %next, "connection state");
        }
        advanced
    }

    /// Marks the connection as torn down by its owner. Checked before
    /// every state mutation, so an event already in flight when the owner
    /// closes is discarded rather than applied.
    pub(crate) fn detach(&self) {
        self.inner.detached.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_detached(&self) -> bool {
        self.inner.detached.load(Ordering::SeqCst)
    }

    /// Dials the endpoint, retrying per the reconnect policy while the
    /// state stays `Connecting`. On success the write half is installed
    /// for command transmission and the read half is returned.
    pub(crate) async fn establish(&self, settings: &Settings) -> Result<WsReader, SyncError> {
        self.advance(ConnectionState::Connecting);
        let mut failed_attempts = 0u32;
        loop {
            if self.is_detached() {
                return Err(SyncError::transport("connection closed during connect"));
            }
            match self.dial(settings).await {
                Ok(stream) => {
                    let (writer, reader) = stream.split();
                    *self.inner.sink.lock().await = Some(Box::new(WsSink(writer)));
                    self.advance(ConnectionState::Open);
                    info!(url = %self.inner.url, "connection open");
                    return Ok(reader);
                }
                Err(err) => {
                    failed_attempts += 1;
                    match settings.reconnect.delay_for(failed_attempts) {
                        Some(delay) => {
                            warn!(
                                url = %self.inner.url,
                                attempt = failed_attempts,
                                delay_ms = delay.as_millis() as u64,
                                error = %err,
                                "connect failed, retrying"
                            );
                            tokio::time::sleep(delay).await;
                        }
                        None => {
                            self.advance(ConnectionState::Errored);
                            return Err(err);
                        }
                    }
                }
            }
        }
    }

    async fn dial(
        &self,
        settings: &Settings,
    ) -> Result<WebSocketStream<MaybeTlsStream<TcpStream>>, SyncError> {
        let connect = connect_async(self.inner.url.as_str());
        let result = match settings.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, connect)
                .await
                .map_err(|_| SyncError::transport("websocket handshake timed out"))?,
            None => connect.await,
        };
        result
            .map(|(stream, _response)| stream)
            .map_err(SyncError::transport)
    }

    /// Hands one text frame to the transport. Fails with a state error
    /// when no transport is installed (never connected, or already torn
    /// down).
    pub(crate) async fn send_text(&self, text: String) -> Result<(), SyncError> {
        let mut guard = self.inner.sink.lock().await;
        match guard.as_mut() {
            Some(sink) => sink.send_text(text).await,
            None => Err(SyncError::State {
                state: self.state(),
            }),
        }
    }

    /// Releases the transport and finalizes the state machine. The owner
    /// must have called [`Connection::detach`] and stopped the event task
    /// first.
    pub(crate) async fn shutdown(&self) {
        if let Some(mut sink) = self.inner.sink.lock().await.take() {
            let _ = sink.close().await;
        }
        self.advance(ConnectionState::Closed);
    }

    #[cfg(test)]
    pub(crate) async fn install_sink_for_test(&self, sink: Box<dyn FrameSink>) {
        *self.inner.sink.lock().await = Some(sink);
    }
}

/// Accepts `ws://`/`wss://` endpoints, mapping `http(s)://` to the
/// websocket scheme the way the rest of the dashboard's URLs are written.
pub fn normalize_url(raw: &str) -> Result<Url, SyncError> {
    let raw = if let Some(rest) = raw.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = raw.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        raw.to_string()
    };
    let url = Url::parse(&raw).map_err(SyncError::transport)?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(SyncError::Transport(format!(
            "unsupported url scheme '{other}'"
        ))),
    }
}
