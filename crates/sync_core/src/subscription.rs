use std::sync::{Arc, Mutex as StdMutex};

use futures::StreamExt;
use shared::{
    domain::ConnectionState,
    error::SyncError,
    protocol::{Command, ViewKind},
};
use tokio::{
    sync::{watch, Mutex},
    task::JoinHandle,
};
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{info, warn};
use url::Url;

use crate::{
    command::CommandSender,
    connection::{normalize_url, Connection, WsReader},
    router::MessageRouter,
    settings::Settings,
    store::{ViewSnapshot, ViewStateStore},
};

/// The unit a page acquires: one connection, one router configuration and
/// one view-state store, bound together for a single endpoint URL.
///
/// All inbound routing and store mutation happen on one spawned event
/// task; consumers only take snapshots. Dropping the subscription tears
/// the connection down, but [`Subscription::close`] is the deterministic
/// path and should be preferred.
pub struct Subscription {
    view: ViewKind,
    connection: Connection,
    store: Arc<Mutex<ViewStateStore>>,
    sender: CommandSender,
    updates: Arc<watch::Sender<u64>>,
    last_error: Arc<Mutex<Option<SyncError>>>,
    event_task: StdMutex<Option<JoinHandle<()>>>,
}

impl Subscription {
    /// Acquires a subscription and starts connecting in the background.
    /// Errors only on an unusable URL; connect failures surface through
    /// [`Subscription::state`] and [`Subscription::last_error`]. Must be
    /// called within a tokio runtime.
    pub fn open(url: &str, view: ViewKind, settings: Settings) -> Result<Subscription, SyncError> {
        let url = normalize_url(url)?;
        info!(%url, %view, "acquiring subscription");

        let connection = Connection::new(url);
        let store = Arc::new(Mutex::new(ViewStateStore::new(view)));
        let (updates, _) = watch::channel(0u64);
        let updates = Arc::new(updates);
        let last_error = Arc::new(Mutex::new(None));
        let sender = CommandSender::new(connection.clone());

        let event_task = tokio::spawn(run_event_loop(
            connection.clone(),
            MessageRouter::new(view),
            Arc::clone(&store),
            Arc::clone(&updates),
            Arc::clone(&last_error),
            settings,
        ));

        Ok(Self {
            view,
            connection,
            store,
            sender,
            updates,
            last_error,
            event_task: StdMutex::new(Some(event_task)),
        })
    }

    pub fn view(&self) -> ViewKind {
        self.view
    }

    pub fn url(&self) -> &Url {
        self.connection.url()
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Watch channel following the connection state machine.
    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.connection.state_watch()
    }

    /// Watch channel bumped on every applied state change; await
    /// `changed()` on it to follow the evolving snapshot.
    pub fn updates(&self) -> watch::Receiver<u64> {
        self.updates.subscribe()
    }

    pub async fn snapshot(&self) -> ViewSnapshot {
        self.store.lock().await.snapshot(self.connection.state())
    }

    pub async fn ready(&self) -> bool {
        self.store.lock().await.ready()
    }

    /// Most recent transport error, if the connection failed or dropped.
    pub async fn last_error(&self) -> Option<SyncError> {
        self.last_error.lock().await.clone()
    }

    pub async fn send(&self, command: &Command) -> Result<(), SyncError> {
        self.sender.send(command).await
    }

    /// Deterministic teardown: detaches event delivery first, then stops
    /// the event task, then releases the transport. After this returns no
    /// further state mutation is observable, even for transport events
    /// that were already in flight.
    pub async fn close(&self) {
        self.connection.detach();
        let task = self.event_task.lock().ok().and_then(|mut guard| guard.take());
        if let Some(task) = task {
            task.abort();
        }
        self.connection.shutdown().await;
        self.updates.send_modify(|revision| *revision += 1);
        info!(url = %self.connection.url(), "subscription closed");
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.connection.detach();
        if let Ok(mut guard) = self.event_task.lock() {
            if let Some(task) = guard.take() {
                task.abort();
            }
        }
    }
}

async fn run_event_loop(
    connection: Connection,
    router: MessageRouter,
    store: Arc<Mutex<ViewStateStore>>,
    updates: Arc<watch::Sender<u64>>,
    last_error: Arc<Mutex<Option<SyncError>>>,
    settings: Settings,
) {
    let reader = match connection.establish(&settings).await {
        Ok(reader) => reader,
        Err(err) => {
            warn!(url = %connection.url(), error = %err, "subscription connect failed");
            *last_error.lock().await = Some(err);
            updates.send_modify(|revision| *revision += 1);
            return;
        }
    };
    read_frames(reader, &connection, &router, &store, &updates, &last_error).await;
}

async fn read_frames(
    mut reader: WsReader,
    connection: &Connection,
    router: &MessageRouter,
    store: &Arc<Mutex<ViewStateStore>>,
    updates: &Arc<watch::Sender<u64>>,
    last_error: &Arc<Mutex<Option<SyncError>>>,
) {
    while let Some(message) = reader.next().await {
        if connection.is_detached() {
            break;
        }
        match message {
            Ok(Message::Text(text)) => match router.route(&text) {
                Ok(payloads) => {
                    if payloads.is_empty() {
                        continue;
                    }
                    {
                        let mut store = store.lock().await;
                        if connection.is_detached() {
                            break;
                        }
                        for payload in payloads {
                            store.apply(payload);
                        }
                    }
                    updates.send_modify(|revision| *revision += 1);
                }
                Err(err) => {
                    warn!(url = %connection.url(), error = %err, "dropping malformed frame");
                }
            },
            Ok(Message::Close(_)) => {
                info!(url = %connection.url(), "peer closed connection");
                connection.advance(ConnectionState::Closed);
                updates.send_modify(|revision| *revision += 1);
                break;
            }
            // Ping/pong and binary frames are transport noise at this layer.
            Ok(_) => {}
            Err(err) => {
                let err = SyncError::transport(err);
                warn!(url = %connection.url(), error = %err, "connection dropped");
                *last_error.lock().await = Some(err);
                connection.advance(ConnectionState::Errored);
                updates.send_modify(|revision| *revision += 1);
                break;
            }
        }
    }
}
