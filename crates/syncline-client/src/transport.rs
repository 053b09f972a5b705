//! Async driver bridging the state machine to a real transport.
//!
//! Provides [`spawn`], which owns a [`ChatClient`] on a tokio task and wires
//! it to a [`RoomTransport`] (live subscription) and a [`ChatApi`] (REST
//! fetch/mutation surface). This is a thin layer that only moves events and
//! executes actions; synchronization logic stays in the Sans-IO client.

use std::sync::Arc;

use async_trait::async_trait;
use syncline_core::{
    ConnectionChange, Environment, InboundEvent, Message, MessageId, MessageKind, RoomId,
    SessionError, SessionState, SystemEnv, UserId,
};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};

use crate::{ChatClient, ClientAction, ClientEvent};

/// Tick granularity for the driver loop. Must stay well under the 200 ms
/// switch debounce window.
const TICK_INTERVAL: std::time::Duration = std::time::Duration::from_millis(50);

/// Channel capacity for commands and internal completions.
const CHANNEL_CAPACITY: usize = 32;

/// Errors from the REST surface.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request never reached the server (network, timeout).
    #[error("request failed: {0}")]
    Request(String),

    /// The server processed and rejected the request.
    #[error("rejected by server: {0}")]
    Rejected(String),
}

/// A live subscription to one room's event stream.
pub struct RoomSubscription {
    /// Inbound events for the subscribed room. The stream ending without an
    /// explicit close is treated as an unexpected connection loss.
    pub events: mpsc::Receiver<InboundEvent>,
    /// Signalled (or dropped) to close the subscription.
    pub close: oneshot::Sender<()>,
}

/// Transport abstraction: opens logical per-room subscriptions.
#[async_trait]
pub trait RoomTransport: Send + Sync + 'static {
    /// Open a subscription for `room_id`, resolving once the transport
    /// reports ready.
    async fn open(&self, room_id: RoomId) -> Result<RoomSubscription, SessionError>;

    /// Send a typing notification on the live subscription.
    async fn send_typing(&self, room_id: RoomId);
}

/// Paginated fetch and mutation surface of the chat backend.
#[async_trait]
pub trait ChatApi: Send + Sync + 'static {
    /// Fetch one history page, most recent when `cursor` is `None`.
    async fn fetch_page(
        &self,
        room_id: RoomId,
        cursor: Option<u64>,
    ) -> Result<Vec<Message>, ApiError>;

    /// Submit a new message, returning the server's canonical record.
    async fn submit_message(
        &self,
        room_id: RoomId,
        content: String,
        kind: MessageKind,
    ) -> Result<Message, ApiError>;

    /// Update a message, returning the server's canonical record.
    async fn update_message(
        &self,
        room_id: RoomId,
        id: MessageId,
        content: String,
    ) -> Result<Message, ApiError>;

    /// Delete a message.
    async fn delete_message(&self, room_id: RoomId, id: MessageId) -> Result<(), ApiError>;
}

/// Read-only snapshot of the client's observable state, published after
/// every processed event.
#[derive(Debug, Clone, Default)]
pub struct ClientSnapshot {
    /// Room the user is currently on.
    pub active_room: Option<RoomId>,
    /// True iff the active room's subscription is open.
    pub is_connected: bool,
    /// True while a room switch (plus settle delay) is in progress.
    pub is_switching: bool,
    /// Most recent connection failure, for the inline retry banner.
    pub connection_error: Option<String>,
    /// Users currently typing in the active room.
    pub typing_users: Vec<UserId>,
    /// Flattened, ordered messages of the active room.
    pub messages: Vec<Message>,
}

/// Handle to a running chat driver.
pub struct ChatHandle {
    /// Feed user intents (`SelectRoom`, `SendMessage`, ...) into the client.
    pub commands: mpsc::Sender<ClientEvent>,
    /// Observable state after each processed event.
    pub snapshots: watch::Receiver<ClientSnapshot>,
    /// Connection-state transitions, for online/offline indicators.
    pub connection: watch::Receiver<ConnectionChange>,
    abort_handle: tokio::task::AbortHandle,
}

impl ChatHandle {
    /// Stop the driver task.
    pub fn stop(&self) {
        self.abort_handle.abort();
    }
}

/// Messages flowing back into the driver loop from spawned I/O tasks.
enum Internal {
    /// A completion to feed into the state machine.
    Event(ClientEvent),
    /// A subscription finished opening.
    Opened {
        /// Room the subscription belongs to.
        room_id: RoomId,
        /// The live subscription.
        subscription: RoomSubscription,
    },
}

/// Spawn the driver loop for `client` on the current tokio runtime.
pub fn spawn<T, A>(client: ChatClient<SystemEnv>, transport: T, api: A) -> ChatHandle
where
    T: RoomTransport,
    A: ChatApi,
{
    let (commands_tx, commands_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (snapshot_tx, snapshot_rx) = watch::channel(ClientSnapshot::default());
    let (connection_tx, connection_rx) = watch::channel(ConnectionChange {
        room_id: 0,
        state: SessionState::Closed,
        error: None,
    });

    let handle = tokio::spawn(run(
        client,
        Arc::new(transport),
        Arc::new(api),
        commands_rx,
        snapshot_tx,
        connection_tx,
    ));

    ChatHandle {
        commands: commands_tx,
        snapshots: snapshot_rx,
        connection: connection_rx,
        abort_handle: handle.abort_handle(),
    }
}

/// Driver state for the currently installed subscription.
struct ActiveSubscription {
    room_id: RoomId,
    events: mpsc::Receiver<InboundEvent>,
    close: Option<oneshot::Sender<()>>,
}

async fn run<T, A>(
    mut client: ChatClient<SystemEnv>,
    transport: Arc<T>,
    api: Arc<A>,
    mut commands_rx: mpsc::Receiver<ClientEvent>,
    snapshot_tx: watch::Sender<ClientSnapshot>,
    connection_tx: watch::Sender<ConnectionChange>,
) where
    T: RoomTransport,
    A: ChatApi,
{
    let env = SystemEnv::new();
    let (internal_tx, mut internal_rx) = mpsc::channel::<Internal>(CHANNEL_CAPACITY);
    let mut subscription: Option<ActiveSubscription> = None;
    // Room of the most recently requested open; a subscription resolving
    // for any other room lost the race with a newer switch.
    let mut wanted_room: Option<RoomId> = None;
    let mut tick = tokio::time::interval(TICK_INTERVAL);

    loop {
        let event = tokio::select! {
            _ = tick.tick() => ClientEvent::Tick { now: env.now() },
            command = commands_rx.recv() => match command {
                Some(event) => event,
                None => break, // UI handle dropped; shut down
            },
            Some(internal) = internal_rx.recv() => match internal {
                Internal::Event(event) => event,
                Internal::Opened { room_id, subscription: sub } => {
                    if wanted_room == Some(room_id) {
                        subscription = Some(ActiveSubscription {
                            room_id,
                            events: sub.events,
                            close: Some(sub.close),
                        });
                        ClientEvent::TransportOpened { room_id }
                    } else {
                        // Lost the race with a newer switch; close it again.
                        drop(sub);
                        continue;
                    }
                },
            },
            inbound = next_inbound(&mut subscription) => match inbound {
                Some(event) => ClientEvent::Inbound(event),
                None => {
                    let Some(dropped) = subscription.take() else { continue };
                    ClientEvent::TransportLost {
                        room_id: dropped.room_id,
                        reason: "event stream closed".to_string(),
                    }
                },
            },
        };

        let actions = match client.handle(event) {
            Ok(actions) => actions,
            Err(error) => {
                tracing::warn!(%error, "client rejected event");
                Vec::new()
            },
        };

        for action in actions {
            execute(
                action,
                &transport,
                &api,
                &internal_tx,
                &connection_tx,
                &mut subscription,
                &mut wanted_room,
            );
        }

        let _ = snapshot_tx.send(snapshot(&client));
    }
}

/// Wait for the next inbound event, or forever when no subscription is
/// installed.
async fn next_inbound(subscription: &mut Option<ActiveSubscription>) -> Option<InboundEvent> {
    match subscription {
        Some(active) => active.events.recv().await,
        None => std::future::pending().await,
    }
}

fn execute<T, A>(
    action: ClientAction,
    transport: &Arc<T>,
    api: &Arc<A>,
    internal_tx: &mpsc::Sender<Internal>,
    connection_tx: &watch::Sender<ConnectionChange>,
    subscription: &mut Option<ActiveSubscription>,
    wanted_room: &mut Option<RoomId>,
) where
    T: RoomTransport,
    A: ChatApi,
{
    match action {
        ClientAction::OpenSession { room_id } => {
            *wanted_room = Some(room_id);
            let transport = Arc::clone(transport);
            let internal_tx = internal_tx.clone();
            tokio::spawn(async move {
                let internal = match transport.open(room_id).await {
                    Ok(sub) => Internal::Opened { room_id, subscription: sub },
                    Err(error) => Internal::Event(ClientEvent::TransportFailed { room_id, error }),
                };
                let _ = internal_tx.send(internal).await;
            });
        },
        ClientAction::CloseSession { room_id } => {
            if *wanted_room == Some(room_id) {
                *wanted_room = None;
            }
            if let Some(active) = subscription.as_mut()
                && active.room_id == room_id
            {
                if let Some(close) = active.close.take() {
                    let _ = close.send(());
                }
                *subscription = None;
            }
        },
        ClientAction::SendTyping { room_id } => {
            let transport = Arc::clone(transport);
            tokio::spawn(async move {
                transport.send_typing(room_id).await;
            });
        },
        ClientAction::FetchPage { room_id, generation, cursor } => {
            let api = Arc::clone(api);
            let internal_tx = internal_tx.clone();
            tokio::spawn(async move {
                match api.fetch_page(room_id, cursor).await {
                    Ok(page) => {
                        let event =
                            ClientEvent::FetchCompleted { room_id, generation, cursor, page };
                        let _ = internal_tx.send(Internal::Event(event)).await;
                    },
                    Err(error) => {
                        tracing::warn!(room_id, %error, "page fetch failed");
                    },
                }
            });
        },
        ClientAction::SubmitMessage { room_id, generation, temp_id, content, kind } => {
            let api = Arc::clone(api);
            let internal_tx = internal_tx.clone();
            tokio::spawn(async move {
                let event = match api.submit_message(room_id, content, kind).await {
                    Ok(message) => ClientEvent::SendConfirmed { generation, temp_id, message },
                    Err(error) => ClientEvent::SendFailed {
                        generation,
                        temp_id,
                        reason: error.to_string(),
                    },
                };
                let _ = internal_tx.send(Internal::Event(event)).await;
            });
        },
        ClientAction::SubmitEdit { room_id, generation, id, content } => {
            let api = Arc::clone(api);
            let internal_tx = internal_tx.clone();
            tokio::spawn(async move {
                let event = match api.update_message(room_id, id, content).await {
                    Ok(message) => ClientEvent::EditConfirmed { generation, message },
                    Err(error) => {
                        ClientEvent::EditFailed { generation, id, reason: error.to_string() }
                    },
                };
                let _ = internal_tx.send(Internal::Event(event)).await;
            });
        },
        ClientAction::SubmitDelete { room_id, generation, id } => {
            let api = Arc::clone(api);
            let internal_tx = internal_tx.clone();
            tokio::spawn(async move {
                let event = match api.delete_message(room_id, id).await {
                    Ok(()) => ClientEvent::DeleteConfirmed { generation, id },
                    Err(error) => {
                        ClientEvent::DeleteFailed { generation, id, reason: error.to_string() }
                    },
                };
                let _ = internal_tx.send(Internal::Event(event)).await;
            });
        },
        ClientAction::ConnectionChanged(change) => {
            tracing::debug!(room_id = change.room_id, state = ?change.state, "connection change");
            let _ = connection_tx.send(change);
        },
        ClientAction::Log { message } => {
            tracing::debug!("{message}");
        },
    }
}

fn snapshot(client: &ChatClient<SystemEnv>) -> ClientSnapshot {
    ClientSnapshot {
        active_room: client.active_room(),
        is_connected: client.is_connected(),
        is_switching: client.is_switching(),
        connection_error: client.connection_error().map(str::to_string),
        typing_users: client.typing_users(),
        messages: client.messages().into_iter().cloned().collect(),
    }
}
