//! Client events and actions.

use syncline_core::{
    ConnectionChange, InboundEvent, Message, MessageId, MessageKind, RoomId, SessionError,
};

/// Events the caller feeds into the client.
///
/// The caller is responsible for:
/// - Forwarding user intents (select room, send, edit, delete, typing)
/// - Delivering transport lifecycle notifications and inbound events
/// - Echoing fetch/mutation completions back with their generation tag
/// - Driving time forward via ticks
///
/// Generic over `I` (instant type) to support both production
/// (`std::time::Instant`) and simulation environments.
#[derive(Debug, Clone)]
pub enum ClientEvent<I = std::time::Instant> {
    /// User selected a room; the single entry point for navigation.
    SelectRoom {
        /// Room to switch to.
        room_id: RoomId,
    },

    /// User submitted a new message for the active room.
    SendMessage {
        /// Message body (or attachment reference).
        content: String,
        /// Payload category.
        kind: MessageKind,
    },

    /// User edited one of their messages in the active room.
    EditMessage {
        /// Message to edit.
        id: MessageId,
        /// Replacement body.
        content: String,
    },

    /// User deleted one of their messages in the active room.
    DeleteMessage {
        /// Message to delete.
        id: MessageId,
    },

    /// User pressed a key in the composer; may emit a rate-limited typing
    /// notification.
    NotifyTyping,

    /// User scrolled to the top; load an older history page.
    LoadOlder {
        /// Pagination cursor for the page before the earliest one held.
        cursor: u64,
    },

    /// Event pushed by the transport for the subscribed room.
    Inbound(InboundEvent),

    /// The transport reported the subscription ready.
    TransportOpened {
        /// Room whose subscription opened.
        room_id: RoomId,
    },

    /// The transport reported a connect attempt failed.
    TransportFailed {
        /// Room whose connect attempt failed.
        room_id: RoomId,
        /// Classified transport failure.
        error: SessionError,
    },

    /// An established subscription dropped without an explicit disconnect.
    TransportLost {
        /// Room whose subscription dropped.
        room_id: RoomId,
        /// Reason reported by the transport.
        reason: String,
    },

    /// A page fetch completed.
    FetchCompleted {
        /// Room the page belongs to.
        room_id: RoomId,
        /// Generation the fetch was issued under.
        generation: u64,
        /// Cursor the fetch was issued with (`None` for the initial page).
        cursor: Option<u64>,
        /// Messages in the page, oldest first.
        page: Vec<Message>,
    },

    /// The server confirmed an optimistic send.
    SendConfirmed {
        /// Generation the send was issued under.
        generation: u64,
        /// Placeholder id of the optimistic entry.
        temp_id: MessageId,
        /// Canonical record from the server.
        message: Message,
    },

    /// The server rejected an optimistic send.
    SendFailed {
        /// Generation the send was issued under.
        generation: u64,
        /// Placeholder id of the optimistic entry.
        temp_id: MessageId,
        /// Rejection reason.
        reason: String,
    },

    /// The server confirmed an edit.
    EditConfirmed {
        /// Generation the edit was issued under.
        generation: u64,
        /// Canonical record from the server.
        message: Message,
    },

    /// The server rejected an edit; the original content is restored.
    EditFailed {
        /// Generation the edit was issued under.
        generation: u64,
        /// Message that failed to update.
        id: MessageId,
        /// Rejection reason.
        reason: String,
    },

    /// The server confirmed a delete.
    DeleteConfirmed {
        /// Generation the delete was issued under.
        generation: u64,
        /// Message that was deleted.
        id: MessageId,
    },

    /// The server rejected a delete; the removed entry is restored.
    DeleteFailed {
        /// Generation the delete was issued under.
        generation: u64,
        /// Message that failed to delete.
        id: MessageId,
        /// Rejection reason.
        reason: String,
    },

    /// Time tick for deadline processing.
    ///
    /// The caller should send ticks at a granularity finer than the
    /// shortest window (the 200 ms switch debounce) so that debounce,
    /// settle, typing expiry, and reconnect backoff fire on time.
    Tick {
        /// Current time from the environment.
        now: I,
    },
}

/// Actions the client produces for the caller to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientAction {
    /// Open the physical subscription for this room.
    OpenSession {
        /// Room to subscribe to.
        room_id: RoomId,
    },

    /// Close the physical subscription for this room.
    CloseSession {
        /// Room to unsubscribe from.
        room_id: RoomId,
    },

    /// Send a typing notification for this room.
    SendTyping {
        /// Room the user is typing in.
        room_id: RoomId,
    },

    /// Fetch a message page; the completion must echo `generation` and
    /// `cursor` back via [`ClientEvent::FetchCompleted`].
    FetchPage {
        /// Room to fetch for.
        room_id: RoomId,
        /// Generation tag for stale-result detection.
        generation: u64,
        /// Pagination cursor (`None` for the most recent page).
        cursor: Option<u64>,
    },

    /// Submit a new message; the completion must echo `generation` and
    /// `temp_id` back via `SendConfirmed`/`SendFailed`.
    SubmitMessage {
        /// Room to post to.
        room_id: RoomId,
        /// Generation tag for stale-result detection.
        generation: u64,
        /// Placeholder id of the optimistic entry.
        temp_id: MessageId,
        /// Message body.
        content: String,
        /// Payload category.
        kind: MessageKind,
    },

    /// Submit an edit; completion via `EditConfirmed`/`EditFailed`.
    SubmitEdit {
        /// Room containing the message.
        room_id: RoomId,
        /// Generation tag for stale-result detection.
        generation: u64,
        /// Message to edit.
        id: MessageId,
        /// Replacement body.
        content: String,
    },

    /// Submit a delete; completion via `DeleteConfirmed`/`DeleteFailed`.
    SubmitDelete {
        /// Room containing the message.
        room_id: RoomId,
        /// Generation tag for stale-result detection.
        generation: u64,
        /// Message to delete.
        id: MessageId,
    },

    /// Broadcast a connection-state transition to UI observers.
    ConnectionChanged(ConnectionChange),

    /// Log message for debugging. The caller owns the sink.
    Log {
        /// Log message.
        message: String,
    },
}
