//! Chat synchronization state machine.
//!
//! The `ChatClient` is the top-level state machine that orchestrates the
//! transport session, the message cache, and the typing tracker while the
//! user navigates between rooms. Rapid room selections are debounced into a
//! single executed switch; asynchronous completions that belong to an
//! abandoned room are detected with a generation counter and discarded
//! before they can touch the now-active room's state.

use std::time::Duration;

use syncline_core::{
    Delivery, Environment, InboundEvent, Message, MessageId, MessageKind, RoomId, SessionAction,
    SessionConfig, SessionManager, UserId,
};

use crate::{
    cache::MessageCache,
    error::ClientError,
    event::{ClientAction, ClientEvent},
    typing::TypingTracker,
};

/// Quiet window in which repeated room selections collapse into the last one.
pub const SWITCH_DEBOUNCE: Duration = Duration::from_millis(200);

/// How long the switching flag stays set after the new room's subscription
/// opens, so the UI shows one steady placeholder instead of flickering when
/// the first page arrives almost instantly.
pub const SETTLE_DELAY: Duration = Duration::from_millis(500);

/// A debounced, not-yet-executed room switch.
#[derive(Debug, Clone)]
struct PendingSwitch<I> {
    /// Target of the most recent selection (last call wins).
    room_id: RoomId,
    /// When the quiet window elapses and the switch executes.
    deadline: I,
}

/// Client identity.
#[derive(Debug, Clone)]
pub struct ClientIdentity {
    /// Stable user id of the local user.
    pub user_id: UserId,
}

impl ClientIdentity {
    /// Create a new client identity for the given user.
    pub fn new(user_id: UserId) -> Self {
        Self { user_id }
    }
}

/// Chat synchronization client.
///
/// Receives [`ClientEvent`]s, processes them through pure state machine
/// logic, and returns [`ClientAction`]s for the caller to execute. The
/// caller reads observable state ([`ChatClient::messages`],
/// [`ChatClient::typing_users`], [`ChatClient::is_switching`], ...) after
/// each call; the client never renders.
pub struct ChatClient<E: Environment> {
    /// Environment for time and entropy.
    env: E,

    /// Local user identity.
    identity: ClientIdentity,

    /// Single-slot transport session manager.
    sessions: SessionManager<E::Instant>,

    /// Paginated, deduplicated message store per room.
    cache: MessageCache,

    /// Live typing state for the active room.
    typing: TypingTracker<E::Instant>,

    /// Room the user is currently on. `None` before the first selection.
    active_room: Option<RoomId>,

    /// Debounced switch awaiting its quiet window.
    pending_switch: Option<PendingSwitch<E::Instant>>,

    /// True from switch execution until the settle delay elapses.
    switching: bool,

    /// Deadline at which `switching` clears. Armed when the new room's
    /// subscription opens.
    settle_at: Option<E::Instant>,

    /// Incremented on every executed switch; stamped onto fetch and
    /// mutation actions so late completions for an abandoned room can be
    /// recognized and dropped.
    generation: u64,

    /// Next optimistic placeholder id.
    next_local_id: u64,

    /// Most recent connection failure, cleared on recovery.
    connection_error: Option<String>,

    /// Original records stashed for rollback of optimistic edits.
    pending_edits: std::collections::HashMap<MessageId, Message>,

    /// Removed records stashed for rollback of optimistic deletes.
    pending_deletes: std::collections::HashMap<MessageId, Message>,
}

impl<E: Environment> ChatClient<E> {
    /// Create a new client with the given identity.
    pub fn new(env: E, identity: ClientIdentity) -> Self {
        let typing = TypingTracker::new(identity.user_id);
        Self {
            env,
            identity,
            sessions: SessionManager::new(SessionConfig::default()),
            cache: MessageCache::new(),
            typing,
            active_room: None,
            pending_switch: None,
            switching: false,
            settle_at: None,
            generation: 0,
            next_local_id: 1,
            connection_error: None,
            pending_edits: std::collections::HashMap::new(),
            pending_deletes: std::collections::HashMap::new(),
        }
    }

    /// Local user's stable id.
    pub fn user_id(&self) -> UserId {
        self.identity.user_id
    }

    /// Room the user is currently on.
    pub fn active_room(&self) -> Option<RoomId> {
        self.active_room
    }

    /// True iff the active room's subscription is open.
    pub fn is_connected(&self) -> bool {
        self.sessions.is_connected()
    }

    /// True while a room switch is in progress (including the settle delay),
    /// so the UI shows a loading placeholder instead of stale content.
    pub fn is_switching(&self) -> bool {
        self.switching
    }

    /// Users currently typing in the active room, sorted.
    pub fn typing_users(&self) -> Vec<UserId> {
        self.typing.typing_users()
    }

    /// Flattened, ordered messages of the active room.
    pub fn messages(&self) -> Vec<&Message> {
        self.active_room.map_or_else(Vec::new, |room| self.cache.messages(room))
    }

    /// Most recent connection failure, for the inline retry banner.
    pub fn connection_error(&self) -> Option<&str> {
        self.connection_error.as_deref()
    }

    /// Process an event and return resulting actions.
    pub fn handle(
        &mut self,
        event: ClientEvent<E::Instant>,
    ) -> Result<Vec<ClientAction>, ClientError> {
        match event {
            ClientEvent::SelectRoom { room_id } => Ok(self.handle_select_room(room_id)),
            ClientEvent::SendMessage { content, kind } => self.handle_send_message(content, kind),
            ClientEvent::EditMessage { id, content } => self.handle_edit_message(id, content),
            ClientEvent::DeleteMessage { id } => self.handle_delete_message(id),
            ClientEvent::NotifyTyping => self.handle_notify_typing(),
            ClientEvent::LoadOlder { cursor } => self.handle_load_older(cursor),
            ClientEvent::Inbound(inbound) => Ok(self.handle_inbound(inbound)),
            ClientEvent::TransportOpened { room_id } => Ok(self.handle_transport_opened(room_id)),
            ClientEvent::TransportFailed { room_id, error } => {
                let now = self.env.now();
                let actions = self.sessions.handle_failed(room_id, &error, now);
                if self.active_room == Some(room_id) {
                    self.switching = false;
                    self.settle_at = None;
                }
                Ok(self.lift(actions))
            },
            ClientEvent::TransportLost { room_id, reason } => {
                let now = self.env.now();
                let actions = self.sessions.handle_lost(room_id, &reason, now);
                Ok(self.lift(actions))
            },
            ClientEvent::FetchCompleted { room_id, generation, cursor: _, page } => {
                Ok(self.handle_fetch_completed(room_id, generation, page))
            },
            ClientEvent::SendConfirmed { generation: _, temp_id, message } => {
                Ok(self.handle_send_confirmed(temp_id, message))
            },
            ClientEvent::SendFailed { generation: _, temp_id, reason } => {
                Ok(self.handle_send_failed(temp_id, &reason))
            },
            ClientEvent::EditConfirmed { generation: _, message } => {
                self.pending_edits.remove(&message.id);
                self.merge_confirmed(message);
                Ok(Vec::new())
            },
            ClientEvent::EditFailed { generation: _, id, reason } => {
                Ok(self.handle_edit_failed(id, &reason))
            },
            ClientEvent::DeleteConfirmed { generation: _, id } => {
                self.pending_deletes.remove(&id);
                Ok(Vec::new())
            },
            ClientEvent::DeleteFailed { generation: _, id, reason } => {
                Ok(self.handle_delete_failed(id, &reason))
            },
            ClientEvent::Tick { now } => Ok(self.handle_tick(now)),
        }
    }

    /// Queue a debounced switch. Rapid repeated calls within the quiet
    /// window collapse into the last one; only that switch executes
    /// transport teardown and setup.
    fn handle_select_room(&mut self, room_id: RoomId) -> Vec<ClientAction> {
        if self.active_room == Some(room_id) && self.pending_switch.is_none() {
            return Vec::new();
        }

        let deadline = self.env.now() + SWITCH_DEBOUNCE;
        self.pending_switch = Some(PendingSwitch { room_id, deadline });
        vec![ClientAction::Log { message: format!("Queued switch to room {room_id}") }]
    }

    /// Execute a debounced switch whose quiet window elapsed.
    fn execute_switch(&mut self, room_id: RoomId) -> Vec<ClientAction> {
        if self.active_room == Some(room_id) {
            // Navigation wandered away and back within the window; nothing
            // to tear down.
            return vec![ClientAction::Log {
                message: format!("Switch cancelled, already on room {room_id}"),
            }];
        }

        self.generation += 1;
        self.switching = true;
        self.settle_at = None;
        self.connection_error = None;

        if let Some(previous) = self.active_room.take() {
            self.cache.invalidate(previous);
        }
        self.typing.clear();
        self.active_room = Some(room_id);

        // connect() closes the previous room's session before opening the
        // new one, keeping the single-active-session invariant.
        let session_actions = self.sessions.connect(room_id);
        let mut actions = self.lift(session_actions);
        actions.push(ClientAction::FetchPage {
            room_id,
            generation: self.generation,
            cursor: None,
        });
        actions.push(ClientAction::Log {
            message: format!("Switching to room {room_id} (generation {})", self.generation),
        });
        actions
    }

    fn handle_send_message(
        &mut self,
        content: String,
        kind: MessageKind,
    ) -> Result<Vec<ClientAction>, ClientError> {
        let room_id = self.active_room.ok_or(ClientError::NoActiveRoom)?;
        if kind == MessageKind::Text && content.trim().is_empty() {
            return Err(ClientError::EmptyMessage);
        }

        let temp_id = MessageId::Local(self.next_local_id);
        self.next_local_id += 1;
        let stamp = self.env.unix_millis();

        self.cache.apply_optimistic(Message {
            id: temp_id,
            room_id,
            sender_id: self.identity.user_id,
            content: content.clone(),
            created_at: stamp,
            updated_at: stamp,
            edited: false,
            read: true,
            kind,
            delivery: Delivery::Pending,
        });

        Ok(vec![ClientAction::SubmitMessage {
            room_id,
            generation: self.generation,
            temp_id,
            content,
            kind,
        }])
    }

    fn handle_edit_message(
        &mut self,
        id: MessageId,
        content: String,
    ) -> Result<Vec<ClientAction>, ClientError> {
        let room_id = self.active_room.ok_or(ClientError::NoActiveRoom)?;
        if content.trim().is_empty() {
            return Err(ClientError::EmptyMessage);
        }
        if id.is_local() {
            // Placeholder ids never leave this client; the backend could
            // not resolve the mutation.
            return Err(ClientError::UnconfirmedMessage { id });
        }
        let original =
            self.cache.get(room_id, id).cloned().ok_or(ClientError::UnknownMessage { id })?;

        let mut updated = original.clone();
        updated.content = content.clone();
        updated.edited = true;
        updated.updated_at = self.env.unix_millis();
        updated.delivery = Delivery::Pending;

        self.pending_edits.insert(id, original);
        self.cache.apply_inbound(updated);

        Ok(vec![ClientAction::SubmitEdit { room_id, generation: self.generation, id, content }])
    }

    fn handle_delete_message(&mut self, id: MessageId) -> Result<Vec<ClientAction>, ClientError> {
        let room_id = self.active_room.ok_or(ClientError::NoActiveRoom)?;
        if id.is_local() {
            return Err(ClientError::UnconfirmedMessage { id });
        }
        let removed = self.cache.remove(room_id, id).ok_or(ClientError::UnknownMessage { id })?;
        self.pending_deletes.insert(id, removed);

        Ok(vec![ClientAction::SubmitDelete { room_id, generation: self.generation, id }])
    }

    fn handle_notify_typing(&mut self) -> Result<Vec<ClientAction>, ClientError> {
        let room_id = self.active_room.ok_or(ClientError::NoActiveRoom)?;
        let now = self.env.now();
        if self.typing.should_send(now) {
            Ok(vec![ClientAction::SendTyping { room_id }])
        } else {
            Ok(Vec::new())
        }
    }

    fn handle_load_older(&mut self, cursor: u64) -> Result<Vec<ClientAction>, ClientError> {
        let room_id = self.active_room.ok_or(ClientError::NoActiveRoom)?;
        Ok(vec![ClientAction::FetchPage {
            room_id,
            generation: self.generation,
            cursor: Some(cursor),
        }])
    }

    /// Merge a server-pushed event. Events for any room other than the
    /// active one belong to an abandoned subscription and are dropped
    /// silently; this is expected under normal navigation, not an error.
    fn handle_inbound(&mut self, inbound: InboundEvent) -> Vec<ClientAction> {
        if self.active_room != Some(inbound.room_id()) {
            return Vec::new();
        }

        match inbound {
            InboundEvent::Message { message, .. } => {
                // A delivered message is the strongest "stopped typing"
                // signal the sender can give.
                self.typing.observe_stop(message.sender_id);
                self.cache.apply_inbound(message);
            },
            InboundEvent::MessageEdited { message, .. } => {
                self.cache.apply_inbound(message);
            },
            InboundEvent::MessageDeleted { room_id, id } => {
                self.cache.remove(room_id, id);
            },
            InboundEvent::Typing { user_id, .. } => {
                let now = self.env.now();
                self.typing.observe_typing(user_id, now);
            },
            InboundEvent::TypingStop { user_id, .. } => {
                self.typing.observe_stop(user_id);
            },
        }
        Vec::new()
    }

    fn handle_transport_opened(&mut self, room_id: RoomId) -> Vec<ClientAction> {
        let now = self.env.now();
        let session_actions = self.sessions.handle_opened(room_id, now);
        if session_actions.is_empty() {
            // Stale notification for a torn-down session.
            return Vec::new();
        }

        let mut actions = self.lift(session_actions);

        if self.active_room == Some(room_id) {
            if self.switching {
                self.settle_at = Some(now + SETTLE_DELAY);
            }
            // Confirmations that arrived while this room was detached.
            for message in self.cache.drain_parked(room_id) {
                self.cache.apply_inbound(message);
            }
        }

        actions.push(ClientAction::Log { message: format!("Subscription open for room {room_id}") });
        actions
    }

    fn handle_fetch_completed(
        &mut self,
        room_id: RoomId,
        generation: u64,
        page: Vec<Message>,
    ) -> Vec<ClientAction> {
        if generation != self.generation || self.active_room != Some(room_id) {
            // Late response for an abandoned room; the still-current check
            // failed, so the page must not touch any cache.
            return Vec::new();
        }
        self.cache.prepend_page(room_id, page);
        Vec::new()
    }

    /// Confirmations are never discarded: if the placeholder is still
    /// cached it is replaced in place, otherwise the canonical record is
    /// merged (active room) or parked until the room is attached again.
    fn handle_send_confirmed(&mut self, temp_id: MessageId, message: Message) -> Vec<ClientAction> {
        if self.cache.reconcile(temp_id, message.clone()) {
            return Vec::new();
        }
        self.merge_confirmed(message);
        Vec::new()
    }

    fn handle_send_failed(&mut self, temp_id: MessageId, reason: &str) -> Vec<ClientAction> {
        let marked = self
            .active_room
            .map(|room_id| self.cache.mark_failed(room_id, temp_id))
            .unwrap_or(false);
        let mut actions = Vec::new();
        if marked {
            actions.push(ClientAction::Log {
                message: format!("Send rejected for {temp_id}: {reason}"),
            });
        }
        actions
    }

    fn handle_edit_failed(&mut self, id: MessageId, reason: &str) -> Vec<ClientAction> {
        let Some(original) = self.pending_edits.remove(&id) else {
            return Vec::new();
        };
        self.merge_confirmed(original);
        vec![ClientAction::Log { message: format!("Edit rejected for {id}: {reason}") }]
    }

    fn handle_delete_failed(&mut self, id: MessageId, reason: &str) -> Vec<ClientAction> {
        let Some(original) = self.pending_deletes.remove(&id) else {
            return Vec::new();
        };
        self.merge_confirmed(original);
        vec![ClientAction::Log { message: format!("Delete rejected for {id}: {reason}") }]
    }

    /// Handle tick (deadline processing).
    ///
    /// Fires due deadlines in dependency order: reconnect retries, typing
    /// expiry, the settle delay, and finally any debounced switch whose
    /// quiet window elapsed.
    fn handle_tick(&mut self, now: E::Instant) -> Vec<ClientAction> {
        let session_actions = self.sessions.tick(now);
        let mut actions = self.lift(session_actions);

        self.typing.expire(now);

        if let Some(settle_at) = self.settle_at
            && now >= settle_at
        {
            self.switching = false;
            self.settle_at = None;
        }

        if let Some(pending) = &self.pending_switch
            && now >= pending.deadline
        {
            let room_id = pending.room_id;
            self.pending_switch = None;
            actions.extend(self.execute_switch(room_id));
        }

        actions
    }

    /// Merge a canonical record into the right place: directly into the
    /// active room's cache, or parked for an inactive room so it is applied
    /// on next attach instead of force-rendered.
    fn merge_confirmed(&mut self, message: Message) {
        if self.active_room == Some(message.room_id) {
            self.cache.apply_inbound(message);
        } else {
            self.cache.park(message);
        }
    }

    /// Convert session actions to client actions, tracking the surfaced
    /// connection error along the way.
    fn lift(&mut self, session_actions: Vec<SessionAction>) -> Vec<ClientAction> {
        session_actions
            .into_iter()
            .map(|action| match action {
                SessionAction::Open { room_id } => ClientAction::OpenSession { room_id },
                SessionAction::Close { room_id } => ClientAction::CloseSession { room_id },
                SessionAction::Notify(change) => {
                    if self.active_room == Some(change.room_id) || self.active_room.is_none() {
                        self.connection_error = change.error.clone();
                    }
                    ClientAction::ConnectionChanged(change)
                },
            })
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use syncline_core::env::test_utils::MockEnv;

    use super::*;

    fn client() -> ChatClient<MockEnv> {
        ChatClient::new(MockEnv::new(), ClientIdentity::new(1))
    }

    fn drive_switch(client: &mut ChatClient<MockEnv>, env: &MockEnv, room_id: RoomId) {
        client.handle(ClientEvent::SelectRoom { room_id }).unwrap();
        env.advance(SWITCH_DEBOUNCE);
        client.handle(ClientEvent::Tick { now: env.now() }).unwrap();
        client.handle(ClientEvent::TransportOpened { room_id }).unwrap();
    }

    #[test]
    fn verbs_require_an_active_room() {
        let mut client = client();

        let result = client.handle(ClientEvent::SendMessage {
            content: "hi".to_string(),
            kind: MessageKind::Text,
        });
        assert_eq!(result, Err(ClientError::NoActiveRoom));

        assert_eq!(client.handle(ClientEvent::NotifyTyping), Err(ClientError::NoActiveRoom));
        assert_eq!(
            client.handle(ClientEvent::LoadOlder { cursor: 10 }),
            Err(ClientError::NoActiveRoom)
        );
    }

    #[test]
    fn empty_send_is_rejected() {
        let env = MockEnv::new();
        let mut client = ChatClient::new(env.clone(), ClientIdentity::new(1));
        drive_switch(&mut client, &env, 7);

        let result = client.handle(ClientEvent::SendMessage {
            content: "   ".to_string(),
            kind: MessageKind::Text,
        });
        assert_eq!(result, Err(ClientError::EmptyMessage));
    }

    #[test]
    fn send_produces_optimistic_entry_and_submit_action() {
        let env = MockEnv::new();
        let mut client = ChatClient::new(env.clone(), ClientIdentity::new(1));
        drive_switch(&mut client, &env, 7);

        let actions = client
            .handle(ClientEvent::SendMessage { content: "hi".to_string(), kind: MessageKind::Text })
            .unwrap();

        let view = client.messages();
        assert_eq!(view.len(), 1);
        assert_eq!(view[0].id, MessageId::Local(1));
        assert_eq!(view[0].delivery, Delivery::Pending);

        match &actions[0] {
            ClientAction::SubmitMessage { room_id, temp_id, content, .. } => {
                assert_eq!(*room_id, 7);
                assert_eq!(*temp_id, MessageId::Local(1));
                assert_eq!(content, "hi");
            },
            other => panic!("expected SubmitMessage, got {other:?}"),
        }
    }

    #[test]
    fn edit_unknown_message_fails() {
        let env = MockEnv::new();
        let mut client = ChatClient::new(env.clone(), ClientIdentity::new(1));
        drive_switch(&mut client, &env, 7);

        let result = client.handle(ClientEvent::EditMessage {
            id: MessageId::Server(99),
            content: "x".to_string(),
        });
        assert_eq!(result, Err(ClientError::UnknownMessage { id: MessageId::Server(99) }));
    }

    #[test]
    fn mutations_on_unconfirmed_entries_are_rejected() {
        let env = MockEnv::new();
        let mut client = ChatClient::new(env.clone(), ClientIdentity::new(1));
        drive_switch(&mut client, &env, 7);

        client
            .handle(ClientEvent::SendMessage { content: "hi".to_string(), kind: MessageKind::Text })
            .unwrap();
        let temp_id = MessageId::Local(1);

        let result =
            client.handle(ClientEvent::EditMessage { id: temp_id, content: "hi!".to_string() });
        assert_eq!(result, Err(ClientError::UnconfirmedMessage { id: temp_id }));

        let result = client.handle(ClientEvent::DeleteMessage { id: temp_id });
        assert_eq!(result, Err(ClientError::UnconfirmedMessage { id: temp_id }));

        // The pending bubble is untouched.
        let view = client.messages();
        assert_eq!(view.len(), 1);
        assert_eq!(view[0].id, temp_id);
        assert_eq!(view[0].delivery, Delivery::Pending);
    }

    #[test]
    fn typing_notifications_are_rate_limited() {
        let env = MockEnv::new();
        let mut client = ChatClient::new(env.clone(), ClientIdentity::new(1));
        drive_switch(&mut client, &env, 7);

        let first = client.handle(ClientEvent::NotifyTyping).unwrap();
        assert_eq!(first, vec![ClientAction::SendTyping { room_id: 7 }]);

        let second = client.handle(ClientEvent::NotifyTyping).unwrap();
        assert!(second.is_empty());
    }

    #[test]
    fn reselecting_active_room_is_noop() {
        let env = MockEnv::new();
        let mut client = ChatClient::new(env.clone(), ClientIdentity::new(1));
        drive_switch(&mut client, &env, 7);

        let actions = client.handle(ClientEvent::SelectRoom { room_id: 7 }).unwrap();
        assert!(actions.is_empty());
    }

    #[test]
    fn inbound_for_other_room_is_dropped() {
        let env = MockEnv::new();
        let mut client = ChatClient::new(env.clone(), ClientIdentity::new(1));
        drive_switch(&mut client, &env, 7);

        client
            .handle(ClientEvent::Inbound(InboundEvent::Typing { room_id: 99, user_id: 2 }))
            .unwrap();
        assert!(client.typing_users().is_empty());
    }
}
