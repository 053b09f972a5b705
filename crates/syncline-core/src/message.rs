//! Message data model and inbound event envelope.
//!
//! Records mirror the backend's JSON shapes. Identity is the server-assigned
//! id; optimistic local messages carry a [`MessageId::Local`] placeholder
//! until the server confirms, at which point the placeholder is replaced
//! atomically (never duplicated).

use serde::{Deserialize, Serialize};

/// A single chat conversation, the unit of subscription and caching.
pub type RoomId = u64;

/// Stable user identifier assigned by the backend.
pub type UserId = u64;

/// Message identity.
///
/// `Server` ids are assigned by the backend and are the canonical identity
/// within a room. `Local` ids are optimistic placeholders minted by this
/// client and never leave it. The derived `Ord` is total (server ids sort
/// before local ids, each ascending), which keeps tie-breaking on equal
/// timestamps deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageId {
    /// Canonical id assigned by the backend.
    Server(u64),
    /// Optimistic placeholder minted locally, pending confirmation.
    Local(u64),
}

impl MessageId {
    /// True for optimistic placeholders that the server has not confirmed.
    pub fn is_local(self) -> bool {
        matches!(self, Self::Local(_))
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Server(id) => write!(f, "{id}"),
            Self::Local(id) => write!(f, "local-{id}"),
        }
    }
}

/// Payload category of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Plain text content.
    #[default]
    Text,
    /// Content referencing an uploaded attachment.
    Attachment,
    /// Server-generated notice (joins, renames).
    System,
}

/// Delivery status of a message as seen by this client.
///
/// `Pending` and `Failed` only ever apply to optimistic local entries; a
/// failed send stays visible with this flag rather than silently vanishing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Delivery {
    /// Confirmed by the server.
    #[default]
    Confirmed,
    /// Sent optimistically, awaiting server confirmation.
    Pending,
    /// Rejected by the server; the UI should offer a retry.
    Failed,
}

/// A chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Message identity. Unique within a room's cache.
    pub id: MessageId,
    /// Room this message belongs to.
    pub room_id: RoomId,
    /// Author of the message.
    pub sender_id: UserId,
    /// Message body (or attachment reference for `Attachment` kind).
    pub content: String,
    /// Server wall-clock creation time, milliseconds since the Unix epoch.
    pub created_at: i64,
    /// Last modification time, equal to `created_at` for unedited messages.
    pub updated_at: i64,
    /// Whether the message has been edited after creation.
    #[serde(default)]
    pub edited: bool,
    /// Whether the current user has read the message.
    #[serde(default)]
    pub read: bool,
    /// Payload category.
    #[serde(default)]
    pub kind: MessageKind,
    /// Local delivery status. Never serialized to the backend.
    #[serde(default, skip_serializing)]
    pub delivery: Delivery,
}

impl Message {
    /// Ordering key within a room: `created_at` ascending, ties broken by
    /// ascending id so rendering stays deterministic.
    pub fn sort_key(&self) -> (i64, MessageId) {
        (self.created_at, self.id)
    }
}

/// Inbound event delivered by the transport for the subscribed room.
///
/// Wire shape:
/// `{ "type": "message" | "typing" | "typing_stop" | "message_edited" |
/// "message_deleted", ... }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    /// A new message was posted to the room.
    #[serde(rename_all = "camelCase")]
    Message {
        /// Room the message was posted to.
        room_id: RoomId,
        /// The message record.
        message: Message,
    },

    /// An existing message was edited; delivered as a fresh full record.
    #[serde(rename_all = "camelCase")]
    MessageEdited {
        /// Room containing the message.
        room_id: RoomId,
        /// The updated message record.
        message: Message,
    },

    /// A message was deleted.
    #[serde(rename_all = "camelCase")]
    MessageDeleted {
        /// Room containing the message.
        room_id: RoomId,
        /// Identity of the deleted message.
        id: MessageId,
    },

    /// A user started (or continues) typing.
    #[serde(rename_all = "camelCase")]
    Typing {
        /// Room the user is typing in.
        room_id: RoomId,
        /// The typing user.
        user_id: UserId,
    },

    /// A user explicitly stopped typing.
    #[serde(rename_all = "camelCase")]
    TypingStop {
        /// Room the user was typing in.
        room_id: RoomId,
        /// The user who stopped.
        user_id: UserId,
    },
}

impl InboundEvent {
    /// Room this event applies to.
    pub fn room_id(&self) -> RoomId {
        match self {
            Self::Message { room_id, .. }
            | Self::MessageEdited { room_id, .. }
            | Self::MessageDeleted { room_id, .. }
            | Self::Typing { room_id, .. }
            | Self::TypingStop { room_id, .. } => *room_id,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn message(id: MessageId, created_at: i64) -> Message {
        Message {
            id,
            room_id: 7,
            sender_id: 1,
            content: "hello".to_string(),
            created_at,
            updated_at: created_at,
            edited: false,
            read: false,
            kind: MessageKind::Text,
            delivery: Delivery::Confirmed,
        }
    }

    #[test]
    fn sort_key_orders_by_time_then_id() {
        let a = message(MessageId::Server(2), 100);
        let b = message(MessageId::Server(1), 100);
        let c = message(MessageId::Server(1), 99);

        assert!(c.sort_key() < b.sort_key());
        assert!(b.sort_key() < a.sort_key());
    }

    #[test]
    fn server_ids_sort_before_local_placeholders() {
        assert!(MessageId::Server(u64::MAX) < MessageId::Local(0));
    }

    #[test]
    fn envelope_decodes_typed_events() {
        let json = r#"{"type":"typing","roomId":7,"userId":42}"#;
        let event: InboundEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event, InboundEvent::Typing { room_id: 7, user_id: 42 });
        assert_eq!(event.room_id(), 7);
    }

    #[test]
    fn envelope_decodes_message_record() {
        let json = r#"{
            "type": "message",
            "roomId": 7,
            "message": {
                "id": {"server": 42},
                "roomId": 7,
                "senderId": 3,
                "content": "hi",
                "createdAt": 1700000000000,
                "updatedAt": 1700000000000
            }
        }"#;
        let event: InboundEvent = serde_json::from_str(json).unwrap();
        match event {
            InboundEvent::Message { room_id, message } => {
                assert_eq!(room_id, 7);
                assert_eq!(message.id, MessageId::Server(42));
                assert_eq!(message.kind, MessageKind::Text);
                assert_eq!(message.delivery, Delivery::Confirmed);
            },
            other => panic!("expected message event, got {other:?}"),
        }
    }
}
