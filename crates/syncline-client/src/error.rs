//! Client error type.

use syncline_core::MessageId;
use thiserror::Error;

/// Errors returned by the chat client for caller mistakes.
///
/// Transport failures are NOT represented here: per the connection-change
/// contract they surface through [`syncline_core::ConnectionChange`]
/// notifications so the UI can show a retry affordance instead of handling
/// exceptions. Expected navigation races (stale fetches, events for an
/// abandoned room) are discarded silently and never become errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// A room-scoped verb was invoked with no room selected.
    #[error("no active room selected")]
    NoActiveRoom,

    /// A send was attempted with nothing to send.
    #[error("message content is empty")]
    EmptyMessage,

    /// An edit or delete referenced a message absent from the active room.
    #[error("unknown message {id} in active room")]
    UnknownMessage {
        /// The id that could not be resolved.
        id: MessageId,
    },

    /// An edit or delete targeted an optimistic entry the server has not
    /// confirmed yet. The backend cannot resolve a placeholder id, so the
    /// mutation is rejected up front instead of round-tripping to a
    /// guaranteed failure.
    #[error("message {id} is awaiting confirmation")]
    UnconfirmedMessage {
        /// The optimistic placeholder id.
        id: MessageId,
    },
}
