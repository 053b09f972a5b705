//! Core
//!
//! Sans-IO building blocks for the Syncline chat synchronization client: the
//! environment abstraction (injectable clock and entropy), the message data
//! model and inbound event envelope, and the transport session state machine.
//!
//! # Architecture
//!
//! All state machines follow the action pattern: they receive inputs (events
//! plus the current time), mutate pure in-memory state, and return actions
//! for the caller to execute. No I/O, no timers, no system clock reads
//! happen inside this crate, which makes every timing rule deterministically
//! testable with [`env::test_utils::MockEnv`].

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod env;
mod error;
mod message;
mod session;

pub use env::{Environment, SystemEnv};
pub use error::SessionError;
pub use message::{Delivery, InboundEvent, Message, MessageId, MessageKind, RoomId, UserId};
pub use session::{
    ConnectionChange, SessionAction, SessionConfig, SessionManager, SessionState,
    DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_CAP, DEFAULT_MAX_RECONNECT_ATTEMPTS,
};
