//! Client
//!
//! Action-based chat synchronization client. Manages the active room's
//! transport session, message cache reconciliation, typing presence, and
//! debounced room switching.
//!
//! # Architecture
//!
//! The client follows the same Sans-IO and Action-Based patterns as
//! [`syncline_core`]. It receives events ([`ClientEvent`]), processes them
//! through pure state machine logic, and returns actions ([`ClientAction`])
//! for the caller to execute. All timing (typing expiry, switch debounce,
//! settle delay, reconnect backoff) is deadline-based and driven by
//! [`ClientEvent::Tick`], so every behavior is testable against a virtual
//! clock.
//!
//! # Components
//!
//! - [`ChatClient`]: Top-level state machine coordinating one active room
//! - [`MessageCache`]: Paged, deduplicating per-room message store
//! - [`TypingTracker`]: TTL-based typing presence with send rate limiting
//! - [`ClientEvent`]: Events fed into the client
//! - [`ClientAction`]: Actions produced by the client
//!
//! # Transport (optional)
//!
//! With the `transport` feature enabled, this crate also provides:
//! - [`transport::spawn`]: Drive a [`ChatClient`] on a tokio task
//! - [`transport::RoomTransport`] / [`transport::ChatApi`]: Backend traits

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod cache;
mod client;
mod error;
mod event;
mod typing;

#[cfg(feature = "transport")]
pub mod transport;

pub use cache::MessageCache;
pub use client::{ChatClient, ClientIdentity, SETTLE_DELAY, SWITCH_DEBOUNCE};
pub use error::ClientError;
pub use event::{ClientAction, ClientEvent};
pub use syncline_core::{Environment, RoomId, UserId};
pub use typing::{TypingTracker, TYPING_SEND_INTERVAL, TYPING_TTL};
