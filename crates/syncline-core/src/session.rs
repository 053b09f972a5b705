//! Transport session layer state machine.
//!
//! Manages the lifecycle of the logical per-room subscription: connect,
//! disconnect, reconnect with backoff, and connection-state notification.
//! Uses the action pattern: methods take time as input and return actions for
//! the driver to execute. This keeps the state machine pure (no I/O) and
//! makes testing straightforward.
//!
//! # State Machine
//!
//! ```text
//! ┌────────┐ connect ┌────────────┐  opened   ┌──────┐
//! │ Closed │────────>│ Connecting │──────────>│ Open │
//! └────────┘         └────────────┘           └──────┘
//!      ^                   │ failed               │ lost
//!      │                   ↓                      ↓
//!      │              ┌────────┐  gave up  ┌──────────────┐
//!      └──────────────│ Closed │<──────────│ Reconnecting │──> Open (recovered)
//!        disconnect   └────────┘           └──────────────┘
//! ```
//!
//! At most one session is live (`Connecting`/`Open`/`Reconnecting`) at a
//! time: connecting to a new room implies closing the previous one.

use std::{
    ops::{Add, Sub},
    time::{Duration, Instant},
};

use crate::{RoomId, SessionError};

/// Base delay before the first reconnect attempt.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Upper bound on the reconnect delay regardless of attempt count.
pub const DEFAULT_BACKOFF_CAP: Duration = Duration::from_secs(30);

/// Reconnect attempts before the session gives up and surfaces the error.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Transport state of a room session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No live subscription.
    Closed,
    /// Subscription requested, waiting for the transport to report ready.
    Connecting,
    /// Subscription live; inbound events are flowing.
    Open,
    /// Subscription dropped unexpectedly; retrying with backoff.
    Reconnecting,
}

impl SessionState {
    /// True for any state holding (or acquiring) a live subscription.
    pub fn is_live(self) -> bool {
        !matches!(self, Self::Closed)
    }
}

/// Actions returned by the session state machine.
///
/// The driver (test harness or production transport loop) executes these:
/// `Open`/`Close` manipulate the physical subscription, `Notify` fans out to
/// connection-state observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    /// Open a physical subscription for this room.
    Open {
        /// Room to subscribe to.
        room_id: RoomId,
    },

    /// Close the physical subscription for this room.
    Close {
        /// Room to unsubscribe from.
        room_id: RoomId,
    },

    /// Broadcast a connection-state transition to observers.
    Notify(ConnectionChange),
}

/// A connection-state transition, as observed by the UI layer.
///
/// Errors travel inside the change record rather than as exceptions: a
/// failed connect or an abandoned reconnect loop both end in a `Closed`
/// change with `error` set, and the UI shows a retry affordance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionChange {
    /// Room whose session transitioned.
    pub room_id: RoomId,
    /// New transport state.
    pub state: SessionState,
    /// Failure that caused the transition, if any.
    pub error: Option<String>,
}

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Base delay before the first reconnect attempt; doubles per attempt.
    pub backoff_base: Duration,
    /// Upper bound on the reconnect delay.
    pub backoff_cap: Duration,
    /// Reconnect attempts before giving up.
    pub max_reconnect_attempts: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            backoff_base: DEFAULT_BACKOFF_BASE,
            backoff_cap: DEFAULT_BACKOFF_CAP,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
        }
    }
}

/// One logical per-room subscription.
#[derive(Debug, Clone)]
struct RoomSession<I> {
    /// Room this session subscribes to.
    room_id: RoomId,
    /// Current transport state.
    state: SessionState,
    /// When the transport last reported ready. `None` before first open.
    connected_at: Option<I>,
    /// Most recent transport failure.
    last_error: Option<String>,
    /// Reconnect attempts consumed since the subscription was lost.
    attempts: u32,
    /// Deadline for the next reconnect attempt. `None` while one is in
    /// flight or the session is not reconnecting.
    retry_at: Option<I>,
}

impl<I> RoomSession<I> {
    fn new(room_id: RoomId) -> Self {
        Self {
            room_id,
            state: SessionState::Closed,
            connected_at: None,
            last_error: None,
            attempts: 0,
            retry_at: None,
        }
    }
}

/// Single-slot manager for the active room session.
///
/// Enforces the single-active-session invariant: opening a session for a new
/// room closes the previous one first, so at most one room is live from this
/// client's perspective at any time.
///
/// Generic over `I` (instant type) to support both real time and virtual
/// time for deterministic testing.
#[derive(Debug, Clone)]
pub struct SessionManager<I = Instant>
where
    I: Copy + Ord + Send + Sync + Add<Duration, Output = I> + Sub<Output = Duration>,
{
    active: Option<RoomSession<I>>,
    config: SessionConfig,
}

impl<I> SessionManager<I>
where
    I: Copy + Ord + Send + Sync + Add<Duration, Output = I> + Sub<Output = Duration>,
{
    /// Create a manager with no live session.
    pub fn new(config: SessionConfig) -> Self {
        Self { active: None, config }
    }

    /// Room of the currently tracked session, live or not.
    pub fn active_room(&self) -> Option<RoomId> {
        self.active.as_ref().map(|s| s.room_id)
    }

    /// Transport state of the tracked session (`Closed` when none exists).
    pub fn state(&self) -> SessionState {
        self.active.as_ref().map_or(SessionState::Closed, |s| s.state)
    }

    /// True iff the active session is `Open`.
    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Open
    }

    /// Most recent transport failure for the tracked session.
    pub fn last_error(&self) -> Option<&str> {
        self.active.as_ref().and_then(|s| s.last_error.as_deref())
    }

    /// Open a logical subscription for `room_id`.
    ///
    /// If a session for a different room is live it is closed first. Calling
    /// connect for a room that is already live is a no-op. The outcome
    /// arrives later via [`SessionManager::handle_opened`] or
    /// [`SessionManager::handle_failed`].
    pub fn connect(&mut self, room_id: RoomId) -> Vec<SessionAction> {
        let mut actions = Vec::new();

        match &self.active {
            Some(current) if current.room_id == room_id && current.state.is_live() => {
                return actions;
            },
            Some(current) if current.state.is_live() => {
                actions.push(SessionAction::Close { room_id: current.room_id });
                actions.push(SessionAction::Notify(ConnectionChange {
                    room_id: current.room_id,
                    state: SessionState::Closed,
                    error: None,
                }));
            },
            _ => {},
        }

        let mut session = RoomSession::new(room_id);
        session.state = SessionState::Connecting;
        self.active = Some(session);

        actions.push(SessionAction::Notify(ConnectionChange {
            room_id,
            state: SessionState::Connecting,
            error: None,
        }));
        actions.push(SessionAction::Open { room_id });
        actions
    }

    /// Close the subscription for `room_id`.
    ///
    /// Idempotent: closing an already-closed or unknown session is a no-op.
    pub fn disconnect(&mut self, room_id: RoomId) -> Vec<SessionAction> {
        let Some(session) = self.active.as_mut() else {
            return Vec::new();
        };
        if session.room_id != room_id || !session.state.is_live() {
            return Vec::new();
        }

        session.state = SessionState::Closed;
        session.retry_at = None;

        vec![
            SessionAction::Close { room_id },
            SessionAction::Notify(ConnectionChange {
                room_id,
                state: SessionState::Closed,
                error: None,
            }),
        ]
    }

    /// The transport reported ready for `room_id`.
    ///
    /// Stale notifications (wrong room, session already closed) are ignored.
    pub fn handle_opened(&mut self, room_id: RoomId, now: I) -> Vec<SessionAction> {
        let Some(session) = self.active.as_mut() else {
            return Vec::new();
        };
        if session.room_id != room_id
            || !matches!(session.state, SessionState::Connecting | SessionState::Reconnecting)
        {
            return Vec::new();
        }

        session.state = SessionState::Open;
        session.connected_at = Some(now);
        session.last_error = None;
        session.attempts = 0;
        session.retry_at = None;

        vec![SessionAction::Notify(ConnectionChange {
            room_id,
            state: SessionState::Open,
            error: None,
        })]
    }

    /// The transport reported a connect (or reconnect) attempt failed.
    ///
    /// An initial connect failure is recoverable: the session returns to
    /// `Closed` with the error surfaced, leaving no dangling state. A failed
    /// reconnect attempt schedules the next one with doubled backoff until
    /// the attempt budget is exhausted; non-transient errors (rejected
    /// credentials) skip the retry loop entirely.
    pub fn handle_failed(&mut self, room_id: RoomId, error: &SessionError, now: I) -> Vec<SessionAction> {
        let Some(session) = self.active.as_mut() else {
            return Vec::new();
        };
        if session.room_id != room_id {
            return Vec::new();
        }

        session.last_error = Some(error.to_string());

        match session.state {
            SessionState::Connecting => {
                session.state = SessionState::Closed;
                session.retry_at = None;
                vec![SessionAction::Notify(ConnectionChange {
                    room_id,
                    state: SessionState::Closed,
                    error: Some(error.to_string()),
                })]
            },
            SessionState::Reconnecting => {
                if !error.is_transient() || session.attempts >= self.config.max_reconnect_attempts {
                    session.state = SessionState::Closed;
                    session.retry_at = None;
                    return vec![SessionAction::Notify(ConnectionChange {
                        room_id,
                        state: SessionState::Closed,
                        error: Some(error.to_string()),
                    })];
                }

                let exponent = session.attempts.saturating_sub(1).min(10);
                let delay = self
                    .config
                    .backoff_base
                    .saturating_mul(1_u32 << exponent)
                    .min(self.config.backoff_cap);
                session.retry_at = Some(now + delay);
                Vec::new()
            },
            SessionState::Open | SessionState::Closed => Vec::new(),
        }
    }

    /// An established subscription closed without an explicit disconnect.
    ///
    /// Transitions to `Reconnecting` and arms an immediate first retry;
    /// [`SessionManager::tick`] drives subsequent attempts.
    pub fn handle_lost(&mut self, room_id: RoomId, reason: &str, now: I) -> Vec<SessionAction> {
        let Some(session) = self.active.as_mut() else {
            return Vec::new();
        };
        if session.room_id != room_id || session.state != SessionState::Open {
            return Vec::new();
        }

        session.state = SessionState::Reconnecting;
        session.last_error = Some(reason.to_string());
        session.attempts = 0;
        session.retry_at = Some(now);

        vec![SessionAction::Notify(ConnectionChange {
            room_id,
            state: SessionState::Reconnecting,
            error: Some(reason.to_string()),
        })]
    }

    /// Process periodic maintenance (reconnect scheduling).
    ///
    /// Emits an `Open` action when a scheduled retry comes due. Call this on
    /// every tick; it is cheap when nothing is pending.
    pub fn tick(&mut self, now: I) -> Vec<SessionAction> {
        let Some(session) = self.active.as_mut() else {
            return Vec::new();
        };
        if session.state != SessionState::Reconnecting {
            return Vec::new();
        }
        let Some(retry_at) = session.retry_at else {
            return Vec::new();
        };
        if now < retry_at {
            return Vec::new();
        }

        if session.attempts >= self.config.max_reconnect_attempts {
            // Attempt budget exhausted before a retry could even start.
            let room_id = session.room_id;
            let error = session.last_error.clone();
            session.state = SessionState::Closed;
            session.retry_at = None;
            return vec![SessionAction::Notify(ConnectionChange {
                room_id,
                state: SessionState::Closed,
                error,
            })];
        }

        session.attempts += 1;
        session.retry_at = None;
        vec![SessionAction::Open { room_id: session.room_id }]
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::env::{Environment, test_utils::MockEnv};

    fn change(actions: &[SessionAction]) -> Vec<&ConnectionChange> {
        actions
            .iter()
            .filter_map(|a| match a {
                SessionAction::Notify(c) => Some(c),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn connect_lifecycle() {
        let env = MockEnv::new();
        let mut mgr = SessionManager::new(SessionConfig::default());

        assert_eq!(mgr.state(), SessionState::Closed);
        assert!(!mgr.is_connected());

        let actions = mgr.connect(7);
        assert_eq!(mgr.state(), SessionState::Connecting);
        assert!(actions.contains(&SessionAction::Open { room_id: 7 }));

        let actions = mgr.handle_opened(7, env.now());
        assert_eq!(mgr.state(), SessionState::Open);
        assert!(mgr.is_connected());
        assert_eq!(change(&actions)[0].state, SessionState::Open);
    }

    #[test]
    fn connect_new_room_closes_previous() {
        let env = MockEnv::new();
        let mut mgr = SessionManager::new(SessionConfig::default());

        mgr.connect(1);
        mgr.handle_opened(1, env.now());

        let actions = mgr.connect(2);
        assert_eq!(actions[0], SessionAction::Close { room_id: 1 });
        assert!(actions.contains(&SessionAction::Open { room_id: 2 }));
        assert_eq!(mgr.active_room(), Some(2));
        assert_eq!(mgr.state(), SessionState::Connecting);
    }

    #[test]
    fn connect_same_live_room_is_noop() {
        let env = MockEnv::new();
        let mut mgr = SessionManager::new(SessionConfig::default());

        mgr.connect(1);
        mgr.handle_opened(1, env.now());
        assert!(mgr.connect(1).is_empty());
        assert!(mgr.is_connected());
    }

    #[test]
    fn disconnect_is_idempotent() {
        let env = MockEnv::new();
        let mut mgr = SessionManager::new(SessionConfig::default());

        mgr.connect(1);
        mgr.handle_opened(1, env.now());

        let actions = mgr.disconnect(1);
        assert_eq!(actions[0], SessionAction::Close { room_id: 1 });
        assert_eq!(mgr.state(), SessionState::Closed);

        assert!(mgr.disconnect(1).is_empty());
        assert!(mgr.disconnect(99).is_empty());
    }

    #[test]
    fn initial_connect_failure_returns_to_closed() {
        let env = MockEnv::new();
        let mut mgr = SessionManager::new(SessionConfig::default());

        mgr.connect(1);
        let err = SessionError::AuthRejected { reason: "expired token".to_string() };
        let actions = mgr.handle_failed(1, &err, env.now());

        assert_eq!(mgr.state(), SessionState::Closed);
        let changes = change(&actions);
        assert_eq!(changes[0].state, SessionState::Closed);
        assert!(changes[0].error.as_deref().unwrap().contains("expired token"));
        // No dangling session: a fresh connect starts clean.
        assert!(mgr.connect(1).contains(&SessionAction::Open { room_id: 1 }));
    }

    #[test]
    fn lost_connection_reconnects_with_backoff() {
        let env = MockEnv::new();
        let mut mgr = SessionManager::new(SessionConfig::default());

        mgr.connect(1);
        mgr.handle_opened(1, env.now());

        let actions = mgr.handle_lost(1, "peer reset", env.now());
        assert_eq!(mgr.state(), SessionState::Reconnecting);
        assert_eq!(change(&actions)[0].state, SessionState::Reconnecting);

        // First retry is immediate.
        let actions = mgr.tick(env.now());
        assert_eq!(actions, vec![SessionAction::Open { room_id: 1 }]);

        // Failure schedules the next attempt one base-delay out.
        let err = SessionError::Unavailable { reason: "refused".to_string() };
        assert!(mgr.handle_failed(1, &err, env.now()).is_empty());
        assert!(mgr.tick(env.now()).is_empty());

        env.advance(DEFAULT_BACKOFF_BASE);
        let actions = mgr.tick(env.now());
        assert_eq!(actions, vec![SessionAction::Open { room_id: 1 }]);

        // Recovery resets the attempt counter.
        mgr.handle_opened(1, env.now());
        assert!(mgr.is_connected());
        assert_eq!(mgr.last_error(), None);
    }

    #[test]
    fn reconnect_gives_up_after_budget() {
        let env = MockEnv::new();
        let mut mgr = SessionManager::new(SessionConfig::default());

        mgr.connect(1);
        mgr.handle_opened(1, env.now());
        mgr.handle_lost(1, "peer reset", env.now());

        let err = SessionError::Unavailable { reason: "refused".to_string() };
        let mut gave_up = false;
        for _ in 0..DEFAULT_MAX_RECONNECT_ATTEMPTS {
            env.advance(DEFAULT_BACKOFF_CAP);
            let actions = mgr.tick(env.now());
            assert_eq!(actions, vec![SessionAction::Open { room_id: 1 }]);
            let actions = mgr.handle_failed(1, &err, env.now());
            if !actions.is_empty() {
                gave_up = true;
                assert_eq!(change(&actions)[0].state, SessionState::Closed);
                assert!(change(&actions)[0].error.is_some());
            }
        }

        assert!(gave_up);
        assert_eq!(mgr.state(), SessionState::Closed);
        env.advance(DEFAULT_BACKOFF_CAP);
        assert!(mgr.tick(env.now()).is_empty());
    }

    #[test]
    fn fatal_error_aborts_reconnect_loop() {
        let env = MockEnv::new();
        let mut mgr = SessionManager::new(SessionConfig::default());

        mgr.connect(1);
        mgr.handle_opened(1, env.now());
        mgr.handle_lost(1, "peer reset", env.now());
        mgr.tick(env.now());

        let err = SessionError::AuthRejected { reason: "revoked".to_string() };
        let actions = mgr.handle_failed(1, &err, env.now());
        assert_eq!(mgr.state(), SessionState::Closed);
        assert!(change(&actions)[0].error.is_some());
    }

    #[test]
    fn stale_notifications_are_ignored() {
        let env = MockEnv::new();
        let mut mgr = SessionManager::new(SessionConfig::default());

        mgr.connect(1);
        mgr.handle_opened(1, env.now());

        // Wrong room.
        assert!(mgr.handle_opened(2, env.now()).is_empty());
        let err = SessionError::Unavailable { reason: "x".to_string() };
        assert!(mgr.handle_failed(2, &err, env.now()).is_empty());
        assert!(mgr.handle_lost(2, "x", env.now()).is_empty());

        // Already open: a late "opened" for the same room changes nothing.
        assert!(mgr.handle_opened(1, env.now()).is_empty());
        assert!(mgr.is_connected());
    }

    #[test]
    fn at_most_one_live_session() {
        let env = MockEnv::new();
        let mut mgr = SessionManager::new(SessionConfig::default());

        for room in [1, 2, 3, 2, 1] {
            mgr.connect(room);
            mgr.handle_opened(room, env.now());
            assert_eq!(mgr.active_room(), Some(room));
            assert_eq!(mgr.state(), SessionState::Open);
        }
    }
}
