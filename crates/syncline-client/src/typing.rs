//! Typing presence tracker.
//!
//! Derives the live "who is typing" set from inbound events and local expiry
//! deadlines. Entirely independent of message content. Expiry is local
//! wall-clock only: a user who disconnects mid-typing silently ages out
//! within the 3-second staleness bound, which is accepted behavior.

use std::{
    collections::HashMap,
    ops::{Add, Sub},
    time::{Duration, Instant},
};

use syncline_core::UserId;

/// How long a typing indicator stays lit after the last received event.
pub const TYPING_TTL: Duration = Duration::from_millis(3000);

/// Minimum interval between outbound typing notifications while the local
/// user keeps typing. Shorter than [`TYPING_TTL`] so the remote indicator
/// never flickers off between refreshes.
pub const TYPING_SEND_INTERVAL: Duration = Duration::from_millis(2000);

/// Tracks received typing state and outbound rate-limit bookkeeping.
///
/// Each received event refreshes the user's expiry deadline (last-event-wins,
/// so the indicator never flickers off between keystrokes). The tracker never
/// inserts the local user into the visible set.
#[derive(Debug, Clone)]
pub struct TypingTracker<I = Instant>
where
    I: Copy + Ord + Add<Duration, Output = I> + Sub<Output = Duration>,
{
    /// Local user, excluded from the visible set.
    self_id: UserId,
    /// Expiry deadline per remote user.
    entries: HashMap<UserId, I>,
    /// When the local client last sent a typing notification.
    last_sent: Option<I>,
}

impl<I> TypingTracker<I>
where
    I: Copy + Ord + Add<Duration, Output = I> + Sub<Output = Duration>,
{
    /// Create a tracker for the given local user.
    pub fn new(self_id: UserId) -> Self {
        Self { self_id, entries: HashMap::new(), last_sent: None }
    }

    /// Record a received typing event, refreshing the user's deadline.
    ///
    /// Returns true if the visible set changed (a new user appeared).
    pub fn observe_typing(&mut self, user_id: UserId, now: I) -> bool {
        if user_id == self.self_id {
            return false;
        }
        self.entries.insert(user_id, now + TYPING_TTL).is_none()
    }

    /// Record an explicit stop event, removing the user immediately.
    ///
    /// Returns true if the visible set changed.
    pub fn observe_stop(&mut self, user_id: UserId) -> bool {
        self.entries.remove(&user_id).is_some()
    }

    /// Drop entries whose deadline has passed.
    ///
    /// Returns true if the visible set changed.
    pub fn expire(&mut self, now: I) -> bool {
        let before = self.entries.len();
        self.entries.retain(|_, expires_at| *expires_at > now);
        self.entries.len() != before
    }

    /// Outbound rate limit: true (and records `now`) at most once per
    /// [`TYPING_SEND_INTERVAL`] while the user keeps typing.
    pub fn should_send(&mut self, now: I) -> bool {
        let due = match self.last_sent {
            None => true,
            Some(last) => now - last >= TYPING_SEND_INTERVAL,
        };
        if due {
            self.last_sent = Some(now);
        }
        due
    }

    /// Users currently typing, sorted for deterministic rendering.
    pub fn typing_users(&self) -> Vec<UserId> {
        let mut users: Vec<UserId> = self.entries.keys().copied().collect();
        users.sort_unstable();
        users
    }

    /// Drop all state. Called on room switch.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.last_sent = None;
    }
}
