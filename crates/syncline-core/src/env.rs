//! Environment abstraction for deterministic testing.
//!
//! Decouples synchronization logic from system resources (time, randomness).
//! Production code uses [`SystemEnv`]; tests use [`test_utils::MockEnv`] with
//! a manually-advanced virtual clock so that typing expiry, switch debounce,
//! and reconnect backoff are testable without real delays.

use std::{
    ops::{Add, Sub},
    time::Duration,
};

/// Abstract environment providing time and randomness.
///
/// # Safety
///
/// Implementations MUST guarantee:
///
/// - `now()` never goes backwards
/// - `unix_millis()` is non-decreasing within a single execution context
/// - `random_bytes()` uses cryptographically secure entropy in production
pub trait Environment: Clone + Send + Sync + 'static {
    /// The specific instant type used by this environment.
    ///
    /// Production environments use `std::time::Instant`, while simulation
    /// environments use virtual time.
    type Instant: Copy
        + Ord
        + Send
        + Sync
        + Add<Duration, Output = Self::Instant>
        + Sub<Output = Duration>;

    /// Current time (monotonic).
    ///
    /// # Invariants
    ///
    /// - This method MUST return values that never decrease within a single
    ///   execution context. Subsequent calls must return times >= previous
    ///   calls.
    fn now(&self) -> Self::Instant;

    /// Current wall-clock time in milliseconds since the Unix epoch.
    ///
    /// Used only to stamp optimistic local messages until the server's
    /// canonical `created_at` replaces them. Ordering decisions never mix
    /// this with `now()`.
    fn unix_millis(&self) -> i64;

    /// Sleeps for the specified duration.
    ///
    /// This is the ONLY async method in the trait, and it should only be used
    /// by driver code (not synchronization logic).
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Fills the provided buffer with random bytes.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Generates a random `u64`.
    ///
    /// Convenience for request and correlation identifiers.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }
}

/// Production environment backed by the operating system.
#[derive(Debug, Clone, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    type Instant = std::time::Instant;

    fn now(&self) -> Self::Instant {
        std::time::Instant::now()
    }

    fn unix_millis(&self) -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_or(0, |d| d.as_millis() as i64)
    }

    async fn sleep(&self, duration: Duration) {
        // Thread-based sleep keeps the core runtime-agnostic; async drivers
        // should use their own timer instead of this method.
        std::thread::sleep(duration);
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        use rand::RngCore;
        rand::thread_rng().fill_bytes(buffer);
    }
}

pub mod test_utils {
    //! Mock environment with a virtual clock for deterministic tests.

    use std::{
        sync::{
            Arc,
            atomic::{AtomicU64, Ordering},
        },
        time::{Duration, Instant},
    };

    use super::Environment;

    /// Deterministic environment with a manually-advanced clock.
    ///
    /// `now()` is anchored at construction time and only moves when
    /// [`MockEnv::advance`] is called, so timer-driven behavior (typing
    /// expiry, debounce windows, backoff) can be stepped precisely.
    #[derive(Debug, Clone)]
    pub struct MockEnv {
        start: Instant,
        offset_ms: Arc<AtomicU64>,
        seed: Arc<AtomicU64>,
    }

    impl MockEnv {
        /// Create a mock environment anchored at the current instant.
        pub fn new() -> Self {
            Self {
                start: Instant::now(),
                offset_ms: Arc::new(AtomicU64::new(0)),
                seed: Arc::new(AtomicU64::new(0x5EED)),
            }
        }

        /// Advance the virtual clock.
        pub fn advance(&self, duration: Duration) {
            self.offset_ms.fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
        }
    }

    impl Default for MockEnv {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Environment for MockEnv {
        type Instant = Instant;

        fn now(&self) -> Instant {
            self.start + Duration::from_millis(self.offset_ms.load(Ordering::SeqCst))
        }

        fn unix_millis(&self) -> i64 {
            // Virtual epoch: offset from a fixed baseline so stamps are
            // reproducible across runs.
            1_700_000_000_000 + self.offset_ms.load(Ordering::SeqCst) as i64
        }

        async fn sleep(&self, _duration: Duration) {}

        fn random_bytes(&self, buffer: &mut [u8]) {
            // xorshift keeps the sequence deterministic per clone group
            for byte in buffer.iter_mut() {
                let mut x = self.seed.load(Ordering::SeqCst);
                x ^= x << 13;
                x ^= x >> 7;
                x ^= x << 17;
                self.seed.store(x, Ordering::SeqCst);
                *byte = (x & 0xFF) as u8;
            }
        }
    }

    #[cfg(test)]
    #[allow(clippy::unwrap_used)]
    mod tests {
        use super::*;

        #[test]
        fn advance_moves_clock_forward() {
            let env = MockEnv::new();
            let t0 = env.now();
            env.advance(Duration::from_millis(250));
            let t1 = env.now();
            assert_eq!(t1 - t0, Duration::from_millis(250));
        }

        #[test]
        fn clones_share_the_clock() {
            let env = MockEnv::new();
            let other = env.clone();
            env.advance(Duration::from_secs(1));
            assert_eq!(other.now(), env.now());
        }

        #[test]
        fn unix_millis_tracks_advance() {
            let env = MockEnv::new();
            let m0 = env.unix_millis();
            env.advance(Duration::from_millis(42));
            assert_eq!(env.unix_millis() - m0, 42);
        }
    }
}
