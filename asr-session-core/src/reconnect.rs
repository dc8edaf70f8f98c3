//! C5: Reconnect Supervisor.
//!
//! Exponential backoff with a cap and unlimited retries, resetting on
//! success. Grounded on `sonos/retry.rs`'s `with_retry` shape (bounded
//! retries for SOAP) generalized to the unlimited-retry policy described in
//! `azure_asr_python/reconnect_manager.py` (`ReconnectManager`).
//!
//! `spec.md` §4.5 step 1 requires at most one retry in flight. This crate
//! doesn't track that with a flag: the session orchestrator (`session.rs`)
//! is driven cooperatively, one `&mut self` call at a time (`spec.md` §5),
//! so the borrow checker already makes it impossible for two retry loops to
//! run against the same session concurrently. `begin_attempt`/
//! `delay_for_attempt`/`reset` are the primitives the orchestrator composes
//! into its own retry loop.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Tracks reconnect attempts and computes capped exponential backoff.
pub struct ReconnectSupervisor {
    base_delay_ms: u64,
    max_delay_ms: u64,
    attempts: AtomicU32,
}

impl ReconnectSupervisor {
    /// `base_delay_ms = 500`, `max_delay_ms = 4000` per `spec.md` §4.5 defaults.
    #[must_use]
    pub fn new(base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            base_delay_ms,
            max_delay_ms,
            attempts: AtomicU32::new(0),
        }
    }

    /// Current attempt counter (also exposed to the host for observability,
    /// mirroring the original's `get_attempts_info()`).
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Resets the attempt counter on a successful connection.
    pub fn reset(&self) {
        self.attempts.store(0, Ordering::SeqCst);
    }

    /// Increments and returns the attempt counter, without sleeping or
    /// invoking a connect function. The session orchestrator drives its own
    /// retry loop with this plus [`Self::delay_for_attempt`] rather than
    /// going through a closure-based helper, since its connect function
    /// needs `&mut self` access to other session fields.
    pub fn begin_attempt(&self) -> u32 {
        self.attempts.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// `delay(k) = min(base · 2^(k-1), max)` for attempt number `k` (1-indexed).
    #[must_use]
    pub fn delay_for_attempt(&self, k: u32) -> Duration {
        let exponent = k.saturating_sub(1);
        let scaled = self.base_delay_ms.saturating_mul(1u64 << exponent.min(32));
        Duration::from_millis(scaled.min(self.max_delay_ms))
    }
}
