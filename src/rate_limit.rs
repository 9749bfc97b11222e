//! Fixed-window attempt limiting for sign-in triggers.
//!
//! Windows do not slide: a burst straddling a window boundary can see up to
//! twice the nominal limit.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use crate::error::Error;

/// Attempt budget for authentication triggers.
pub const AUTH_ATTEMPT_LIMIT: u32 = 5;
/// Window for [`AUTH_ATTEMPT_LIMIT`].
pub const AUTH_ATTEMPT_WINDOW: Duration = Duration::from_secs(5 * 60);
/// Short burst window guarding the visible sign-in control.
pub const SIGN_IN_BURST_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy)]
struct AttemptWindow {
    count: u32,
    reset_at: Instant,
}

/// Per-key fixed-window counter.
#[derive(Debug)]
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    attempts: Mutex<HashMap<String, AttemptWindow>>,
}

impl RateLimiter {
    /// Table size above which expired windows are swept on insert.
    pub const EVICTION_THRESHOLD: usize = 1024;

    #[must_use]
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    /// 5 attempts per 5 minutes.
    #[must_use]
    pub fn for_authentication() -> Self {
        Self::new(AUTH_ATTEMPT_LIMIT, AUTH_ATTEMPT_WINDOW)
    }

    /// 5 attempts per minute, for the interactive sign-in button.
    #[must_use]
    pub fn for_sign_in_button() -> Self {
        Self::new(AUTH_ATTEMPT_LIMIT, SIGN_IN_BURST_WINDOW)
    }

    #[must_use]
    pub fn limit(&self) -> u32 {
        self.limit
    }

    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Record an attempt for `key` and report whether it is allowed.
    ///
    /// Denied attempts are not counted.
    pub fn can_attempt(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut attempts = self.lock();

        if let Some(record) = attempts.get_mut(key) {
            if now <= record.reset_at {
                if record.count >= self.limit {
                    return false;
                }
                record.count += 1;
                return true;
            }
        } else if attempts.len() >= Self::EVICTION_THRESHOLD {
            attempts.retain(|_, record| now <= record.reset_at);
        }

        if self.limit == 0 {
            return false;
        }
        attempts.insert(
            key.to_owned(),
            AttemptWindow {
                count: 1,
                reset_at: now + self.window,
            },
        );
        true
    }

    /// Time until the window for `key` resets; zero when none is active.
    #[must_use]
    pub fn remaining_cooldown(&self, key: &str) -> Duration {
        let now = Instant::now();
        self.lock()
            .get(key)
            .map_or(Duration::ZERO, |record| record.reset_at.saturating_duration_since(now))
    }

    /// [`can_attempt`](Self::can_attempt) as a `Result`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RateLimited`] carrying the cooldown when denied.
    pub fn check(&self, key: &str) -> Result<(), Error> {
        if self.can_attempt(key) {
            Ok(())
        } else {
            let retry_after = self.remaining_cooldown(key);
            tracing::warn!(key, retry_after_secs = retry_after.as_secs(), "Attempt rate limited");
            Err(Error::RateLimited { retry_after })
        }
    }

    /// Number of keys currently tracked.
    #[must_use]
    pub fn tracked_keys(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, AttemptWindow>> {
        self.attempts.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::for_authentication()
    }
}
