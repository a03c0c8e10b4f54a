//! Per-backend sliding-window rate limiting.
//!
//! Each backend with a configured [`RateLimitConfig`] gets its own window of
//! `(admitted_at, characters)` entries. Before every admission decision the
//! window drops entries older than `now - window`, so counts always cover a
//! trailing interval rather than fixed buckets, and a burst that straddles a
//! bucket boundary cannot get twice the quota through.
//!
//! Windows live behind one mutex each. The map of windows has its own
//! `RwLock` that is only write-locked the first time a backend is seen, so
//! unrelated backends never contend.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::telemetry;

/// Quota for one backend.
///
/// ```rust
/// # use skald::RateLimitConfig;
/// # use std::time::Duration;
/// let limit = RateLimitConfig::new()
///     .max_requests(20)
///     .max_characters(5_000)
///     .window(Duration::from_secs(60));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Requests admitted per window. Default: 60.
    pub max_requests: u32,
    /// Characters admitted per window. Default: 20,000.
    pub max_characters: usize,
    /// Length of the trailing window. Default: 60s.
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 60,
            max_characters: 20_000,
            window: Duration::from_secs(60),
        }
    }
}

impl RateLimitConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_requests(mut self, n: u32) -> Self {
        self.max_requests = n;
        self
    }

    pub fn max_characters(mut self, n: usize) -> Self {
        self.max_characters = n;
        self
    }

    pub fn window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }
}

/// Outcome of [`RateLimiter::try_acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    /// `retry_after` is the wait until enough in-window usage expires for
    /// this request to fit. `None` means it can never fit (the request alone
    /// exceeds the character quota).
    Denied { retry_after: Option<Duration> },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed)
    }
}

/// Quota left in the current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Remaining {
    pub requests: u32,
    pub characters: usize,
}

struct RateWindow {
    config: RateLimitConfig,
    entries: VecDeque<(Instant, usize)>,
    characters: usize,
}

impl RateWindow {
    fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            entries: VecDeque::new(),
            characters: 0,
        }
    }

    fn prune(&mut self, now: Instant) {
        while let Some(&(at, chars)) = self.entries.front() {
            if now.duration_since(at) < self.config.window {
                break;
            }
            self.entries.pop_front();
            self.characters -= chars;
        }
    }

    fn try_admit(&mut self, now: Instant, characters: usize) -> Admission {
        self.prune(now);

        let requests_fit = self.entries.len() < self.config.max_requests as usize;
        let characters_fit = self.characters + characters <= self.config.max_characters;
        if requests_fit && characters_fit {
            self.entries.push_back((now, characters));
            self.characters += characters;
            return Admission::Allowed;
        }

        Admission::Denied {
            retry_after: self.retry_after(now, characters),
        }
    }

    fn retry_after(&self, now: Instant, characters: usize) -> Option<Duration> {
        if self.config.max_requests == 0 || characters > self.config.max_characters {
            return None;
        }

        // Index of the last entry that has to expire before the request fits.
        let mut must_expire: Option<usize> = None;

        let max_requests = self.config.max_requests as usize;
        if self.entries.len() >= max_requests {
            must_expire = Some(self.entries.len() - max_requests);
        }

        let excess = (self.characters + characters).saturating_sub(self.config.max_characters);
        if excess > 0 {
            let mut freed = 0;
            for (i, (_, chars)) in self.entries.iter().enumerate() {
                freed += chars;
                if freed >= excess {
                    must_expire = must_expire.max(Some(i));
                    break;
                }
            }
        }

        let (at, _) = self.entries.get(must_expire?)?;
        Some((*at + self.config.window).saturating_duration_since(now))
    }

    fn remaining(&mut self, now: Instant) -> Remaining {
        self.prune(now);
        Remaining {
            requests: self
                .config
                .max_requests
                .saturating_sub(self.entries.len() as u32),
            characters: self.config.max_characters.saturating_sub(self.characters),
        }
    }
}

/// Sliding-window limiter keyed by backend id.
///
/// Backends without a configured limit are unlimited.
#[derive(Default)]
pub struct RateLimiter {
    limits: RwLock<HashMap<String, RateLimitConfig>>,
    windows: RwLock<HashMap<String, Arc<Mutex<RateWindow>>>>,
}

impl RateLimiter {
    /// Create a limiter with no limits configured.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set (or replace) the quota for a backend.
    ///
    /// Usage already recorded in the window is kept and judged against the
    /// new quota.
    pub fn set_limit(&self, backend_id: impl Into<String>, config: RateLimitConfig) {
        let backend_id = backend_id.into();
        if let Some(window) = read(&self.windows).get(&backend_id) {
            lock(window).config = config;
        }
        write(&self.limits).insert(backend_id, config);
    }

    /// Configured quota for a backend, if any.
    pub fn limit(&self, backend_id: &str) -> Option<RateLimitConfig> {
        read(&self.limits).get(backend_id).copied()
    }

    /// Try to admit one request of `characters` characters.
    pub fn try_acquire(&self, backend_id: &str, characters: usize) -> Admission {
        let Some(window) = self.window(backend_id) else {
            metrics::counter!(telemetry::CHARACTERS_TOTAL, "backend" => backend_id.to_owned())
                .increment(characters as u64);
            return Admission::Allowed;
        };

        let admission = lock(&window).try_admit(Instant::now(), characters);
        match admission {
            Admission::Allowed => {
                metrics::counter!(telemetry::CHARACTERS_TOTAL, "backend" => backend_id.to_owned())
                    .increment(characters as u64);
            }
            Admission::Denied { retry_after } => {
                debug!(backend = backend_id, characters, ?retry_after, "rate limit denied request");
                metrics::counter!(telemetry::RATE_LIMITED_TOTAL, "backend" => backend_id.to_owned())
                    .increment(1);
            }
        }
        admission
    }

    /// Quota left in the current window, or `None` for unlimited backends.
    pub fn remaining(&self, backend_id: &str) -> Option<Remaining> {
        let window = self.window(backend_id)?;
        let remaining = lock(&window).remaining(Instant::now());
        Some(remaining)
    }

    /// Get or lazily create the window for a limited backend.
    fn window(&self, backend_id: &str) -> Option<Arc<Mutex<RateWindow>>> {
        // Fast path: window already exists (read lock)
        if let Some(window) = read(&self.windows).get(backend_id) {
            return Some(Arc::clone(window));
        }

        let config = self.limit(backend_id)?;

        // Slow path: double-check under the write lock
        let mut windows = write(&self.windows);
        let window = windows
            .entry(backend_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(RateWindow::new(config))));
        Some(Arc::clone(window))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}
