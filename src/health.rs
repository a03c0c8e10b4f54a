//! Backend health tracking with failure-count cooldowns.
//!
//! Each backend moves through three states:
//!
//! ```text
//!   Healthy ──(failures ≥ threshold)──► CoolingDown
//!      ▲                                    │
//!      └──(now ≥ cooldown_until, or any success)
//! ```
//!
//! The cooldown → healthy edge is not an event: [`HealthTracker::is_eligible`]
//! is a pure function of the stored record and the clock. A backend that
//! fails again after its cooldown expired is still at or above the threshold,
//! so a single further failure restarts the cooldown.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, warn};

use crate::telemetry;

/// Configuration for backend demotion.
///
/// ```rust
/// # use skald::HealthConfig;
/// # use std::time::Duration;
/// let config = HealthConfig::new()
///     .failure_threshold(5)
///     .cooldown(Duration::from_secs(60));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthConfig {
    /// Consecutive failures before a backend is skipped. Default: 3.
    pub failure_threshold: u32,
    /// How long a demoted backend is skipped. Default: 5 minutes.
    pub cooldown: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown: Duration::from_secs(300),
        }
    }
}

impl HealthConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failure_threshold(mut self, n: u32) -> Self {
        self.failure_threshold = n.max(1);
        self
    }

    pub fn cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }
}

/// Observable state of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendState {
    Healthy,
    CoolingDown { remaining: Duration },
}

/// Snapshot of one backend's health record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendHealth {
    pub backend_id: String,
    pub consecutive_failures: u32,
    pub last_failure_at: Option<Instant>,
    pub cooldown_until: Option<Instant>,
    pub state: BackendState,
}

#[derive(Debug, Default)]
struct HealthRecord {
    consecutive_failures: u32,
    last_failure_at: Option<Instant>,
    cooldown_until: Option<Instant>,
}

impl HealthRecord {
    fn state(&self, threshold: u32, now: Instant) -> BackendState {
        match self.cooldown_until {
            Some(until) if self.consecutive_failures >= threshold && now < until => {
                BackendState::CoolingDown {
                    remaining: until - now,
                }
            }
            _ => BackendState::Healthy,
        }
    }
}

/// Tracks consecutive failures per backend.
///
/// One mutex per backend; the map itself is only write-locked when a
/// backend is seen for the first time.
pub struct HealthTracker {
    config: HealthConfig,
    records: RwLock<HashMap<String, Arc<Mutex<HealthRecord>>>>,
}

impl HealthTracker {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            records: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    /// Whether the backend may be tried now.
    pub fn is_eligible(&self, backend_id: &str) -> bool {
        self.state(backend_id) == BackendState::Healthy
    }

    /// Current state; unknown backends are healthy.
    pub fn state(&self, backend_id: &str) -> BackendState {
        match self.existing(backend_id) {
            Some(record) => lock(&record).state(self.config.failure_threshold, Instant::now()),
            None => BackendState::Healthy,
        }
    }

    /// Clear the failure count and any cooldown.
    pub fn record_success(&self, backend_id: &str) {
        let Some(record) = self.existing(backend_id) else {
            return;
        };
        let mut record = lock(&record);
        if record.consecutive_failures > 0 {
            info!(
                backend = backend_id,
                failures = record.consecutive_failures,
                "backend recovered"
            );
        }
        record.consecutive_failures = 0;
        record.cooldown_until = None;
    }

    /// Count a failure, starting (or restarting) the cooldown once the
    /// threshold is reached. Returns the resulting state.
    pub fn record_failure(&self, backend_id: &str) -> BackendState {
        let now = Instant::now();
        let record = self.record(backend_id);
        let mut record = lock(&record);
        record.consecutive_failures = record.consecutive_failures.saturating_add(1);
        record.last_failure_at = Some(now);

        if record.consecutive_failures >= self.config.failure_threshold {
            record.cooldown_until = Some(now + self.config.cooldown);
            warn!(
                backend = backend_id,
                failures = record.consecutive_failures,
                cooldown_secs = self.config.cooldown.as_secs(),
                "backend entering cooldown"
            );
            metrics::counter!(telemetry::BACKEND_COOLDOWNS_TOTAL, "backend" => backend_id.to_owned())
                .increment(1);
        }
        record.state(self.config.failure_threshold, now)
    }

    /// Force immediate eligibility ("retry now").
    pub fn reset(&self, backend_id: &str) {
        if let Some(record) = self.existing(backend_id) {
            let mut record = lock(&record);
            record.consecutive_failures = 0;
            record.cooldown_until = None;
            info!(backend = backend_id, "backend health reset");
        }
    }

    /// Snapshot of one backend; unknown backends report a clean record.
    pub fn snapshot(&self, backend_id: &str) -> BackendHealth {
        let now = Instant::now();
        let threshold = self.config.failure_threshold;
        match self.existing(backend_id) {
            Some(record) => {
                let record = lock(&record);
                BackendHealth {
                    backend_id: backend_id.to_string(),
                    consecutive_failures: record.consecutive_failures,
                    last_failure_at: record.last_failure_at,
                    cooldown_until: record.cooldown_until,
                    state: record.state(threshold, now),
                }
            }
            None => BackendHealth {
                backend_id: backend_id.to_string(),
                consecutive_failures: 0,
                last_failure_at: None,
                cooldown_until: None,
                state: BackendState::Healthy,
            },
        }
    }

    /// Snapshots of every backend seen so far, sorted by id.
    pub fn snapshot_all(&self) -> Vec<BackendHealth> {
        let mut ids: Vec<String> = self
            .records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids.iter().map(|id| self.snapshot(id)).collect()
    }

    fn existing(&self, backend_id: &str) -> Option<Arc<Mutex<HealthRecord>>> {
        self.records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(backend_id)
            .cloned()
    }

    fn record(&self, backend_id: &str) -> Arc<Mutex<HealthRecord>> {
        if let Some(record) = self.existing(backend_id) {
            return record;
        }
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        Arc::clone(records.entry(backend_id.to_string()).or_default())
    }
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new(HealthConfig::default())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker(threshold: u32) -> HealthTracker {
        HealthTracker::new(
            HealthConfig::new()
                .failure_threshold(threshold)
                .cooldown(Duration::from_secs(300)),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_backend_is_eligible() {
        assert!(tracker(3).is_eligible("never-seen"));
    }

    #[tokio::test(start_paused = true)]
    async fn below_threshold_stays_eligible() {
        let t = tracker(3);
        t.record_failure("a");
        t.record_failure("a");
        assert!(t.is_eligible("a"));
        assert_eq!(t.snapshot("a").consecutive_failures, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn threshold_starts_cooldown() {
        let t = tracker(3);
        for _ in 0..3 {
            t.record_failure("a");
        }
        assert!(!t.is_eligible("a"));
        assert_eq!(
            t.state("a"),
            BackendState::CoolingDown {
                remaining: Duration::from_secs(300)
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cooldown_expires_without_reset() {
        let t = tracker(3);
        for _ in 0..3 {
            t.record_failure("a");
        }
        tokio::time::advance(Duration::from_secs(299)).await;
        assert!(!t.is_eligible("a"));
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(t.is_eligible("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn failure_after_cooldown_restarts_it() {
        let t = tracker(2);
        t.record_failure("a");
        t.record_failure("a");
        tokio::time::advance(Duration::from_secs(300)).await;
        assert!(t.is_eligible("a"));
        t.record_failure("a");
        assert!(!t.is_eligible("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn success_clears_cooldown() {
        let t = tracker(1);
        t.record_failure("a");
        assert!(!t.is_eligible("a"));
        t.record_success("a");
        assert!(t.is_eligible("a"));
        let snap = t.snapshot("a");
        assert_eq!(snap.consecutive_failures, 0);
        assert!(snap.cooldown_until.is_none());
        assert!(snap.last_failure_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn reset_forces_eligibility() {
        let t = tracker(1);
        t.record_failure("a");
        t.reset("a");
        assert!(t.is_eligible("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_all_is_sorted() {
        let t = tracker(3);
        t.record_failure("b");
        t.record_failure("a");
        let ids: Vec<_> = t.snapshot_all().into_iter().map(|h| h.backend_id).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
