//! Telemetry metric name constants.
//!
//! Centralised metric names for skald operations. Consumers install their
//! own `metrics` recorder (e.g. prometheus, statsd); without a recorder
//! installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `skald_`. Counters end in `_total`,
//! histograms use meaningful units (e.g. `_seconds`).
//!
//! # Common labels
//!
//! - `backend`: backend id (e.g. "elevenlabs", "espeak", "silent")
//! - `operation`: "synthesize" or "synthesize_stream"
//! - `status`: outcome: "ok" or "error"
//! - `reason`: why a backend was passed over: "cooldown", "quota", or the
//!   failure kind label (see [`FailureKind`](crate::FailureKind))

/// Total backend calls dispatched by the orchestrator.
///
/// Labels: `backend`, `operation`, `status` ("ok" | "error").
pub const REQUESTS_TOTAL: &str = "skald_requests_total";

/// Backend call duration in seconds.
///
/// Labels: `backend`, `operation`.
pub const REQUEST_DURATION_SECONDS: &str = "skald_request_duration_seconds";

/// Total retry attempts (not counting the initial request).
///
/// Labels: `backend`, `operation`.
pub const RETRIES_TOTAL: &str = "skald_retries_total";

/// Total times the orchestrator moved past a backend.
///
/// Labels: `backend`, `reason` ("cooldown" | "quota" | failure kind).
pub const FALLBACKS_TOTAL: &str = "skald_fallbacks_total";

/// Total audio cache hits.
pub const CACHE_HITS_TOTAL: &str = "skald_cache_hits_total";

/// Total audio cache misses (including expired entries).
pub const CACHE_MISSES_TOTAL: &str = "skald_cache_misses_total";

/// Total entries evicted to stay within the byte budget.
pub const CACHE_EVICTIONS_TOTAL: &str = "skald_cache_evictions_total";

/// Bytes currently held by the audio cache (gauge).
pub const CACHE_BYTES: &str = "skald_cache_bytes";

/// Total requests denied by the local sliding-window limiter.
///
/// Labels: `backend`.
pub const RATE_LIMITED_TOTAL: &str = "skald_rate_limited_total";

/// Total times a backend entered cooldown.
///
/// Labels: `backend`.
pub const BACKEND_COOLDOWNS_TOTAL: &str = "skald_backend_cooldowns_total";

/// Total characters admitted for synthesis.
///
/// Labels: `backend`.
pub const CHARACTERS_TOTAL: &str = "skald_characters_total";
