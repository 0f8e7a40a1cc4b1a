//! Centralized default constants for the Proofly client.
//!
//! **This module is the single source of truth** for shared default values.
//! The remote service does not publish its rate limits or confidence
//! semantics, so every value here can be overridden through the matching
//! config struct or environment variable.

// =============================================================================
// POLLING
// =============================================================================

/// Delay before the second status check, in milliseconds.
pub const POLL_INITIAL_DELAY_MS: u64 = 1_000;

/// Upper bound for any single delay between status checks, in milliseconds.
pub const POLL_MAX_DELAY_MS: u64 = 15_000;

/// Factor applied to the delay after every non-terminal status check.
pub const POLL_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Wall-clock budget for driving one job to a terminal state (2 minutes).
pub const POLL_MAX_ELAPSED_MS: u64 = 120_000;

/// Consecutive transient failures tolerated before a job is reported failed.
pub const POLL_MAX_TRANSIENT_RETRIES: u32 = 3;

/// Default jitter ratio (0 = deterministic delays).
pub const POLL_JITTER: f64 = 0.0;

// =============================================================================
// JOB CLIENT
// =============================================================================

/// Maximum remote calls in flight across all `submit_and_await` callers
/// sharing one job client.
pub const CLIENT_MAX_IN_FLIGHT: usize = 10;

/// Job event broadcast channel capacity.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

// =============================================================================
// GRAPH BUILDING
// =============================================================================

/// Simultaneous specification lookups per graph build.
pub const GRAPH_MAX_CONCURRENT: usize = 5;

/// Maximum specifications accepted by one graph build.
pub const GRAPH_MAX_SPECS: usize = 100;

/// Best-scoring candidate profiles kept per specification.
pub const GRAPH_CANDIDATES_PER_SPEC: usize = 1;

// =============================================================================
// HTTP
// =============================================================================

/// Default remote service base URL.
pub const BASE_URL: &str = "https://ai-accelerator-hackathon-backend-bitter-bird-9940.fly.dev/api";

/// Per-request HTTP timeout in seconds.
pub const HTTP_TIMEOUT_SECS: u64 = 60;

/// Header carrying the API key.
pub const API_KEY_HEADER: &str = "X-API-Key";
