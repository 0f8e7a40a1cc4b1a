//! Drives a remote job from submission to a terminal state.
//!
//! Status checks for one job are strictly sequential. Between checks the
//! poller sleeps with exponential backoff:
//!
//! ```text
//! check ── delay₁ ── check ── delay₂ ── check ...   delayₙ₊₁ = min(delayₙ · m, max)
//! ```
//!
//! Polling ends at the first terminal state, when `max_elapsed_ms` is used
//! up (no check is issued past that point), when the cancellation token
//! fires, or when status checks keep failing.

use std::time::Duration;

use serde_json::Value as JsonValue;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};

use proofly_core::{defaults, Error, JobHandle, JobResult, JobState, RemoteService, Result, StatusReport};

/// Backoff and budget settings for polling one job.
#[derive(Debug, Clone, PartialEq)]
pub struct PollConfig {
    /// Delay after the first non-terminal check, in milliseconds.
    pub initial_delay_ms: u64,
    /// Cap for any single delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Growth factor applied after every non-terminal check.
    pub backoff_multiplier: f64,
    /// Elapsed-time budget per job, in milliseconds.
    pub max_elapsed_ms: u64,
    /// Consecutive transient status-check failures tolerated.
    pub max_transient_retries: u32,
    /// Extra random stretch of each delay, as a ratio (0 disables jitter).
    pub jitter: f64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: defaults::POLL_INITIAL_DELAY_MS,
            max_delay_ms: defaults::POLL_MAX_DELAY_MS,
            backoff_multiplier: defaults::POLL_BACKOFF_MULTIPLIER,
            max_elapsed_ms: defaults::POLL_MAX_ELAPSED_MS,
            max_transient_retries: defaults::POLL_MAX_TRANSIENT_RETRIES,
            jitter: defaults::POLL_JITTER,
        }
    }
}

impl PollConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `PROOFLY_POLL_INITIAL_DELAY_MS` | `1000` | First delay between checks |
    /// | `PROOFLY_POLL_MAX_DELAY_MS` | `15000` | Delay cap |
    /// | `PROOFLY_POLL_BACKOFF_MULTIPLIER` | `2` | Delay growth factor |
    /// | `PROOFLY_POLL_MAX_ELAPSED_MS` | `120000` | Per-job time budget |
    /// | `PROOFLY_POLL_MAX_TRANSIENT_RETRIES` | `3` | Tolerated transient failures |
    /// | `PROOFLY_POLL_JITTER` | `0` | Jitter ratio |
    pub fn from_env() -> Self {
        fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
            std::env::var(name)
                .ok()
                .and_then(|v| v.parse::<T>().ok())
                .unwrap_or(default)
        }

        Self {
            initial_delay_ms: env_or("PROOFLY_POLL_INITIAL_DELAY_MS", defaults::POLL_INITIAL_DELAY_MS),
            max_delay_ms: env_or("PROOFLY_POLL_MAX_DELAY_MS", defaults::POLL_MAX_DELAY_MS),
            backoff_multiplier: env_or(
                "PROOFLY_POLL_BACKOFF_MULTIPLIER",
                defaults::POLL_BACKOFF_MULTIPLIER,
            ),
            max_elapsed_ms: env_or("PROOFLY_POLL_MAX_ELAPSED_MS", defaults::POLL_MAX_ELAPSED_MS),
            max_transient_retries: env_or(
                "PROOFLY_POLL_MAX_TRANSIENT_RETRIES",
                defaults::POLL_MAX_TRANSIENT_RETRIES,
            ),
            jitter: env_or("PROOFLY_POLL_JITTER", defaults::POLL_JITTER),
        }
    }

    pub fn with_initial_delay(mut self, ms: u64) -> Self {
        self.initial_delay_ms = ms;
        self
    }

    pub fn with_max_delay(mut self, ms: u64) -> Self {
        self.max_delay_ms = ms;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn with_max_elapsed(mut self, ms: u64) -> Self {
        self.max_elapsed_ms = ms;
        self
    }

    pub fn with_max_transient_retries(mut self, retries: u32) -> Self {
        self.max_transient_retries = retries;
        self
    }

    pub fn with_jitter(mut self, ratio: f64) -> Self {
        self.jitter = ratio;
        self
    }

    /// Reject settings that would spin or never back off.
    pub fn validate(&self) -> Result<()> {
        if self.initial_delay_ms == 0 {
            return Err(Error::Validation("initial_delay_ms must be > 0".into()));
        }
        if self.max_delay_ms < self.initial_delay_ms {
            return Err(Error::Validation(format!(
                "max_delay_ms ({}) must be >= initial_delay_ms ({})",
                self.max_delay_ms, self.initial_delay_ms
            )));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(Error::Validation(format!(
                "backoff_multiplier must be >= 1, got {}",
                self.backoff_multiplier
            )));
        }
        if self.max_elapsed_ms == 0 {
            return Err(Error::Validation("max_elapsed_ms must be > 0".into()));
        }
        if !self.jitter.is_finite() || !(0.0..=1.0).contains(&self.jitter) {
            return Err(Error::Validation(format!(
                "jitter must be within [0, 1], got {}",
                self.jitter
            )));
        }
        Ok(())
    }
}

/// Exponential delay sequence: non-decreasing and capped at `max_delay_ms`.
#[derive(Debug, Clone)]
pub struct Backoff {
    base_ms: u64,
    max_ms: u64,
    multiplier: f64,
    jitter: f64,
    last_ms: u64,
}

impl Backoff {
    pub fn new(config: &PollConfig) -> Self {
        Self {
            base_ms: config.initial_delay_ms.min(config.max_delay_ms),
            max_ms: config.max_delay_ms,
            multiplier: config.backoff_multiplier,
            jitter: config.jitter,
            last_ms: 0,
        }
    }

    /// Next delay to wait, advancing the sequence.
    pub fn next_delay(&mut self) -> Duration {
        let mut wait_ms = self.base_ms;
        if self.jitter > 0.0 {
            let stretch = (self.base_ms as f64 * self.jitter * rand::random::<f64>()) as u64;
            wait_ms = wait_ms.saturating_add(stretch);
        }
        // Jitter may stretch a delay past the next base; never step back.
        wait_ms = wait_ms.max(self.last_ms).min(self.max_ms);
        self.last_ms = wait_ms;

        let grown = (self.base_ms as f64 * self.multiplier).round();
        self.base_ms = if grown >= self.max_ms as f64 {
            self.max_ms
        } else {
            grown as u64
        };

        Duration::from_millis(wait_ms)
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        Some(self.next_delay())
    }
}

/// Polls one job handle until a terminal result.
#[derive(Debug, Clone, Default)]
pub struct Poller {
    config: PollConfig,
}

impl Poller {
    pub fn new(config: PollConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PollConfig {
        &self.config
    }

    /// Poll `handle` until it reaches a terminal state.
    ///
    /// Never returns `Succeeded`/`Failed` once cancellation has been
    /// observed, and never issues another status check after returning.
    #[instrument(skip(self, remote, handle, cancel), fields(job_id = %handle.id()))]
    pub async fn poll<R>(
        &self,
        remote: &R,
        handle: &JobHandle,
        cancel: &CancellationToken,
    ) -> JobResult<JsonValue>
    where
        R: RemoteService + ?Sized,
    {
        let start = Instant::now();
        let max_elapsed = Duration::from_millis(self.config.max_elapsed_ms);
        let mut backoff = Backoff::new(&self.config);
        let mut attempt: u32 = 0;
        let mut transient_failures: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return cancelled(handle, attempt);
            }

            attempt += 1;
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return cancelled(handle, attempt),
                outcome = remote.check_status(handle.id()) => outcome,
            };
            // A late answer never overrides an observed cancellation.
            if cancel.is_cancelled() {
                return cancelled(handle, attempt);
            }

            match outcome {
                Ok(report) if report.state.is_terminal() => {
                    debug!(
                        attempt,
                        job_state = %report.state,
                        duration_ms = start.elapsed().as_millis() as u64,
                        "Job reached terminal state"
                    );
                    return terminal(handle, report);
                }
                Ok(report) => {
                    transient_failures = 0;
                    trace!(attempt, job_state = %report.state, "Job not finished yet");
                }
                Err(e) if e.is_transient() && transient_failures < self.config.max_transient_retries => {
                    transient_failures += 1;
                    warn!(
                        attempt,
                        transient_failures,
                        error = %e,
                        "Transient status check failure, retrying"
                    );
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Status check failed, giving up");
                    return JobResult::failed(format!(
                        "status check for job {} failed after {} attempt(s): {}",
                        handle.id(),
                        attempt,
                        e
                    ));
                }
            }

            let elapsed = start.elapsed();
            if elapsed >= max_elapsed {
                return self.timed_out(handle, attempt);
            }

            let delay = backoff.next_delay();
            let wait = delay.min(max_elapsed - elapsed);
            trace!(delay_ms = wait.as_millis() as u64, "Sleeping before next status check");

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return cancelled(handle, attempt),
                _ = sleep(wait) => {}
            }

            // A check at or past the deadline is never issued.
            if start.elapsed() >= max_elapsed {
                return self.timed_out(handle, attempt);
            }
        }
    }

    fn timed_out(&self, handle: &JobHandle, attempts: u32) -> JobResult<JsonValue> {
        warn!(
            attempts,
            max_elapsed_ms = self.config.max_elapsed_ms,
            "Job polling timed out"
        );
        JobResult::timed_out(format!(
            "job {} did not reach a terminal state within {}ms ({} status checks)",
            handle.id(),
            self.config.max_elapsed_ms,
            attempts
        ))
    }
}

fn cancelled(handle: &JobHandle, attempts: u32) -> JobResult<JsonValue> {
    debug!(attempts, "Job polling cancelled");
    JobResult::cancelled(format!("polling of job {} was cancelled", handle.id()))
}

fn terminal(handle: &JobHandle, report: StatusReport) -> JobResult<JsonValue> {
    let detail = || {
        report
            .error
            .clone()
            .unwrap_or_else(|| format!("job {} ended in state {}", handle.id(), report.state))
    };
    match report.state {
        JobState::Succeeded => JobResult::succeeded(report.result.clone().unwrap_or(JsonValue::Null)),
        JobState::TimedOut => JobResult::timed_out(detail()),
        JobState::Cancelled => JobResult::cancelled(detail()),
        _ => JobResult::failed(detail()),
    }
}
