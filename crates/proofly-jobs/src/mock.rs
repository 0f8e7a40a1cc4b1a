//! Scripted in-memory remote service for deterministic testing.
//!
//! Submit responses come from a handler closure; status responses come from
//! per-job scripts whose last entry repeats forever. Every call is logged
//! with its (tokio) timestamp, so tests running on paused time can assert
//! exact backoff delays.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use proofly_jobs::mock::{Scripted, ScriptedRemote};
//!
//! let remote = ScriptedRemote::new()
//!     .on_submit(|_kind, _payload| ScriptedRemote::job("job_1"))
//!     .with_status_script("job_1", vec![
//!         Scripted::running(),
//!         Scripted::succeeded(serde_json::json!(42)),
//!     ]);
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tokio::time::Instant;

use proofly_core::{
    Error, JobHandle, OperationKind, RemoteService, Result, StatusReport, Submission,
};

type SubmitHandler = dyn Fn(OperationKind, &JsonValue) -> Result<Submission> + Send + Sync;

/// One scripted status-check response.
#[derive(Debug, Clone)]
pub enum Scripted {
    Report(StatusReport),
    /// Surfaces as a transient transport error.
    Transient(String),
    /// Surfaces as a non-retryable 400 response.
    Fatal(String),
}

impl Scripted {
    pub fn queued() -> Self {
        Scripted::Report(StatusReport::queued())
    }

    pub fn running() -> Self {
        Scripted::Report(StatusReport::running())
    }

    pub fn succeeded(value: JsonValue) -> Self {
        Scripted::Report(StatusReport::succeeded(value))
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Scripted::Report(StatusReport::failed(error))
    }

    fn into_result(self) -> Result<StatusReport> {
        match self {
            Scripted::Report(report) => Ok(report),
            Scripted::Transient(msg) => Err(Error::Transport(msg)),
            Scripted::Fatal(msg) => Err(Error::Remote {
                status: 400,
                message: msg,
            }),
        }
    }
}

/// A logged call against the scripted remote.
#[derive(Debug, Clone)]
pub enum MockCall {
    Submit {
        kind: OperationKind,
        payload: JsonValue,
        at: Instant,
    },
    Status {
        job_id: String,
        at: Instant,
    },
}

#[derive(Default)]
struct ScriptState {
    statuses: HashMap<String, VecDeque<Scripted>>,
    calls: Vec<MockCall>,
}

/// Scripted remote service.
#[derive(Clone)]
pub struct ScriptedRemote {
    submit_handler: Arc<SubmitHandler>,
    state: Arc<Mutex<ScriptState>>,
    latency_ms: u64,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl Default for ScriptedRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedRemote {
    /// Create a remote that rejects every submission until a handler is set.
    pub fn new() -> Self {
        Self {
            submit_handler: Arc::new(|kind: OperationKind, _payload: &JsonValue| {
                Err(Error::Remote {
                    status: 404,
                    message: format!("no scripted handler for {}", kind),
                })
            }),
            state: Arc::new(Mutex::new(ScriptState::default())),
            latency_ms: 0,
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Submission answering with a job handle.
    pub fn job(id: &str) -> Result<Submission> {
        Ok(Submission::Job(JobHandle::new(id)?))
    }

    /// Set the submit handler.
    pub fn on_submit<F>(mut self, handler: F) -> Self
    where
        F: Fn(OperationKind, &JsonValue) -> Result<Submission> + Send + Sync + 'static,
    {
        self.submit_handler = Arc::new(handler);
        self
    }

    /// Script the status responses of one job. The last entry repeats.
    pub fn with_status_script(self, job_id: impl Into<String>, script: Vec<Scripted>) -> Self {
        self.add_status_script(job_id, script);
        self
    }

    /// Script a job after construction (e.g. from inside a submit handler).
    pub fn add_status_script(&self, job_id: impl Into<String>, script: Vec<Scripted>) {
        self.state
            .lock()
            .unwrap()
            .statuses
            .insert(job_id.into(), script.into());
    }

    /// Set simulated latency for every call.
    pub fn with_latency_ms(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    /// Get all logged calls for assertion.
    pub fn calls(&self) -> Vec<MockCall> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Timestamps of every status check issued for a job.
    pub fn status_times(&self, job_id: &str) -> Vec<Instant> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                MockCall::Status { job_id: id, at } if id == job_id => Some(at),
                _ => None,
            })
            .collect()
    }

    /// Number of submissions of one operation kind.
    pub fn submit_count(&self, kind: OperationKind) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, MockCall::Submit { kind: k, .. } if *k == kind))
            .count()
    }

    /// Highest number of calls observed in flight at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn simulate_latency(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if self.latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.latency_ms)).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl RemoteService for ScriptedRemote {
    async fn submit(&self, kind: OperationKind, payload: JsonValue) -> Result<Submission> {
        self.state.lock().unwrap().calls.push(MockCall::Submit {
            kind,
            payload: payload.clone(),
            at: Instant::now(),
        });
        self.simulate_latency().await;
        (self.submit_handler)(kind, &payload)
    }

    async fn check_status(&self, job_id: &str) -> Result<StatusReport> {
        let next = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(MockCall::Status {
                job_id: job_id.to_string(),
                at: Instant::now(),
            });
            state.statuses.get_mut(job_id).map(|script| {
                if script.len() > 1 {
                    script.pop_front().unwrap_or_else(Scripted::running)
                } else {
                    script.front().cloned().unwrap_or_else(Scripted::running)
                }
            })
        };
        self.simulate_latency().await;

        match next {
            Some(scripted) => scripted.into_result(),
            None => Err(Error::Remote {
                status: 404,
                message: format!("unknown job {}", job_id),
            }),
        }
    }
}
