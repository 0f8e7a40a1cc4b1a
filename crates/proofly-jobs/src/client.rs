//! Job client: one call shape for synchronous and asynchronous operations.
//!
//! `submit_and_await` submits an operation, and either wraps a direct result
//! as an immediately succeeded `JobResult` or hands the returned job handle
//! to the [`Poller`]. Callers never need to know which kind the remote used.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;
use tokio::sync::{broadcast, Semaphore};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use proofly_core::{
    defaults, CheckFriendsParams, Error, FriendCheck, FriendCheckResponse, JobHandle, JobResult,
    JobState, MutualFriendsParams, OperationKind, ProfileSearchParams, ProfileSearchResponse,
    RemoteService, Result, StatusReport, Submission, VerifyPhotoParams,
};

use crate::poller::{Backoff, PollConfig, Poller};

/// Configuration for the job client.
#[derive(Debug, Clone, PartialEq)]
pub struct JobClientConfig {
    /// Poll settings used when a call does not supply its own.
    pub poll: PollConfig,
    /// Remote calls allowed in flight at once across all callers.
    pub max_in_flight: usize,
}

impl Default for JobClientConfig {
    fn default() -> Self {
        Self {
            poll: PollConfig::default(),
            max_in_flight: defaults::CLIENT_MAX_IN_FLIGHT,
        }
    }
}

impl JobClientConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// Reads the `PROOFLY_POLL_*` variables (see [`PollConfig::from_env`])
    /// and `PROOFLY_MAX_IN_FLIGHT` (default `10`).
    pub fn from_env() -> Self {
        let max_in_flight = std::env::var("PROOFLY_MAX_IN_FLIGHT")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults::CLIENT_MAX_IN_FLIGHT)
            .max(1);

        Self {
            poll: PollConfig::from_env(),
            max_in_flight,
        }
    }

    pub fn with_poll(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    pub fn with_max_in_flight(mut self, max: usize) -> Self {
        self.max_in_flight = max.max(1);
        self
    }
}

/// Event emitted by the job client.
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    /// The remote accepted an asynchronous job.
    Submitted { kind: OperationKind, job_id: String },
    /// An operation finished successfully (`job_id` is `None` for direct results).
    Completed {
        kind: OperationKind,
        job_id: Option<String>,
    },
    /// An operation failed terminally.
    Failed {
        kind: OperationKind,
        job_id: Option<String>,
        error: String,
    },
    /// Polling exceeded its time budget.
    TimedOut { kind: OperationKind, job_id: String },
    /// The caller cancelled the operation.
    Cancelled {
        kind: OperationKind,
        job_id: Option<String>,
    },
}

/// Remote wrapper charging every call against the shared in-flight budget.
struct BudgetedRemote {
    inner: Arc<dyn RemoteService>,
    permits: Arc<Semaphore>,
}

#[async_trait]
impl RemoteService for BudgetedRemote {
    async fn submit(&self, kind: OperationKind, payload: JsonValue) -> Result<Submission> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| Error::Internal("request budget closed".into()))?;
        self.inner.submit(kind, payload).await
    }

    async fn check_status(&self, job_id: &str) -> Result<StatusReport> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| Error::Internal("request budget closed".into()))?;
        self.inner.check_status(job_id).await
    }
}

/// Facade over the remote service that always yields a terminal `JobResult`.
///
/// Cheap to clone; clones share the request budget and the event channel.
#[derive(Clone)]
pub struct JobClient {
    remote: Arc<BudgetedRemote>,
    config: JobClientConfig,
    event_tx: broadcast::Sender<JobEvent>,
}

impl JobClient {
    /// Create a new job client.
    pub fn new(remote: Arc<dyn RemoteService>, config: JobClientConfig) -> Self {
        let (event_tx, _) = broadcast::channel(defaults::EVENT_CHANNEL_CAPACITY);
        let permits = Arc::new(Semaphore::new(config.max_in_flight.max(1)));
        Self {
            remote: Arc::new(BudgetedRemote {
                inner: remote,
                permits,
            }),
            config,
            event_tx,
        }
    }

    /// Create with default configuration.
    pub fn with_defaults(remote: Arc<dyn RemoteService>) -> Self {
        Self::new(remote, JobClientConfig::default())
    }

    /// Get the current configuration.
    pub fn config(&self) -> &JobClientConfig {
        &self.config
    }

    /// Get a receiver for job events.
    pub fn events(&self) -> broadcast::Receiver<JobEvent> {
        self.event_tx.subscribe()
    }

    /// Submit an operation and wait for its terminal result.
    ///
    /// `Err` is reserved for validation failures (malformed payload or poll
    /// config); every remote outcome, including transport failures that
    /// outlive the retry budget, is reported through the `JobResult`.
    pub async fn submit_and_await<T: DeserializeOwned>(
        &self,
        kind: OperationKind,
        payload: JsonValue,
        config: Option<&PollConfig>,
        cancel: &CancellationToken,
    ) -> Result<JobResult<T>> {
        if !payload.is_object() {
            return Err(Error::Validation(format!(
                "payload for {} must be a JSON object",
                kind
            )));
        }
        let poll = config.unwrap_or(&self.config.poll);
        poll.validate()?;

        let raw = self.run(kind, payload, poll, cancel).await;
        Ok(raw.try_map(serde_json::from_value::<T>))
    }

    /// Drive an already submitted job (known only by its id) to completion.
    pub async fn await_job(
        &self,
        job_id: &str,
        config: Option<&PollConfig>,
        cancel: &CancellationToken,
    ) -> Result<JobResult<JsonValue>> {
        let handle = JobHandle::new(job_id)?;
        let poll = config.unwrap_or(&self.config.poll);
        poll.validate()?;
        Ok(Poller::new(poll.clone())
            .poll(self.remote.as_ref(), &handle, cancel)
            .await)
    }

    /// Single status check without polling.
    pub async fn job_status(&self, job_id: &str) -> Result<StatusReport> {
        JobHandle::new(job_id)?;
        self.remote.check_status(job_id).await
    }

    /// Profile search (`POST /profiles/search`).
    pub async fn search_profiles(
        &self,
        params: &ProfileSearchParams,
        cancel: &CancellationToken,
    ) -> Result<JobResult<ProfileSearchResponse>> {
        params.validate()?;
        self.submit_typed(OperationKind::SearchProfiles, params, cancel)
            .await
    }

    /// Relationship signal between two Facebook ids.
    ///
    /// A response that does not mention `other` is read as "not friends"
    /// with zero confidence.
    pub async fn check_friendship(
        &self,
        target: &str,
        other: &str,
        cancel: &CancellationToken,
    ) -> Result<JobResult<FriendCheck>> {
        let result = self
            .check_friendships(target, &[other.to_string()], cancel)
            .await?;
        Ok(result.map(|checks| {
            checks
                .into_iter()
                .next()
                .unwrap_or_else(|| not_friends(other))
        }))
    }

    /// Relationship signals between `target` and each of `others`, in one
    /// remote job.
    ///
    /// The checks come back in the order of `others`; a candidate the
    /// response does not mention is "not friends" with zero confidence.
    pub async fn check_friendships(
        &self,
        target: &str,
        others: &[String],
        cancel: &CancellationToken,
    ) -> Result<JobResult<Vec<FriendCheck>>> {
        let params = CheckFriendsParams {
            target_facebook_id: target.to_string(),
            candidate_ids: others.to_vec(),
        };
        params.validate()?;
        let result: JobResult<FriendCheckResponse> = self
            .submit_typed(OperationKind::CheckFacebookFriends, &params, cancel)
            .await?;

        Ok(result.map(|response| {
            others
                .iter()
                .map(|other| {
                    response
                        .for_candidate(other)
                        .cloned()
                        .unwrap_or_else(|| not_friends(other))
                })
                .collect()
        }))
    }

    /// `POST /check-facebook-friends` with the raw response.
    pub async fn check_friends(
        &self,
        params: &CheckFriendsParams,
        cancel: &CancellationToken,
    ) -> Result<JobResult<JsonValue>> {
        params.validate()?;
        self.submit_typed(OperationKind::CheckFacebookFriends, params, cancel)
            .await
    }

    /// `POST /find-mutual-friends` with the raw response.
    pub async fn find_mutual_friends(
        &self,
        params: &MutualFriendsParams,
        cancel: &CancellationToken,
    ) -> Result<JobResult<JsonValue>> {
        params.validate()?;
        self.submit_typed(OperationKind::FindMutualFriends, params, cancel)
            .await
    }

    /// `POST /verify-profile-photo` with the raw response.
    pub async fn verify_profile_photo(
        &self,
        params: &VerifyPhotoParams,
        cancel: &CancellationToken,
    ) -> Result<JobResult<JsonValue>> {
        params.validate()?;
        self.submit_typed(OperationKind::VerifyProfilePhoto, params, cancel)
            .await
    }

    async fn submit_typed<P: Serialize, T: DeserializeOwned>(
        &self,
        kind: OperationKind,
        params: &P,
        cancel: &CancellationToken,
    ) -> Result<JobResult<T>> {
        let payload = serde_json::to_value(params)?;
        self.submit_and_await(kind, payload, None, cancel).await
    }

    #[instrument(skip(self, payload, poll, cancel), fields(op = %kind))]
    async fn run(
        &self,
        kind: OperationKind,
        payload: JsonValue,
        poll: &PollConfig,
        cancel: &CancellationToken,
    ) -> JobResult<JsonValue> {
        let start = Instant::now();

        let handle = match self.submit_with_retry(kind, payload, poll, cancel).await {
            Ok(Submission::Job(handle)) => handle,
            Ok(Submission::Direct(value)) => {
                debug!("Operation answered directly");
                let _ = self.event_tx.send(JobEvent::Completed { kind, job_id: None });
                return JobResult::succeeded(value);
            }
            Err(result) => {
                self.emit_terminal(kind, None, &result);
                return result;
            }
        };

        info!(job_id = %handle.id(), "Job submitted, polling for completion");
        let _ = self.event_tx.send(JobEvent::Submitted {
            kind,
            job_id: handle.id().to_string(),
        });

        let result = Poller::new(poll.clone())
            .poll(self.remote.as_ref(), &handle, cancel)
            .await;

        info!(
            job_id = %handle.id(),
            job_state = %result.state(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Job finished"
        );
        self.emit_terminal(kind, Some(handle.id()), &result);
        result
    }

    /// Submit, retrying transient failures with the poll backoff.
    ///
    /// On failure returns the terminal `JobResult` to hand back to the caller.
    async fn submit_with_retry(
        &self,
        kind: OperationKind,
        payload: JsonValue,
        poll: &PollConfig,
        cancel: &CancellationToken,
    ) -> std::result::Result<Submission, JobResult<JsonValue>> {
        let mut backoff = Backoff::new(poll);
        let mut attempt: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(JobResult::cancelled(format!("{} was cancelled", kind)));
            }
            attempt += 1;

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(JobResult::cancelled(format!("{} was cancelled", kind)));
                }
                outcome = self.remote.submit(kind, payload.clone()) => outcome,
            };

            match outcome {
                Ok(submission) => return Ok(submission),
                Err(e) if e.is_transient() && attempt <= poll.max_transient_retries => {
                    let delay = backoff.next_delay();
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient submit failure, retrying"
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            return Err(JobResult::cancelled(format!("{} was cancelled", kind)));
                        }
                        _ = sleep(delay) => {}
                    }
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Submit failed");
                    return Err(JobResult::failed(format!(
                        "{} submission failed: {}",
                        kind, e
                    )));
                }
            }
        }
    }

    fn emit_terminal(&self, kind: OperationKind, job_id: Option<&str>, result: &JobResult<JsonValue>) {
        let job_id = job_id.map(str::to_string);
        let event = match result.state() {
            JobState::Succeeded => JobEvent::Completed { kind, job_id },
            JobState::TimedOut => JobEvent::TimedOut {
                kind,
                job_id: job_id.unwrap_or_default(),
            },
            JobState::Cancelled => JobEvent::Cancelled { kind, job_id },
            _ => JobEvent::Failed {
                kind,
                job_id,
                error: result.error_detail().unwrap_or_default().to_string(),
            },
        };
        // No subscribers is fine.
        let _ = self.event_tx.send(event);
    }
}

fn not_friends(candidate: &str) -> FriendCheck {
    FriendCheck {
        candidate_id: candidate.to_string(),
        are_friends: false,
        confidence: 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockCall, Scripted, ScriptedRemote};
    use serde_json::json;
    use std::time::Duration;

    fn client(remote: ScriptedRemote) -> JobClient {
        let config = JobClientConfig::default().with_poll(
            PollConfig::default()
                .with_initial_delay(100)
                .with_max_delay(1000)
                .with_max_elapsed(10_000),
        );
        JobClient::new(Arc::new(remote), config)
    }

    #[test]
    fn test_job_client_config_default() {
        let config = JobClientConfig::default();
        assert_eq!(config.poll, PollConfig::default());
        assert_eq!(config.max_in_flight, 10);
    }

    #[test]
    fn test_job_client_config_builder() {
        let config = JobClientConfig::default()
            .with_max_in_flight(0)
            .with_poll(PollConfig::default().with_initial_delay(5));
        assert_eq!(config.max_in_flight, 1);
        assert_eq!(config.poll.initial_delay_ms, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_direct_result_wrapped_as_succeeded() {
        let remote = ScriptedRemote::new().on_submit(|_, _| {
            Ok(Submission::Direct(json!({"profiles": [{"username": "john.smith"}]})))
        });
        let client = client(remote.clone());

        let result = client
            .search_profiles(&ProfileSearchParams::new("John Doe"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.state(), JobState::Succeeded);
        let response = result.value().unwrap();
        assert_eq!(response.profiles[0].username.as_deref(), Some("john.smith"));
        // Nothing to poll.
        assert!(remote
            .calls()
            .iter()
            .all(|c| matches!(c, MockCall::Submit { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_async_job_polled_to_completion() {
        let remote = ScriptedRemote::new()
            .on_submit(|_, _| ScriptedRemote::job("job_7"))
            .with_status_script(
                "job_7",
                vec![Scripted::queued(), Scripted::succeeded(json!(42))],
            );
        let client = client(remote.clone());

        let result: JobResult<u32> = client
            .submit_and_await(
                OperationKind::FetchPhotoTags,
                json!({"profileUrl": "https://facebook.com/john.doe"}),
                None,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(result.into_result().unwrap(), 42);
        assert_eq!(remote.status_times("job_7").len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_poll_config_overrides_default() {
        let remote = ScriptedRemote::new()
            .on_submit(|_, _| ScriptedRemote::job("job_8"))
            .with_status_script("job_8", vec![Scripted::running(), Scripted::succeeded(json!(1))]);
        let client = client(remote.clone());
        let poll = PollConfig::default().with_initial_delay(700).with_max_delay(700);

        let _: JobResult<u32> = client
            .submit_and_await(OperationKind::FetchPhotoTags, json!({}), Some(&poll), &CancellationToken::new())
            .await
            .unwrap();

        let times = remote.status_times("job_8");
        assert_eq!(times[1] - times[0], Duration::from_millis(700));
    }

    #[tokio::test]
    async fn test_validation_fails_fast() {
        let remote = ScriptedRemote::new();
        let client = client(remote.clone());
        let cancel = CancellationToken::new();

        let err = client
            .search_profiles(&ProfileSearchParams::new("  "), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let err = client
            .submit_and_await::<JsonValue>(OperationKind::SearchProfiles, json!([1, 2]), None, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let bad_poll = PollConfig::default().with_initial_delay(0);
        let err = client
            .submit_and_await::<JsonValue>(OperationKind::SearchProfiles, json!({}), Some(&bad_poll), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        assert!(remote.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_submit_retried() {
        let attempts = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = attempts.clone();
        let remote = ScriptedRemote::new().on_submit(move |_, _| {
            if counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst) < 2 {
                Err(Error::Transport("connection refused".into()))
            } else {
                Ok(Submission::Direct(json!({"ok": true})))
            }
        });
        let client = client(remote.clone());

        let result: JobResult<JsonValue> = client
            .submit_and_await(OperationKind::FindMutualFriends, json!({"userIds": ["a", "b"]}), None, &CancellationToken::new())
            .await
            .unwrap();

        assert!(result.is_success());
        assert_eq!(remote.submit_count(OperationKind::FindMutualFriends), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_transient_submit_failure_reported() {
        let remote = ScriptedRemote::new().on_submit(|_, _| {
            Err(Error::Remote {
                status: 401,
                message: "invalid api key".into(),
            })
        });
        let client = client(remote.clone());

        let result: JobResult<JsonValue> = client
            .submit_and_await(OperationKind::FindMutualFriends, json!({}), None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.state(), JobState::Failed);
        assert!(result.error_detail().unwrap().contains("invalid api key"));
        assert_eq!(remote.submit_count(OperationKind::FindMutualFriends), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_result_reported_as_failed() {
        let remote = ScriptedRemote::new()
            .on_submit(|_, _| Ok(Submission::Direct(json!({"profiles": "not a list"}))));
        let client = client(remote);

        let result = client
            .search_profiles(&ProfileSearchParams::new("John Doe"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.state(), JobState::Failed);
        assert!(result.error_detail().unwrap().contains("malformed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_friendship_extracts_candidate() {
        let remote = ScriptedRemote::new().on_submit(|kind, payload| {
            assert_eq!(kind, OperationKind::CheckFacebookFriends);
            assert_eq!(payload["targetFacebookId"], "john.smith");
            assert_eq!(payload["candidateIds"], json!(["jane.doe"]));
            Ok(Submission::Direct(json!({
                "targetFacebookId": "john.smith",
                "results": [{"candidateId": "jane.doe", "areFriends": true, "confidence": 0.9}]
            })))
        });
        let client = client(remote);

        let check = client
            .check_friendship("john.smith", "jane.doe", &CancellationToken::new())
            .await
            .unwrap()
            .into_result()
            .unwrap();
        assert!(check.are_friends);
        assert_eq!(check.confidence, 0.9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_friendship_missing_candidate_is_not_friends() {
        let remote = ScriptedRemote::new()
            .on_submit(|_, _| Ok(Submission::Direct(json!({"results": []}))));
        let client = client(remote);

        let check = client
            .check_friendship("john.smith", "jane.doe", &CancellationToken::new())
            .await
            .unwrap()
            .into_result()
            .unwrap();
        assert!(!check.are_friends);
        assert_eq!(check.confidence, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_friendships_batches_candidates_in_order() {
        let remote = ScriptedRemote::new().on_submit(|_, payload| {
            assert_eq!(payload["candidateIds"], json!(["a.b", "c.d", "e.f"]));
            Ok(Submission::Direct(json!({
                "results": [
                    {"candidateId": "e.f", "areFriends": true, "confidence": 0.7},
                    {"candidateId": "A.B", "areFriends": false, "confidence": 0.1}
                ]
            })))
        });
        let client = client(remote.clone());
        let others = vec!["a.b".to_string(), "c.d".to_string(), "e.f".to_string()];

        let checks = client
            .check_friendships("john.smith", &others, &CancellationToken::new())
            .await
            .unwrap()
            .into_result()
            .unwrap();

        let summary: Vec<(bool, f64)> = checks.iter().map(|c| (c.are_friends, c.confidence)).collect();
        assert_eq!(summary, vec![(false, 0.1), (false, 0.0), (true, 0.7)]);
        assert_eq!(checks[1].candidate_id, "c.d");
        assert_eq!(remote.submit_count(OperationKind::CheckFacebookFriends), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_broadcast() {
        let remote = ScriptedRemote::new()
            .on_submit(|_, _| ScriptedRemote::job("job_e"))
            .with_status_script("job_e", vec![Scripted::failed("no such profile")]);
        let client = client(remote);
        let mut events = client.events();

        let _: JobResult<JsonValue> = client
            .submit_and_await(OperationKind::SearchProfiles, json!({"name": "x"}), None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            events.recv().await.unwrap(),
            JobEvent::Submitted {
                kind: OperationKind::SearchProfiles,
                job_id: "job_e".into()
            }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            JobEvent::Failed {
                kind: OperationKind::SearchProfiles,
                job_id: Some("job_e".into()),
                error: "no such profile".into()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_calls_share_request_budget() {
        let remote = ScriptedRemote::new()
            .on_submit(|_, _| Ok(Submission::Direct(json!({}))))
            .with_latency_ms(100);
        let client = JobClient::new(
            Arc::new(remote.clone()),
            JobClientConfig::default().with_max_in_flight(2),
        );

        let cancel = CancellationToken::new();
        let calls = (0..6).map(|i| {
            let client = client.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                client
                    .submit_and_await::<JsonValue>(
                        OperationKind::FindMutualFriends,
                        json!({"userIds": [format!("user{}", i)]}),
                        None,
                        &cancel,
                    )
                    .await
            })
        });
        for call in calls.collect::<Vec<_>>() {
            assert!(call.await.unwrap().unwrap().is_success());
        }
        assert_eq!(remote.max_in_flight(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_polling() {
        let remote = ScriptedRemote::new()
            .on_submit(|_, _| ScriptedRemote::job("job_c"))
            .with_status_script("job_c", vec![Scripted::running()]);
        let client = client(remote);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(250)).await;
            trigger.cancel();
        });

        let result: JobResult<JsonValue> = client
            .submit_and_await(OperationKind::SearchProfiles, json!({"name": "x"}), None, &cancel)
            .await
            .unwrap();
        assert_eq!(result.state(), JobState::Cancelled);
        assert!(matches!(result.into_result(), Err(Error::Cancelled(_))));
    }
}
