//! HTTP adapter tests against wiremock servers.

use std::sync::Arc;

use proofly_core::{Error, JobState, OperationKind, RemoteService, Submission};
use proofly_http::{HttpConfig, ProoflyHttpClient};
use proofly_jobs::{
    CancellationToken, JobClient, JobClientConfig, JobResult, PollConfig, ProfileSearchParams,
};
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> ProoflyHttpClient {
    let config = HttpConfig::default()
        .with_base_url(format!("{}/api", server.uri()))
        .with_api_key("test-key")
        .with_timeout(5);
    ProoflyHttpClient::new(config).expect("Failed to create client")
}

fn fast_poll() -> PollConfig {
    PollConfig::default()
        .with_initial_delay(10)
        .with_max_delay(20)
        .with_max_elapsed(5_000)
}

#[tokio::test]
async fn test_submit_direct_result_with_api_key() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/profiles/search"))
        .and(header("X-API-Key", "test-key"))
        .and(body_json(json!({"name": "John Doe"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "profiles": [{"username": "john.smith", "confidence": 0.8}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let submission = client
        .submit(OperationKind::SearchProfiles, json!({"name": "John Doe"}))
        .await
        .unwrap();

    match submission {
        Submission::Direct(body) => assert_eq!(body["profiles"][0]["username"], "john.smith"),
        other => panic!("expected direct result, got {:?}", other),
    }
}

#[tokio::test]
async fn test_submit_returning_job_id() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/find-mutual-friends"))
        .respond_with(
            ResponseTemplate::new(202).set_body_json(json!({"jobId": "job_123", "status": "queued"})),
        )
        .mount(&server)
        .await;

    let submission = client_for(&server)
        .submit(OperationKind::FindMutualFriends, json!({"userIds": ["a", "b"]}))
        .await
        .unwrap();

    match submission {
        Submission::Job(handle) => assert_eq!(handle.id(), "job_123"),
        other => panic!("expected job handle, got {:?}", other),
    }
}

#[tokio::test]
async fn test_check_status_accepts_service_state_names() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/jobs/job_123"))
        .and(header("X-API-Key", "test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jobId": "job_123",
            "status": "completed",
            "result": {"mutualFriends": ["c"]}
        })))
        .mount(&server)
        .await;

    let report = client_for(&server).check_status("job_123").await.unwrap();
    assert_eq!(report.state, JobState::Succeeded);
    assert_eq!(report.result.unwrap()["mutualFriends"][0], "c");
}

#[tokio::test]
async fn test_check_status_escapes_job_id() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/jobs/team%2Fjob%3F1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "running"})))
        .expect(1)
        .mount(&server)
        .await;

    let report = client_for(&server).check_status("team/job?1").await.unwrap();
    assert_eq!(report.state, JobState::Running);
}

#[tokio::test]
async fn test_error_statuses_are_classified() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/jobs/limited"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({"error": "slow down"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/jobs/broken"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/jobs/denied"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"message": "invalid api key"})))
        .mount(&server)
        .await;

    let client = client_for(&server);

    let err = client.check_status("limited").await.unwrap_err();
    assert!(matches!(err, Error::RateLimited(ref m) if m == "slow down"));
    assert!(err.is_transient());

    let err = client.check_status("broken").await.unwrap_err();
    assert!(matches!(err, Error::Remote { status: 503, .. }));
    assert!(err.is_transient());

    let err = client.check_status("denied").await.unwrap_err();
    assert_eq!(err.to_string(), "Remote error (401): invalid api key");
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_connection_failure_is_transport_error() {
    let config = HttpConfig::default()
        .with_base_url("http://127.0.0.1:9/api")
        .with_timeout(2);
    let client = ProoflyHttpClient::new(config).unwrap();

    let err = client.check_status("job_1").await.unwrap_err();
    assert!(matches!(err, Error::Transport(_)), "got {:?}", err);
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_job_client_polls_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/profiles/search"))
        .respond_with(ResponseTemplate::new(202).set_body_json(json!({"jobId": "job_9"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/jobs/job_9"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "processing"})))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/jobs/job_9"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/jobs/job_9"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "succeeded",
            "result": {"profiles": [{"id": "100004", "name": "John Doe"}]}
        })))
        .mount(&server)
        .await;

    let remote = Arc::new(client_for(&server));
    let client = JobClient::new(remote, JobClientConfig::default().with_poll(fast_poll()));

    let response = client
        .search_profiles(&ProfileSearchParams::new("John Doe"), &CancellationToken::new())
        .await
        .unwrap()
        .into_result()
        .unwrap();

    assert_eq!(response.profiles.len(), 1);
    assert_eq!(response.profiles[0].facebook_id.as_deref(), Some("100004"));
}

#[tokio::test]
async fn test_remote_job_failure_surfaces_detail() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/verify-profile-photo"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"job_id": "job_f"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/jobs/job_f"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "failed",
            "error": "photo could not be downloaded"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = JobClient::new(
        Arc::new(client_for(&server)),
        JobClientConfig::default().with_poll(fast_poll()),
    );
    let result: JobResult<serde_json::Value> = client
        .submit_and_await(
            OperationKind::VerifyProfilePhoto,
            json!({"photoUrl": "https://example.com/p.jpg", "profileUrl": "https://facebook.com/x"}),
            None,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(result.state(), JobState::Failed);
    assert_eq!(result.error_detail(), Some("photo could not be downloaded"));
}
