//! reqwest adapter for the Proofly REST service.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode, Url};
use serde_json::Value as JsonValue;
use tracing::{debug, info, instrument};

use proofly_core::{defaults, Error, OperationKind, RemoteService, Result, StatusReport, Submission};

use crate::config::HttpConfig;

/// HTTP implementation of [`RemoteService`].
pub struct ProoflyHttpClient {
    client: Client,
    config: HttpConfig,
}

impl ProoflyHttpClient {
    /// Create a new client with the given configuration.
    pub fn new(config: HttpConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        info!(
            base_url = %config.base_url,
            authenticated = config.api_key.is_some(),
            "Initializing Proofly HTTP client"
        );

        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::new(HttpConfig::from_env())
    }

    /// Get the current configuration.
    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.config.api_key {
            Some(ref key) => req.header(defaults::API_KEY_HEADER, key),
            None => req,
        }
    }

    /// `GET /jobs/{jobId}` URL, with the id escaped as one path segment.
    fn job_url(&self, job_id: &str) -> Result<Url> {
        let base = self.config.url("/jobs");
        let mut url = Url::parse(&base)
            .map_err(|e| Error::Config(format!("Invalid base URL {}: {}", base, e)))?;
        url.path_segments_mut()
            .map_err(|_| Error::Config(format!("Base URL {} cannot take a path", base)))?
            .push(job_id);
        Ok(url)
    }

    /// Read a JSON body, turning non-success statuses into classified errors.
    async fn read_json(response: Response) -> Result<JsonValue> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }

        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(JsonValue::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }
}

#[async_trait]
impl RemoteService for ProoflyHttpClient {
    #[instrument(skip(self, payload), fields(op = %kind))]
    async fn submit(&self, kind: OperationKind, payload: JsonValue) -> Result<Submission> {
        let start = Instant::now();
        let request = self
            .client
            .post(self.config.url(kind.path()))
            .json(&payload);

        let response = self.authorize(request).send().await?;
        let body = Self::read_json(response).await?;
        let submission = Submission::from_body(body)?;

        debug!(
            asynchronous = matches!(submission, Submission::Job(_)),
            duration_ms = start.elapsed().as_millis() as u64,
            "Submit complete"
        );
        Ok(submission)
    }

    #[instrument(skip(self))]
    async fn check_status(&self, job_id: &str) -> Result<StatusReport> {
        let request = self.client.get(self.job_url(job_id)?);
        let response = self.authorize(request).send().await?;
        let body = Self::read_json(response).await?;
        Ok(serde_json::from_value(body)?)
    }
}

/// Map a non-success response to an error, preferring the service's own
/// message (`error`, `message` or `detail`) over the raw body.
pub(crate) fn status_error(status: StatusCode, body: &str) -> Error {
    let message = serde_json::from_str::<JsonValue>(body)
        .ok()
        .and_then(|json| {
            ["error", "message", "detail"]
                .iter()
                .find_map(|key| json.get(*key).and_then(|v| v.as_str()).map(str::to_string))
        })
        .unwrap_or_else(|| {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                status
                    .canonical_reason()
                    .unwrap_or("no response body")
                    .to_string()
            } else {
                trimmed.to_string()
            }
        });

    if status == StatusCode::TOO_MANY_REQUESTS {
        Error::RateLimited(message)
    } else {
        Error::Remote {
            status: status.as_u16(),
            message,
        }
    }
}
