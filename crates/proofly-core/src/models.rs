//! Job lifecycle types and remote request/response payloads.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{Error, Result};

// =============================================================================
// JOB LIFECYCLE
// =============================================================================

/// State of a remote job as reported by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    #[serde(alias = "pending")]
    Queued,
    #[serde(alias = "processing", alias = "in_progress")]
    Running,
    #[serde(alias = "completed", alias = "success")]
    Succeeded,
    #[serde(alias = "error")]
    Failed,
    #[serde(alias = "timedOut", alias = "timeout")]
    TimedOut,
    #[serde(alias = "canceled")]
    Cancelled,
}

impl JobState {
    /// Terminal states end polling; no status check follows them.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobState::Queued | JobState::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
            JobState::TimedOut => "timed_out",
            JobState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one unit of remote work. Read-only once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobHandle {
    id: String,
    submitted_at: DateTime<Utc>,
}

impl JobHandle {
    /// Create a handle for a freshly submitted job.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(Error::Validation("job id must not be empty".into()));
        }
        Ok(Self {
            id,
            submitted_at: Utc::now(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn submitted_at(&self) -> DateTime<Utc> {
        self.submitted_at
    }
}

/// One status-check response: `{ jobId?, status, result?, error? }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    #[serde(rename = "status", alias = "state")]
    pub state: JobState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatusReport {
    pub fn queued() -> Self {
        Self::with_state(JobState::Queued)
    }

    pub fn running() -> Self {
        Self::with_state(JobState::Running)
    }

    pub fn succeeded(result: JsonValue) -> Self {
        Self {
            state: JobState::Succeeded,
            result: Some(result),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            state: JobState::Failed,
            result: None,
            error: Some(error.into()),
        }
    }

    pub fn with_state(state: JobState) -> Self {
        Self {
            state,
            result: None,
            error: None,
        }
    }
}

/// Outcome of a submit call: either a job to poll or a direct result.
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    Job(JobHandle),
    Direct(JsonValue),
}

impl Submission {
    /// Classify a submit response body.
    ///
    /// A JSON object carrying a string `jobId` (or `job_id`) is an
    /// asynchronous job; any other body is the operation's direct result.
    pub fn from_body(body: JsonValue) -> Result<Self> {
        let job_id = body
            .as_object()
            .and_then(|obj| obj.get("jobId").or_else(|| obj.get("job_id")))
            .and_then(|v| v.as_str())
            .map(str::to_string);

        match job_id {
            Some(id) => Ok(Submission::Job(JobHandle::new(id)?)),
            None => Ok(Submission::Direct(body)),
        }
    }
}

/// Terminal result of a job.
///
/// Exactly one of `value` / `error_detail` is present: `value` iff the state
/// is `Succeeded`. The constructors are the only way to build one.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResult<T> {
    state: JobState,
    value: Option<T>,
    error_detail: Option<String>,
}

impl<T> JobResult<T> {
    pub fn succeeded(value: T) -> Self {
        Self {
            state: JobState::Succeeded,
            value: Some(value),
            error_detail: None,
        }
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self::terminal_error(JobState::Failed, detail)
    }

    pub fn timed_out(detail: impl Into<String>) -> Self {
        Self::terminal_error(JobState::TimedOut, detail)
    }

    pub fn cancelled(detail: impl Into<String>) -> Self {
        Self::terminal_error(JobState::Cancelled, detail)
    }

    fn terminal_error(state: JobState, detail: impl Into<String>) -> Self {
        Self {
            state,
            value: None,
            error_detail: Some(detail.into()),
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn is_success(&self) -> bool {
        self.state == JobState::Succeeded
    }

    pub fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }

    pub fn error_detail(&self) -> Option<&str> {
        self.error_detail.as_deref()
    }

    /// Transform the success value, keeping failures untouched.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> JobResult<U> {
        JobResult {
            state: self.state,
            value: self.value.map(f),
            error_detail: self.error_detail,
        }
    }

    /// Fallible transform of the success value; a conversion error turns
    /// the result into `Failed` with the error as detail.
    pub fn try_map<U, E: fmt::Display>(
        self,
        f: impl FnOnce(T) -> std::result::Result<U, E>,
    ) -> JobResult<U> {
        match self.value {
            Some(value) => match f(value) {
                Ok(mapped) => JobResult::succeeded(mapped),
                Err(e) => JobResult::failed(format!("malformed job result: {}", e)),
            },
            None => JobResult {
                state: self.state,
                value: None,
                error_detail: self.error_detail,
            },
        }
    }

    /// Convert into a `Result` carrying a classified error.
    pub fn into_result(self) -> Result<T> {
        let detail = self.error_detail.unwrap_or_default();
        match (self.state, self.value) {
            (JobState::Succeeded, Some(value)) => Ok(value),
            (JobState::TimedOut, _) => Err(Error::JobTimedOut(detail)),
            (JobState::Cancelled, _) => Err(Error::Cancelled(detail)),
            (state, _) => Err(Error::JobFailed(if detail.is_empty() {
                format!("job ended in state {}", state)
            } else {
                detail
            })),
        }
    }
}

// =============================================================================
// OPERATIONS
// =============================================================================

/// Remote operations reachable through `submit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    CheckFacebookFriends,
    FindMutualFriends,
    SearchProfiles,
    VerifyProfilePhoto,
    GetFacebookFriends,
    SearchByLocationOccupation,
    FetchProfileInteractions,
    FetchPhotoTags,
}

impl OperationKind {
    /// REST path of the operation, relative to the service base URL.
    pub fn path(&self) -> &'static str {
        match self {
            OperationKind::CheckFacebookFriends => "/check-facebook-friends",
            OperationKind::FindMutualFriends => "/find-mutual-friends",
            OperationKind::SearchProfiles => "/profiles/search",
            OperationKind::VerifyProfilePhoto => "/verify-profile-photo",
            OperationKind::GetFacebookFriends => "/get-facebook-friends",
            OperationKind::SearchByLocationOccupation => "/search-by-location-occupation",
            OperationKind::FetchProfileInteractions => "/profile-interactions",
            OperationKind::FetchPhotoTags => "/photo-tags",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::CheckFacebookFriends => "check_facebook_friends",
            OperationKind::FindMutualFriends => "find_mutual_friends",
            OperationKind::SearchProfiles => "search_profiles",
            OperationKind::VerifyProfilePhoto => "verify_profile_photo",
            OperationKind::GetFacebookFriends => "get_facebook_friends",
            OperationKind::SearchByLocationOccupation => "search_by_location_occupation",
            OperationKind::FetchProfileInteractions => "fetch_profile_interactions",
            OperationKind::FetchPhotoTags => "fetch_photo_tags",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// REQUEST PAYLOADS
// =============================================================================

fn require_non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::Validation(format!("{} is required", field)));
    }
    Ok(())
}

fn require_ids(field: &str, ids: &[String]) -> Result<()> {
    if ids.is_empty() {
        return Err(Error::Validation(format!("{} must not be empty", field)));
    }
    if ids.iter().any(|id| id.trim().is_empty()) {
        return Err(Error::Validation(format!(
            "{} must not contain empty ids",
            field
        )));
    }
    Ok(())
}

/// `POST /check-facebook-friends`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckFriendsParams {
    pub target_facebook_id: String,
    pub candidate_ids: Vec<String>,
}

impl CheckFriendsParams {
    pub fn validate(&self) -> Result<()> {
        require_non_empty("targetFacebookId", &self.target_facebook_id)?;
        require_ids("candidateIds", &self.candidate_ids)
    }
}

/// `POST /find-mutual-friends`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutualFriendsParams {
    pub user_ids: Vec<String>,
}

impl MutualFriendsParams {
    pub fn validate(&self) -> Result<()> {
        require_ids("userIds", &self.user_ids)
    }
}

/// Which location a profile search matches against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubCategory {
    Hometown,
    Current,
}

impl std::str::FromStr for SubCategory {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "hometown" => Ok(SubCategory::Hometown),
            "current" => Ok(SubCategory::Current),
            other => Err(Error::Validation(format!(
                "subCategory must be 'hometown' or 'current', got '{}'",
                other
            ))),
        }
    }
}

/// `POST /profiles/search`; also the per-profile specification of a graph build.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileSearchParams {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "id")]
    pub profile_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub birth_year: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_of_birth: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_category: Option<SubCategory>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub known_associates: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_instructions: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_confidence_score: Option<f64>,
}

/// Profile specification consumed by the graph builder.
pub type ProfileSpec = ProfileSearchParams;

impl ProfileSearchParams {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_profile_id(mut self, id: impl Into<String>) -> Self {
        self.profile_id = Some(id.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        require_non_empty("name", &self.name)?;
        if let Some(score) = self.min_confidence_score {
            if !(0.0..=1.0).contains(&score) {
                return Err(Error::Validation(format!(
                    "minConfidenceScore must be within [0, 1], got {}",
                    score
                )));
            }
        }
        Ok(())
    }
}

/// Filter applied to every specification of a graph build.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_category: Option<SubCategory>,
}

impl GlobalFilter {
    /// Apply the filter, overriding the matching specification fields.
    pub fn apply(&self, spec: &ProfileSpec) -> ProfileSpec {
        let mut spec = spec.clone();
        if let Some(ref location) = self.location {
            spec.location = Some(location.clone());
        }
        if let Some(sub_category) = self.sub_category {
            spec.sub_category = Some(sub_category);
        }
        spec
    }
}

/// `POST /verify-profile-photo`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyPhotoParams {
    pub photo_url: String,
    pub profile_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_instructions: Option<String>,
}

impl VerifyPhotoParams {
    pub fn validate(&self) -> Result<()> {
        require_non_empty("photoUrl", &self.photo_url)?;
        require_non_empty("profileUrl", &self.profile_url)
    }
}

// =============================================================================
// RESPONSE PAYLOADS
// =============================================================================

/// A candidate profile returned by a search.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileRecord {
    /// Facebook id as given by the service: a username or a numeric id.
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "id")]
    pub facebook_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub numeric_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "url")]
    pub profile_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Match confidence reported by the service.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        alias = "confidenceScore",
        alias = "matchConfidence"
    )]
    pub confidence: Option<f64>,
    /// Any further string attributes (workplace, hometown, ...).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

/// Response of `POST /profiles/search`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileSearchResponse {
    #[serde(default, alias = "results")]
    pub profiles: Vec<ProfileRecord>,
}

/// Relationship signal for one candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendCheck {
    pub candidate_id: String,
    pub are_friends: bool,
    #[serde(default)]
    pub confidence: f64,
}

/// Response of `POST /check-facebook-friends`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendCheckResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_facebook_id: Option<String>,
    #[serde(default)]
    pub results: Vec<FriendCheck>,
}

impl FriendCheckResponse {
    /// Relationship signal for one candidate, if the service reported it.
    pub fn for_candidate(&self, candidate_id: &str) -> Option<&FriendCheck> {
        self.results
            .iter()
            .find(|check| check.candidate_id.eq_ignore_ascii_case(candidate_id))
    }
}
