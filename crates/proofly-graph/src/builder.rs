//! Connection-graph builder.
//!
//! A build runs in three phases:
//! 1. one profile search per specification (bounded fan-out)
//! 2. entity resolution over every kept candidate
//! 3. friendship checks between entities with a Facebook-style id: one job
//!    per entity against every later one, so `n` entities need `n - 1` jobs
//!    (same bound)
//!
//! A failed search or friendship check is recorded and the build goes on;
//! only a build where every search fails is an error.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use proofly_core::{
    defaults, ConnectionGraph, Error, GlobalFilter, JobState, ProfileRecord, ProfileSpec, Result,
};
use proofly_jobs::JobClient;

use crate::resolver::{CandidateMatch, EntityResolver};

/// Configuration for graph builds.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphConfig {
    /// Lookups allowed in flight at once (per phase)
    pub max_concurrent: usize,
    /// Top-confidence candidates kept per specification
    pub candidates_per_spec: usize,
    /// Upper bound on specifications per build
    pub max_specs: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            max_concurrent: defaults::GRAPH_MAX_CONCURRENT,
            candidates_per_spec: defaults::GRAPH_CANDIDATES_PER_SPEC,
            max_specs: defaults::GRAPH_MAX_SPECS,
        }
    }
}

impl GraphConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `PROOFLY_GRAPH_MAX_CONCURRENT` | `5` |
    /// | `PROOFLY_GRAPH_CANDIDATES_PER_SPEC` | `1` |
    pub fn from_env() -> Self {
        let max_concurrent = std::env::var("PROOFLY_GRAPH_MAX_CONCURRENT")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults::GRAPH_MAX_CONCURRENT);
        let candidates_per_spec = std::env::var("PROOFLY_GRAPH_CANDIDATES_PER_SPEC")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults::GRAPH_CANDIDATES_PER_SPEC);

        Self::default()
            .with_max_concurrent(max_concurrent)
            .with_candidates_per_spec(candidates_per_spec)
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max.max(1);
        self
    }

    pub fn with_candidates_per_spec(mut self, count: usize) -> Self {
        self.candidates_per_spec = count.max(1);
        self
    }
}

/// A specification whose search did not succeed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecFailure {
    /// Position in the input list
    pub index: usize,
    pub name: String,
    pub state: JobState,
    pub detail: String,
}

/// A friendship check that did not succeed; the pair has no edge.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeFailure {
    pub a: String,
    pub b: String,
    pub state: JobState,
    pub detail: String,
}

/// Result of a graph build, including partial-failure annotations.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphBuild {
    pub build_id: Uuid,
    pub graph: ConnectionGraph,
    pub spec_failures: Vec<SpecFailure>,
    pub edge_failures: Vec<EdgeFailure>,
    pub candidate_matches: Vec<CandidateMatch>,
    /// Candidates that carried no usable identifier
    pub unresolved: usize,
}

impl GraphBuild {
    /// Some specification failed while others succeeded.
    pub fn is_partial(&self) -> bool {
        !self.spec_failures.is_empty()
    }
}

/// Builds connection graphs through a [`JobClient`].
#[derive(Clone)]
pub struct GraphBuilder {
    client: JobClient,
    config: GraphConfig,
    resolver: EntityResolver,
}

impl GraphBuilder {
    pub fn new(client: JobClient, config: GraphConfig) -> Self {
        Self {
            client,
            config,
            resolver: EntityResolver::new(),
        }
    }

    pub fn with_defaults(client: JobClient) -> Self {
        Self::new(client, GraphConfig::default())
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    /// Build a connection graph from profile specifications.
    ///
    /// `filter` fields override the matching fields of every specification.
    pub async fn build(
        &self,
        specs: &[ProfileSpec],
        filter: Option<&GlobalFilter>,
        cancel: &CancellationToken,
    ) -> Result<GraphBuild> {
        self.validate(specs)?;

        let build_id = Uuid::now_v7();
        let span = info_span!("graph_build", build_id = %build_id, specs = specs.len());
        self.run(build_id, specs, filter, cancel).instrument(span).await
    }

    fn validate(&self, specs: &[ProfileSpec]) -> Result<()> {
        if specs.is_empty() {
            return Err(Error::Validation(
                "at least one profile specification is required".into(),
            ));
        }
        if specs.len() > self.config.max_specs {
            return Err(Error::Validation(format!(
                "at most {} profile specifications are allowed, got {}",
                self.config.max_specs,
                specs.len()
            )));
        }
        for (index, spec) in specs.iter().enumerate() {
            spec.validate().map_err(|e| match e {
                Error::Validation(msg) => {
                    Error::Validation(format!("specification {}: {}", index, msg))
                }
                other => other,
            })?;
        }
        Ok(())
    }

    async fn run(
        &self,
        build_id: Uuid,
        specs: &[ProfileSpec],
        filter: Option<&GlobalFilter>,
        cancel: &CancellationToken,
    ) -> Result<GraphBuild> {
        let start = Instant::now();
        info!("Starting graph build");

        // Phase 1: searches
        let searches = specs
            .iter()
            .map(|spec| {
                let spec = filter.map_or_else(|| spec.clone(), |f| f.apply(spec));
                let client = self.client.clone();
                let cancel = cancel.clone();
                async move {
                    let outcome = client.search_profiles(&spec, &cancel).await;
                    (spec, outcome)
                }
            })
            .collect();
        let outcomes = bounded(self.config.max_concurrent, searches, cancel).await?;
        if cancel.is_cancelled() {
            return Err(cancelled());
        }

        let mut records: Vec<ProfileRecord> = Vec::new();
        let mut spec_failures = Vec::new();
        for (index, (spec, outcome)) in outcomes.into_iter().enumerate() {
            let result = match outcome {
                Ok(result) => result,
                Err(e) => {
                    spec_failures.push(SpecFailure {
                        index,
                        name: spec.name.clone(),
                        state: JobState::Failed,
                        detail: e.to_string(),
                    });
                    continue;
                }
            };
            let state = result.state();
            match result.into_result() {
                Ok(response) => {
                    let kept = top_candidates(
                        response.profiles,
                        self.config.candidates_per_spec,
                        &spec,
                    );
                    debug!(spec_index = index, candidates = kept.len(), "Search succeeded");
                    records.extend(kept);
                }
                Err(e) => {
                    warn!(spec_index = index, job_state = %state, error = %e, "Search failed, omitting specification");
                    spec_failures.push(SpecFailure {
                        index,
                        name: spec.name.clone(),
                        state,
                        detail: e.to_string(),
                    });
                }
            }
        }

        if spec_failures.len() == specs.len() {
            let details: Vec<String> = spec_failures
                .iter()
                .map(|f| format!("#{} {}: {}", f.index, f.name, f.detail))
                .collect();
            warn!(failures = spec_failures.len(), "Every search failed");
            return Err(Error::AllLookupsFailed(details.join("; ")));
        }

        // Phase 2: resolution
        let resolution = self.resolver.resolve(&records);
        let mut graph = ConnectionGraph::new();
        let mut facebook_ids = Vec::new();
        for (index, entity) in resolution.entities().iter().enumerate() {
            if resolution.is_facebook_style(index) {
                facebook_ids.push(entity.canonical_id.clone());
            }
            if !graph.insert_node(entity.clone()) {
                warn!(canonical_id = %entity.canonical_id, "Duplicate canonical id, entity dropped");
            }
        }

        // Phase 3: relationships. Each entity is checked against every
        // later one in a single job, which covers every unordered pair once.
        let batches: Vec<(String, Vec<String>)> = facebook_ids
            .iter()
            .enumerate()
            .filter(|(i, _)| i + 1 < facebook_ids.len())
            .map(|(i, target)| (target.clone(), facebook_ids[i + 1..].to_vec()))
            .collect();
        debug!(
            checks = batches.len(),
            pairs = batches.iter().map(|(_, others)| others.len()).sum::<usize>(),
            "Checking relationships"
        );

        let checks = batches
            .into_iter()
            .map(|(target, others)| {
                let client = self.client.clone();
                let cancel = cancel.clone();
                async move {
                    let outcome = client.check_friendships(&target, &others, &cancel).await;
                    (target, others, outcome)
                }
            })
            .collect();
        let outcomes = bounded(self.config.max_concurrent, checks, cancel).await?;
        if cancel.is_cancelled() {
            return Err(cancelled());
        }

        let mut edge_failures = Vec::new();
        for (a, others, outcome) in outcomes {
            let mut fail_all = |state: JobState, detail: String| {
                warn!(a = %a, candidates = others.len(), error = %detail, "Friendship check failed");
                edge_failures.extend(others.iter().map(|b| EdgeFailure {
                    a: a.clone(),
                    b: b.clone(),
                    state,
                    detail: detail.clone(),
                }));
            };
            let result = match outcome {
                Ok(result) => result,
                Err(e) => {
                    fail_all(JobState::Failed, e.to_string());
                    continue;
                }
            };
            let state = result.state();
            match result.into_result() {
                Ok(checks) => {
                    for (b, check) in others.iter().zip(&checks) {
                        if check.are_friends {
                            graph.add_edge(&a, b, check.confidence);
                        }
                    }
                }
                Err(e) => fail_all(state, e.to_string()),
            }
        }

        info!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            spec_failures = spec_failures.len(),
            edge_failures = edge_failures.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Graph build complete"
        );

        Ok(GraphBuild {
            build_id,
            graph,
            spec_failures,
            edge_failures,
            candidate_matches: resolution.candidate_matches().to_vec(),
            unresolved: resolution.unresolved(),
        })
    }
}

fn cancelled() -> Error {
    Error::Cancelled("graph build was cancelled".into())
}

/// Keep the `count` most confident candidates (stable for equal scores).
///
/// A candidate without any identifier inherits the specification's
/// profile id, if it has one.
fn top_candidates(
    mut profiles: Vec<ProfileRecord>,
    count: usize,
    spec: &ProfileSpec,
) -> Vec<ProfileRecord> {
    profiles.sort_by(|x, y| {
        let (cx, cy) = (x.confidence.unwrap_or(0.0), y.confidence.unwrap_or(0.0));
        cy.partial_cmp(&cx).unwrap_or(std::cmp::Ordering::Equal)
    });
    profiles.truncate(count);
    for profile in &mut profiles {
        let anonymous = profile.facebook_id.is_none()
            && profile.numeric_id.is_none()
            && profile.username.is_none()
            && profile.profile_url.is_none();
        if anonymous {
            profile.facebook_id = spec.profile_id.clone();
        }
    }
    profiles
}

/// Run `jobs` with at most `limit` in flight, starting them in order.
///
/// A slot is acquired before each job is spawned and released when it
/// settles, so queued jobs start first-submitted-first-started. Results come
/// back in input order.
async fn bounded<T, F>(limit: usize, jobs: Vec<F>, cancel: &CancellationToken) -> Result<Vec<T>>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let slots = Arc::new(Semaphore::new(limit.max(1)));
    let total = jobs.len();
    let mut tasks = JoinSet::new();

    for (index, job) in jobs.into_iter().enumerate() {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tasks.abort_all();
                return Err(cancelled());
            }
            permit = slots.clone().acquire_owned() => {
                permit.map_err(|_| Error::Internal("lookup slots closed".into()))?
            }
        };
        tasks.spawn(async move {
            let _permit = permit;
            (index, job.await)
        });
    }

    let mut results: Vec<Option<T>> = (0..total).map(|_| None).collect();
    while let Some(joined) = tasks.join_next().await {
        let (index, value) =
            joined.map_err(|e| Error::Internal(format!("lookup task panicked: {}", e)))?;
        results[index] = Some(value);
    }
    Ok(results.into_iter().flatten().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_graph_config_default() {
        let config = GraphConfig::default();
        assert_eq!(config.max_concurrent, 5);
        assert_eq!(config.candidates_per_spec, 1);
        assert_eq!(config.max_specs, 100);
    }

    #[test]
    fn test_graph_config_builder_clamps() {
        let config = GraphConfig::default()
            .with_max_concurrent(0)
            .with_candidates_per_spec(0);
        assert_eq!(config.max_concurrent, 1);
        assert_eq!(config.candidates_per_spec, 1);
    }

    #[test]
    fn test_top_candidates_by_confidence() {
        let profile = |user: &str, confidence: f64| ProfileRecord {
            username: Some(user.into()),
            confidence: Some(confidence),
            ..Default::default()
        };
        let kept = top_candidates(
            vec![profile("low", 0.2), profile("high", 0.9), profile("mid", 0.5)],
            2,
            &ProfileSpec::new("x"),
        );
        let names: Vec<_> = kept.iter().filter_map(|p| p.username.as_deref()).collect();
        assert_eq!(names, vec!["high", "mid"]);
    }

    #[test]
    fn test_top_candidates_inherit_spec_id() {
        let kept = top_candidates(
            vec![ProfileRecord {
                name: Some("John Doe".into()),
                ..Default::default()
            }],
            1,
            &ProfileSpec::new("John Doe").with_profile_id("john.smith"),
        );
        assert_eq!(kept[0].facebook_id.as_deref(), Some("john.smith"));
    }

    #[tokio::test]
    async fn test_bounded_preserves_input_order() {
        let jobs: Vec<_> = (0..10u64)
            .map(|i| async move {
                tokio::time::sleep(std::time::Duration::from_millis(10 - i)).await;
                i
            })
            .collect();
        let results = bounded(3, jobs, &CancellationToken::new()).await.unwrap();
        assert_eq!(results, (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_bounded_cancelled_before_start() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let jobs: Vec<_> = (0..3).map(|i| async move { i }).collect();
        let err = bounded(1, jobs, &cancel).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled(_)));
    }
}
