//! Core traits for Proofly abstractions.
//!
//! The remote service owns job execution; the client only observes it
//! through this capability interface, which keeps transports pluggable and
//! the orchestration layer testable without a network.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::error::Result;
use crate::models::{OperationKind, StatusReport, Submission};

/// Submit/poll contract of the remote identity-graph service.
#[async_trait]
pub trait RemoteService: Send + Sync {
    /// Submit an operation. Synchronous operations answer with a direct
    /// result, asynchronous ones with a job handle.
    async fn submit(&self, kind: OperationKind, payload: JsonValue) -> Result<Submission>;

    /// Report the current state of a submitted job.
    async fn check_status(&self, job_id: &str) -> Result<StatusReport>;
}

#[async_trait]
impl<T: RemoteService + ?Sized> RemoteService for Arc<T> {
    async fn submit(&self, kind: OperationKind, payload: JsonValue) -> Result<Submission> {
        (**self).submit(kind, payload).await
    }

    async fn check_status(&self, job_id: &str) -> Result<StatusReport> {
        (**self).check_status(job_id).await
    }
}
