//! # proofly-http
//!
//! HTTP adapter and command-line client for the Proofly identity-graph
//! service.
//!
//! [`ProoflyHttpClient`] implements [`RemoteService`](proofly_core::RemoteService)
//! over the service's REST API: each operation is a `POST` to its path, job
//! status is `GET /jobs/{jobId}`, and the API key travels in `X-API-Key`.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use proofly_http::{HttpConfig, ProoflyHttpClient};
//! use proofly_jobs::{JobClient, JobClientConfig};
//!
//! let remote = ProoflyHttpClient::new(HttpConfig::from_env())?;
//! let client = JobClient::new(Arc::new(remote), JobClientConfig::from_env());
//! ```

pub mod client;
pub mod config;
pub mod logging;

pub use client::ProoflyHttpClient;
pub use config::HttpConfig;
