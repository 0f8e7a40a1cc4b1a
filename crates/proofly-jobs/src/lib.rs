//! # proofly-jobs
//!
//! Async job driver for the Proofly identity-graph client.
//!
//! This crate provides:
//! - Exponential-backoff polling of remote jobs until a terminal state
//! - A job client giving synchronous and asynchronous operations one call shape
//! - A shared in-flight request budget and cooperative cancellation
//! - Lifecycle notifications via broadcast channels
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use proofly_jobs::{JobClient, JobClientConfig, ProfileSearchParams};
//! use tokio_util::sync::CancellationToken;
//!
//! let client = JobClient::new(Arc::new(remote), JobClientConfig::from_env());
//! let cancel = CancellationToken::new();
//!
//! let mut events = client.events();
//! let result = client
//!     .search_profiles(&ProfileSearchParams::new("John Doe"), &cancel)
//!     .await?;
//!
//! match result.into_result() {
//!     Ok(response) => println!("{} candidates", response.profiles.len()),
//!     Err(e) => eprintln!("search did not succeed: {}", e),
//! }
//! ```

pub mod client;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod poller;

// Re-export core types
pub use proofly_core::*;

pub use client::{JobClient, JobClientConfig, JobEvent};
pub use poller::{Backoff, PollConfig, Poller};

// Cancellation is part of every public async signature.
pub use tokio_util::sync::CancellationToken;
