//! # proofly-graph
//!
//! Entity resolution and connection-graph building for the Proofly
//! identity-graph client.
//!
//! This crate provides:
//! - Identifier normalization (numeric ids, usernames, profile URLs)
//! - A union-find based entity resolver that merges only on exact identifiers
//! - A graph builder fanning out searches and friendship checks through a
//!   [`JobClient`](proofly_jobs::JobClient) with bounded concurrency
//!
//! ## Example
//!
//! ```ignore
//! use proofly_graph::{GraphBuilder, GraphConfig};
//! use proofly_jobs::{CancellationToken, ProfileSpec};
//!
//! let builder = GraphBuilder::new(job_client, GraphConfig::from_env());
//! let specs = vec![
//!     ProfileSpec::new("John Doe").with_profile_id("john.smith"),
//!     ProfileSpec::new("Jane Roe").with_profile_id("jane.doe"),
//! ];
//!
//! let build = builder.build(&specs, None, &CancellationToken::new()).await?;
//! println!("{} nodes, {} edges", build.graph.node_count(), build.graph.edge_count());
//! ```

pub mod builder;
pub mod normalize;
pub mod resolver;
pub mod union_find;

pub use builder::{EdgeFailure, GraphBuild, GraphBuilder, GraphConfig, SpecFailure};
pub use normalize::{Identifier, IdentifierKind};
pub use resolver::{CandidateMatch, EntityResolver, MatchReason, Resolution};
pub use union_find::UnionFind;
