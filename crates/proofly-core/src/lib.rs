//! # proofly-core
//!
//! Core types, traits, and abstractions for the Proofly identity-graph client.
//!
//! This crate provides the job lifecycle model, the remote-service contract,
//! request/response payloads and the connection-graph data model that the
//! other proofly crates depend on.

pub mod defaults;
pub mod error;
pub mod graph;
pub mod models;
pub mod traits;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use graph::{AttributeValue, CanonicalEntity, ConnectionGraph, Edge};
pub use models::*;
pub use traits::*;
