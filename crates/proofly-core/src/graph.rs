//! Canonical entities and the connection graph built from them.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Serialize;

/// Best-known value of an attribute together with its confidence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttributeValue {
    pub value: String,
    pub confidence: f64,
}

/// One real-world person, merged from every raw record that shares an
/// exact identifier with it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalEntity {
    pub canonical_id: String,
    /// Normalized raw identifiers referring to this entity. Never empty.
    pub alias_ids: BTreeSet<String>,
    pub attributes: BTreeMap<String, AttributeValue>,
    /// Set when merged aliases carry more than one numeric id.
    pub ambiguous: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub conflicting_ids: Vec<String>,
}

impl CanonicalEntity {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(|a| a.value.as_str())
    }
}

/// Undirected, confidence-weighted relationship between two nodes.
///
/// Endpoints are stored in lexicographic order so `(a, b)` and `(b, a)`
/// describe the same edge.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Edge {
    pub a: String,
    pub b: String,
    pub confidence: f64,
}

impl Edge {
    pub fn connects(&self, x: &str, y: &str) -> bool {
        (self.a == x && self.b == y) || (self.a == y && self.b == x)
    }
}

/// Nodes keyed by canonical id (insertion-ordered) plus a deduplicated
/// undirected edge set without self-loops.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConnectionGraph {
    nodes: Vec<CanonicalEntity>,
    #[serde(skip)]
    node_index: HashMap<String, usize>,
    edges: Vec<Edge>,
    #[serde(skip)]
    edge_index: HashMap<(String, String), usize>,
}

impl ConnectionGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node unless one with the same canonical id already exists.
    ///
    /// Returns `true` if the node was inserted.
    pub fn insert_node(&mut self, entity: CanonicalEntity) -> bool {
        if self.node_index.contains_key(&entity.canonical_id) {
            return false;
        }
        self.node_index
            .insert(entity.canonical_id.clone(), self.nodes.len());
        self.nodes.push(entity);
        true
    }

    /// Add an undirected edge between two existing nodes.
    ///
    /// Self-loops and edges to unknown nodes are rejected. A duplicate pair
    /// keeps the higher confidence. Returns `true` if the edge set changed.
    pub fn add_edge(&mut self, x: &str, y: &str, confidence: f64) -> bool {
        if x == y || !self.contains(x) || !self.contains(y) {
            return false;
        }
        let (a, b) = if x < y { (x, y) } else { (y, x) };
        let key = (a.to_string(), b.to_string());

        match self.edge_index.get(&key) {
            Some(&idx) => {
                let edge = &mut self.edges[idx];
                if confidence > edge.confidence {
                    edge.confidence = confidence;
                    true
                } else {
                    false
                }
            }
            None => {
                self.edge_index.insert(key, self.edges.len());
                self.edges.push(Edge {
                    a: a.to_string(),
                    b: b.to_string(),
                    confidence,
                });
                true
            }
        }
    }

    pub fn contains(&self, canonical_id: &str) -> bool {
        self.node_index.contains_key(canonical_id)
    }

    pub fn node(&self, canonical_id: &str) -> Option<&CanonicalEntity> {
        self.node_index.get(canonical_id).map(|&i| &self.nodes[i])
    }

    /// Nodes in order of first insertion.
    pub fn nodes(&self) -> &[CanonicalEntity] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn edge(&self, x: &str, y: &str) -> Option<&Edge> {
        let (a, b) = if x < y { (x, y) } else { (y, x) };
        self.edge_index
            .get(&(a.to_string(), b.to_string()))
            .map(|&i| &self.edges[i])
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }
}
