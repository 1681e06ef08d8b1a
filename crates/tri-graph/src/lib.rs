// SPDX-License-Identifier: MIT OR Apache-2.0
//! The graph-store contract consumed by the graph builder: `MERGE`-style
//! upsert by a unique property, executed in transactional batches, plus
//! an in-memory implementation for tests and for running the pipeline
//! without a live graph database.
#![warn(missing_docs)]

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use tri_core::{RelationshipType, TriError};

/// Errors a [`GraphStore`] may return.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// The graph backend did not respond within its command timeout.
    #[error("graph command timed out")]
    Timeout,
    /// A batch transaction failed and was rolled back.
    #[error("batch failed: {reason}")]
    BatchFailed {
        /// Why the batch failed.
        reason: String,
    },
}

impl From<GraphError> for TriError {
    fn from(e: GraphError) -> Self {
        TriError::TransientExternal {
            code: tri_core::ErrorCode::GraphTimeout,
            message: e.to_string(),
            attempt: 1,
        }
    }
}

/// A node to `MERGE` by its stable POI id.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphNode {
    pub id: String,
    pub kind: String,
    pub properties: serde_json::Map<String, Value>,
}

/// An edge to `MERGE` by relationship hash.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphEdge {
    pub relationship_hash: String,
    pub source_id: String,
    pub target_id: String,
    pub rel_type: RelationshipType,
    pub final_confidence: f64,
    pub evidence_count: u32,
    pub run_id: String,
}

/// The graph-store contract. `merge_batch` is the only write path:
/// every batch is one transaction, and `MERGE` semantics by stable id
/// (nodes) and by relationship hash (edges) make re-running the same
/// batch a no-op (§4.6 "idempotence").
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Upserts `nodes` and `edges` in a single transaction. On create,
    /// all properties are set; on match, the mutable subset is updated.
    /// A failure rolls back the whole batch (nothing partially applied).
    async fn merge_batch(&self, nodes: &[GraphNode], edges: &[GraphEdge]) -> Result<(), GraphError>;

    /// Deletes a node and every edge touching it (Sweep's graph-side
    /// write, always performed before the corresponding relational row
    /// is deleted).
    async fn delete_node(&self, id: &str) -> Result<(), GraphError>;

    /// Total node count (`MATCH (n) RETURN count(n)` in the contract's terms).
    async fn node_count(&self) -> Result<usize, GraphError>;

    /// Total edge count.
    async fn edge_count(&self) -> Result<usize, GraphError>;

    /// Reads one node by id, for assertions and debugging.
    async fn get_node(&self, id: &str) -> Result<Option<GraphNode>, GraphError>;

    /// Reads one edge by relationship hash.
    async fn get_edge(&self, hash: &str) -> Result<Option<GraphEdge>, GraphError>;
}

#[derive(Default)]
struct State {
    nodes: HashMap<String, GraphNode>,
    edges: HashMap<String, GraphEdge>,
}

/// In-memory [`GraphStore`]. A batch is applied entirely under one
/// mutex acquisition, which is what makes it transactional here.
#[derive(Default)]
pub struct InMemoryGraph {
    state: Mutex<State>,
}

impl InMemoryGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GraphStore for InMemoryGraph {
    async fn merge_batch(&self, nodes: &[GraphNode], edges: &[GraphEdge]) -> Result<(), GraphError> {
        let mut state = self.state.lock().unwrap();
        for node in nodes {
            state.nodes.insert(node.id.clone(), node.clone());
        }
        for edge in edges {
            state.edges.insert(edge.relationship_hash.clone(), edge.clone());
        }
        Ok(())
    }

    async fn delete_node(&self, id: &str) -> Result<(), GraphError> {
        let mut state = self.state.lock().unwrap();
        state.nodes.remove(id);
        state.edges.retain(|_, e| e.source_id != id && e.target_id != id);
        Ok(())
    }

    async fn node_count(&self) -> Result<usize, GraphError> {
        Ok(self.state.lock().unwrap().nodes.len())
    }

    async fn edge_count(&self) -> Result<usize, GraphError> {
        Ok(self.state.lock().unwrap().edges.len())
    }

    async fn get_node(&self, id: &str) -> Result<Option<GraphNode>, GraphError> {
        Ok(self.state.lock().unwrap().nodes.get(id).cloned())
    }

    async fn get_edge(&self, hash: &str) -> Result<Option<GraphEdge>, GraphError> {
        Ok(self.state.lock().unwrap().edges.get(hash).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_node(id: &str) -> GraphNode {
        GraphNode {
            id: id.to_string(),
            kind: "function".into(),
            properties: serde_json::Map::new(),
        }
    }

    fn sample_edge(hash: &str, source: &str, target: &str) -> GraphEdge {
        GraphEdge {
            relationship_hash: hash.to_string(),
            source_id: source.to_string(),
            target_id: target.to_string(),
            rel_type: RelationshipType::Calls,
            final_confidence: 0.9,
            evidence_count: 2,
            run_id: "run-1".to_string(),
        }
    }

    #[tokio::test]
    async fn merge_batch_is_idempotent() {
        let graph = InMemoryGraph::new();
        let nodes = vec![sample_node("fn:foo@a.js:1"), sample_node("fn:bar@b.js:1")];
        let edges = vec![sample_edge("hash-a", "fn:foo@a.js:1", "fn:bar@b.js:1")];
        graph.merge_batch(&nodes, &edges).await.unwrap();
        graph.merge_batch(&nodes, &edges).await.unwrap();
        assert_eq!(graph.node_count().await.unwrap(), 2);
        assert_eq!(graph.edge_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn delete_node_removes_incident_edges() {
        let graph = InMemoryGraph::new();
        let nodes = vec![sample_node("fn:foo@a.js:1"), sample_node("fn:bar@b.js:1")];
        let edges = vec![sample_edge("hash-a", "fn:foo@a.js:1", "fn:bar@b.js:1")];
        graph.merge_batch(&nodes, &edges).await.unwrap();
        graph.delete_node("fn:bar@b.js:1").await.unwrap();
        assert_eq!(graph.node_count().await.unwrap(), 1);
        assert_eq!(graph.edge_count().await.unwrap(), 0, "edge touching the deleted node must go too");
    }

    #[tokio::test]
    async fn merge_updates_properties_on_match() {
        let graph = InMemoryGraph::new();
        let mut node = sample_node("fn:foo@a.js:1");
        graph.merge_batch(&[node.clone()], &[]).await.unwrap();
        node.kind = "class".into();
        graph.merge_batch(&[node], &[]).await.unwrap();
        let fetched = graph.get_node("fn:foo@a.js:1").await.unwrap().unwrap();
        assert_eq!(fetched.kind, "class");
    }
}
