//! Graph builder (§4.6): streams VALIDATED rows for a run and merges
//! them into the graph store in batches. Gated at the queue layer by
//! the finalizer job's parent/child dependencies — by the time this
//! runs, every analysis and reconcile job for the run has completed.

use std::sync::Arc;

use tri_core::{ReconciliationStatus, TriError};
use tri_graph::{GraphEdge, GraphNode, GraphStore};
use tri_store::RelationalStore;

/// Builds the graph for one run, batched at `batch_size` rows per
/// transaction (`tri-config`'s `ingest_batch_size`).
pub struct GraphBuilder {
    store: Arc<RelationalStore>,
    graph: Arc<dyn GraphStore>,
    batch_size: usize,
}

impl GraphBuilder {
    #[must_use]
    pub fn new(store: Arc<RelationalStore>, graph: Arc<dyn GraphStore>, batch_size: u32) -> Self {
        Self {
            store,
            graph,
            batch_size: batch_size.max(1) as usize,
        }
    }

    /// Runs the full build for `run_id`. Re-running on the same
    /// VALIDATED rows is a no-op by `MERGE` idempotence (§4.6).
    pub async fn build(&self, run_id: &str) -> Result<(), TriError> {
        let rows = self.store.validated_relationships_for_run(run_id).map_err(TriError::from)?;
        let validated: Vec<_> = rows.into_iter().filter(|r| r.status == ReconciliationStatus::Validated).collect();

        for batch in validated.chunks(self.batch_size) {
            let mut nodes = Vec::new();
            let mut edges = Vec::new();
            let mut seen_nodes = std::collections::HashSet::new();

            for row in batch {
                for id in [&row.source_poi_id, &row.target_poi_id] {
                    if seen_nodes.insert(id.clone()) {
                        nodes.push(self.node_for_poi(id)?);
                    }
                }
                edges.push(GraphEdge {
                    relationship_hash: row.relationship_hash.clone(),
                    source_id: row.source_poi_id.clone(),
                    target_id: row.target_poi_id.clone(),
                    rel_type: row.rel_type,
                    final_confidence: row.final_confidence,
                    evidence_count: row.evidence_count,
                    run_id: row.run_id.clone(),
                });
            }

            self.graph.merge_batch(&nodes, &edges).await.map_err(TriError::from)?;
        }
        Ok(())
    }

    /// Builds a [`GraphNode`] for `poi_id`, setting every property the
    /// store knows (§4.6 "on create set all properties"). Falls back to
    /// a bare node with no properties if the POI row is missing — an
    /// analysis worker may have been retried away before it could
    /// persist the POI, and the edge itself still belongs in the graph.
    fn node_for_poi(&self, poi_id: &str) -> Result<GraphNode, TriError> {
        let poi = self.store.get_poi(poi_id).map_err(TriError::from)?;
        let (kind, properties) = match poi {
            Some(poi) => {
                let mut properties = serde_json::Map::new();
                properties.insert("name".to_string(), serde_json::Value::String(poi.name));
                properties.insert("file_path".to_string(), serde_json::Value::String(poi.file_path));
                if let Some(line) = poi.start_line {
                    properties.insert("start_line".to_string(), serde_json::json!(line));
                }
                if let Some(line) = poi.end_line {
                    properties.insert("end_line".to_string(), serde_json::json!(line));
                }
                (poi.kind, properties)
            }
            None => ("poi".to_string(), serde_json::Map::new()),
        };
        Ok(GraphNode { id: poi_id.to_string(), kind, properties })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tri_core::{RelationshipType, ValidatedRelationship};
    use tri_graph::InMemoryGraph;

    fn validated(hash: &str, status: ReconciliationStatus) -> ValidatedRelationship {
        ValidatedRelationship {
            relationship_hash: hash.to_string(),
            run_id: "run-1".to_string(),
            source_poi_id: format!("fn:foo@{hash}.js:1"),
            target_poi_id: format!("fn:bar@{hash}.js:1"),
            rel_type: RelationshipType::Calls,
            final_confidence: 0.9,
            evidence_count: 2,
            status,
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn build_merges_only_validated_rows() {
        let store = Arc::new(RelationalStore::open_in_memory().unwrap());
        store.upsert_validated_relationship(&validated("hash-a", ReconciliationStatus::Validated)).unwrap();
        store.upsert_validated_relationship(&validated("hash-b", ReconciliationStatus::Rejected)).unwrap();
        let graph = Arc::new(InMemoryGraph::new());
        let builder = GraphBuilder::new(store, graph.clone(), 100);

        builder.build("run-1").await.unwrap();

        assert_eq!(graph.edge_count().await.unwrap(), 1);
        assert_eq!(graph.node_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn build_is_idempotent_under_rerun() {
        let store = Arc::new(RelationalStore::open_in_memory().unwrap());
        store.upsert_validated_relationship(&validated("hash-a", ReconciliationStatus::Validated)).unwrap();
        let graph = Arc::new(InMemoryGraph::new());
        let builder = GraphBuilder::new(store, graph.clone(), 100);

        builder.build("run-1").await.unwrap();
        builder.build("run-1").await.unwrap();

        assert_eq!(graph.edge_count().await.unwrap(), 1);
        assert_eq!(graph.node_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn batches_respect_the_configured_batch_size() {
        let store = Arc::new(RelationalStore::open_in_memory().unwrap());
        for i in 0..5 {
            store.upsert_validated_relationship(&validated(&format!("hash-{i}"), ReconciliationStatus::Validated)).unwrap();
        }
        let graph = Arc::new(InMemoryGraph::new());
        let builder = GraphBuilder::new(store, graph.clone(), 2);

        builder.build("run-1").await.unwrap();
        assert_eq!(graph.edge_count().await.unwrap(), 5);
    }
}
