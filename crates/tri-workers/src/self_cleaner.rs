//! Self-cleaning reconciler (§4.7): Mark finds files deleted from disk,
//! Sweep removes their graph data before removing their row — an order
//! that prevents orphaned graph nodes even if the sweep is interrupted.

use std::path::Path;
use std::sync::Arc;

use tri_core::TriError;
use tri_graph::GraphStore;
use tri_store::{FILE_STATUS_PENDING_DELETION, RelationalStore};

/// Drives both phases. Each is idempotent and independently schedulable.
pub struct SelfCleaner {
    store: Arc<RelationalStore>,
    graph: Arc<dyn GraphStore>,
}

impl SelfCleaner {
    #[must_use]
    pub fn new(store: Arc<RelationalStore>, graph: Arc<dyn GraphStore>) -> Self {
        Self { store, graph }
    }

    /// Marks every file row whose path no longer exists under `root`.
    /// Never touches the graph store.
    pub fn mark(&self, root: &Path) -> Result<usize, TriError> {
        let files = self.store.list_files().map_err(TriError::from)?;
        let mut marked = 0;
        for file in files {
            if !root.join(&file.path).exists() {
                self.store.set_file_status(&file.id, FILE_STATUS_PENDING_DELETION).map_err(TriError::from)?;
                marked += 1;
            }
        }
        Ok(marked)
    }

    /// Removes graph data for every `pending_deletion` file, then its
    /// row — only on graph success. A graph failure leaves the row
    /// `pending_deletion` for the next sweep.
    pub async fn sweep(&self) -> Result<usize, TriError> {
        let worklist = self.store.files_pending_deletion().map_err(TriError::from)?;
        let mut swept = 0;
        for file in worklist {
            self.graph.delete_node(&file.id).await.map_err(TriError::from)?;
            self.store.delete_file(&file.id).map_err(TriError::from)?;
            swept += 1;
        }
        Ok(swept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tri_graph::{GraphNode, InMemoryGraph};

    #[tokio::test]
    async fn mark_flags_only_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("present.js"), "").unwrap();

        let store = Arc::new(RelationalStore::open_in_memory().unwrap());
        store.insert_file("file-present", "present.js", None, None).unwrap();
        store.insert_file("file-missing", "missing.js", None, None).unwrap();
        let graph = Arc::new(InMemoryGraph::new());
        let cleaner = SelfCleaner::new(store.clone(), graph);

        let marked = cleaner.mark(dir.path()).unwrap();
        assert_eq!(marked, 1);
        assert_eq!(store.files_pending_deletion().unwrap()[0].id, "file-missing");
    }

    #[tokio::test]
    async fn sweep_deletes_graph_node_before_the_row() {
        let store = Arc::new(RelationalStore::open_in_memory().unwrap());
        store.insert_file("file-missing", "missing.js", None, None).unwrap();
        store.set_file_status("file-missing", FILE_STATUS_PENDING_DELETION).unwrap();

        let graph = Arc::new(InMemoryGraph::new());
        graph
            .merge_batch(&[GraphNode { id: "file-missing".to_string(), kind: "file".to_string(), properties: serde_json::Map::new() }], &[])
            .await
            .unwrap();

        let cleaner = SelfCleaner::new(store.clone(), graph.clone());
        let swept = cleaner.sweep().await.unwrap();

        assert_eq!(swept, 1);
        assert!(graph.get_node("file-missing").await.unwrap().is_none());
        assert!(store.list_files().unwrap().is_empty());
    }

    #[tokio::test]
    async fn sweep_is_idempotent_on_an_empty_worklist() {
        let store = Arc::new(RelationalStore::open_in_memory().unwrap());
        let graph = Arc::new(InMemoryGraph::new());
        let cleaner = SelfCleaner::new(store, graph);
        assert_eq!(cleaner.sweep().await.unwrap(), 0);
    }
}
