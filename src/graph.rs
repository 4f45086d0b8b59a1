//! In-process graph backend.

use crate::error::Result;
use crate::store::{DocumentRecord, GraphBackend, GraphBatch};
use crate::tree::NodeId;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

#[derive(Default)]
struct GraphState {
    documents: BTreeMap<String, GraphBatch>,
    /// Node id to owning document.
    node_index: HashMap<NodeId, String>,
}

impl GraphState {
    fn remove(&mut self, document_id: &str) -> Option<GraphBatch> {
        let batch = self.documents.remove(document_id)?;
        for node in &batch.nodes {
            self.node_index.remove(&node.id);
        }
        Some(batch)
    }
}

/// Graph held in memory. A commit swaps a document's records under one
/// write lock, so readers never observe a partial document.
#[derive(Default)]
pub struct MemoryGraph {
    state: RwLock<GraphState>,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GraphBackend for MemoryGraph {
    async fn commit(&self, batch: GraphBatch) -> Result<()> {
        let mut state = self.state.write().await;
        let document_id = batch.document.id.clone();
        state.remove(&document_id);
        for node in &batch.nodes {
            state.node_index.insert(node.id.clone(), document_id.clone());
        }
        state.documents.insert(document_id, batch);
        Ok(())
    }

    async fn read_document(&self, document_id: &str) -> Result<Option<GraphBatch>> {
        Ok(self.state.read().await.documents.get(document_id).cloned())
    }

    async fn delete_document(&self, document_id: &str) -> Result<bool> {
        Ok(self.state.write().await.remove(document_id).is_some())
    }

    async fn list_documents(&self) -> Result<Vec<DocumentRecord>> {
        Ok(self
            .state
            .read()
            .await
            .documents
            .values()
            .map(|b| b.document.clone())
            .collect())
    }

    async fn document_of(&self, node_id: &NodeId) -> Result<Option<String>> {
        Ok(self.state.read().await.node_index.get(node_id).cloned())
    }
}
