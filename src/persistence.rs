//! File-backed graph storage.
//!
//! Each document's graph records live in one file under the data directory,
//! either as JSON (human-readable) or bincode (compact binary). A commit
//! writes a temporary file and renames it over the old one, so a crash
//! leaves either the previous version or the new one on disk.

use crate::error::{PageTreeError, Result};
use crate::store::{DocumentRecord, GraphBackend, GraphBatch};
use crate::tree::NodeId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// On-disk encoding of a document's records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaveFormat {
    /// JSON format (human-readable, larger).
    #[default]
    Json,
    /// Bincode format (binary, compact).
    Bincode,
}

impl SaveFormat {
    /// Determine format from file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Some(SaveFormat::Json),
            Some("bin") | Some("bincode") => Some(SaveFormat::Bincode),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            SaveFormat::Json => "json",
            SaveFormat::Bincode => "bin",
        }
    }

    pub fn encode(&self, batch: &GraphBatch) -> Result<Vec<u8>> {
        match self {
            SaveFormat::Json => Ok(serde_json::to_vec_pretty(batch)?),
            SaveFormat::Bincode => bincode::encode_to_vec(batch, bincode::config::standard())
                .map_err(|e| PageTreeError::Serialization(e.to_string())),
        }
    }

    pub fn decode(&self, data: &[u8]) -> Result<GraphBatch> {
        match self {
            SaveFormat::Json => Ok(serde_json::from_slice(data)?),
            SaveFormat::Bincode => {
                let (batch, _): (GraphBatch, usize) =
                    bincode::decode_from_slice(data, bincode::config::standard())
                        .map_err(|e| PageTreeError::Serialization(e.to_string()))?;
                Ok(batch)
            }
        }
    }
}

#[derive(Default)]
struct FileIndex {
    /// Document id to the file holding it.
    files: HashMap<String, PathBuf>,
    nodes: HashMap<NodeId, String>,
}

/// Graph backend writing one file per document.
pub struct FileGraph {
    dir: PathBuf,
    format: SaveFormat,
    index: RwLock<FileIndex>,
}

impl FileGraph {
    /// Open (creating if needed) a data directory and index its documents.
    pub async fn open(dir: impl Into<PathBuf>, format: SaveFormat) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| PageTreeError::io(&dir, e))?;

        let mut index = FileIndex::default();
        let mut entries = fs::read_dir(&dir)
            .await
            .map_err(|e| PageTreeError::io(&dir, e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PageTreeError::io(&dir, e))?
        {
            let path = entry.path();
            let Some(file_format) = SaveFormat::from_path(&path) else {
                continue;
            };
            let batch = match read_batch(&path, file_format).await {
                Ok(batch) => batch,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable document file");
                    continue;
                }
            };
            for node in &batch.nodes {
                index.nodes.insert(node.id.clone(), batch.document.id.clone());
            }
            index.files.insert(batch.document.id, path);
        }

        debug!(dir = %dir.display(), documents = index.files.len(), "Opened file graph");
        Ok(Self {
            dir,
            format,
            index: RwLock::new(index),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, document_id: &str) -> PathBuf {
        self.dir.join(format!(
            "{}.{}",
            hex::encode(document_id.as_bytes()),
            self.format.extension()
        ))
    }
}

async fn read_batch(path: &Path, format: SaveFormat) -> Result<GraphBatch> {
    let data = fs::read(path).await.map_err(|e| PageTreeError::io(path, e))?;
    format.decode(&data)
}

#[async_trait]
impl GraphBackend for FileGraph {
    async fn commit(&self, batch: GraphBatch) -> Result<()> {
        let mut index = self.index.write().await;
        let document_id = batch.document.id.clone();
        let path = self.path_for(&document_id);
        let tmp = path.with_extension("tmp");

        let data = self.format.encode(&batch)?;
        fs::write(&tmp, &data)
            .await
            .map_err(|e| PageTreeError::io(&tmp, e))?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|e| PageTreeError::io(&path, e))?;

        if let Some(previous) = index.files.insert(document_id.clone(), path.clone()) {
            if previous != path {
                // Written in the other format before a config change.
                if let Err(e) = fs::remove_file(&previous).await {
                    warn!(path = %previous.display(), error = %e, "Failed to remove stale document file");
                }
            }
        }
        index.nodes.retain(|_, doc| doc != &document_id);
        for node in &batch.nodes {
            index.nodes.insert(node.id.clone(), document_id.clone());
        }
        Ok(())
    }

    async fn read_document(&self, document_id: &str) -> Result<Option<GraphBatch>> {
        let index = self.index.read().await;
        let Some(path) = index.files.get(document_id) else {
            return Ok(None);
        };
        let format = SaveFormat::from_path(path).unwrap_or(self.format);
        Ok(Some(read_batch(path, format).await?))
    }

    async fn delete_document(&self, document_id: &str) -> Result<bool> {
        let mut index = self.index.write().await;
        let Some(path) = index.files.remove(document_id) else {
            return Ok(false);
        };
        fs::remove_file(&path)
            .await
            .map_err(|e| PageTreeError::io(&path, e))?;
        index.nodes.retain(|_, doc| doc != document_id);
        Ok(true)
    }

    async fn list_documents(&self) -> Result<Vec<DocumentRecord>> {
        let paths: Vec<PathBuf> = self.index.read().await.files.values().cloned().collect();
        let mut records = Vec::with_capacity(paths.len());
        for path in paths {
            let format = SaveFormat::from_path(&path).unwrap_or(self.format);
            records.push(read_batch(&path, format).await?.document);
        }
        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records)
    }

    async fn document_of(&self, node_id: &NodeId) -> Result<Option<String>> {
        Ok(self.index.read().await.nodes.get(node_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::splitter::split_document;
    use crate::store::{to_batch, TreeStore};
    use crate::tree::{DocumentTree, NodeStatus};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn ready_tree(id: &str, total: usize) -> DocumentTree {
        let mut tree = split_document(id, total, 10).unwrap();
        for node in tree.nodes_mut() {
            node.summary = Some(format!("Summary of {}", node.range));
            node.status = NodeStatus::Ready;
            node.set_embedding(vec![0.1, 0.2, 0.3]);
        }
        tree
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(
            SaveFormat::from_path(Path::new("test.json")),
            Some(SaveFormat::Json)
        );
        assert_eq!(
            SaveFormat::from_path(Path::new("test.bin")),
            Some(SaveFormat::Bincode)
        );
        assert_eq!(
            SaveFormat::from_path(Path::new("test.bincode")),
            Some(SaveFormat::Bincode)
        );
        assert_eq!(SaveFormat::from_path(Path::new("test.tmp")), None);
    }

    #[test]
    fn test_bincode_round_trip() {
        let batch = to_batch(&ready_tree("doc", 30));
        let bytes = SaveFormat::Bincode.encode(&batch).unwrap();
        assert_eq!(SaveFormat::Bincode.decode(&bytes).unwrap(), batch);
    }

    #[tokio::test]
    async fn test_reopen_sees_committed_documents() {
        let dir = TempDir::new().unwrap();
        let tree = ready_tree("report-2024", 50);
        {
            let store = TreeStore::new(Arc::new(
                FileGraph::open(dir.path(), SaveFormat::Json).await.unwrap(),
            ));
            store.persist(&tree).await.unwrap();
        }

        let graph = FileGraph::open(dir.path(), SaveFormat::Json).await.unwrap();
        let leaf = tree.leaves()[0].id.clone();
        assert_eq!(
            graph.document_of(&leaf).await.unwrap().as_deref(),
            Some("report-2024")
        );

        let store = TreeStore::new(Arc::new(graph));
        assert_eq!(*store.load("report-2024").await.unwrap(), tree);
    }

    #[tokio::test]
    async fn test_json_is_readable() {
        let dir = TempDir::new().unwrap();
        let graph = FileGraph::open(dir.path(), SaveFormat::Json).await.unwrap();
        graph.commit(to_batch(&ready_tree("doc", 20))).await.unwrap();

        let path = graph.path_for("doc");
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("PARENT_OF"));
        assert!(content.contains("NEXT_SIBLING"));
        assert!(content.contains("Summary of pages 1-10"));
        assert!(!path.with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn test_format_switch_removes_old_file() {
        let dir = TempDir::new().unwrap();
        let json = FileGraph::open(dir.path(), SaveFormat::Json).await.unwrap();
        json.commit(to_batch(&ready_tree("doc", 20))).await.unwrap();
        let json_path = json.path_for("doc");
        drop(json);

        let bin = FileGraph::open(dir.path(), SaveFormat::Bincode).await.unwrap();
        assert!(bin.read_document("doc").await.unwrap().is_some());
        bin.commit(to_batch(&ready_tree("doc", 30))).await.unwrap();

        assert!(!json_path.exists());
        assert!(bin.path_for("doc").exists());
        assert_eq!(bin.list_documents().await.unwrap()[0].total_pages, 30);
    }

    #[tokio::test]
    async fn test_delete_removes_file() {
        let dir = TempDir::new().unwrap();
        let graph = FileGraph::open(dir.path(), SaveFormat::Bincode).await.unwrap();
        graph.commit(to_batch(&ready_tree("doc", 20))).await.unwrap();
        let path = graph.path_for("doc");

        assert!(graph.delete_document("doc").await.unwrap());
        assert!(!path.exists());
        assert!(!graph.delete_document("doc").await.unwrap());
        assert!(graph.list_documents().await.unwrap().is_empty());
    }
}
