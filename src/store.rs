//! Graph persistence for document trees.
//!
//! A tree is stored as graph records: one [`GraphNode`] per tree node, a
//! `PARENT_OF {ordinal}` edge from each parent to each child, and a
//! `NEXT_SIBLING` edge between consecutive siblings. A [`GraphBackend`]
//! commits all records of a document in one transaction, so readers see
//! either the previous version or the new one.
//!
//! [`TreeStore`] sits on top of a backend. It converts trees to records and
//! back, validates what it loads, serializes writers per document, and
//! caches immutable snapshots for concurrent readers.

use crate::error::{PageTreeError, Result};
use crate::tree::{DocumentTree, NodeId, NodeKind, NodeStatus, PageRange, TreeNode, TreeStats};
use async_trait::async_trait;
use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info};

/// Document-level record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct DocumentRecord {
    pub id: String,
    pub title: String,
    pub total_pages: usize,
    pub root: NodeId,
}

/// Node properties as stored in the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub struct GraphNode {
    pub id: NodeId,
    pub document_id: String,
    pub level: usize,
    pub range_start: usize,
    pub range_end: usize,
    pub ordinal: usize,
    pub summary: Option<String>,
    pub status: NodeStatus,
    pub embedding: Option<Vec<f32>>,
}

/// Relationship type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Encode, Decode)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeKind {
    ParentOf { ordinal: usize },
    NextSibling,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Encode, Decode)]
pub struct GraphEdge {
    pub from: NodeId,
    pub to: NodeId,
    #[serde(flatten)]
    pub kind: EdgeKind,
}

/// Everything stored for one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub struct GraphBatch {
    pub document: DocumentRecord,
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

/// Storage engine for graph records.
#[async_trait]
pub trait GraphBackend: Send + Sync {
    /// Replace all records of `batch.document.id` atomically.
    async fn commit(&self, batch: GraphBatch) -> Result<()>;

    /// All records of one document, if stored.
    async fn read_document(&self, document_id: &str) -> Result<Option<GraphBatch>>;

    /// Remove a document and its records. Returns whether it existed.
    async fn delete_document(&self, document_id: &str) -> Result<bool>;

    /// Document records, sorted by id.
    async fn list_documents(&self) -> Result<Vec<DocumentRecord>>;

    /// Document owning a node id.
    async fn document_of(&self, node_id: &NodeId) -> Result<Option<String>>;
}

/// Summary of one stored document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentStats {
    pub document_id: String,
    pub title: String,
    pub total_pages: usize,
    #[serde(flatten)]
    pub tree: TreeStats,
}

type LockMap = Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

/// Exclusive write access to one document, held across an ingestion.
pub struct DocumentGuard {
    document_id: String,
    locks: Arc<LockMap>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl DocumentGuard {
    pub fn document_id(&self) -> &str {
        &self.document_id
    }
}

impl Drop for DocumentGuard {
    fn drop(&mut self) {
        self.guard.take();
        // Only the map's own reference left: nobody holds or waits on it.
        let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        if locks
            .get(&self.document_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.document_id);
        }
    }
}

#[derive(Default)]
struct Snapshots {
    trees: HashMap<String, Arc<DocumentTree>>,
    /// Bumped on every write so a slow reader cannot cache a stale tree.
    generations: HashMap<String, u64>,
}

/// Tree-level persistence over a graph backend.
pub struct TreeStore {
    backend: Arc<dyn GraphBackend>,
    locks: Arc<LockMap>,
    snapshots: RwLock<Snapshots>,
}

impl TreeStore {
    pub fn new(backend: Arc<dyn GraphBackend>) -> Self {
        Self {
            backend,
            locks: Arc::new(Mutex::new(HashMap::new())),
            snapshots: RwLock::new(Snapshots::default()),
        }
    }

    /// Wait for exclusive write access to `document_id`.
    pub async fn lock_document(&self, document_id: &str) -> DocumentGuard {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
            Arc::clone(locks.entry(document_id.to_string()).or_default())
        };
        DocumentGuard {
            document_id: document_id.to_string(),
            locks: Arc::clone(&self.locks),
            guard: Some(lock.lock_owned().await),
        }
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.locks.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    /// Validate and store a complete tree, replacing any previous version.
    pub async fn persist(&self, tree: &DocumentTree) -> Result<()> {
        let guard = self.lock_document(&tree.id).await;
        self.persist_locked(&guard, tree).await
    }

    /// [`persist`](Self::persist) for a caller already holding the document lock.
    pub async fn persist_locked(&self, guard: &DocumentGuard, tree: &DocumentTree) -> Result<()> {
        if guard.document_id != tree.id {
            return Err(PageTreeError::InvalidConfiguration(format!(
                "lock held for '{}' but persisting '{}'",
                guard.document_id, tree.id
            )));
        }
        tree.validate()?;

        let batch = to_batch(tree);
        let (nodes, edges) = (batch.nodes.len(), batch.edges.len());
        self.backend.commit(batch).await?;
        self.invalidate(&tree.id);

        info!(document_id = %tree.id, nodes, edges, "Committed document tree");
        Ok(())
    }

    /// Reconstruct a stored tree, validating every structural invariant.
    pub async fn load(&self, document_id: &str) -> Result<Arc<DocumentTree>> {
        let generation = {
            let snapshots = self.snapshots.read().unwrap_or_else(|p| p.into_inner());
            if let Some(tree) = snapshots.trees.get(document_id) {
                return Ok(Arc::clone(tree));
            }
            snapshots.generations.get(document_id).copied().unwrap_or(0)
        };

        let batch = self
            .backend
            .read_document(document_id)
            .await?
            .ok_or_else(|| PageTreeError::DocumentNotFound(document_id.to_string()))?;
        let tree = Arc::new(from_batch(batch)?);

        let mut snapshots = self.snapshots.write().unwrap_or_else(|p| p.into_inner());
        if snapshots.generations.get(document_id).copied().unwrap_or(0) == generation {
            snapshots
                .trees
                .insert(document_id.to_string(), Arc::clone(&tree));
        }
        debug!(document_id, nodes = tree.node_count(), "Loaded document tree");
        Ok(tree)
    }

    /// Load the tree containing `node_id`.
    pub async fn load_containing(&self, node_id: &NodeId) -> Result<Arc<DocumentTree>> {
        let document_id = self.document_of(node_id).await?;
        self.load(&document_id).await
    }

    pub async fn document_of(&self, node_id: &NodeId) -> Result<String> {
        self.backend
            .document_of(node_id)
            .await?
            .ok_or_else(|| PageTreeError::NodeNotFound(node_id.to_string()))
    }

    /// Remove a document. Returns whether anything was stored.
    pub async fn delete(&self, document_id: &str) -> Result<bool> {
        let _guard = self.lock_document(document_id).await;
        let removed = self.backend.delete_document(document_id).await?;
        self.invalidate(document_id);
        if removed {
            info!(document_id, "Deleted document tree");
        }
        Ok(removed)
    }

    pub async fn list_documents(&self) -> Result<Vec<DocumentRecord>> {
        self.backend.list_documents().await
    }

    /// Every stored tree, in document id order.
    pub async fn load_all(&self) -> Result<Vec<Arc<DocumentTree>>> {
        let mut trees = Vec::new();
        for record in self.list_documents().await? {
            trees.push(self.load(&record.id).await?);
        }
        Ok(trees)
    }

    pub async fn stats(&self, document_id: &str) -> Result<DocumentStats> {
        let tree = self.load(document_id).await?;
        Ok(DocumentStats {
            document_id: tree.id.clone(),
            title: tree.title.clone(),
            total_pages: tree.total_pages,
            tree: tree.stats(),
        })
    }

    fn invalidate(&self, document_id: &str) {
        let mut snapshots = self.snapshots.write().unwrap_or_else(|p| p.into_inner());
        snapshots.trees.remove(document_id);
        *snapshots
            .generations
            .entry(document_id.to_string())
            .or_insert(0) += 1;
    }
}

/// Flatten a tree into graph records.
pub fn to_batch(tree: &DocumentTree) -> GraphBatch {
    let mut nodes = Vec::with_capacity(tree.node_count());
    let mut edges = Vec::new();

    for node in tree.pre_order() {
        nodes.push(GraphNode {
            id: node.id.clone(),
            document_id: node.document_id.clone(),
            level: node.level,
            range_start: node.range.start,
            range_end: node.range.end,
            ordinal: node.ordinal,
            summary: node.summary.clone(),
            status: node.status,
            embedding: node.embedding().map(|e| e.to_vec()),
        });

        let children = node.children();
        for (ordinal, child) in children.iter().enumerate() {
            edges.push(GraphEdge {
                from: node.id.clone(),
                to: child.clone(),
                kind: EdgeKind::ParentOf { ordinal },
            });
        }
        for pair in children.windows(2) {
            edges.push(GraphEdge {
                from: pair[0].clone(),
                to: pair[1].clone(),
                kind: EdgeKind::NextSibling,
            });
        }
    }

    GraphBatch {
        document: DocumentRecord {
            id: tree.id.clone(),
            title: tree.title.clone(),
            total_pages: tree.total_pages,
            root: tree.root.clone(),
        },
        nodes,
        edges,
    }
}

/// Rebuild a tree from graph records. Children are ordered by edge ordinal.
pub fn from_batch(batch: GraphBatch) -> Result<DocumentTree> {
    let GraphBatch {
        document,
        nodes,
        edges,
    } = batch;
    let corrupt = |reason: String| PageTreeError::corrupt(&document.id, reason);

    let known: HashSet<&NodeId> = nodes.iter().map(|n| &n.id).collect();
    if known.len() != nodes.len() {
        return Err(corrupt("duplicate node ids".to_string()));
    }

    let mut children: BTreeMap<NodeId, Vec<(usize, NodeId)>> = BTreeMap::new();
    let mut parents: HashMap<NodeId, NodeId> = HashMap::new();
    let mut next_sibling: HashSet<(NodeId, NodeId)> = HashSet::new();

    for edge in &edges {
        if !known.contains(&edge.from) || !known.contains(&edge.to) {
            return Err(corrupt(format!(
                "edge {} -> {} references an unknown node",
                edge.from, edge.to
            )));
        }
        match edge.kind {
            EdgeKind::ParentOf { ordinal } => {
                if parents.insert(edge.to.clone(), edge.from.clone()).is_some() {
                    return Err(corrupt(format!("node {} has several parents", edge.to)));
                }
                children
                    .entry(edge.from.clone())
                    .or_default()
                    .push((ordinal, edge.to.clone()));
            }
            EdgeKind::NextSibling => {
                next_sibling.insert((edge.from.clone(), edge.to.clone()));
            }
        }
    }

    let roots: Vec<&NodeId> = known
        .iter()
        .copied()
        .filter(|id| !parents.contains_key(*id))
        .collect();
    if roots.len() != 1 || roots[0] != &document.root {
        return Err(corrupt(format!(
            "expected the single root {}, found {} parentless nodes",
            document.root,
            roots.len()
        )));
    }

    let mut expected_siblings = HashSet::new();
    let mut ordered: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
    for (parent, mut list) in children {
        list.sort_by_key(|(ordinal, _)| *ordinal);
        for (position, (ordinal, child)) in list.iter().enumerate() {
            if *ordinal != position {
                return Err(corrupt(format!(
                    "children of {parent} have a missing or duplicate ordinal at {position}"
                )));
            }
            if position > 0 {
                expected_siblings.insert((list[position - 1].1.clone(), child.clone()));
            }
        }
        ordered.insert(parent, list.into_iter().map(|(_, child)| child).collect());
    }
    if expected_siblings != next_sibling {
        return Err(corrupt(
            "NEXT_SIBLING edges disagree with child ordinals".to_string(),
        ));
    }

    let mut tree_nodes = Vec::with_capacity(nodes.len());
    for node in nodes {
        let kind = match ordered.remove(&node.id) {
            Some(children) => {
                if node.embedding.is_some() {
                    return Err(corrupt(format!("internal node {} has an embedding", node.id)));
                }
                NodeKind::Internal { children }
            }
            None => NodeKind::Leaf {
                embedding: node.embedding,
            },
        };
        tree_nodes.push(TreeNode {
            parent: parents.get(&node.id).cloned(),
            id: node.id,
            document_id: node.document_id,
            level: node.level,
            range: PageRange::new(node.range_start, node.range_end),
            ordinal: node.ordinal,
            kind,
            summary: node.summary,
            status: node.status,
        });
    }

    let tree = DocumentTree::new(
        document.id.clone(),
        document.title,
        document.total_pages,
        document.root,
        tree_nodes,
    )?;
    tree.validate()?;
    Ok(tree)
}
