//! Tree structure for hierarchical document summaries.
//!
//! A [`DocumentTree`] owns every [`TreeNode`] of one document, keyed by
//! [`NodeId`]. Nodes reference each other by id; the leaf/internal split is
//! carried by [`NodeKind`], so a leaf can never hold children and an
//! internal node can never hold an embedding.

use crate::error::{PageTreeError, Result};
use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Identifier of a tree node. Unique across documents and never reused.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Encode, Decode,
)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Allocate a fresh random id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for NodeId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Half-open page range `[start, end)`, 0-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Encode, Decode)]
pub struct PageRange {
    pub start: usize,
    pub end: usize,
}

impl PageRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Number of pages covered.
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Split into `[start, mid)` and `[mid, end)`.
    pub fn split_at(&self, mid: usize) -> (PageRange, PageRange) {
        (PageRange::new(self.start, mid), PageRange::new(mid, self.end))
    }
}

impl fmt::Display for PageRange {
    /// Human-readable, 1-based and inclusive.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.len() <= 1 {
            write!(f, "page {}", self.start + 1)
        } else {
            write!(f, "pages {}-{}", self.start + 1, self.end)
        }
    }
}

/// Lifecycle state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Encode, Decode)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    /// Created by the splitter, not yet summarized.
    Pending,
    /// Summary filled (and, for leaves, embedding assigned).
    Ready,
    /// Fell back to a placeholder summary or lost its embedding.
    Degraded,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Pending => "pending",
            NodeStatus::Ready => "ready",
            NodeStatus::Degraded => "degraded",
        }
    }
}

impl FromStr for NodeStatus {
    type Err = PageTreeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(NodeStatus::Pending),
            "ready" => Ok(NodeStatus::Ready),
            "degraded" => Ok(NodeStatus::Degraded),
            other => Err(PageTreeError::Serialization(format!(
                "unknown node status '{other}'"
            ))),
        }
    }
}

/// Leaf vs internal behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum NodeKind {
    /// Summarized from its own page text; may carry an embedding.
    Leaf {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        embedding: Option<Vec<f32>>,
    },
    /// Summarized from its children's summaries, ordered by ordinal.
    Internal { children: Vec<NodeId> },
}

/// A node in the document tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeNode {
    pub id: NodeId,
    pub document_id: String,
    /// Distance from the root (root is 0).
    pub level: usize,
    pub range: PageRange,
    /// Position among siblings, 0-based.
    pub ordinal: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<NodeId>,
    #[serde(flatten)]
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub status: NodeStatus,
}

impl TreeNode {
    /// Create a pending leaf.
    pub fn leaf(document_id: impl Into<String>, level: usize, range: PageRange, ordinal: usize) -> Self {
        Self {
            id: NodeId::generate(),
            document_id: document_id.into(),
            level,
            range,
            ordinal,
            parent: None,
            kind: NodeKind::Leaf { embedding: None },
            summary: None,
            status: NodeStatus::Pending,
        }
    }

    /// Create a pending internal node with no children yet.
    pub fn internal(
        document_id: impl Into<String>,
        level: usize,
        range: PageRange,
        ordinal: usize,
    ) -> Self {
        Self {
            kind: NodeKind::Internal {
                children: Vec::new(),
            },
            ..Self::leaf(document_id, level, range, ordinal)
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, NodeKind::Leaf { .. })
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Child ids in ordinal order; empty for leaves.
    pub fn children(&self) -> &[NodeId] {
        match &self.kind {
            NodeKind::Internal { children } => children,
            NodeKind::Leaf { .. } => &[],
        }
    }

    pub fn embedding(&self) -> Option<&[f32]> {
        match &self.kind {
            NodeKind::Leaf { embedding } => embedding.as_deref(),
            NodeKind::Internal { .. } => None,
        }
    }

    /// Attach an embedding. Returns `false` (and does nothing) on internal nodes.
    pub fn set_embedding(&mut self, vector: Vec<f32>) -> bool {
        match &mut self.kind {
            NodeKind::Leaf { embedding } => {
                *embedding = Some(vector);
                true
            }
            NodeKind::Internal { .. } => false,
        }
    }

    /// Summary text, or an empty string while still pending.
    pub fn summary_text(&self) -> &str {
        self.summary.as_deref().unwrap_or("")
    }

    /// One indented display line for this node.
    fn format_line(&self) -> String {
        let prefix = "  ".repeat(self.level);
        let marker = match self.status {
            NodeStatus::Degraded => " [degraded]",
            NodeStatus::Pending => " [pending]",
            NodeStatus::Ready => "",
        };
        let summary: String = self.summary_text().chars().take(60).collect();
        format!("{}{} ({}){}: {}\n", prefix, self.range, self.id, marker, summary)
    }
}

/// Aggregate counts over a tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeStats {
    pub total_nodes: usize,
    pub leaf_nodes: usize,
    pub max_depth: usize,
    pub summarized_nodes: usize,
    pub degraded_nodes: usize,
    pub leaves_with_embeddings: usize,
}

/// A complete document tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentTree {
    /// Document identifier.
    pub id: String,

    /// Document title.
    pub title: String,

    /// Total page count.
    pub total_pages: usize,

    /// Root node id.
    pub root: NodeId,

    nodes: BTreeMap<NodeId, TreeNode>,
}

impl DocumentTree {
    /// Assemble a tree from its nodes. The root must be among them.
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        total_pages: usize,
        root: NodeId,
        nodes: impl IntoIterator<Item = TreeNode>,
    ) -> Result<Self> {
        let id = id.into();
        let nodes: BTreeMap<NodeId, TreeNode> =
            nodes.into_iter().map(|n| (n.id.clone(), n)).collect();

        if !nodes.contains_key(&root) {
            return Err(PageTreeError::corrupt(&id, format!("root {root} is missing")));
        }

        Ok(Self {
            id,
            title: title.into(),
            total_pages,
            root,
            nodes,
        })
    }

    pub fn root(&self) -> &TreeNode {
        // Every constructor checks the root is present; nodes are never removed.
        &self.nodes[&self.root]
    }

    pub fn get(&self, id: &NodeId) -> Option<&TreeNode> {
        self.nodes.get(id)
    }

    pub fn get_mut(&mut self, id: &NodeId) -> Option<&mut TreeNode> {
        self.nodes.get_mut(id)
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    /// All nodes in id order.
    pub fn nodes(&self) -> impl Iterator<Item = &TreeNode> {
        self.nodes.values()
    }

    pub fn nodes_mut(&mut self) -> impl Iterator<Item = &mut TreeNode> {
        self.nodes.values_mut()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Children of a node in ordinal order.
    pub fn children(&self, id: &NodeId) -> Vec<&TreeNode> {
        self.get(id)
            .map(|n| n.children().iter().filter_map(|c| self.get(c)).collect())
            .unwrap_or_default()
    }

    pub fn parent(&self, id: &NodeId) -> Option<&TreeNode> {
        self.get(id)?.parent.as_ref().and_then(|p| self.get(p))
    }

    /// Same-parent nodes excluding `id`, in ordinal order.
    pub fn siblings(&self, id: &NodeId) -> Vec<&TreeNode> {
        match self.parent(id) {
            Some(parent) => self
                .children(&parent.id)
                .into_iter()
                .filter(|n| &n.id != id)
                .collect(),
            None => Vec::new(),
        }
    }

    /// Ancestor chain from the root down to `id`, inclusive.
    pub fn ancestors(&self, id: &NodeId) -> Vec<&TreeNode> {
        let mut path = Vec::new();
        let mut current = self.get(id);
        while let Some(node) = current {
            path.push(node);
            current = node.parent.as_ref().and_then(|p| self.get(p));
        }
        path.reverse();
        path
    }

    /// Nodes in pre-order (document order).
    pub fn pre_order(&self) -> Vec<&TreeNode> {
        self.subtree(&self.root)
    }

    /// Nodes of the subtree rooted at `id`, in pre-order.
    pub fn subtree(&self, id: &NodeId) -> Vec<&TreeNode> {
        let mut out = Vec::new();
        let mut stack: Vec<&NodeId> = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.get(current) {
                out.push(node);
                stack.extend(node.children().iter().rev());
            }
        }
        out
    }

    /// Leaf nodes in page order.
    pub fn leaves(&self) -> Vec<&TreeNode> {
        self.leaf_descendants(&self.root)
    }

    /// Leaf nodes under `id` in page order (`id` itself if it is a leaf).
    pub fn leaf_descendants(&self, id: &NodeId) -> Vec<&TreeNode> {
        self.subtree(id).into_iter().filter(|n| n.is_leaf()).collect()
    }

    /// Maximum level of any node (0 for a single-node tree).
    pub fn max_depth(&self) -> usize {
        self.nodes.values().map(|n| n.level).max().unwrap_or(0)
    }

    pub fn stats(&self) -> TreeStats {
        let mut stats = TreeStats {
            total_nodes: self.nodes.len(),
            max_depth: self.max_depth(),
            ..Default::default()
        };
        for node in self.nodes.values() {
            if node.is_leaf() {
                stats.leaf_nodes += 1;
                if node.embedding().is_some() {
                    stats.leaves_with_embeddings += 1;
                }
            }
            if node.summary.is_some() {
                stats.summarized_nodes += 1;
            }
            if node.status == NodeStatus::Degraded {
                stats.degraded_nodes += 1;
            }
        }
        stats
    }

    /// Check every structural invariant; violations are `CorruptTree`.
    pub fn validate(&self) -> Result<()> {
        let corrupt = |reason: String| PageTreeError::corrupt(&self.id, reason);
        let root = self.root();

        if root.parent.is_some() {
            return Err(corrupt(format!("root {} has a parent", root.id)));
        }
        if root.range != PageRange::new(0, self.total_pages) || root.level != 0 {
            return Err(corrupt(format!(
                "root covers {:?} at level {}, expected [0, {}) at level 0",
                root.range, root.level, self.total_pages
            )));
        }

        let mut reachable = 0usize;
        for node in self.pre_order() {
            reachable += 1;
            if node.document_id != self.id {
                return Err(corrupt(format!(
                    "node {} belongs to document '{}'",
                    node.id, node.document_id
                )));
            }
            if node.range.is_empty() {
                return Err(corrupt(format!("node {} has an empty range", node.id)));
            }
            let children = node.children();
            if !node.is_leaf() && children.is_empty() {
                return Err(corrupt(format!("internal node {} has no children", node.id)));
            }

            let mut cursor = node.range.start;
            for (ordinal, child_id) in children.iter().enumerate() {
                let child = self
                    .get(child_id)
                    .ok_or_else(|| corrupt(format!("child {child_id} of {} is missing", node.id)))?;
                if child.parent.as_ref() != Some(&node.id) {
                    return Err(corrupt(format!("child {} points to the wrong parent", child.id)));
                }
                if child.ordinal != ordinal {
                    return Err(corrupt(format!(
                        "child {} has ordinal {}, expected {}",
                        child.id, child.ordinal, ordinal
                    )));
                }
                if child.level != node.level + 1 {
                    return Err(corrupt(format!("child {} has level {}", child.id, child.level)));
                }
                if child.range.start != cursor {
                    return Err(corrupt(format!(
                        "child {} starts at page {}, expected {}",
                        child.id, child.range.start, cursor
                    )));
                }
                cursor = child.range.end;
            }
            if !children.is_empty() && cursor != node.range.end {
                return Err(corrupt(format!(
                    "children of {} end at page {}, expected {}",
                    node.id, cursor, node.range.end
                )));
            }
        }

        if reachable != self.nodes.len() {
            return Err(corrupt(format!(
                "{} nodes are unreachable from the root",
                self.nodes.len() - reachable
            )));
        }
        Ok(())
    }

    /// Format the entire tree for display.
    pub fn format(&self) -> String {
        let stats = self.stats();
        let mut result = format!(
            "Document: {} [{}] ({} pages, {} nodes, {} leaves)\n",
            self.title, self.id, self.total_pages, stats.total_nodes, stats.leaf_nodes
        );
        result.push_str(&"─".repeat(50));
        result.push('\n');

        for node in self.pre_order() {
            result.push_str(&node.format_line());
        }

        result
    }

    /// Convert to JSON string.
    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Parse from JSON string.
    pub fn from_json(json: &str) -> std::result::Result<Self, serde_json::Error> {
        let tree: Self = serde_json::from_str(json)?;
        if !tree.contains(&tree.root) {
            return Err(serde::de::Error::custom(format!(
                "root {} is not among the nodes",
                tree.root
            )));
        }
        Ok(tree)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Root [0,20) with two leaves [0,10) and [10,20).
    fn two_leaf_tree() -> DocumentTree {
        let mut root = TreeNode::internal("doc", 0, PageRange::new(0, 20), 0);
        let mut a = TreeNode::leaf("doc", 1, PageRange::new(0, 10), 0);
        let mut b = TreeNode::leaf("doc", 1, PageRange::new(10, 20), 1);
        a.parent = Some(root.id.clone());
        b.parent = Some(root.id.clone());
        root.kind = NodeKind::Internal {
            children: vec![a.id.clone(), b.id.clone()],
        };
        let root_id = root.id.clone();
        DocumentTree::new("doc", "Test", 20, root_id, vec![root, a, b]).unwrap()
    }

    #[test]
    fn test_page_range_display() {
        assert_eq!(PageRange::new(0, 10).to_string(), "pages 1-10");
        assert_eq!(PageRange::new(4, 5).to_string(), "page 5");
        assert_eq!(PageRange::new(3, 9).len(), 6);
    }

    #[test]
    fn test_navigation_helpers() {
        let tree = two_leaf_tree();
        let root = tree.root().id.clone();
        let leaves = tree.leaves();
        assert_eq!(leaves.len(), 2);
        assert_eq!(leaves[0].range, PageRange::new(0, 10));

        assert_eq!(tree.children(&root).len(), 2);
        assert_eq!(tree.parent(&leaves[1].id).unwrap().id, root);
        assert_eq!(tree.siblings(&leaves[0].id)[0].id, leaves[1].id);

        let chain = tree.ancestors(&leaves[1].id);
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].id, root);
    }

    #[test]
    fn test_embedding_only_on_leaves() {
        let mut tree = two_leaf_tree();
        let root = tree.root().id.clone();
        assert!(!tree.get_mut(&root).unwrap().set_embedding(vec![1.0]));
        let leaf = tree.leaves()[0].id.clone();
        assert!(tree.get_mut(&leaf).unwrap().set_embedding(vec![1.0]));
        assert_eq!(tree.stats().leaves_with_embeddings, 1);
    }

    #[test]
    fn test_validate_accepts_well_formed_tree() {
        assert!(two_leaf_tree().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_gap() {
        let mut tree = two_leaf_tree();
        let second = tree.leaves()[1].id.clone();
        tree.get_mut(&second).unwrap().range = PageRange::new(11, 20);
        assert!(matches!(
            tree.validate(),
            Err(PageTreeError::CorruptTree { .. })
        ));
    }

    #[test]
    fn test_missing_root_rejected() {
        let leaf = TreeNode::leaf("doc", 0, PageRange::new(0, 1), 0);
        let result = DocumentTree::new("doc", "x", 1, NodeId::from("nope"), vec![leaf]);
        assert!(result.is_err());
    }

    #[test]
    fn test_tree_json_roundtrip() {
        let tree = two_leaf_tree();
        let json = tree.to_json().unwrap();
        let parsed = DocumentTree::from_json(&json).unwrap();
        assert_eq!(parsed, tree);
    }
}
