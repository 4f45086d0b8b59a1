//! Structural navigation over stored trees.
//!
//! Every operation resolves the node's document, loads (or reuses) the
//! immutable snapshot and walks it. Unknown ids are `NodeNotFound`.

use crate::error::{PageTreeError, Result};
use crate::search::{rank, SearchOptions};
use crate::store::TreeStore;
use crate::tree::{DocumentTree, NodeId, NodeStatus, PageRange, TreeNode};
use serde::Serialize;
use std::sync::Arc;

/// Threshold used by [`Navigator::related_sections`] unless overridden.
pub const DEFAULT_RELATED_THRESHOLD: f32 = 0.5;

/// Where a node sits in its document.
#[derive(Debug, Clone, Serialize)]
pub struct NodeContext {
    pub document_id: String,
    pub title: String,
    /// Root first, the node itself last.
    pub breadcrumb: Vec<TreeNode>,
    /// Same-parent nodes in ordinal order, excluding the node.
    pub siblings: Vec<TreeNode>,
}

impl NodeContext {
    pub fn node(&self) -> Option<&TreeNode> {
        self.breadcrumb.last()
    }
}

/// A node related to the one asked about. `score` is present when the match
/// came from embedding similarity.
#[derive(Debug, Clone, Serialize)]
pub struct RelatedSection {
    pub node: TreeNode,
    pub score: Option<f32>,
}

/// Nested outline of a document.
#[derive(Debug, Clone, Serialize)]
pub struct OutlineEntry {
    pub node_id: NodeId,
    pub level: usize,
    pub range: PageRange,
    pub summary: String,
    pub status: NodeStatus,
    pub children: Vec<OutlineEntry>,
}

impl OutlineEntry {
    fn build(tree: &DocumentTree, node: &TreeNode) -> Self {
        Self {
            node_id: node.id.clone(),
            level: node.level,
            range: node.range,
            summary: node.summary_text().to_string(),
            status: node.status,
            children: tree
                .children(&node.id)
                .into_iter()
                .map(|child| Self::build(tree, child))
                .collect(),
        }
    }

    /// Indented text rendering, one line per entry.
    pub fn render(&self, max_summary: usize) -> String {
        let mut out = String::new();
        self.render_into(&mut out, max_summary);
        out
    }

    fn render_into(&self, out: &mut String, max_summary: usize) {
        let summary: String = self.summary.chars().take(max_summary).collect();
        let flag = if self.status == NodeStatus::Degraded {
            " [degraded]"
        } else {
            ""
        };
        out.push_str(&format!(
            "{}- {}{}: {}\n",
            "  ".repeat(self.level),
            self.range,
            flag,
            summary
        ));
        for child in &self.children {
            child.render_into(out, max_summary);
        }
    }
}

/// Read-only traversal of stored trees.
pub struct Navigator {
    store: Arc<TreeStore>,
    related_threshold: f32,
}

impl Navigator {
    pub fn new(store: Arc<TreeStore>) -> Self {
        Self {
            store,
            related_threshold: DEFAULT_RELATED_THRESHOLD,
        }
    }

    pub fn with_related_threshold(mut self, threshold: f32) -> Self {
        self.related_threshold = threshold;
        self
    }

    async fn locate(&self, node_id: &NodeId) -> Result<(Arc<DocumentTree>, TreeNode)> {
        let tree = self.store.load_containing(node_id).await?;
        let node = tree
            .get(node_id)
            .cloned()
            .ok_or_else(|| PageTreeError::NodeNotFound(node_id.to_string()))?;
        Ok((tree, node))
    }

    pub async fn node(&self, node_id: &NodeId) -> Result<TreeNode> {
        Ok(self.locate(node_id).await?.1)
    }

    /// Parent of a node; `NoParent` for the root.
    pub async fn parent(&self, node_id: &NodeId) -> Result<TreeNode> {
        let (tree, _) = self.locate(node_id).await?;
        tree.parent(node_id)
            .cloned()
            .ok_or_else(|| PageTreeError::NoParent(node_id.to_string()))
    }

    /// Children in ordinal order; empty for leaves.
    pub async fn children(&self, node_id: &NodeId) -> Result<Vec<TreeNode>> {
        let (tree, _) = self.locate(node_id).await?;
        Ok(tree.children(node_id).into_iter().cloned().collect())
    }

    /// Same-parent nodes excluding the node, in ordinal order.
    pub async fn siblings(&self, node_id: &NodeId) -> Result<Vec<TreeNode>> {
        let (tree, _) = self.locate(node_id).await?;
        Ok(tree.siblings(node_id).into_iter().cloned().collect())
    }

    pub async fn next_sibling(&self, node_id: &NodeId) -> Result<Option<TreeNode>> {
        let (tree, node) = self.locate(node_id).await?;
        Ok(sibling_at(&tree, &node, node.ordinal.checked_add(1)).cloned())
    }

    pub async fn previous_sibling(&self, node_id: &NodeId) -> Result<Option<TreeNode>> {
        let (tree, node) = self.locate(node_id).await?;
        Ok(sibling_at(&tree, &node, node.ordinal.checked_sub(1)).cloned())
    }

    /// Root-to-node path, inclusive.
    pub async fn breadcrumb(&self, node_id: &NodeId) -> Result<Vec<TreeNode>> {
        let (tree, _) = self.locate(node_id).await?;
        Ok(tree.ancestors(node_id).into_iter().cloned().collect())
    }

    /// Ancestor chain plus immediate siblings.
    pub async fn context(&self, node_id: &NodeId) -> Result<NodeContext> {
        let (tree, _) = self.locate(node_id).await?;
        Ok(NodeContext {
            document_id: tree.id.clone(),
            title: tree.title.clone(),
            breadcrumb: tree.ancestors(node_id).into_iter().cloned().collect(),
            siblings: tree.siblings(node_id).into_iter().cloned().collect(),
        })
    }

    /// First leaf after the node's page span, in document order.
    pub async fn next_leaf(&self, node_id: &NodeId) -> Result<Option<TreeNode>> {
        let (tree, node) = self.locate(node_id).await?;
        let mut current = &node;
        loop {
            if let Some(next) = sibling_at(&tree, current, current.ordinal.checked_add(1)) {
                return Ok(Some(descend(&tree, next, |c| c.first()).clone()));
            }
            match tree.parent(&current.id) {
                Some(parent) => current = parent,
                None => return Ok(None),
            }
        }
    }

    /// Last leaf before the node's page span, in document order.
    pub async fn previous_leaf(&self, node_id: &NodeId) -> Result<Option<TreeNode>> {
        let (tree, node) = self.locate(node_id).await?;
        let mut current = &node;
        loop {
            if let Some(prev) = sibling_at(&tree, current, current.ordinal.checked_sub(1)) {
                return Ok(Some(descend(&tree, prev, |c| c.last()).clone()));
            }
            match tree.parent(&current.id) {
                Some(parent) => current = parent,
                None => return Ok(None),
            }
        }
    }

    /// Sections similar to the node.
    ///
    /// With an embedding: the most similar leaves of the same document
    /// scoring at least the related threshold, excluding the node itself.
    /// Without one: the leaves under the node in page order, or for a leaf
    /// that lost its embedding, the other leaves under its parent.
    pub async fn related_sections(
        &self,
        node_id: &NodeId,
        top_k: usize,
    ) -> Result<Vec<RelatedSection>> {
        if top_k == 0 {
            return Err(PageTreeError::InvalidQuery(
                "top_k must be at least 1".to_string(),
            ));
        }
        let (tree, node) = self.locate(node_id).await?;

        if let Some(embedding) = node.embedding() {
            let options = SearchOptions::new(top_k.saturating_add(1))
                .with_threshold(self.related_threshold)
                .in_document(tree.id.clone());
            let hits = rank([tree.as_ref()], embedding, &options)?;
            return Ok(hits
                .into_iter()
                .filter(|hit| &hit.node_id != node_id)
                .take(top_k)
                .filter_map(|hit| {
                    tree.get(&hit.node_id).map(|n| RelatedSection {
                        node: n.clone(),
                        score: Some(hit.score),
                    })
                })
                .collect());
        }

        let scope = if node.is_leaf() {
            match &node.parent {
                Some(parent) => parent.clone(),
                None => return Ok(Vec::new()),
            }
        } else {
            node.id.clone()
        };
        Ok(tree
            .leaf_descendants(&scope)
            .into_iter()
            .filter(|leaf| &leaf.id != node_id)
            .take(top_k)
            .map(|leaf| RelatedSection {
                node: leaf.clone(),
                score: None,
            })
            .collect())
    }

    /// Nested outline of a whole document.
    pub async fn outline(&self, document_id: &str) -> Result<OutlineEntry> {
        let tree = self.store.load(document_id).await?;
        Ok(OutlineEntry::build(&tree, tree.root()))
    }
}

fn sibling_at<'a>(tree: &'a DocumentTree, node: &TreeNode, ordinal: Option<usize>) -> Option<&'a TreeNode> {
    let parent = tree.get(node.parent.as_ref()?)?;
    tree.get(parent.children().get(ordinal?)?)
}

/// Follow `pick` down to a leaf.
fn descend<'a>(
    tree: &'a DocumentTree,
    mut node: &'a TreeNode,
    pick: impl Fn(&[NodeId]) -> Option<&NodeId>,
) -> &'a TreeNode {
    while let Some(child) = pick(node.children()).and_then(|id| tree.get(id)) {
        node = child;
    }
    node
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::MemoryGraph;
    use crate::splitter::split_document;

    /// 40 pages, chunks of 10: root -> two internal nodes -> four leaves.
    /// Leaf embeddings: [1,0], [0.9,0.44], [0,1], [0.6,0.8].
    async fn fixture() -> (Navigator, DocumentTree) {
        let mut tree = split_document("doc", 40, 10).unwrap();
        let vectors = [
            vec![1.0, 0.0],
            vec![0.9, 0.44],
            vec![0.0, 1.0],
            vec![0.6, 0.8],
        ];
        let leaves: Vec<NodeId> = tree.leaves().iter().map(|l| l.id.clone()).collect();
        for (id, vector) in leaves.iter().zip(vectors) {
            tree.get_mut(id).unwrap().set_embedding(vector);
        }
        for node in tree.nodes_mut() {
            node.summary = Some(format!("about {}", node.range));
            node.status = NodeStatus::Ready;
        }

        let store = Arc::new(TreeStore::new(Arc::new(MemoryGraph::new())));
        store.persist(&tree).await.unwrap();
        (Navigator::new(store), tree)
    }

    fn leaf(tree: &DocumentTree, i: usize) -> NodeId {
        tree.leaves()[i].id.clone()
    }

    #[tokio::test]
    async fn test_parent_and_children() {
        let (nav, tree) = fixture().await;
        let root = tree.root.clone();

        assert!(matches!(
            nav.parent(&root).await,
            Err(PageTreeError::NoParent(_))
        ));
        let children = nav.children(&root).await.unwrap();
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].range, PageRange::new(0, 20));
        assert_eq!(children[1].range, PageRange::new(20, 40));

        let parent = nav.parent(&leaf(&tree, 2)).await.unwrap();
        assert_eq!(parent.id, children[1].id);
        assert!(nav.children(&leaf(&tree, 0)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_node() {
        let (nav, _) = fixture().await;
        let missing = NodeId::from("missing");
        assert!(matches!(
            nav.parent(&missing).await,
            Err(PageTreeError::NodeNotFound(_))
        ));
        assert!(matches!(
            nav.context(&missing).await,
            Err(PageTreeError::NodeNotFound(_))
        ));
        assert!(matches!(
            nav.related_sections(&missing, 3).await,
            Err(PageTreeError::NodeNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_siblings() {
        let (nav, tree) = fixture().await;
        let siblings = nav.siblings(&leaf(&tree, 0)).await.unwrap();
        assert_eq!(siblings.len(), 1);
        assert_eq!(siblings[0].id, leaf(&tree, 1));
        assert!(nav.siblings(&tree.root).await.unwrap().is_empty());

        assert_eq!(
            nav.next_sibling(&leaf(&tree, 0)).await.unwrap().map(|n| n.id),
            Some(leaf(&tree, 1))
        );
        assert!(nav.next_sibling(&leaf(&tree, 1)).await.unwrap().is_none());
        assert_eq!(
            nav.previous_sibling(&leaf(&tree, 1)).await.unwrap().map(|n| n.id),
            Some(leaf(&tree, 0))
        );
    }

    #[tokio::test]
    async fn test_context() {
        let (nav, tree) = fixture().await;
        let context = nav.context(&leaf(&tree, 3)).await.unwrap();

        let path: Vec<usize> = context.breadcrumb.iter().map(|n| n.level).collect();
        assert_eq!(path, vec![0, 1, 2]);
        assert_eq!(context.breadcrumb[0].id, tree.root);
        assert_eq!(context.node().unwrap().id, leaf(&tree, 3));
        assert_eq!(context.siblings.len(), 1);
        assert_eq!(context.siblings[0].id, leaf(&tree, 2));
        assert_eq!(context.document_id, "doc");
    }

    #[tokio::test]
    async fn test_leaf_walk_crosses_subtrees() {
        let (nav, tree) = fixture().await;
        assert_eq!(
            nav.next_leaf(&leaf(&tree, 1)).await.unwrap().map(|n| n.id),
            Some(leaf(&tree, 2))
        );
        assert_eq!(
            nav.previous_leaf(&leaf(&tree, 2)).await.unwrap().map(|n| n.id),
            Some(leaf(&tree, 1))
        );
        assert!(nav.next_leaf(&leaf(&tree, 3)).await.unwrap().is_none());
        assert!(nav.previous_leaf(&leaf(&tree, 0)).await.unwrap().is_none());

        let left = tree.root().children()[0].clone();
        assert_eq!(
            nav.next_leaf(&left).await.unwrap().map(|n| n.id),
            Some(leaf(&tree, 2))
        );
    }

    #[tokio::test]
    async fn test_related_by_embedding() {
        let (nav, tree) = fixture().await;
        let related = nav.related_sections(&leaf(&tree, 0), 3).await.unwrap();

        // [0,1] scores 0 against [1,0] and falls under the threshold.
        let ids: Vec<NodeId> = related.iter().map(|r| r.node.id.clone()).collect();
        assert_eq!(ids, vec![leaf(&tree, 1), leaf(&tree, 3)]);
        assert!(related.iter().all(|r| r.score.unwrap() >= 0.5));
        assert!(!ids.contains(&leaf(&tree, 0)));
    }

    #[tokio::test]
    async fn test_related_respects_top_k() {
        let (nav, tree) = fixture().await;
        let related = nav.related_sections(&leaf(&tree, 0), 1).await.unwrap();
        assert_eq!(related.len(), 1);
        assert_eq!(related[0].node.id, leaf(&tree, 1));
        assert!(matches!(
            nav.related_sections(&leaf(&tree, 0), 0).await,
            Err(PageTreeError::InvalidQuery(_))
        ));
    }

    #[tokio::test]
    async fn test_related_with_unbounded_top_k() {
        let (nav, tree) = fixture().await;
        let related = nav
            .related_sections(&leaf(&tree, 0), usize::MAX)
            .await
            .unwrap();
        let ids: Vec<NodeId> = related.iter().map(|r| r.node.id.clone()).collect();
        assert_eq!(ids, vec![leaf(&tree, 1), leaf(&tree, 3)]);
    }

    #[tokio::test]
    async fn test_related_for_internal_node_returns_leaves() {
        let (nav, tree) = fixture().await;
        let right = tree.root().children()[1].clone();
        let related = nav.related_sections(&right, 5).await.unwrap();

        let ids: Vec<NodeId> = related.iter().map(|r| r.node.id.clone()).collect();
        assert_eq!(ids, vec![leaf(&tree, 2), leaf(&tree, 3)]);
        assert!(related.iter().all(|r| r.score.is_none()));

        let root_related = nav.related_sections(&tree.root, 2).await.unwrap();
        assert_eq!(root_related.len(), 2);
    }

    #[tokio::test]
    async fn test_outline() {
        let (nav, tree) = fixture().await;
        let outline = nav.outline("doc").await.unwrap();
        assert_eq!(outline.node_id, tree.root);
        assert_eq!(outline.children.len(), 2);
        assert_eq!(outline.children[1].children[0].range, PageRange::new(20, 30));

        let text = outline.render(40);
        assert_eq!(text.lines().count(), 7);
        assert!(text.starts_with("- pages 1-40: about pages 1-40"));
    }
}
