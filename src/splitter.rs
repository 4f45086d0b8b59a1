//! Recursive page-range partitioning into a node tree.
//!
//! The splitter only decides structure: every node it produces is `pending`
//! with no summary. Three strategies are available:
//!
//! - [`SplitStrategy::Bisect`] halves a range on a chunk boundary, so leaves
//!   hold exactly `max_chunk_size` pages (the last may be shorter) and the
//!   depth is exactly `⌈log2⌈T/M⌉⌉`.
//! - [`SplitStrategy::Midpoint`] halves a range at its page midpoint; the two
//!   halves differ by at most one page.
//! - [`SplitStrategy::Fixed`] cuts fixed-size leaves and groups them
//!   `fanout` at a time, bottom-up, until one root remains.

use crate::error::{PageTreeError, Result};
use crate::tree::{DocumentTree, NodeId, NodeKind, PageRange, TreeNode};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::debug;

/// Fanout used when `fixed` is given without a number.
pub const DEFAULT_FIXED_FANOUT: usize = 5;

/// How internal nodes divide their page range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SplitStrategy {
    /// Balanced bisection aligned to chunk boundaries.
    #[default]
    Bisect,
    /// Balanced bisection at the page midpoint.
    Midpoint,
    /// Fixed-size leaves grouped `fanout` per parent.
    Fixed { fanout: usize },
}

impl FromStr for SplitStrategy {
    type Err = PageTreeError;

    /// Accepts `bisect`, `midpoint`, `fixed` or `fixed:<fanout>`.
    fn from_str(s: &str) -> Result<Self> {
        let lower = s.trim().to_lowercase();
        match lower.as_str() {
            "bisect" => Ok(SplitStrategy::Bisect),
            "midpoint" => Ok(SplitStrategy::Midpoint),
            "fixed" => Ok(SplitStrategy::Fixed {
                fanout: DEFAULT_FIXED_FANOUT,
            }),
            other => match other.strip_prefix("fixed:").map(str::parse::<usize>) {
                Some(Ok(fanout)) => Ok(SplitStrategy::Fixed { fanout }),
                _ => Err(PageTreeError::InvalidConfiguration(format!(
                    "unknown split strategy '{s}'"
                ))),
            },
        }
    }
}

/// Builds unsummarized trees over a page count.
#[derive(Debug, Clone)]
pub struct Splitter {
    max_chunk_size: usize,
    strategy: SplitStrategy,
}

impl Splitter {
    /// Create a splitter with the default strategy.
    pub fn new(max_chunk_size: usize) -> Result<Self> {
        if max_chunk_size < 1 {
            return Err(PageTreeError::InvalidConfiguration(format!(
                "max_chunk_size must be at least 1, got {max_chunk_size}"
            )));
        }
        Ok(Self {
            max_chunk_size,
            strategy: SplitStrategy::default(),
        })
    }

    /// Use a different splitting strategy.
    pub fn with_strategy(mut self, strategy: SplitStrategy) -> Result<Self> {
        if let SplitStrategy::Fixed { fanout } = strategy {
            if fanout < 2 {
                return Err(PageTreeError::InvalidConfiguration(format!(
                    "fixed split fanout must be at least 2, got {fanout}"
                )));
            }
        }
        self.strategy = strategy;
        Ok(self)
    }

    pub fn max_chunk_size(&self) -> usize {
        self.max_chunk_size
    }

    pub fn strategy(&self) -> SplitStrategy {
        self.strategy
    }

    /// Partition `[0, total_pages)` into a pending tree.
    pub fn split(&self, document_id: &str, title: &str, total_pages: usize) -> Result<DocumentTree> {
        if total_pages == 0 {
            return Err(PageTreeError::InvalidConfiguration(format!(
                "document '{document_id}' has no pages"
            )));
        }

        let full = PageRange::new(0, total_pages);
        let mut nodes = Vec::new();
        let root = match self.strategy {
            SplitStrategy::Bisect => self.bisect(document_id, full, 0, 0, None, true, &mut nodes),
            SplitStrategy::Midpoint => {
                self.bisect(document_id, full, 0, 0, None, false, &mut nodes)
            }
            SplitStrategy::Fixed { fanout } => {
                self.group_fixed(document_id, total_pages, fanout, &mut nodes)
            }
        };

        let mut tree = DocumentTree::new(document_id, title, total_pages, root, nodes)?;
        if matches!(self.strategy, SplitStrategy::Fixed { .. }) {
            assign_levels(&mut tree);
        }

        debug!(
            document_id,
            total_pages,
            max_chunk_size = self.max_chunk_size,
            strategy = ?self.strategy,
            nodes = tree.node_count(),
            depth = tree.max_depth(),
            "Split document"
        );
        Ok(tree)
    }

    /// Recursive bisection. Children are assembled in ordinal order after
    /// both halves are built.
    #[allow(clippy::too_many_arguments)]
    fn bisect(
        &self,
        document_id: &str,
        range: PageRange,
        level: usize,
        ordinal: usize,
        parent: Option<&NodeId>,
        chunk_aligned: bool,
        out: &mut Vec<TreeNode>,
    ) -> NodeId {
        if range.len() <= self.max_chunk_size {
            let mut leaf = TreeNode::leaf(document_id, level, range, ordinal);
            leaf.parent = parent.cloned();
            let id = leaf.id.clone();
            out.push(leaf);
            return id;
        }

        let mid = if chunk_aligned {
            let chunks = range.len().div_ceil(self.max_chunk_size);
            range.start + chunks.div_ceil(2) * self.max_chunk_size
        } else {
            range.start + range.len() / 2
        };

        let mut node = TreeNode::internal(document_id, level, range, ordinal);
        node.parent = parent.cloned();
        let (left, right) = range.split_at(mid);
        let children = vec![
            self.bisect(document_id, left, level + 1, 0, Some(&node.id), chunk_aligned, out),
            self.bisect(document_id, right, level + 1, 1, Some(&node.id), chunk_aligned, out),
        ];
        node.kind = NodeKind::Internal { children };
        let id = node.id.clone();
        out.push(node);
        id
    }

    /// Bottom-up grouping of fixed-size leaves. Levels are fixed up afterwards.
    fn group_fixed(
        &self,
        document_id: &str,
        total_pages: usize,
        fanout: usize,
        out: &mut Vec<TreeNode>,
    ) -> NodeId {
        let mut current: Vec<TreeNode> = (0..total_pages)
            .step_by(self.max_chunk_size)
            .enumerate()
            .map(|(i, start)| {
                let end = (start + self.max_chunk_size).min(total_pages);
                TreeNode::leaf(document_id, 0, PageRange::new(start, end), i)
            })
            .collect();

        while current.len() > 1 {
            let mut groups: Vec<Vec<TreeNode>> = Vec::new();
            let mut pending = current.into_iter().peekable();
            while pending.peek().is_some() {
                groups.push(pending.by_ref().take(fanout).collect());
            }
            // A lone trailing node joins the previous group instead of getting its own parent.
            if groups.len() > 1 && groups.last().is_some_and(|g| g.len() == 1) {
                if let Some(last) = groups.pop() {
                    if let Some(prev) = groups.last_mut() {
                        prev.extend(last);
                    }
                }
            }

            current = groups
                .into_iter()
                .enumerate()
                .map(|(ordinal, group)| {
                    let range = PageRange::new(group[0].range.start, group[group.len() - 1].range.end);
                    let mut parent = TreeNode::internal(document_id, 0, range, ordinal);
                    let mut children = Vec::with_capacity(group.len());
                    for (child_ordinal, mut child) in group.into_iter().enumerate() {
                        child.parent = Some(parent.id.clone());
                        child.ordinal = child_ordinal;
                        children.push(child.id.clone());
                        out.push(child);
                    }
                    parent.kind = NodeKind::Internal { children };
                    parent
                })
                .collect();
        }

        // total_pages > 0 guarantees at least one leaf.
        let mut root = current.remove(0);
        root.ordinal = 0;
        let id = root.id.clone();
        out.push(root);
        id
    }
}

/// Set each node's level to its parent's plus one, walking from the root.
fn assign_levels(tree: &mut DocumentTree) {
    let order: Vec<NodeId> = tree.pre_order().iter().map(|n| n.id.clone()).collect();
    for id in order {
        let Some(node) = tree.get(&id) else { continue };
        let level = node.level;
        let children = node.children().to_vec();
        for child in children {
            if let Some(child) = tree.get_mut(&child) {
                child.level = level + 1;
            }
        }
    }
}

/// Split with the default strategy; the title defaults to the document id.
pub fn split_document(
    document_id: &str,
    total_pages: usize,
    max_chunk_size: usize,
) -> Result<DocumentTree> {
    Splitter::new(max_chunk_size)?.split(document_id, document_id, total_pages)
}

/// `⌈log2 n⌉` for `n >= 1`.
pub fn ceil_log2(n: usize) -> usize {
    if n <= 1 {
        0
    } else {
        (usize::BITS - (n - 1).leading_zeros()) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::NodeStatus;

    fn leaf_ranges(tree: &DocumentTree) -> Vec<PageRange> {
        tree.leaves().iter().map(|n| n.range).collect()
    }

    fn assert_partitions(tree: &DocumentTree, total: usize) {
        let mut cursor = 0;
        for range in leaf_ranges(tree) {
            assert_eq!(range.start, cursor, "gap or overlap at page {cursor}");
            assert!(!range.is_empty());
            cursor = range.end;
        }
        assert_eq!(cursor, total);
    }

    #[test]
    fn test_hundred_pages_by_ten() {
        let tree = split_document("doc", 100, 10).unwrap();

        assert_eq!(tree.root().range, PageRange::new(0, 100));
        assert_eq!(tree.max_depth(), 4);
        let leaves = leaf_ranges(&tree);
        assert_eq!(leaves.len(), 10);
        for (i, range) in leaves.iter().enumerate() {
            assert_eq!(*range, PageRange::new(i * 10, i * 10 + 10));
        }
        assert!(tree.validate().is_ok());
    }

    #[test]
    fn test_single_node_tree() {
        let tree = split_document("doc", 7, 10).unwrap();
        assert_eq!(tree.node_count(), 1);
        assert!(tree.root().is_leaf());
        assert_eq!(tree.root().range, PageRange::new(0, 7));
        assert_eq!(tree.max_depth(), 0);
    }

    #[test]
    fn test_invalid_chunk_size() {
        assert!(matches!(
            Splitter::new(0),
            Err(PageTreeError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_empty_document_rejected() {
        assert!(matches!(
            split_document("doc", 0, 10),
            Err(PageTreeError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_bisect_properties_across_sizes() {
        for total in 1..=130 {
            for max_chunk in [1, 2, 3, 7, 10, 16] {
                let tree = split_document("doc", total, max_chunk).unwrap();
                tree.validate().unwrap();
                assert_partitions(&tree, total);
                assert_eq!(
                    tree.max_depth(),
                    ceil_log2(total.div_ceil(max_chunk)),
                    "total={total} max_chunk={max_chunk}"
                );
                for node in tree.nodes() {
                    assert_eq!(node.status, NodeStatus::Pending);
                    assert!(node.summary.is_none());
                    assert_eq!(node.is_leaf(), node.range.len() <= max_chunk);
                    if !node.is_leaf() {
                        assert_eq!(node.children().len(), 2);
                    }
                }
            }
        }
    }

    #[test]
    fn test_midpoint_halves_differ_by_at_most_one_page() {
        let splitter = Splitter::new(3)
            .unwrap()
            .with_strategy(SplitStrategy::Midpoint)
            .unwrap();
        for total in 1..=90 {
            let tree = splitter.split("doc", "t", total).unwrap();
            tree.validate().unwrap();
            assert_partitions(&tree, total);
            for node in tree.nodes().filter(|n| !n.is_leaf()) {
                let kids = tree.children(&node.id);
                assert_eq!(kids.len(), 2);
                assert!(kids[0].range.len().abs_diff(kids[1].range.len()) <= 1);
            }
            let expected = ceil_log2(total.div_ceil(3));
            assert!(tree.max_depth().abs_diff(expected) <= 1, "total={total}");
        }
    }

    #[test]
    fn test_fixed_fanout_groups() {
        let splitter = Splitter::new(10)
            .unwrap()
            .with_strategy(SplitStrategy::Fixed { fanout: 5 })
            .unwrap();
        let tree = splitter.split("doc", "t", 100).unwrap();
        tree.validate().unwrap();
        assert_partitions(&tree, 100);
        assert_eq!(tree.leaves().len(), 10);
        assert_eq!(tree.children(&tree.root().id).len(), 2);
        assert_eq!(tree.max_depth(), 2);

        // 11 leaves: the trailing one joins the previous group.
        let tree = splitter.split("doc", "t", 105).unwrap();
        tree.validate().unwrap();
        let top = tree.children(&tree.root().id);
        assert_eq!(top.len(), 2);
        assert_eq!(tree.children(&top[1].id).len(), 6);
    }

    #[test]
    fn test_fixed_fanout_rejects_one() {
        let result = Splitter::new(10)
            .unwrap()
            .with_strategy(SplitStrategy::Fixed { fanout: 1 });
        assert!(result.is_err());
    }

    #[test]
    fn test_strategy_from_str() {
        assert_eq!("bisect".parse::<SplitStrategy>().unwrap(), SplitStrategy::Bisect);
        assert_eq!("Midpoint".parse::<SplitStrategy>().unwrap(), SplitStrategy::Midpoint);
        assert_eq!(
            "fixed:3".parse::<SplitStrategy>().unwrap(),
            SplitStrategy::Fixed { fanout: 3 }
        );
        assert!("spiral".parse::<SplitStrategy>().is_err());
    }

    #[test]
    fn test_ceil_log2() {
        assert_eq!(ceil_log2(1), 0);
        assert_eq!(ceil_log2(2), 1);
        assert_eq!(ceil_log2(3), 2);
        assert_eq!(ceil_log2(8), 3);
        assert_eq!(ceil_log2(10), 4);
    }
}
