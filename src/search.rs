//! Similarity search over leaf embeddings.
//!
//! Candidates are the leaves that carry an embedding, across every stored
//! document or scoped to one. Results are ordered by descending cosine
//! score with deterministic tie-breaking: ordinal, then document id, then
//! page position.

use crate::embeddings::{cosine_similarity, EmbeddingCapability};
use crate::error::{PageTreeError, Result};
use crate::store::TreeStore;
use crate::tree::{DocumentTree, NodeId, NodeStatus, PageRange};
use serde::Serialize;
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::debug;

/// Search parameters.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub top_k: usize,
    /// Hits scoring below this are dropped.
    pub threshold: f32,
    /// Restrict the search to one document.
    pub document_id: Option<String>,
    /// Drop leaves flagged as degraded even if they carry an embedding.
    pub exclude_degraded: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            top_k: 5,
            threshold: 0.0,
            document_id: None,
            exclude_degraded: false,
        }
    }
}

impl SearchOptions {
    pub fn new(top_k: usize) -> Self {
        Self {
            top_k,
            ..Default::default()
        }
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn in_document(mut self, document_id: impl Into<String>) -> Self {
        self.document_id = Some(document_id.into());
        self
    }

    pub fn excluding_degraded(mut self) -> Self {
        self.exclude_degraded = true;
        self
    }
}

/// A scored leaf.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub node_id: NodeId,
    pub document_id: String,
    pub range: PageRange,
    pub ordinal: usize,
    pub level: usize,
    pub score: f32,
    pub summary: String,
    pub status: NodeStatus,
}

impl SearchHit {
    /// Summary cut to at most `max_len` characters. The cut moves back to the
    /// last word boundary only when that keeps at least 80% of the text.
    pub fn preview(&self, max_len: usize) -> String {
        if self.summary.chars().count() <= max_len {
            return self.summary.clone();
        }
        let cut: String = self.summary.chars().take(max_len).collect();
        let trimmed = match cut.rfind(char::is_whitespace) {
            Some(pos) if cut[..pos].chars().count() * 5 >= max_len * 4 => &cut[..pos],
            _ => cut.as_str(),
        };
        format!("{}...", trimmed.trim_end())
    }
}

/// Score and order leaves of the given trees.
pub fn rank<'a>(
    trees: impl IntoIterator<Item = &'a DocumentTree>,
    query: &[f32],
    options: &SearchOptions,
) -> Result<Vec<SearchHit>> {
    if options.top_k == 0 {
        return Err(PageTreeError::InvalidQuery(
            "top_k must be at least 1".to_string(),
        ));
    }
    if query.is_empty() {
        return Err(PageTreeError::InvalidQuery(
            "query embedding is empty".to_string(),
        ));
    }
    if query.iter().any(|v| !v.is_finite()) {
        return Err(PageTreeError::InvalidQuery(
            "query embedding has non-finite components".to_string(),
        ));
    }

    let mut hits = Vec::new();
    for tree in trees {
        if let Some(scope) = &options.document_id {
            if &tree.id != scope {
                continue;
            }
        }
        for leaf in tree.leaves() {
            let Some(embedding) = leaf.embedding() else {
                continue;
            };
            if options.exclude_degraded && leaf.status == NodeStatus::Degraded {
                continue;
            }
            if embedding.len() != query.len() {
                return Err(PageTreeError::InvalidQuery(format!(
                    "query has dimension {}, stored embeddings have {}",
                    query.len(),
                    embedding.len()
                )));
            }

            let score = cosine_similarity(query, embedding);
            if score.is_nan() || score < options.threshold {
                continue;
            }
            hits.push(SearchHit {
                node_id: leaf.id.clone(),
                document_id: leaf.document_id.clone(),
                range: leaf.range,
                ordinal: leaf.ordinal,
                level: leaf.level,
                score,
                summary: leaf.summary_text().to_string(),
                status: leaf.status,
            });
        }
    }

    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.ordinal.cmp(&b.ordinal))
            .then_with(|| a.document_id.cmp(&b.document_id))
            .then_with(|| a.range.start.cmp(&b.range.start))
    });
    hits.truncate(options.top_k);
    Ok(hits)
}

/// Search over the trees held by a [`TreeStore`].
pub struct SearchEngine {
    store: Arc<TreeStore>,
}

impl SearchEngine {
    pub fn new(store: Arc<TreeStore>) -> Self {
        Self { store }
    }

    /// Rank leaves against a query embedding.
    pub async fn search(&self, query: &[f32], options: &SearchOptions) -> Result<Vec<SearchHit>> {
        let trees = match &options.document_id {
            Some(document_id) => match self.store.load(document_id).await {
                Ok(tree) => vec![tree],
                Err(PageTreeError::DocumentNotFound(_)) => Vec::new(),
                Err(e) => return Err(e),
            },
            None => self.store.load_all().await?,
        };
        let hits = rank(trees.iter().map(|t| t.as_ref()), query, options)?;
        debug!(
            documents = trees.len(),
            hits = hits.len(),
            top_k = options.top_k,
            "Similarity search finished"
        );
        Ok(hits)
    }

    /// Embed `query` and search with the resulting vector.
    pub async fn search_text(
        &self,
        query: &str,
        embedder: &dyn EmbeddingCapability,
        options: &SearchOptions,
    ) -> Result<Vec<SearchHit>> {
        if query.trim().is_empty() {
            return Err(PageTreeError::InvalidQuery("query text is empty".to_string()));
        }
        let vector = embedder
            .embed(query)
            .await
            .map_err(|e| PageTreeError::EmbeddingUnavailable(e.to_string()))?;
        self.search(&vector, options).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::MemoryGraph;
    use crate::splitter::split_document;
    use crate::testing::ScriptedEmbedder;

    /// Tree whose leaves carry the given embeddings in page order.
    fn tree_with(id: &str, embeddings: &[Vec<f32>]) -> DocumentTree {
        let mut tree = split_document(id, embeddings.len() * 10, 10).unwrap();
        let leaves: Vec<NodeId> = tree.leaves().iter().map(|l| l.id.clone()).collect();
        for (leaf, embedding) in leaves.iter().zip(embeddings) {
            let node = tree.get_mut(leaf).unwrap();
            node.set_embedding(embedding.clone());
            node.summary = Some(format!("leaf {}", node.range));
            node.status = NodeStatus::Ready;
        }
        for node in tree.nodes_mut() {
            if node.summary.is_none() {
                node.summary = Some("internal".to_string());
                node.status = NodeStatus::Ready;
            }
        }
        tree
    }

    /// Unit vector whose cosine with `[1, 0]` is `score`.
    fn at(score: f32) -> Vec<f32> {
        vec![score, (1.0 - score * score).sqrt()]
    }

    #[test]
    fn test_threshold_and_order() {
        let tree = tree_with("doc", &[at(0.9), at(0.6), at(0.75)]);
        let options = SearchOptions::new(5).with_threshold(0.7);
        let hits = rank([&tree], &[1.0, 0.0], &options).unwrap();

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].range, PageRange::new(0, 10));
        assert!((hits[0].score - 0.9).abs() < 1e-5);
        assert_eq!(hits[1].range, PageRange::new(20, 30));
        assert!((hits[1].score - 0.75).abs() < 1e-5);
    }

    #[test]
    fn test_top_k_and_sorting() {
        let tree = tree_with("doc", &[at(0.1), at(0.5), at(0.9), at(0.3), at(0.7)]);
        let hits = rank([&tree], &[1.0, 0.0], &SearchOptions::new(3)).unwrap();
        assert_eq!(hits.len(), 3);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn test_ties_break_by_ordinal_then_document() {
        let a = tree_with("a", &[at(0.8), at(0.8)]);
        let b = tree_with("b", &[at(0.8), at(0.8)]);
        let hits = rank([&b, &a], &[1.0, 0.0], &SearchOptions::new(4)).unwrap();
        let order: Vec<(&str, usize)> = hits
            .iter()
            .map(|h| (h.document_id.as_str(), h.ordinal))
            .collect();
        assert_eq!(order, vec![("a", 0), ("b", 0), ("a", 1), ("b", 1)]);
    }

    #[test]
    fn test_invalid_queries() {
        let tree = tree_with("doc", &[at(0.9)]);
        assert!(matches!(
            rank([&tree], &[1.0, 0.0], &SearchOptions::new(0)),
            Err(PageTreeError::InvalidQuery(_))
        ));
        assert!(matches!(
            rank([&tree], &[], &SearchOptions::new(1)),
            Err(PageTreeError::InvalidQuery(_))
        ));
        assert!(matches!(
            rank([&tree], &[1.0, 0.0, 0.0], &SearchOptions::new(1)),
            Err(PageTreeError::InvalidQuery(_))
        ));
    }

    #[test]
    fn test_leaves_without_embeddings_are_skipped() {
        let mut tree = tree_with("doc", &[at(0.9), at(0.8)]);
        let second = tree.leaves()[1].id.clone();
        let node = tree.get_mut(&second).unwrap();
        node.kind = crate::tree::NodeKind::Leaf { embedding: None };
        node.status = NodeStatus::Degraded;

        let hits = rank([&tree], &[1.0, 0.0], &SearchOptions::new(5)).unwrap();
        assert_eq!(hits.len(), 1);
        assert!(rank(Vec::<&DocumentTree>::new(), &[1.0, 0.0], &SearchOptions::new(5))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_exclude_degraded() {
        let mut tree = tree_with("doc", &[at(0.9), at(0.8)]);
        let first = tree.leaves()[0].id.clone();
        tree.get_mut(&first).unwrap().status = NodeStatus::Degraded;

        let all = rank([&tree], &[1.0, 0.0], &SearchOptions::new(5)).unwrap();
        let ready = rank(
            [&tree],
            &[1.0, 0.0],
            &SearchOptions::new(5).excluding_degraded(),
        )
        .unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].ordinal, 1);
    }

    #[test]
    fn test_preview_cuts_at_word_boundary() {
        let hit = SearchHit {
            node_id: NodeId::from("n"),
            document_id: "doc".to_string(),
            range: PageRange::new(0, 1),
            ordinal: 0,
            level: 0,
            score: 1.0,
            summary: "The quarterly report covers revenue growth".to_string(),
            status: NodeStatus::Ready,
        };
        assert_eq!(hit.preview(24), "The quarterly report...");
        assert_eq!(hit.preview(100), hit.summary);
    }

    #[test]
    fn test_preview_hard_cut_when_boundary_is_early() {
        let hit = SearchHit {
            node_id: NodeId::from("n"),
            document_id: "doc".to_string(),
            range: PageRange::new(0, 1),
            ordinal: 0,
            level: 0,
            score: 1.0,
            summary: "A verylongunbrokenidentifierthatkeepsgoing".to_string(),
            status: NodeStatus::Ready,
        };
        assert_eq!(hit.preview(10), "A verylong...");
    }

    #[test]
    fn test_non_finite_values_never_rank() {
        let tree = tree_with("doc", &[at(0.9)]);
        assert!(matches!(
            rank([&tree], &[f32::NAN, 0.0], &SearchOptions::new(5)),
            Err(PageTreeError::InvalidQuery(_))
        ));
        assert!(matches!(
            rank([&tree], &[f32::INFINITY, 0.0], &SearchOptions::new(5)),
            Err(PageTreeError::InvalidQuery(_))
        ));

        let poisoned = tree_with("doc", &[vec![f32::NAN, 0.0], at(0.95)]);
        let hits = rank(
            [&poisoned],
            &[1.0, 0.0],
            &SearchOptions::new(5).with_threshold(0.9),
        )
        .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].ordinal, 1);
    }

    #[tokio::test]
    async fn test_engine_scopes_to_document() {
        let store = Arc::new(TreeStore::new(Arc::new(MemoryGraph::new())));
        store.persist(&tree_with("a", &[at(0.9), at(0.2)])).await.unwrap();
        store.persist(&tree_with("b", &[at(0.95)])).await.unwrap();
        let engine = SearchEngine::new(store);

        let all = engine
            .search(&[1.0, 0.0], &SearchOptions::new(5))
            .await
            .unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].document_id, "b");

        let scoped = engine
            .search(&[1.0, 0.0], &SearchOptions::new(5).in_document("a"))
            .await
            .unwrap();
        assert!(scoped.iter().all(|h| h.document_id == "a"));
        assert_eq!(scoped.len(), 2);

    }

    #[tokio::test]
    async fn test_engine_unknown_document_yields_no_hits() {
        let store = Arc::new(TreeStore::new(Arc::new(MemoryGraph::new())));
        store.persist(&tree_with("a", &[at(0.9)])).await.unwrap();
        let engine = SearchEngine::new(store);

        let hits = engine
            .search(&[1.0, 0.0], &SearchOptions::new(5).in_document("missing"))
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_search_text_embeds_query() {
        let store = Arc::new(TreeStore::new(Arc::new(MemoryGraph::new())));
        store.persist(&tree_with("a", &[at(1.0), at(0.0)])).await.unwrap();
        let engine = SearchEngine::new(store);

        let embedder = ScriptedEmbedder::new(2).vector("revenue", vec![1.0, 0.0]);
        let hits = engine
            .search_text("revenue", &embedder, &SearchOptions::new(1))
            .await
            .unwrap();
        assert_eq!(hits[0].ordinal, 0);
        assert!(engine
            .search_text("  ", &embedder, &SearchOptions::new(1))
            .await
            .is_err());
    }
}
