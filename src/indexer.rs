//! Document ingestion.
//!
//! Ingestion runs the whole pipeline for one document:
//! 1. Split the page range into a balanced tree
//! 2. Summarize every node bottom-up
//! 3. Embed the leaves
//! 4. Commit the finished tree in one transaction
//!
//! The document lock is held from start to commit, so two ingestions of the
//! same id never interleave. Nothing is written until the tree is complete;
//! a failure or an expired deadline leaves the stored version untouched.

use crate::cache::ContentCache;
use crate::config::IngestConfig;
use crate::document::PageSource;
use crate::embeddings::{EmbeddingAssigner, EmbeddingCapability};
use crate::error::{PageTreeError, Result};
use crate::splitter::Splitter;
use crate::store::{DocumentRecord, TreeStore};
use crate::summarizer::{SummarizationCapability, Summarizer};
use crate::tree::{DocumentTree, TreeStats};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

/// Outcome of a successful ingestion.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub document: DocumentRecord,
    pub stats: TreeStats,
    pub elapsed: Duration,
}

/// Builds, summarizes, embeds and stores document trees.
pub struct TreeIndexer {
    summarizer: Arc<dyn SummarizationCapability>,
    embedder: Arc<dyn EmbeddingCapability>,
    store: Arc<TreeStore>,
    cache: Option<Arc<ContentCache>>,
}

impl TreeIndexer {
    pub fn new(
        summarizer: Arc<dyn SummarizationCapability>,
        embedder: Arc<dyn EmbeddingCapability>,
        store: Arc<TreeStore>,
    ) -> Self {
        Self {
            summarizer,
            embedder,
            store,
            cache: None,
        }
    }

    /// Reuse summaries and embeddings whose input did not change.
    pub fn with_cache(mut self, cache: Arc<ContentCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn store(&self) -> &Arc<TreeStore> {
        &self.store
    }

    /// Ingest a document using the deadline from `config`.
    pub async fn ingest(
        &self,
        document_id: &str,
        title: &str,
        total_pages: usize,
        pages: Arc<dyn PageSource>,
        config: &IngestConfig,
    ) -> Result<IngestReport> {
        self.ingest_with_deadline(document_id, title, total_pages, pages, config, config.deadline())
            .await
    }

    /// Ingest a document, giving up with `IngestionTimeout` once `deadline`
    /// passes before the tree is complete.
    pub async fn ingest_with_deadline(
        &self,
        document_id: &str,
        title: &str,
        total_pages: usize,
        pages: Arc<dyn PageSource>,
        config: &IngestConfig,
        deadline: Option<Duration>,
    ) -> Result<IngestReport> {
        if document_id.trim().is_empty() {
            return Err(PageTreeError::InvalidConfiguration(
                "document id must not be empty".to_string(),
            ));
        }
        config.validate()?;
        let splitter = Splitter::new(config.max_chunk_size)?.with_strategy(config.strategy)?;
        if total_pages > pages.page_count() {
            return Err(PageTreeError::RangeUnavailable {
                start: 0,
                end: total_pages,
                total: pages.page_count(),
            });
        }

        let guard = self.store.lock_document(document_id).await;
        let started = Instant::now();
        info!(document_id, total_pages, strategy = ?config.strategy, "Ingesting document");

        let work = self.build(&splitter, document_id, title, total_pages, pages, config);
        let tree = match deadline {
            Some(limit) => tokio::time::timeout(limit, work).await.map_err(|_| {
                PageTreeError::IngestionTimeout {
                    document_id: document_id.to_string(),
                    elapsed: started.elapsed(),
                }
            })??,
            None => work.await?,
        };

        self.store.persist_locked(&guard, &tree).await?;

        let stats = tree.stats();
        let elapsed = started.elapsed();
        info!(
            document_id,
            nodes = stats.total_nodes,
            leaves = stats.leaf_nodes,
            depth = stats.max_depth,
            degraded = stats.degraded_nodes,
            elapsed_ms = elapsed.as_millis() as u64,
            "Document ingested"
        );

        Ok(IngestReport {
            document: DocumentRecord {
                id: tree.id.clone(),
                title: tree.title.clone(),
                total_pages: tree.total_pages,
                root: tree.root.clone(),
            },
            stats,
            elapsed,
        })
    }

    /// Remove a stored document along with any cached summaries and
    /// embeddings for it. Returns whether the document existed.
    pub async fn delete(&self, document_id: &str) -> Result<bool> {
        let removed = self.store.delete(document_id).await?;
        if let Some(cache) = &self.cache {
            cache.forget_document(document_id);
        }
        info!(document_id, removed, "Document deleted");
        Ok(removed)
    }

    async fn build(
        &self,
        splitter: &Splitter,
        document_id: &str,
        title: &str,
        total_pages: usize,
        pages: Arc<dyn PageSource>,
        config: &IngestConfig,
    ) -> Result<DocumentTree> {
        let tree = splitter.split(document_id, title, total_pages)?;

        let mut summarizer = Summarizer::new(Arc::clone(&self.summarizer), pages)
            .with_retry(config.retry_policy())
            .with_concurrency(config.concurrency);
        let mut assigner = EmbeddingAssigner::new(Arc::clone(&self.embedder))
            .with_retry(config.retry_policy())
            .with_concurrency(config.concurrency);
        if let Some(cache) = &self.cache {
            summarizer = summarizer.with_cache(Arc::clone(cache));
            assigner = assigner.with_cache(Arc::clone(cache));
        }

        let tree = summarizer.fill_summaries(tree).await?;
        assigner.fill_embeddings(tree).await
    }
}
