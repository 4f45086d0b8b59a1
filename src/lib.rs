//! Page Tree Graph - hierarchical summaries of large documents, stored as a graph.
//!
//! A document's page range is split into a balanced tree. Leaves summarize
//! their own pages; every internal node summarizes its children's summaries,
//! so the root ends up with a summary of the whole document. Leaves also get
//! an embedding of their summary. The finished tree is committed to a graph
//! backend and can then be searched by similarity or walked structurally.
//!
//! # Quick Start
//!
//! ```no_run
//! use page_tree_graph::{
//!     config::Config,
//!     document::Document,
//!     embeddings::create_embedder,
//!     indexer::TreeIndexer,
//!     llm::LlmClient,
//!     navigator::Navigator,
//!     persistence::FileGraph,
//!     search::{SearchEngine, SearchOptions},
//!     store::TreeStore,
//!     summarizer::LlmSummarizer,
//! };
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     config.validate()?;
//!
//!     let graph = FileGraph::open(&config.store.data_dir, config.store.format).await?;
//!     let store = Arc::new(TreeStore::new(Arc::new(graph)));
//!     let embedder = create_embedder(&config.embedding)?;
//!     let summarizer = Arc::new(LlmSummarizer::new(LlmClient::new(config.llm.clone())));
//!
//!     // Build and store the tree
//!     let document = Document::from_text_file(Path::new("report.txt"))?;
//!     let (title, pages) = (document.name.clone(), document.page_count());
//!     let indexer = TreeIndexer::new(summarizer, embedder.clone(), store.clone());
//!     indexer
//!         .ingest("report", &title, pages, Arc::new(document), &config.ingest)
//!         .await?;
//!
//!     // Search it
//!     let engine = SearchEngine::new(store.clone());
//!     let hits = engine
//!         .search_text("quarterly revenue", embedder.as_ref(), &SearchOptions::new(5))
//!         .await?;
//!
//!     // Walk around the best hit
//!     let navigator = Navigator::new(store);
//!     if let Some(hit) = hits.first() {
//!         let context = navigator.context(&hit.node_id).await?;
//!         println!("{} levels deep", context.breadcrumb.len());
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **Splitter**: partitions the page range into a balanced tree
//! - **Summarizer**: post-order summaries with bounded concurrency and retries
//! - **EmbeddingAssigner**: embeddings for leaves only
//! - **TreeStore**: graph mapping, validation, snapshots and per-document locks
//! - **SearchEngine** / **Navigator**: read-only queries over stored trees

pub mod cache;
pub mod config;
pub mod document;
pub mod embeddings;
pub mod error;
pub mod graph;
pub mod indexer;
pub mod llm;
pub mod logging;
pub mod navigator;
pub mod persistence;
pub mod retry;
pub mod search;
pub mod splitter;
pub mod store;
pub mod summarizer;
pub mod tree;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use config::Config;
pub use document::{Document, PageSource};
pub use error::{CapabilityError, PageTreeError, Result};
pub use indexer::{IngestReport, TreeIndexer};
pub use llm::LlmClient;
pub use navigator::Navigator;
pub use search::{SearchEngine, SearchHit, SearchOptions};
pub use splitter::{SplitStrategy, Splitter};
pub use store::{GraphBackend, TreeStore};
pub use tree::{DocumentTree, NodeId, NodeStatus, PageRange, TreeNode};
