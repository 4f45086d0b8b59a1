//! Bottom-up summary aggregation.
//!
//! Leaves are summarized from their own page text, internal nodes from the
//! ordered summaries of their children. Scheduling is an explicit post-order
//! work queue: every internal node tracks how many children are still
//! outstanding and becomes ready when that count reaches zero. At most
//! `concurrency` capability calls are in flight at once.
//!
//! Transient failures are retried with exponential backoff; once the budget
//! is spent the node gets a placeholder summary and status `degraded`, and
//! the rest of the tree carries on. A fatal failure aborts the whole fill.

use crate::cache::{CacheKey, ContentCache};
use crate::document::PageSource;
use crate::error::{CapabilityError, PageTreeError, Result};
use crate::llm::{LlmClient, Prompts};
use crate::retry::RetryPolicy;
use crate::tree::{DocumentTree, NodeId, NodeStatus, PageRange, TreeNode};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// What a node is summarized from.
#[derive(Debug, Clone, PartialEq)]
pub enum SummaryInput {
    /// Raw text of a leaf's pages.
    PageText { range: PageRange, text: String },
    /// Children's summaries in ordinal order.
    ChildSummaries {
        range: PageRange,
        summaries: Vec<String>,
    },
}

impl SummaryInput {
    pub fn range(&self) -> PageRange {
        match self {
            SummaryInput::PageText { range, .. } | SummaryInput::ChildSummaries { range, .. } => {
                *range
            }
        }
    }

    /// The text the capability will actually read.
    pub fn body(&self) -> String {
        match self {
            SummaryInput::PageText { text, .. } => text.clone(),
            SummaryInput::ChildSummaries { summaries, .. } => summaries.join("\n\n"),
        }
    }
}

/// External summarization capability.
#[async_trait]
pub trait SummarizationCapability: Send + Sync {
    async fn summarize(&self, input: &SummaryInput) -> std::result::Result<String, CapabilityError>;
}

/// Summarization through an OpenAI-compatible chat model.
pub struct LlmSummarizer {
    client: LlmClient,
}

impl LlmSummarizer {
    pub fn new(client: LlmClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SummarizationCapability for LlmSummarizer {
    async fn summarize(&self, input: &SummaryInput) -> std::result::Result<String, CapabilityError> {
        let range = input.range().to_string();
        let (system, prompt) = match input {
            SummaryInput::PageText { text, .. } => (
                Prompts::system_summarizer(),
                Prompts::leaf_summary()
                    .replace("{page_range}", &range)
                    .replace("{content}", text),
            ),
            SummaryInput::ChildSummaries { summaries, .. } => {
                let numbered = summaries
                    .iter()
                    .enumerate()
                    .map(|(i, s)| format!("{}. {}", i + 1, s))
                    .collect::<Vec<_>>()
                    .join("\n\n");
                (
                    Prompts::system_synthesizer(),
                    Prompts::combine_summaries()
                        .replace("{page_range}", &range)
                        .replace("{summaries}", &numbered),
                )
            }
        };

        let summary = self.client.complete(Some(system), &prompt).await?;
        let summary = summary.trim();
        if summary.is_empty() {
            return Err(CapabilityError::Transient(
                "model returned an empty summary".to_string(),
            ));
        }
        Ok(summary.to_string())
    }
}

/// Deterministic placeholder for a node whose summarization gave up.
pub fn fallback_summary(node: &TreeNode) -> String {
    if node.is_leaf() {
        format!("[Summary unavailable for {}]", node.range)
    } else {
        format!(
            "[Summary unavailable for {} ({} sections)]",
            node.range,
            node.children().len()
        )
    }
}

/// Fills every node's summary, children before parents.
pub struct Summarizer {
    capability: Arc<dyn SummarizationCapability>,
    pages: Arc<dyn PageSource>,
    retry: RetryPolicy,
    concurrency: usize,
    cache: Option<Arc<ContentCache>>,
}

impl Summarizer {
    pub fn new(capability: Arc<dyn SummarizationCapability>, pages: Arc<dyn PageSource>) -> Self {
        Self {
            capability,
            pages,
            retry: RetryPolicy::default(),
            concurrency: 4,
            cache: None,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_cache(mut self, cache: Arc<ContentCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Summarize every node. All nodes end `ready` or `degraded`.
    pub async fn fill_summaries(&self, mut tree: DocumentTree) -> Result<DocumentTree> {
        let mut remaining: HashMap<NodeId, usize> = tree
            .nodes()
            .filter(|n| !n.is_leaf())
            .map(|n| (n.id.clone(), n.children().len()))
            .collect();
        let mut ready: VecDeque<NodeId> = tree.leaves().iter().map(|n| n.id.clone()).collect();
        let mut tasks: JoinSet<(NodeId, Option<CacheKey>, std::result::Result<String, CapabilityError>)> =
            JoinSet::new();
        let mut degraded = 0usize;

        loop {
            while tasks.len() < self.concurrency {
                let Some(id) = ready.pop_front() else { break };
                let input = self.input_for(&tree, &id)?;
                let key = self
                    .cache
                    .as_ref()
                    .map(|_| CacheKey::new(&tree.id, input.range(), &input.body()));

                if let (Some(cache), Some(key)) = (&self.cache, &key) {
                    if let Some(summary) = cache.summary(key) {
                        debug!(node = %id, "Reusing cached summary");
                        complete(&mut tree, &mut remaining, &mut ready, &id, summary, NodeStatus::Ready);
                        continue;
                    }
                }

                let capability = Arc::clone(&self.capability);
                let retry = self.retry;
                tasks.spawn(async move {
                    let label = format!("summarize {}", input.range());
                    let result = retry
                        .run(&label, |_| capability.summarize(&input))
                        .await;
                    (id, key, result)
                });
            }

            let Some(joined) = tasks.join_next().await else {
                break;
            };
            let (id, key, result) = joined.map_err(|e| {
                PageTreeError::SummarizationUnavailable(format!("summarization task failed: {e}"))
            })?;

            match result {
                Ok(summary) => {
                    if let (Some(cache), Some(key)) = (&self.cache, key) {
                        cache.put_summary(key, summary.clone());
                    }
                    complete(&mut tree, &mut remaining, &mut ready, &id, summary, NodeStatus::Ready);
                }
                Err(CapabilityError::Transient(reason)) => {
                    let Some(node) = tree.get(&id) else { continue };
                    warn!(
                        document_id = %tree.id,
                        node = %id,
                        range = %node.range,
                        reason = %reason,
                        "Summarization retries exhausted, degrading node"
                    );
                    let placeholder = fallback_summary(node);
                    degraded += 1;
                    complete(&mut tree, &mut remaining, &mut ready, &id, placeholder, NodeStatus::Degraded);
                }
                Err(CapabilityError::Fatal(reason)) => {
                    // Dropping the join set aborts the calls still in flight.
                    return Err(PageTreeError::SummarizationUnavailable(reason));
                }
            }
        }

        info!(
            document_id = %tree.id,
            nodes = tree.node_count(),
            degraded,
            "Summaries filled"
        );
        Ok(tree)
    }

    fn input_for(&self, tree: &DocumentTree, id: &NodeId) -> Result<SummaryInput> {
        let node = tree
            .get(id)
            .ok_or_else(|| PageTreeError::NodeNotFound(id.to_string()))?;

        if node.is_leaf() {
            let text = self.pages.text_for_range(node.range.start, node.range.end)?;
            Ok(SummaryInput::PageText {
                range: node.range,
                text,
            })
        } else {
            let summaries = tree
                .children(id)
                .iter()
                .map(|child| child.summary_text().to_string())
                .collect();
            Ok(SummaryInput::ChildSummaries {
                range: node.range,
                summaries,
            })
        }
    }
}

/// Record a node's summary and release its parent once all siblings are done.
fn complete(
    tree: &mut DocumentTree,
    remaining: &mut HashMap<NodeId, usize>,
    ready: &mut VecDeque<NodeId>,
    id: &NodeId,
    summary: String,
    status: NodeStatus,
) {
    let Some(node) = tree.get_mut(id) else { return };
    node.summary = Some(summary);
    node.status = status;

    if let Some(parent) = node.parent.clone() {
        if let Some(count) = remaining.get_mut(&parent) {
            *count -= 1;
            if *count == 0 {
                ready.push_back(parent);
            }
        }
    }
}
