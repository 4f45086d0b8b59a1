//! Leaf embeddings.
//!
//! Only leaves carry vectors, computed from their summary text. Every vector
//! in a deployment has the same dimension; a provider returning anything else
//! fails the whole ingestion.

use crate::cache::{CacheKey, ContentCache};
use crate::config::{EmbeddingConfig, EmbeddingProvider};
use crate::error::{CapabilityError, PageTreeError, Result};
use crate::llm::status_error;
use crate::retry::RetryPolicy;
use crate::tree::{DocumentTree, NodeId, NodeStatus};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// External text embedding capability.
#[async_trait]
pub trait EmbeddingCapability: Send + Sync {
    /// Dimension every returned vector must have.
    fn dimension(&self) -> usize;

    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, CapabilityError>;
}

/// Build the embedder selected by configuration.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingCapability>> {
    match config.provider {
        EmbeddingProvider::Hash => Ok(Arc::new(HashEmbedder::new(config.dimension)?)),
        EmbeddingProvider::OpenAi => Ok(Arc::new(OpenAiEmbedder::new(config.clone()))),
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a str,
    model: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Client for an OpenAI-compatible `/v1/embeddings` endpoint.
pub struct OpenAiEmbedder {
    client: Client,
    config: EmbeddingConfig,
}

impl OpenAiEmbedder {
    pub fn new(config: EmbeddingConfig) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client, config }
    }

    fn endpoint(&self) -> String {
        let base = self.config.api_base.trim_end_matches('/');
        format!("{}/v1/embeddings", base)
    }

    async fn request(&self, text: &str) -> Result<Vec<f32>> {
        let response = self
            .client
            .post(self.endpoint())
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&EmbeddingRequest {
                input: text,
                model: &self.config.model,
            })
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(status_error(status.as_u16(), body));
        }

        let parsed: EmbeddingResponse = serde_json::from_str(&body)?;
        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| PageTreeError::Serialization("empty embedding response".to_string()))
    }
}

#[async_trait]
impl EmbeddingCapability for OpenAiEmbedder {
    fn dimension(&self) -> usize {
        self.config.dimension
    }

    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, CapabilityError> {
        Ok(self.request(text).await?)
    }
}

/// Deterministic bag-of-words embedder that never leaves the process.
///
/// Each lowercase word is hashed into one signed slot, then the vector is
/// L2-normalized. Texts sharing vocabulary score higher under cosine
/// similarity, which is enough for offline use and tests.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(PageTreeError::InvalidConfiguration(
                "embedding dimension must be greater than zero".to_string(),
            ));
        }
        Ok(Self { dimension })
    }

    pub fn encode(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0_f32; self.dimension];

        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let digest = Sha256::digest(word.to_lowercase().as_bytes());
            let mut slot = [0u8; 8];
            slot.copy_from_slice(&digest[..8]);
            let index = (u64::from_le_bytes(slot) % self.dimension as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[index] += sign;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl EmbeddingCapability for HashEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, CapabilityError> {
        Ok(self.encode(text))
    }
}

/// Cosine similarity in `[-1, 1]`; zero when either vector has no magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

/// Attaches embeddings to every summarized leaf of a tree.
pub struct EmbeddingAssigner {
    capability: Arc<dyn EmbeddingCapability>,
    retry: RetryPolicy,
    concurrency: usize,
    cache: Option<Arc<ContentCache>>,
}

impl EmbeddingAssigner {
    pub fn new(capability: Arc<dyn EmbeddingCapability>) -> Self {
        Self {
            capability,
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

    /// Embed each leaf's summary.
    ///
    /// Leaves already degraded by summarization are left without a vector.
    /// A leaf whose embedding keeps failing transiently becomes degraded; a
    /// fatal failure or a vector of the wrong size fails the whole call.
    pub async fn fill_embeddings(&self, mut tree: DocumentTree) -> Result<DocumentTree> {
        let expected = self.capability.dimension();
        let mut queue: VecDeque<(NodeId, String)> = tree
            .leaves()
            .into_iter()
            .filter(|leaf| leaf.status != NodeStatus::Degraded)
            .map(|leaf| (leaf.id.clone(), leaf.summary_text().to_string()))
            .collect();
        let mut tasks: JoinSet<(NodeId, Option<CacheKey>, std::result::Result<Vec<f32>, CapabilityError>)> =
            JoinSet::new();
        let mut embedded = 0usize;
        let mut degraded = 0usize;

        loop {
            while tasks.len() < self.concurrency {
                let Some((id, text)) = queue.pop_front() else { break };
                let key = match (&self.cache, tree.get(&id)) {
                    (Some(_), Some(leaf)) => Some(CacheKey::new(&tree.id, leaf.range, &text)),
                    _ => None,
                };

                if let (Some(cache), Some(key)) = (&self.cache, &key) {
                    if let Some(vector) = cache.embedding(key) {
                        if vector.len() == expected {
                            debug!(node = %id, "Reusing cached embedding");
                            attach(&mut tree, &id, vector);
                            embedded += 1;
                            continue;
                        }
                    }
                }

                let capability = Arc::clone(&self.capability);
                let retry = self.retry;
                tasks.spawn(async move {
                    let result = retry.run("embed", |_| capability.embed(&text)).await;
                    (id, key, result)
                });
            }

            let Some(joined) = tasks.join_next().await else {
                break;
            };
            let (id, key, result) = joined.map_err(|e| {
                PageTreeError::EmbeddingUnavailable(format!("embedding task failed: {e}"))
            })?;

            match result {
                Ok(vector) => {
                    if vector.len() != expected {
                        return Err(PageTreeError::EmbeddingDimensionMismatch {
                            expected,
                            found: vector.len(),
                        });
                    }
                    if let (Some(cache), Some(key)) = (&self.cache, key) {
                        cache.put_embedding(key, vector.clone());
                    }
                    attach(&mut tree, &id, vector);
                    embedded += 1;
                }
                Err(CapabilityError::Transient(reason)) => {
                    warn!(
                        document_id = %tree.id,
                        node = %id,
                        reason = %reason,
                        "Embedding retries exhausted, degrading leaf"
                    );
                    if let Some(leaf) = tree.get_mut(&id) {
                        leaf.status = NodeStatus::Degraded;
                    }
                    degraded += 1;
                }
                Err(CapabilityError::Fatal(reason)) => {
                    return Err(PageTreeError::EmbeddingUnavailable(reason));
                }
            }
        }

        info!(
            document_id = %tree.id,
            embedded,
            degraded,
            dimension = expected,
            "Leaf embeddings filled"
        );
        Ok(tree)
    }
}

fn attach(tree: &mut DocumentTree, id: &NodeId, vector: Vec<f32>) {
    if let Some(leaf) = tree.get_mut(id) {
        leaf.set_embedding(vector);
    }
}
