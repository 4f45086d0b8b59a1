//! Scripted capabilities shared by unit tests.

use crate::document::Document;
use crate::embeddings::EmbeddingCapability;
use crate::error::CapabilityError;
use crate::summarizer::{SummarizationCapability, SummaryInput};
use crate::tree::PageRange;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// `n` pages whose text is "page 1", "page 2", ...
pub fn numbered_pages(n: usize) -> Document {
    Document::from_pages("test", (1..=n).map(|i| format!("page {i}")))
}

/// Summarizer whose output spells out the input it received.
///
/// Leaves summarize to `sum[start..end]`, internal nodes to their children's
/// summaries joined with ` + ` inside parentheses.
#[derive(Default)]
pub struct ScriptedSummarizer {
    always_transient: HashSet<PageRange>,
    transient_first: HashMap<PageRange, usize>,
    fatal: bool,
    delay: Option<Duration>,
    calls: Mutex<Vec<SummaryInput>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedSummarizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn always_transient(mut self, range: PageRange) -> Self {
        self.always_transient.insert(range);
        self
    }

    pub fn transient_first(mut self, range: PageRange, failures: usize) -> Self {
        self.transient_first.insert(range, failures);
        self
    }

    pub fn fatal(mut self) -> Self {
        self.fatal = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<SummaryInput> {
        self.calls.lock().unwrap().clone()
    }

    pub fn attempts_for(&self, range: PageRange) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.range() == range)
            .count()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SummarizationCapability for ScriptedSummarizer {
    async fn summarize(&self, input: &SummaryInput) -> Result<String, CapabilityError> {
        let range = input.range();
        let attempt = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(input.clone());
            calls.iter().filter(|c| c.range() == range).count()
        };

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fatal {
            return Err(CapabilityError::Fatal("invalid api key".to_string()));
        }
        if self.always_transient.contains(&range) {
            return Err(CapabilityError::Transient("rate limited".to_string()));
        }
        if let Some(&failures) = self.transient_first.get(&range) {
            if attempt <= failures {
                return Err(CapabilityError::Transient("rate limited".to_string()));
            }
        }

        Ok(match input {
            SummaryInput::PageText { range, .. } => format!("sum[{}..{}]", range.start, range.end),
            SummaryInput::ChildSummaries { summaries, .. } => format!("({})", summaries.join(" + ")),
        })
    }
}

/// Embedder with scripted vectors and failures.
///
/// Texts not listed in `vectors` embed to a unit vector on the first axis.
pub struct ScriptedEmbedder {
    dimension: usize,
    vectors: HashMap<String, Vec<f32>>,
    failing: HashSet<String>,
    fatal: bool,
    calls: AtomicUsize,
}

impl ScriptedEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            vectors: HashMap::new(),
            failing: HashSet::new(),
            fatal: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn vector(mut self, text: &str, vector: Vec<f32>) -> Self {
        self.vectors.insert(text.to_string(), vector);
        self
    }

    /// Always fail transiently for `text`.
    pub fn failing(mut self, text: &str) -> Self {
        self.failing.insert(text.to_string());
        self
    }

    pub fn fatal(mut self) -> Self {
        self.fatal = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingCapability for ScriptedEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, CapabilityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fatal {
            return Err(CapabilityError::Fatal("embedding model not found".to_string()));
        }
        if self.failing.contains(text) {
            return Err(CapabilityError::Transient("service unavailable".to_string()));
        }
        if let Some(vector) = self.vectors.get(text) {
            return Ok(vector.clone());
        }
        let mut vector = vec![0.0; self.dimension];
        if let Some(first) = vector.first_mut() {
            *first = 1.0;
        }
        Ok(vector)
    }
}
