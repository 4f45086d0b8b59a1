//! Error types for the page tree graph.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias using our custom error.
pub type Result<T> = std::result::Result<T, PageTreeError>;

/// Errors that can occur while building, persisting or querying page trees.
#[derive(Error, Debug)]
pub enum PageTreeError {
    /// Error reading or writing files.
    #[error("I/O error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Error during serialization/deserialization.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A setting was rejected before any work started.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The page source has no text for the requested range.
    #[error("Pages {start}..{end} are unavailable (document has {total} pages)")]
    RangeUnavailable {
        start: usize,
        end: usize,
        total: usize,
    },

    /// Persisted structure cannot be reconstructed without guessing.
    #[error("Corrupt tree for document '{document_id}': {reason}")]
    CorruptTree { document_id: String, reason: String },

    /// The summarization capability failed in a non-recoverable way.
    #[error("Summarization unavailable: {0}")]
    SummarizationUnavailable(String),

    /// The embedding capability failed in a non-recoverable way.
    #[error("Embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// The embedding capability returned a vector of the wrong size.
    #[error("Embedding dimension mismatch: expected {expected}, found {found}")]
    EmbeddingDimensionMismatch { expected: usize, found: usize },

    /// No node with the given id exists in the store.
    #[error("Node '{0}' not found")]
    NodeNotFound(String),

    /// The node is a root and has no parent.
    #[error("Node '{0}' is a root and has no parent")]
    NoParent(String),

    /// Search or navigation arguments were rejected.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// The ingestion deadline expired before the tree was complete.
    #[error("Ingestion of '{document_id}' timed out after {elapsed:?}")]
    IngestionTimeout {
        document_id: String,
        elapsed: Duration,
    },

    /// The document id is not present in the store.
    #[error("Document '{0}' not found")]
    DocumentNotFound(String),

    /// LLM API error.
    #[error("LLM API error: {0}")]
    LlmApi(String),

    /// LLM API returned a non-success HTTP status.
    #[error("LLM API error ({status}): {message}")]
    LlmStatus { status: u16, message: String },

    /// HTTP request error.
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// Configuration file error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl PageTreeError {
    /// Create an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a corrupt tree error.
    pub fn corrupt(document_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CorruptTree {
            document_id: document_id.into(),
            reason: reason.into(),
        }
    }
}

impl From<reqwest::Error> for PageTreeError {
    fn from(err: reqwest::Error) -> Self {
        PageTreeError::Http(err.to_string())
    }
}

impl From<serde_json::Error> for PageTreeError {
    fn from(err: serde_json::Error) -> Self {
        PageTreeError::Serialization(err.to_string())
    }
}

/// Failure reported by an external capability (summarizer, embedder).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CapabilityError {
    /// Worth retrying: rate limits, timeouts, 5xx responses.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Retrying cannot help: bad credentials, unknown model.
    #[error("fatal failure: {0}")]
    Fatal(String),
}

impl CapabilityError {
    pub fn is_transient(&self) -> bool {
        matches!(self, CapabilityError::Transient(_))
    }
}

impl From<PageTreeError> for CapabilityError {
    fn from(err: PageTreeError) -> Self {
        match err {
            PageTreeError::LlmStatus { status, message } => {
                if status == 429 || status >= 500 {
                    CapabilityError::Transient(format!("{status}: {message}"))
                } else {
                    CapabilityError::Fatal(format!("{status}: {message}"))
                }
            }
            PageTreeError::Http(message) => CapabilityError::Transient(message),
            PageTreeError::Serialization(message) => CapabilityError::Transient(message),
            other => CapabilityError::Fatal(other.to_string()),
        }
    }
}
