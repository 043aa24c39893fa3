//! Shared error type for the dispatch pipeline.

use thiserror::Error;

/// Errors surfaced by the ingestion dispatcher and its downstream clients.
///
/// Transient downstream failures (`Embedding`, `Storage`, `Http`) are opaque
/// to the retry layer: every one of them is retried up to the configured
/// limit before a batch is reported as failed. `Config` errors are fatal at
/// startup and never reach the retry layer.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Invalid or missing configuration; fatal at startup, no partial run.
    #[error("configuration error: {0}")]
    Config(String),

    /// Failure reported by the embedding service.
    #[error("embedding request failed: {0}")]
    Embedding(String),

    /// Failure reported by the vector store.
    #[error("vector store request failed: {0}")]
    Storage(String),

    /// A single query whose token cost exceeds the per-request budget.
    ///
    /// Unlike oversized document chunks (which are skipped with a warning),
    /// an oversized query is a caller error and is rejected outright.
    #[error("query too long: {tokens} tokens (limit {limit})")]
    OversizedQuery { tokens: usize, limit: usize },

    /// Transport-level failure talking to a downstream HTTP service.
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}
