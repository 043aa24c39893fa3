//! Adaptive, rate-limited, fault-tolerant batch dispatch for embedding
//! ingestion pipelines.
//!
//! ```text
//! Chunks ──► DispatchOrchestrator ──► contiguous groups (one task each)
//!                     │
//!                     ├─► AdaptiveBatcher ──► token-budget batches
//!                     │        └─► TokenCounter (cost accounting)
//!                     │
//!            ConcurrencyGate ──► RateLimiter ──► RetryPolicy
//!                     │
//!                     └─► EmbeddingClient ──► VectorStore
//!
//! Outcomes ──► DispatchResult (succeeded / failed / skipped tallies)
//! ```
//!
//! The crate solves one control-plane problem: submitting an unbounded list
//! of variable-length text chunks to a quota-bound embedding service without
//! exceeding a per-request token budget, a sliding-window request rate, or a
//! cap on in-flight requests — and recovering transient failures with
//! bounded exponential backoff along the way. Crawling, chunking, vector
//! indexing and retrieval live in other crates behind the narrow
//! [`EmbeddingClient`] and [`VectorStore`] contracts.
//!
//! # Quick start
//!
//! ```rust
//! use std::sync::Arc;
//! use ingestsmith::{
//!     Chunk, DispatchConfig, DispatchOrchestrator, HeuristicTokenCounter,
//!     InMemoryStore, MockEmbeddingClient,
//! };
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), ingestsmith::IngestError> {
//! let config = DispatchConfig::builder().retry_min_seconds(1).build()?;
//! let orchestrator = DispatchOrchestrator::new(
//!     config,
//!     Arc::new(MockEmbeddingClient::new()),
//!     Arc::new(InMemoryStore::new()),
//!     Arc::new(HeuristicTokenCounter),
//! )?;
//!
//! let chunks = vec![Chunk::new("first chunk"), Chunk::new("second chunk")];
//! let result = orchestrator.run(chunks).await;
//! assert_eq!(result.succeeded(), result.total_batches());
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod dispatch;
pub mod embeddings;
pub mod gate;
pub mod limiter;
pub mod retry;
pub mod stores;
pub mod tokens;
pub mod types;

pub use batch::{AdaptiveBatcher, Batch, BatchPlan, Chunk, OversizedChunk};
pub use dispatch::{
    BatchOutcome, BatchStatus, DispatchConfig, DispatchConfigBuilder, DispatchOrchestrator,
    DispatchResult, ShutdownToken,
};
pub use embeddings::{
    EmbedInput, EmbedRole, EmbeddingClient, HttpEmbeddingClient, MockEmbeddingClient,
};
pub use gate::{ConcurrencyGate, InFlightPermit};
pub use limiter::RateLimiter;
pub use retry::{RetryOutcome, RetryPolicy};
pub use stores::{InMemoryStore, VectorStore};
#[cfg(feature = "tiktoken")]
pub use tokens::TiktokenCounter;
pub use tokens::{HeuristicTokenCounter, TokenCounter};
pub use types::IngestError;
