//! Token-budget batching for embedding requests.
//!
//! The [`AdaptiveBatcher`] turns an ordered run of chunks into batches whose
//! summed token cost stays inside the per-request budget. Packing is greedy:
//! it always tries the full group size first and shrinks the batch, not the
//! budget, when the leading prefix overflows. The policy deliberately leaves
//! token headroom unused in exchange for simplicity and locality; it is not
//! optimal bin-packing.

use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::tokens::TokenCounter;

/// One unit of text plus metadata to be embedded and stored.
///
/// Chunks are immutable once created. Batching moves each chunk into exactly
/// one [`Batch`]; nothing is duplicated or dropped silently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Unique identifier for this chunk.
    pub id: Uuid,
    /// The text payload submitted for embedding.
    pub content: String,
    /// Additional metadata as JSON (by convention a `source` URL).
    pub metadata: serde_json::Value,
}

impl Chunk {
    /// Creates a chunk with a fresh id and empty metadata.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            content: content.into(),
            metadata: serde_json::Value::Object(Default::default()),
        }
    }

    /// Records the source URL under the conventional `source` metadata key.
    #[must_use]
    pub fn with_source(mut self, source: &Url) -> Self {
        if let serde_json::Value::Object(map) = &mut self.metadata {
            map.insert(
                "source".to_string(),
                serde_json::Value::String(source.to_string()),
            );
        }
        self
    }

    /// Replaces the metadata wholesale.
    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// A budget-respecting group of chunks submitted as one downstream request.
///
/// The index is 1-based, globally monotonic across a run, and used only for
/// logging and ordering. A batch is created once, consumed once, and never
/// reused.
#[derive(Debug, Clone)]
pub struct Batch {
    index: usize,
    chunks: Vec<Chunk>,
    token_cost: usize,
}

impl Batch {
    /// 1-based position of this batch within the run.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Chunks carried by this batch, in input order.
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Number of chunks in the batch.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Returns `true` when the batch carries no chunks.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Summed token cost of every chunk, always within the packing budget.
    pub fn token_cost(&self) -> usize {
        self.token_cost
    }

    /// Consumes the batch and yields its chunks.
    pub fn into_chunks(self) -> Vec<Chunk> {
        self.chunks
    }
}

/// A chunk excluded from every batch because it exceeds the budget alone.
#[derive(Debug, Clone)]
pub struct OversizedChunk {
    pub chunk: Chunk,
    pub token_cost: usize,
}

/// Outcome of packing one run of chunks.
#[derive(Debug)]
pub struct BatchPlan {
    /// Budget-respecting batches covering every non-oversized chunk.
    pub batches: Vec<Batch>,
    /// Chunks skipped because their cost alone exceeds the budget.
    pub oversized: Vec<OversizedChunk>,
}

/// Greedy packer bounded by a target batch size and a token budget.
#[derive(Debug, Clone, Copy)]
pub struct AdaptiveBatcher {
    group_size: usize,
    token_budget: usize,
}

impl AdaptiveBatcher {
    pub fn new(group_size: usize, token_budget: usize) -> Self {
        Self {
            group_size,
            token_budget,
        }
    }

    /// Packs `chunks` into batches numbered from `first_index`.
    ///
    /// Starting at the configured group size, the packer sums the cost of the
    /// leading `size` chunks and shrinks `size` by one until the prefix fits
    /// the budget. A chunk that cannot fit even alone is logged and moved to
    /// the oversized list, and packing resumes at full size behind it.
    pub fn pack(
        &self,
        chunks: Vec<Chunk>,
        counter: &dyn TokenCounter,
        first_index: usize,
    ) -> BatchPlan {
        let mut queue: std::collections::VecDeque<(Chunk, usize)> = chunks
            .into_iter()
            .map(|chunk| {
                let cost = counter.cost(&chunk.content);
                (chunk, cost)
            })
            .collect();

        let mut batches = Vec::new();
        let mut oversized = Vec::new();
        let mut next_index = first_index;

        while !queue.is_empty() {
            let mut size = self.group_size.min(queue.len());
            loop {
                if size == 0 {
                    // The cursor chunk alone blows the budget. Skip it and
                    // resume packing at full size behind it.
                    if let Some((chunk, token_cost)) = queue.pop_front() {
                        tracing::warn!(
                            chunk = %chunk.id,
                            tokens = token_cost,
                            budget = self.token_budget,
                            "chunk exceeds token budget on its own, skipping"
                        );
                        oversized.push(OversizedChunk { chunk, token_cost });
                    }
                    break;
                }
                let total: usize = queue.iter().take(size).map(|(_, cost)| *cost).sum();
                if total <= self.token_budget {
                    let chunks: Vec<Chunk> = queue.drain(..size).map(|(chunk, _)| chunk).collect();
                    tracing::debug!(
                        batch = next_index,
                        chunks = chunks.len(),
                        tokens = total,
                        "packed batch"
                    );
                    batches.push(Batch {
                        index: next_index,
                        chunks,
                        token_cost: total,
                    });
                    next_index += 1;
                    break;
                }
                size -= 1;
            }
        }

        BatchPlan { batches, oversized }
    }
}
