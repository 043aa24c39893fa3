//! Token accounting for admission decisions.
//!
//! Embedding services meter request payloads in tokens rather than bytes, so
//! every packing decision in the dispatcher goes through a [`TokenCounter`].
//! Counting is a pure function: deterministic, side-effect free, and
//! infallible. A counter that cannot be constructed (for example a missing
//! tokenizer vocabulary) is a configuration error, not a runtime condition.

use crate::types::IngestError;

/// Returns the token cost of a text for per-request budget accounting.
pub trait TokenCounter: Send + Sync {
    /// Token cost of `text`. Deterministic, never fails.
    fn cost(&self, text: &str) -> usize;
}

/// Approximate counter assuming four characters per token.
///
/// Useful when no tokenizer vocabulary is available; the ratio matches the
/// rule of thumb for English prose and errs slightly high for dense markup,
/// which keeps packed batches inside the real service limit.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicTokenCounter;

const CHARS_PER_TOKEN: usize = 4;

impl TokenCounter for HeuristicTokenCounter {
    fn cost(&self, text: &str) -> usize {
        text.chars().count().div_ceil(CHARS_PER_TOKEN)
    }
}

/// BPE-backed counter using the `cl100k_base` vocabulary.
#[cfg(feature = "tiktoken")]
pub struct TiktokenCounter {
    bpe: tiktoken_rs::CoreBPE,
}

#[cfg(feature = "tiktoken")]
impl TiktokenCounter {
    /// Loads the vocabulary. Failure here means the bundled tokenizer data
    /// is unusable and the run must not start.
    pub fn new() -> Result<Self, IngestError> {
        let bpe = tiktoken_rs::cl100k_base().map_err(|err| IngestError::Config(err.to_string()))?;
        Ok(Self { bpe })
    }
}

#[cfg(feature = "tiktoken")]
impl std::fmt::Debug for TiktokenCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TiktokenCounter").finish_non_exhaustive()
    }
}

#[cfg(feature = "tiktoken")]
impl TokenCounter for TiktokenCounter {
    fn cost(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heuristic_counter_is_deterministic() {
        let counter = HeuristicTokenCounter;
        let text = "the quick brown fox jumps over the lazy dog";
        assert_eq!(counter.cost(text), counter.cost(text));
    }

    #[test]
    fn heuristic_counter_rounds_up() {
        let counter = HeuristicTokenCounter;
        assert_eq!(counter.cost(""), 0);
        assert_eq!(counter.cost("a"), 1);
        assert_eq!(counter.cost("abcd"), 1);
        assert_eq!(counter.cost("abcde"), 2);
    }

    #[test]
    fn heuristic_counter_counts_chars_not_bytes() {
        let counter = HeuristicTokenCounter;
        // Four multi-byte characters are still one heuristic token.
        assert_eq!(counter.cost("日本語字"), 1);
    }

    #[cfg(feature = "tiktoken")]
    #[test]
    fn tiktoken_counter_loads_and_counts() {
        let counter = TiktokenCounter::new().unwrap();
        assert_eq!(counter.cost(""), 0);
        let cost = counter.cost("hello world");
        assert!(cost >= 1, "non-empty text has non-zero cost, got {cost}");
        assert_eq!(cost, counter.cost("hello world"));
    }
}
