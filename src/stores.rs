//! Vector store sinks for embedded chunks.
//!
//! The dispatcher only needs a narrow contract from the store: adding a batch
//! of chunk/vector pairs is a single all-or-nothing operation. Query engines
//! and persistence details live behind other crates; [`InMemoryStore`] here
//! covers tests and local pipeline rehearsals.

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::batch::Chunk;
use crate::types::IngestError;

/// Write-side contract of a vector store.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Adds every chunk/vector pair as one all-or-nothing operation.
    ///
    /// Retried submissions may insert the same chunk twice; downstream
    /// consumers get at-least-once semantics.
    async fn add_batch(&self, entries: Vec<(Chunk, Vec<f32>)>) -> Result<(), IngestError>;

    /// Total number of stored chunks.
    async fn count(&self) -> Result<usize, IngestError>;
}

/// Vec-backed store for tests and local runs.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: Mutex<Vec<(Chunk, Vec<f32>)>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything stored so far.
    pub fn entries(&self) -> Vec<(Chunk, Vec<f32>)> {
        self.entries.lock().clone()
    }
}

#[async_trait]
impl VectorStore for InMemoryStore {
    async fn add_batch(&self, entries: Vec<(Chunk, Vec<f32>)>) -> Result<(), IngestError> {
        if entries.is_empty() {
            return Ok(());
        }
        self.entries.lock().extend(entries);
        Ok(())
    }

    async fn count(&self) -> Result<usize, IngestError> {
        Ok(self.entries.lock().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_batch_is_atomic_and_counted() {
        let store = InMemoryStore::new();
        assert_eq!(store.count().await.unwrap(), 0);

        let entries = vec![
            (Chunk::new("a"), vec![0.1]),
            (Chunk::new("b"), vec![0.2]),
        ];
        store.add_batch(entries).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 2);

        store.add_batch(Vec::new()).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 2);
    }
}
