//! Embedding service clients.
//!
//! The dispatcher treats the embedding service as an opaque collaborator
//! behind [`EmbeddingClient`]: a list of role-tagged texts goes in, one
//! vector per text comes back in input order, and the whole request fails as
//! a unit. Two implementations ship here: a deterministic offline mock for
//! tests and dry runs, and a JSON-over-HTTP client for predict-style
//! endpoints.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::types::IngestError;

/// Role of a text within an embedding request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbedRole {
    Document,
    Query,
}

/// One text in an embedding request payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedInput {
    pub role: EmbedRole,
    pub content: String,
}

impl EmbedInput {
    /// Input tagged for document-side retrieval.
    pub fn document(content: impl Into<String>) -> Self {
        Self {
            role: EmbedRole::Document,
            content: content.into(),
        }
    }

    /// Input tagged for query-side retrieval.
    pub fn query(content: impl Into<String>) -> Self {
        Self {
            role: EmbedRole::Query,
            content: content.into(),
        }
    }
}

/// Client for a remote embedding service.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Embeds every input, returning one vector per input in input order.
    async fn embed(&self, inputs: &[EmbedInput]) -> Result<Vec<Vec<f32>>, IngestError>;
}

/// Deterministic, offline embedding client.
///
/// Vectors are derived from a hash of the content, so identical texts embed
/// identically across calls and processes. Suitable for CI and pipeline
/// rehearsals, not for retrieval quality.
#[derive(Debug, Clone)]
pub struct MockEmbeddingClient {
    dims: usize,
}

impl MockEmbeddingClient {
    pub fn new() -> Self {
        Self { dims: 8 }
    }

    /// Overrides the vector dimensionality (default 8).
    #[must_use]
    pub fn with_dims(mut self, dims: usize) -> Self {
        self.dims = dims;
        self
    }
}

impl Default for MockEmbeddingClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingClient for MockEmbeddingClient {
    async fn embed(&self, inputs: &[EmbedInput]) -> Result<Vec<Vec<f32>>, IngestError> {
        Ok(inputs
            .iter()
            .map(|input| hash_to_vec(&input.content, self.dims))
            .collect())
    }
}

fn hash_to_vec(text: &str, dims: usize) -> Vec<f32> {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    let seed = hasher.finish();
    (0..dims)
        .map(|i| {
            let bits = seed.rotate_left((i % 8) as u32 * 8) ^ ((i as u64) << 24);
            (bits as f32) / u64::MAX as f32
        })
        .collect()
}

/// JSON-over-HTTP client for predict-style embedding endpoints.
///
/// POSTs `{"instances": [{"role": "...", "content": "..."}]}` and expects
/// `{"embeddings": [[...], ...]}` back, one vector per instance.
#[derive(Debug, Clone)]
pub struct HttpEmbeddingClient {
    http: reqwest::Client,
    endpoint: Url,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    instances: &'a [EmbedInput],
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl HttpEmbeddingClient {
    /// Builds a client with the crate's default HTTP settings.
    pub fn new(endpoint: Url) -> Result<Self, IngestError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("ingestsmith/", env!("CARGO_PKG_VERSION")))
            .use_rustls_tls()
            .build()?;
        Ok(Self { http, endpoint })
    }

    /// Builds a client over a caller-provided `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, endpoint: Url) -> Self {
        Self { http, endpoint }
    }
}

#[async_trait]
impl EmbeddingClient for HttpEmbeddingClient {
    async fn embed(&self, inputs: &[EmbedInput]) -> Result<Vec<Vec<f32>>, IngestError> {
        let response = self
            .http
            .post(self.endpoint.clone())
            .json(&EmbedRequest { instances: inputs })
            .send()
            .await?
            .error_for_status()?;
        let body: EmbedResponse = response.json().await?;
        if body.embeddings.len() != inputs.len() {
            return Err(IngestError::Embedding(format!(
                "endpoint returned {} embeddings for {} inputs",
                body.embeddings.len(),
                inputs.len()
            )));
        }
        Ok(body.embeddings)
    }
}
