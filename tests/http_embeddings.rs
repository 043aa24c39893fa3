//! Wire-level tests for the HTTP embedding client against a mock endpoint.

use httpmock::prelude::*;
use serde_json::json;
use url::Url;

use ingestsmith::{EmbedInput, EmbeddingClient, HttpEmbeddingClient, IngestError, RetryPolicy};

fn endpoint(server: &MockServer) -> Url {
    Url::parse(&server.url("/predict")).unwrap()
}

#[tokio::test]
async fn posts_instances_and_parses_embeddings() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/predict").json_body(json!({
                "instances": [
                    {"role": "document", "content": "hello"},
                    {"role": "query", "content": "world"},
                ]
            }));
            then.status(200).json_body(json!({
                "embeddings": [[0.5, 0.25], [0.75, 1.0]]
            }));
        })
        .await;

    let client = HttpEmbeddingClient::new(endpoint(&server)).unwrap();
    let inputs = vec![EmbedInput::document("hello"), EmbedInput::query("world")];
    let vectors = client.embed(&inputs).await.unwrap();

    assert_eq!(vectors, vec![vec![0.5, 0.25], vec![0.75, 1.0]]);
    mock.assert_async().await;
}

#[tokio::test]
async fn embedding_count_mismatch_is_an_error() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/predict");
            then.status(200)
                .json_body(json!({"embeddings": [[0.5], [0.25]]}));
        })
        .await;

    let client = HttpEmbeddingClient::new(endpoint(&server)).unwrap();
    let err = client
        .embed(&[EmbedInput::document("only one")])
        .await
        .unwrap_err();

    assert!(matches!(err, IngestError::Embedding(_)), "got: {err}");
}

#[tokio::test]
async fn server_error_status_surfaces_as_http_error() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/predict");
            then.status(503);
        })
        .await;

    let client = HttpEmbeddingClient::new(endpoint(&server)).unwrap();
    let err = client
        .embed(&[EmbedInput::document("text")])
        .await
        .unwrap_err();

    assert!(matches!(err, IngestError::Http(_)), "got: {err}");
}

#[tokio::test]
async fn persistent_outage_exhausts_the_retry_policy() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/predict");
            then.status(500);
        })
        .await;

    let client = HttpEmbeddingClient::new(endpoint(&server)).unwrap();
    let inputs = vec![EmbedInput::document("text")];
    let client = &client;
    let inputs = inputs.as_slice();

    // Zero base backoff keeps this real-clock test under the jitter bound.
    let outcome = RetryPolicy::new(2, 0)
        .run(move || client.embed(inputs))
        .await;

    assert!(!outcome.is_success());
    assert_eq!(outcome.attempts(), 3);
    assert_eq!(mock.hits_async().await, 3);
}
