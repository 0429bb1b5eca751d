use super::*;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_config(server_url: &str) -> EmbeddingConfig {
    let url = Url::parse(server_url).expect("server url is valid");
    EmbeddingConfig {
        protocol: url.scheme().to_string(),
        host: url.host_str().expect("server url has a host").to_string(),
        port: url.port().expect("server url has a port"),
        model: "test-embed".to_string(),
        batch_size: 8,
        dimension: 4,
    }
}

#[test]
fn client_configuration() {
    let config = EmbeddingConfig {
        protocol: "http".to_string(),
        host: "test-host".to_string(),
        port: 1234,
        model: "test-model".to_string(),
        batch_size: 128,
        dimension: 768,
    };
    let client = HttpEmbeddingClient::new(&config).expect("can create client");

    assert_eq!(client.model_id(), "test-model");
    assert_eq!(client.dimension(), 768);
    assert_eq!(client.batch_size, 128);
    assert_eq!(client.base_url.host_str(), Some("test-host"));
    assert_eq!(client.retry_attempts, DEFAULT_RETRY_ATTEMPTS);
}

#[test]
fn normalize_produces_unit_vectors() {
    let mut vector = vec![3.0, 4.0];
    l2_normalize(&mut vector);
    assert!((vector[0] - 0.6).abs() < 1e-6);
    assert!((vector[1] - 0.8).abs() < 1e-6);

    let mut zero = vec![0.0, 0.0];
    l2_normalize(&mut zero);
    assert_eq!(zero, vec![0.0, 0.0]);
}

#[test]
fn cosine_of_normalized_vectors() {
    assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
    assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
    assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
    assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
}

#[tokio::test(flavor = "multi_thread")]
async fn batch_embedding_round_trip() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "embeddings": [[1.0, 0.0, 0.0, 0.0], [0.0, 2.0, 0.0, 0.0]]
        })))
        .mount(&server)
        .await;

    let client = HttpEmbeddingClient::new(&test_config(&server.uri())).expect("can create client");

    let texts = vec!["first".to_string(), "second".to_string()];
    let handle = tokio::task::spawn_blocking(move || client.embed_batch(&texts));
    let vectors = handle
        .await
        .expect("task completes")
        .expect("embedding succeeds");

    assert_eq!(vectors.len(), 2);
    // Returned vectors are L2-normalized.
    assert!((vectors[1][1] - 1.0).abs() < 1e-6);
}

#[tokio::test(flavor = "multi_thread")]
async fn single_text_uses_prompt_api() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "embedding": [0.0, 0.0, 3.0, 0.0]
        })))
        .mount(&server)
        .await;

    let client = HttpEmbeddingClient::new(&test_config(&server.uri())).expect("can create client");

    let handle = tokio::task::spawn_blocking(move || client.embed("only"));
    let vector = handle
        .await
        .expect("task completes")
        .expect("embedding succeeds");

    assert_eq!(vector.len(), 4);
    assert!((vector[2] - 1.0).abs() < 1e-6);
}

#[tokio::test(flavor = "multi_thread")]
async fn dimension_mismatch_is_a_consistency_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "embedding": [1.0, 2.0]
        })))
        .mount(&server)
        .await;

    let client = HttpEmbeddingClient::new(&test_config(&server.uri())).expect("can create client");

    let handle = tokio::task::spawn_blocking(move || client.embed("short"));
    let result = handle.await.expect("task completes");

    assert!(matches!(result, Err(crate::RagError::Consistency(_))));
}

#[tokio::test(flavor = "multi_thread")]
async fn client_error_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(400))
        .expect(1)
        .mount(&server)
        .await;

    let client = HttpEmbeddingClient::new(&test_config(&server.uri()))
        .expect("can create client")
        .with_retry_attempts(3);

    let handle = tokio::task::spawn_blocking(move || client.embed("nope"));
    let result = handle.await.expect("task completes");

    assert!(matches!(result, Err(crate::RagError::Upstream { .. })));
}

#[test]
fn empty_batch_is_a_no_op() {
    let config = EmbeddingConfig::default();
    let client = HttpEmbeddingClient::new(&config).expect("can create client");
    let vectors = client.embed_batch(&[]).expect("empty batch succeeds");
    assert!(vectors.is_empty());
}
