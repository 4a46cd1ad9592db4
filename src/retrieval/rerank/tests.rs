use super::*;
use serde_json::{Value, json};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Scores each text by its length, returned in descending score order like a real
/// rerank server.
struct LengthScores;

impl Respond for LengthScores {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: Value = serde_json::from_slice(&request.body).expect("request body is json");
        let texts = body["texts"].as_array().cloned().unwrap_or_default();
        let mut ranked: Vec<Value> = texts
            .iter()
            .enumerate()
            .map(|(index, text)| {
                json!({"index": index, "score": text.as_str().map_or(0, str::len) as f32})
            })
            .collect();
        ranked.sort_by(|a, b| {
            let score = |v: &Value| v["score"].as_f64().unwrap_or_default();
            score(b).total_cmp(&score(a))
        });
        ResponseTemplate::new(200).set_body_json(ranked)
    }
}

fn config_for(server: &MockServer) -> RerankConfig {
    let url = Url::parse(&server.uri()).expect("mock server uri is a valid url");
    RerankConfig {
        host: url.host_str().unwrap_or("127.0.0.1").to_string(),
        port: url.port().unwrap_or(80),
        batch_size: 4,
        ..RerankConfig::default()
    }
}

fn texts(items: &[&str]) -> Vec<String> {
    items.iter().map(|item| (*item).to_string()).collect()
}

#[test]
fn config_validation() {
    assert!(RerankConfig::default().validate().is_ok());

    let config = RerankConfig {
        batch_size: 0,
        ..RerankConfig::default()
    };
    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidRerankBatchSize(0))
    ));

    let config = RerankConfig {
        protocol: "ftp".to_string(),
        ..RerankConfig::default()
    };
    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidProtocol(_))
    ));

    let config = RerankConfig {
        timeout_ms: 0,
        ..RerankConfig::default()
    };
    assert!(matches!(config.validate(), Err(ConfigError::InvalidTimeout(0))));
}

#[tokio::test]
async fn scores_come_back_in_input_order() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rerank"))
        .and(body_partial_json(json!({"query": "what is rust"})))
        .respond_with(LengthScores)
        .expect(1)
        .mount(&server)
        .await;

    let reranker = HttpReranker::new(&config_for(&server)).expect("valid config");
    assert_eq!(reranker.batch_size(), 4);

    let scores = reranker
        .rerank("what is rust", &texts(&["ab", "abcd", "a"]))
        .await
        .expect("rerank should succeed");
    assert_eq!(scores, vec![2.0, 4.0, 1.0]);
}

#[tokio::test]
async fn empty_input_makes_no_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(LengthScores)
        .expect(0)
        .mount(&server)
        .await;

    let reranker = HttpReranker::new(&config_for(&server)).expect("valid config");
    let scores = reranker.rerank("q", &[]).await.expect("nothing to do");
    assert!(scores.is_empty());
}

#[tokio::test]
async fn missing_scores_are_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rerank"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([{"index": 0, "score": 0.9}])),
        )
        .mount(&server)
        .await;

    let reranker = HttpReranker::new(&config_for(&server)).expect("valid config");
    let result = reranker.rerank("q", &texts(&["one", "two"])).await;
    match result {
        Err(RagError::Rerank(message)) => assert!(message.contains("no score for text 1")),
        other => panic!("expected rerank error, got {other:?}"),
    }
}

#[tokio::test]
async fn out_of_range_index_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rerank"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([{"index": 5, "score": 0.9}])),
        )
        .mount(&server)
        .await;

    let reranker = HttpReranker::new(&config_for(&server)).expect("valid config");
    let result = reranker.rerank("q", &texts(&["one"])).await;
    assert!(matches!(result, Err(RagError::Rerank(_))));
}

#[tokio::test]
async fn server_errors_become_rerank_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rerank"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;

    let reranker = HttpReranker::new(&config_for(&server))
        .expect("valid config")
        .with_retry_attempts(2)
        .with_retry_backoff(Duration::from_millis(10));
    let result = reranker.rerank("q", &texts(&["one"])).await;
    assert!(matches!(result, Err(RagError::Rerank(_))));
}

#[tokio::test]
async fn health_check_hits_health_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let reranker = HttpReranker::new(&config_for(&server)).expect("valid config");
    let healthy = tokio::task::spawn_blocking(move || reranker.health_check())
        .await
        .expect("blocking task should finish");
    assert!(healthy.is_ok());
}
