use super::*;
use crate::config::{EmbeddingConfig, SummarizerConfig};
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn summarizer_config(base_url: String, api_key: Option<&str>) -> SummarizerConfig {
    SummarizerConfig {
        base_url,
        api_key: api_key.map(ToString::to_string),
        ..Default::default()
    }
}

fn embedding_config(base_url: String) -> EmbeddingConfig {
    EmbeddingConfig {
        base_url: Some(base_url),
        model: Some("embed-test".to_string()),
        api_key: Some("test-key".to_string()),
        ..Default::default()
    }
}

#[test]
fn compose_embed_text_joins_and_truncates() {
    let text = compose_embed_text("标题", "摘要", "正文内容", 2000);
    assert_eq!(text, "标题\n摘要\n正文内容");

    // Truncation counts chars, not bytes, and happens after concatenation.
    let truncated = compose_embed_text("标题", "摘要", &"长".repeat(3000), 10);
    assert_eq!(truncated.chars().count(), 10);
    assert!(truncated.starts_with("标题\n摘要\n"));
}

#[test]
fn summarizer_without_credential_is_disabled() {
    let summarizer = Summarizer::new(&summarizer_config(
        "http://localhost:1/chat".to_string(),
        None,
    ));
    assert!(!summarizer.is_enabled());

    // Disabled is a valid state: the sentinel comes back without any
    // network traffic and without consuming retry budget.
    assert_eq!(
        summarizer.summarize("通知正文").as_deref(),
        Some(SUMMARIZER_DISABLED_SENTINEL)
    );
}

#[tokio::test]
async fn summarizer_parses_and_cleans_completion() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat"))
        .and(header("Authorization", "Bearer test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{
                "message": {
                    "content": "<think>推理过程</think># 摘要\n商学院公示国家奖学金候选人名单。"
                }
            }]
        })))
        .mount(&server)
        .await;

    let summarizer = Summarizer::new(&summarizer_config(
        format!("{}/chat", server.uri()),
        Some("test-key"),
    ));

    let summary = tokio::task::spawn_blocking(move || summarizer.summarize("正文"))
        .await
        .expect("task should join");
    assert_eq!(
        summary.as_deref(),
        Some("摘要\n商学院公示国家奖学金候选人名单。")
    );
}

#[tokio::test]
async fn summarizer_returns_none_on_error_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let summarizer = Summarizer::new(&summarizer_config(
        format!("{}/chat", server.uri()),
        Some("test-key"),
    ));

    let summary = tokio::task::spawn_blocking(move || summarizer.summarize("正文"))
        .await
        .expect("task should join");
    assert_eq!(summary, None);
}

#[tokio::test]
async fn summarizer_returns_none_on_empty_choices() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
        .mount(&server)
        .await;

    let summarizer = Summarizer::new(&summarizer_config(
        format!("{}/chat", server.uri()),
        Some("test-key"),
    ));

    let summary = tokio::task::spawn_blocking(move || summarizer.summarize("正文"))
        .await
        .expect("task should join");
    assert_eq!(summary, None);
}

#[tokio::test]
async fn embedder_returns_vectors_in_order() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                {"embedding": [0.1, 0.2]},
                {"embedding": [0.3, 0.4]}
            ]
        })))
        .mount(&server)
        .await;

    let embedder = Embedder::new(&embedding_config(format!("{}/embed", server.uri())));
    let texts = vec!["第一篇".to_string(), "第二篇".to_string()];

    let vectors = tokio::task::spawn_blocking(move || embedder.embed_batch(&texts))
        .await
        .expect("task should join")
        .expect("batch should succeed");
    assert_eq!(vectors, vec![vec![0.1, 0.2], vec![0.3, 0.4]]);
}

#[tokio::test]
async fn embedder_discards_batch_on_count_mismatch() {
    let server = MockServer::start().await;
    // Two inputs, one vector back: positional correspondence is broken, so
    // the whole batch must be rejected.
    Mock::given(method("POST"))
        .and(path("/embed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"embedding": [0.1, 0.2]}]
        })))
        .mount(&server)
        .await;

    let embedder = Embedder::new(&embedding_config(format!("{}/embed", server.uri())));
    let texts = vec!["第一篇".to_string(), "第二篇".to_string()];

    let vectors = tokio::task::spawn_blocking(move || embedder.embed_batch(&texts))
        .await
        .expect("task should join");
    assert_eq!(vectors, None);
}

#[test]
fn embedder_unconfigured_returns_none() {
    let embedder = Embedder::new(&EmbeddingConfig::default());
    assert!(!embedder.is_configured());
    assert_eq!(embedder.embed_batch(&["文本".to_string()]), None);
    // An empty batch needs no endpoint at all.
    assert_eq!(embedder.embed_batch(&[]), Some(Vec::new()));
}
