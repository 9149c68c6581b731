//! End-to-end request handling over in-process models and generation

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use futures_util::{stream, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

use intent_rag::classifier::IntentClassifier;
use intent_rag::config::RagConfig;
use intent_rag::embeddings::{EmbedMode, Reranker, TextEmbedder};
use intent_rag::generation::{CompletionBackend, SnapshotStream};
use intent_rag::routing::{open_engine, SharedModelFactory};
use intent_rag::server::{build_router, state::AppState};
use intent_rag::types::{Chunk, Intent};
use intent_rag::Result;

const KEYWORDS: [&str; 4] = ["library", "squat", "thesis", "stress"];

/// One dimension per keyword plus a catch-all
struct KeywordEmbedder;

impl TextEmbedder for KeywordEmbedder {
    fn dimensions(&self) -> usize {
        5
    }

    fn embed(&self, texts: &[&str], _mode: EmbedMode) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                let mut v = vec![0.0; 5];
                match KEYWORDS.iter().position(|k| t.contains(k)) {
                    Some(i) => v[i] = 1.0,
                    None => v[4] = 1.0,
                }
                v
            })
            .collect())
    }
}

struct LengthReranker;

impl Reranker for LengthReranker {
    fn score(&self, _query: &str, candidates: &[String]) -> Result<Vec<f32>> {
        Ok(candidates.iter().map(|c| c.len() as f32).collect())
    }
}

/// Answers "Open until 10." and records whether context was supplied
struct ScriptedBackend;

const ANSWER: &str = "Open until 10.";

#[async_trait]
impl CompletionBackend for ScriptedBackend {
    async fn complete(&self, _app_id: &str, _prompt: &str) -> Result<String> {
        Ok(ANSWER.to_string())
    }

    async fn snapshots(&self, _app_id: &str, _prompt: &str) -> Result<SnapshotStream> {
        let snapshots: Vec<Result<String>> = ["Open", "Open until", ANSWER]
            .iter()
            .map(|s| Ok(s.to_string()))
            .collect();
        Ok(stream::iter(snapshots).boxed())
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    state: AppState,
}

fn harness(threshold: f32, epochs: usize) -> Harness {
    let dir = tempfile::tempdir().unwrap();

    let mut config = RagConfig::default();
    config.retrieval.index_dir = dir.path().join("index");
    config.classifier.model_path = dir.path().join("classifier.json");
    config.classifier.confidence_threshold = threshold;
    config.classifier.epochs = epochs;
    config.classifier.top_n_options = 2;
    for profile in config.agents.0.values_mut() {
        profile.app_id = Some("test-app".into());
    }

    let embedder: Arc<dyn TextEmbedder> = Arc::new(KeywordEmbedder);
    let reranker: Arc<dyn Reranker> = Arc::new(LengthReranker);

    let campus = open_engine(&config, Intent::Campus, embedder.clone(), reranker.clone()).unwrap();
    campus
        .index_chunks(&[
            Chunk::new("c1", "The library opens at 8."),
            Chunk::new("c2", "The library closes at 10."),
        ])
        .unwrap();

    let classifier = Arc::new(IntentClassifier::new(embedder.clone(), config.classifier.clone()));
    let mut vectors = Vec::new();
    let mut labels = Vec::new();
    for (i, intent) in [Intent::Campus, Intent::Fitness, Intent::Paper, Intent::Psychology]
        .into_iter()
        .enumerate()
    {
        let mut v = vec![0.0; 5];
        v[i] = 1.0;
        for _ in 0..6 {
            vectors.push(v.clone());
            labels.push(intent);
        }
    }
    classifier.train(&vectors, &labels).unwrap();

    let factory = Arc::new(SharedModelFactory::new(
        config.clone(),
        embedder,
        reranker,
        Arc::new(ScriptedBackend),
    ));

    Harness {
        _dir: dir,
        state: AppState::new(config, classifier, factory),
    }
}

async fn post_json(state: &AppState, uri: &str, body: Value) -> (StatusCode, String) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(state, request).await
}

async fn send(state: &AppState, request: Request<Body>) -> (StatusCode, String) {
    let response = build_router(state.clone()).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

/// JSON payloads of every `data:` line
fn sse_frames(body: &str) -> Vec<Value> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|data| serde_json::from_str(data.trim()).unwrap())
        .collect()
}

#[tokio::test]
async fn test_health_reports_components() {
    let h = harness(0.0, 200);
    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let (status, body) = send(&h.state, request).await;

    assert_eq!(status, StatusCode::OK);
    let health: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(health["classifier_initialized"], true);
    assert_eq!(health["rag_initialized"], false);
    assert_eq!(health["agents_initialized"], 0);
    assert_eq!(health["output_mode"], "stream_only");
}

#[tokio::test]
async fn test_intent_endpoint() {
    let h = harness(0.0, 200);
    let (status, body) = post_json(&h.state, "/intent", serde_json::json!({"query": "is the library open"})).await;

    assert_eq!(status, StatusCode::OK);
    let response: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(response["success"], true);
    assert_eq!(response["intent"], "campus");
    assert_eq!(response["avatar"], "042-milkshake.svg");
    assert_eq!(response["needs_clarification"], false);
    assert_eq!(response["options"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_empty_query_rejected() {
    let h = harness(0.0, 200);
    for uri in ["/intent", "/query", "/query_with_intent"] {
        let (status, body) = post_json(&h.state, uri, serde_json::json!({"query": "   "})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
        assert!(body.contains("validation_error"));
    }
}

#[tokio::test]
async fn test_query_with_intent_streams_frames() {
    let h = harness(0.0, 200);
    let (status, body) = post_json(
        &h.state,
        "/query_with_intent",
        serde_json::json!({"query": "when does the library close"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let frames = sse_frames(&body);
    assert_eq!(frames.first().unwrap()["type"], "intent");
    assert_eq!(frames[0]["intent"], "campus");
    assert_eq!(frames.last().unwrap(), &serde_json::json!({"type": "finished", "finished": true}));

    let text: String = frames
        .iter()
        .filter(|f| f["type"] == "content")
        .map(|f| f["delta"].as_str().unwrap())
        .collect();
    assert_eq!(text, ANSWER);
    assert!(h.state.router().is_initialized(Intent::Campus));
}

#[tokio::test]
async fn test_query_with_intent_batched_answer() {
    let h = harness(0.0, 200);
    let (_, body) = post_json(
        &h.state,
        "/query_with_intent",
        serde_json::json!({"query": "library hours", "stream": false}),
    )
    .await;

    let frames = sse_frames(&body);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["type"], "answer");
    assert_eq!(frames[0]["answer"], ANSWER);
    assert_eq!(frames[0]["has_docs"], true);
}

#[tokio::test]
async fn test_low_confidence_asks_for_clarification() {
    let h = harness(1.0, 20);
    let (_, body) = post_json(
        &h.state,
        "/query_with_intent",
        serde_json::json!({"query": "library or squat"}),
    )
    .await;

    let frames = sse_frames(&body);
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0]["type"], "clarification");
    assert_eq!(frames[0]["options"].as_array().unwrap().len(), 2);
    assert_eq!(frames[1]["type"], "finished");
    assert_eq!(h.state.router().initialized(), 0);
}

#[tokio::test]
async fn test_general_query_stream() {
    let h = harness(0.0, 200);
    let (status, body) = post_json(&h.state, "/query", serde_json::json!({"query": "anything"})).await;
    assert_eq!(status, StatusCode::OK);

    let frames = sse_frames(&body);
    assert_eq!(
        frames.last().unwrap(),
        &serde_json::json!({"delta": "", "finished": true})
    );
    let text: String = frames
        .iter()
        .filter_map(|f| f["delta"].as_str())
        .collect();
    assert_eq!(text, ANSWER);
    assert!(h.state.rag_initialized());
}

#[tokio::test]
async fn test_simple_query_returns_plain_text() {
    let h = harness(0.0, 200);
    let request = Request::builder()
        .method("POST")
        .uri("/query/simple?query=hello")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&h.state, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, ANSWER);
}

#[tokio::test]
async fn test_model_summary_endpoint() {
    let h = harness(0.0, 200);
    let request = Request::builder().uri("/intent/model").body(Body::empty()).unwrap();
    let (status, body) = send(&h.state, request).await;

    assert_eq!(status, StatusCode::OK);
    let summary: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(summary["n_features"], 5);
    assert_eq!(summary["classes"].as_array().unwrap().len(), 4);
}
