//! End-to-end flow against a mock Ollama-compatible inference service.
//!
//! The mock embeds any text mentioning "renew" along one axis and
//! everything else along another, and its chat model follows a few fixed
//! rules so that retrieval, code execution and feedback can be observed
//! from the outside.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{http::StatusCode, response::IntoResponse, routing::post, Json, Router};
use serde_json::{json, Value};
use tempfile::TempDir;

use rag_agent::agent::Termination;
use rag_agent::app::AppContext;
use rag_agent::config::Config;
use rag_agent::executor::CodeExecutor;
use rag_agent::models::{HistoryRole, SyncStatus};
use rag_agent::server;

async fn mock_embeddings(Json(body): Json<Value>) -> Json<Value> {
    let prompt = body["prompt"].as_str().unwrap_or_default().to_lowercase();
    let vector = if prompt.contains("renew") {
        vec![1.0, 0.0, 0.0, 0.0]
    } else {
        vec![0.0, 1.0, 0.0, 0.0]
    };
    Json(json!({ "embedding": vector }))
}

async fn mock_chat(Json(body): Json<Value>) -> axum::response::Response {
    if body["model"] == "missing-model" {
        return (StatusCode::NOT_FOUND, "model 'missing-model' not found").into_response();
    }

    let messages = body["messages"].as_array().cloned().unwrap_or_default();
    let preamble = messages
        .first()
        .and_then(|m| m["content"].as_str())
        .unwrap_or_default()
        .to_string();
    let question = messages
        .iter()
        .rev()
        .find(|m| m["role"] == "user")
        .and_then(|m| m["content"].as_str())
        .unwrap_or_default()
        .to_string();
    let last = messages.last().cloned().unwrap_or(Value::Null);
    let role = last["role"].as_str().unwrap_or_default();
    let content = last["content"].as_str().unwrap_or_default();

    let reply = if question.contains("loop") {
        "Still working.\n```lua\nprint('again')\n```".to_string()
    } else if role == "system" && content.contains("code execution result") {
        let result = content.lines().nth(1).unwrap_or_default();
        format!("The result is {}.", result)
    } else if content.contains("compute") {
        "Let me calculate.\n```lua\nanswer = 6 * 7\nprint(answer)\n```".to_string()
    } else if preamble.contains("ninety days") {
        "Certificates renew every ninety days.".to_string()
    } else {
        "I don't know.".to_string()
    };

    Json(json!({
        "model": body["model"],
        "message": { "role": "assistant", "content": reply },
        "done": true
    }))
    .into_response()
}

async fn spawn(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

async fn spawn_mock_ollama() -> SocketAddr {
    let router = Router::new()
        .route("/api/embeddings", post(mock_embeddings))
        .route("/api/chat", post(mock_chat));
    spawn(router).await
}

fn config_for(tmp: &TempDir, inference: SocketAddr) -> Config {
    let mut config = Config::default();
    config.inference.base_url = format!("http://{}", inference);
    config.inference.dims = 4;
    config.inference.max_retries = 0;
    config.index.path = tmp.path().join("data/knowledge_db.json");
    config.history.path = tmp.path().join("data/chat_history.json");
    config.documents.root = tmp.path().join("docs");
    config.retrieval.top_k = 1;
    config.agent.max_loops = 3;
    config
}

fn write_docs(config: &Config) {
    std::fs::create_dir_all(&config.documents.root).unwrap();
    std::fs::write(
        config.documents.root.join("alpha.md"),
        "The alpha service renews its certificates every ninety days.",
    )
    .unwrap();
    std::fs::write(
        config.documents.root.join("beta.txt"),
        "Beta notes about the lunch menu.",
    )
    .unwrap();
}

async fn synced_context(tmp: &TempDir) -> Arc<AppContext> {
    let addr = spawn_mock_ollama().await;
    let config = config_for(tmp, addr);
    write_docs(&config);

    let ctx = AppContext::bootstrap(config).unwrap();
    let report = ctx.sync_documents().await;
    assert_eq!(report.status, SyncStatus::Success, "{:?}", report);
    Arc::new(ctx)
}

#[tokio::test]
async fn retrieval_selects_relevant_chunk() {
    let tmp = TempDir::new().unwrap();
    let ctx = synced_context(&tmp).await;

    let renewed = ctx.ask("When do certificates renew?").await;
    assert_eq!(renewed.answer, "Certificates renew every ninety days.");
    assert_eq!(renewed.termination, Termination::Answered);
    assert!(renewed.steps.is_empty());

    let lunch = ctx.ask("What is for lunch?").await;
    assert_eq!(lunch.answer, "I don't know.");
}

#[tokio::test]
async fn code_request_runs_and_result_is_fed_back() {
    let tmp = TempDir::new().unwrap();
    let ctx = synced_context(&tmp).await;

    let result = ctx.ask("please compute six times seven").await;
    assert_eq!(result.answer, "The result is 42.");
    assert_eq!(result.iterations, 2);
    assert_eq!(result.steps.len(), 1);
    assert_eq!(result.steps[0].thought, "Let me calculate.");
    assert_eq!(result.steps[0].result, "42");

    // Globals set by the model's code survive into later runs.
    assert_eq!(ctx.executor().run("print(answer + 1)").await, "43");

    let history = ctx.history().await;
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role, HistoryRole::User);
    assert_eq!(history[1].content, "The result is 42.");
}

#[tokio::test]
async fn endless_code_requests_hit_the_bound() {
    let tmp = TempDir::new().unwrap();
    let ctx = synced_context(&tmp).await;

    let result = ctx.ask("loop please").await;
    assert_eq!(result.iterations, 3);
    assert_eq!(result.steps.len(), 3);
    assert_eq!(result.termination, Termination::Exhausted);
    assert!(result.answer.contains("```lua"));
    assert!(result.steps.iter().all(|s| s.result == "again"));
}

#[tokio::test]
async fn model_error_becomes_answer_text() {
    let tmp = TempDir::new().unwrap();
    let addr = spawn_mock_ollama().await;
    let mut config = config_for(&tmp, addr);
    config.inference.chat_model = "missing-model".to_string();

    let ctx = AppContext::bootstrap(config).unwrap();
    let result = ctx.ask("anything").await;
    assert!(result.answer.contains("404"), "{}", result.answer);
    assert!(result.answer.contains("not found"), "{}", result.answer);
    assert_eq!(result.iterations, 1);
}

#[tokio::test]
async fn http_api_end_to_end() {
    let tmp = TempDir::new().unwrap();
    let ctx = synced_context(&tmp).await;
    let api = spawn(server::router(ctx)).await;
    let base = format!("http://{}", api);
    let client = reqwest::Client::new();

    let health: Value = client
        .get(format!("{}/health", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");

    let status: Value = client
        .get(format!("{}/status", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["total_chunks"], 2);

    let resp = client
        .post(format!("{}/chat", base))
        .json(&json!({ "question": "   " }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
    let err: Value = resp.json().await.unwrap();
    assert_eq!(err["error"]["code"], "bad_request");

    let resp = client
        .post(format!("{}/chat", base))
        .json(&json!({ "wrong": "shape" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);

    let answer: Value = client
        .post(format!("{}/chat", base))
        .json(&json!({ "question": "please compute it" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(answer["answer"], "The result is 42.");
    assert_eq!(answer["steps"][0]["result"], "42");

    let history: Value = client
        .get(format!("{}/history", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(history.as_array().unwrap().len(), 2);
    assert!(history[0]["timestamp"].as_f64().unwrap() > 0.0);

    let cleared: Value = client
        .post(format!("{}/history/clear", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(cleared["status"], "success");

    let report: Value = client
        .post(format!("{}/sync", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(report["status"], "success");
    assert_eq!(report["files"].as_array().unwrap().len(), 2);
}
