//! HTTP API for chat clients.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/chat` | Answer `{ "question": ... }` with the agent loop |
//! | `GET`  | `/history` | Retained conversation history with timestamps |
//! | `POST` | `/history/clear` | Delete all history |
//! | `GET`/`POST` | `/sync` | Rebuild the index from the documents folder |
//! | `GET`  | `/status` | Chunk counts per indexed document |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "question must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `persistence` (500), `internal` (500).
//! A panic inside a handler is caught and answered with `internal`, so a
//! client never sees a dropped connection or a non-JSON body.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so a browser chat page
//! served from elsewhere can call the API.

use std::any::Any;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any as AnyOrigin, CorsLayer};
use tracing::{error, info};

use crate::agent::AgentAnswer;
use crate::app::AppContext;
use crate::models::{HistoryEntry, IndexStatus, SyncReport};

/// Shared state handed to every route handler.
type AppState = Arc<AppContext>;

/// Build the router with all routes and middleware.
pub fn router(ctx: Arc<AppContext>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AnyOrigin)
        .allow_methods(AnyOrigin)
        .allow_headers(AnyOrigin);

    Router::new()
        .route("/chat", post(handle_chat))
        .route("/history", get(handle_history))
        .route("/history/clear", post(handle_clear_history))
        .route("/sync", get(handle_sync).post(handle_sync))
        .route("/status", get(handle_status))
        .route("/health", get(handle_health))
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(cors)
        .with_state(ctx)
}

/// Serve the API on `[server].bind` until Ctrl-C.
pub async fn run_server(ctx: Arc<AppContext>) -> anyhow::Result<()> {
    let bind_addr = ctx.config().server.bind.clone();
    let app = router(ctx);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn persistence_error(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "persistence".to_string(),
        message: message.into(),
    }
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };
    error!(panic = %detail, "request handler panicked");

    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: "internal server error".to_string(),
    }
    .into_response()
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /chat ============

#[derive(Deserialize)]
struct ChatRequest {
    question: String,
}

/// Returns `400` if the body is not `{ "question": string }` or the
/// question is blank. Inference and execution failures are not HTTP
/// errors: they come back as the answer text.
async fn handle_chat(
    State(ctx): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<AgentAnswer>, AppError> {
    let Json(request) = payload.map_err(|e| bad_request(e.body_text()))?;
    let question = request.question.trim();
    if question.is_empty() {
        return Err(bad_request("question must not be empty"));
    }

    Ok(Json(ctx.ask(question).await))
}

// ============ /history ============

async fn handle_history(State(ctx): State<AppState>) -> Json<Vec<HistoryEntry>> {
    Json(ctx.history().await)
}

async fn handle_clear_history(
    State(ctx): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    ctx.clear_history()
        .await
        .map_err(|e| persistence_error(e.to_string()))?;
    info!("history cleared");
    Ok(Json(serde_json::json!({ "status": "success" })))
}

// ============ /sync, /status ============

async fn handle_sync(State(ctx): State<AppState>) -> Json<SyncReport> {
    Json(ctx.sync_documents().await)
}

async fn handle_status(State(ctx): State<AppState>) -> Json<IndexStatus> {
    Json(ctx.index_status().await)
}
