use crate::app::AppState;
use crate::error::{AppError, AppResult};
use crate::normalize::{self, ChatRequest};
use crate::reconcile::{self, ReconcileOptions};
use crate::upstream::{self, BackendResponse};
use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use serde_json::Value;

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Qwen2Api</title>
    <style>
        body { font-family: sans-serif; line-height: 1.6; padding: 20px; background-color: #1e1e1e; color: #d4d4d4; }
        h1, h2 { color: #cccccc; border-bottom: 1px solid #444; padding-bottom: 5px; }
        code { background-color: #333333; padding: 2px 6px; border-radius: 4px; font-family: Consolas, Monaco, monospace; }
        .endpoint { margin-bottom: 15px; padding: 10px; background-color: #2a2a2a; border-radius: 4px; border: 1px solid #444; }
        .endpoint span { font-weight: bold; margin-right: 10px; color: #9cdcfe; }
    </style>
</head>
<body>
    <h1>Qwen2Api</h1>
    <h2>API Endpoints</h2>
    <div class="endpoint">
        <span>Models:</span> <code>GET /v1/models</code><br>
        <span>Chat:</span> <code>POST /v1/chat/completions</code>
    </div>
    <p>Send <code>Authorization: Bearer &lt;token&gt;[,&lt;token&gt;...]</code>; one token is picked per request.</p>
</body>
</html>
"#;

pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics.render()
}

pub async fn list_models(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Response> {
    let credential = state.credentials.select_optional(authorization(&headers));
    let backend =
        upstream::fetch_models(&state.http, &state.runtime.backend, credential.as_deref()).await;
    let value = match backend {
        BackendResponse::Complete(value) => value,
        BackendResponse::Error { status, message } => {
            return Err(AppError::new(status, "upstream_error", message));
        }
        BackendResponse::Streamed(resp) => {
            let text = resp
                .text()
                .await
                .map_err(|err| AppError::internal(format!("API request error: {err}")))?;
            match upstream::parse_complete_body(&text) {
                BackendResponse::Complete(value) => value,
                BackendResponse::Error { status, message } => {
                    return Err(AppError::new(status, "upstream_error", message));
                }
                BackendResponse::Streamed(_) => {
                    return Err(AppError::internal("unexpected stream from models endpoint"));
                }
            }
        }
    };
    Ok(Json(value).into_response())
}

pub async fn create_chat_completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Response> {
    let credential = state
        .credentials
        .select_from_header(authorization(&headers))?;
    let req = parse_chat_request(&body)?;
    let wants_stream = req.wants_stream();
    let fallback_model = req
        .extra
        .get("model")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    metrics::counter!(
        "qwen2api_chat_requests_total",
        "stream" => if wants_stream { "true" } else { "false" }
    )
    .increment(1);

    let backend_req =
        normalize::normalize_request(req, state.uploader.as_ref(), &credential).await?;
    let backend = upstream::dispatch(
        &state.http,
        &state.runtime.backend,
        backend_req,
        wants_stream,
        &credential,
    )
    .await;
    let options = ReconcileOptions {
        skip_duplicate_lines: state.runtime.backend.skip_duplicate_lines,
        fallback_model,
    };
    let reconciled = reconcile::reconcile(backend, wants_stream, options).await?;
    Ok(reconciled.into_response())
}

fn authorization(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
}

fn parse_chat_request(body: &[u8]) -> AppResult<ChatRequest> {
    let value: Value = serde_json::from_slice(body).map_err(|err| {
        AppError::new(
            StatusCode::BAD_REQUEST,
            "invalid_json",
            format!("invalid JSON: {err}"),
        )
    })?;
    if !value.is_object() {
        return Err(AppError::new(
            StatusCode::BAD_REQUEST,
            "invalid_json",
            "invalid JSON: body must be an object",
        ));
    }
    tracing::debug!(request = %value, "received chat request");
    serde_json::from_value(value).map_err(|err| {
        AppError::new(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            format!("invalid request: {err}"),
        )
    })
}
