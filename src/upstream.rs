use crate::config::BackendConfig;
use crate::normalize::BackendRequest;
use axum::http::StatusCode;
use serde_json::Value;

const LOG_PREVIEW_CHARS: usize = 1000;

/// What the backend actually sent back, before reconciliation.
#[derive(Debug)]
pub enum BackendResponse {
    /// An open SSE body; nothing has been read from it yet.
    Streamed(reqwest::Response),
    Complete(Value),
    Error { status: StatusCode, message: String },
}

impl BackendResponse {
    fn error(status: StatusCode, message: impl Into<String>) -> Self {
        BackendResponse::Error {
            status,
            message: message.into(),
        }
    }
}

/// The outbound `stream` flag: the client's intent unless the override is on.
pub fn outbound_stream(desired_stream: bool, force_non_stream: bool) -> bool {
    desired_stream && !force_non_stream
}

pub async fn dispatch(
    client: &reqwest::Client,
    backend: &BackendConfig,
    mut body: BackendRequest,
    desired_stream: bool,
    credential: &str,
) -> BackendResponse {
    body.stream = outbound_stream(desired_stream, backend.force_non_stream);
    if tracing::enabled!(tracing::Level::DEBUG) {
        let payload = serde_json::to_string(&body).unwrap_or_default();
        tracing::debug!(payload = %payload, "sending chat request to backend");
    }
    tracing::info!(url = %backend.chat_url, stream = body.stream, "POST to backend");
    let req = apply_headers(client.post(&backend.chat_url).json(&body), backend, Some(credential));
    send_and_classify(req, body.stream).await
}

pub async fn fetch_models(
    client: &reqwest::Client,
    backend: &BackendConfig,
    credential: Option<&str>,
) -> BackendResponse {
    tracing::info!(url = %backend.models_url, "GET to backend");
    let req = apply_headers(
        client
            .get(&backend.models_url)
            .header(reqwest::header::CONTENT_TYPE, "application/json"),
        backend,
        credential,
    );
    send_and_classify(req, false).await
}

fn apply_headers(
    mut req: reqwest::RequestBuilder,
    backend: &BackendConfig,
    credential: Option<&str>,
) -> reqwest::RequestBuilder {
    if let Some(credential) = credential {
        req = req.bearer_auth(credential);
    }
    if !backend.cookie.is_empty() {
        req = req.header(reqwest::header::COOKIE, backend.cookie.as_str());
    }
    if let Some(timeout_ms) = backend.request_timeout_ms {
        req = req.timeout(std::time::Duration::from_millis(timeout_ms));
    }
    req
}

async fn send_and_classify(req: reqwest::RequestBuilder, stream_requested: bool) -> BackendResponse {
    match req.send().await {
        Ok(resp) => classify(resp, stream_requested).await,
        Err(err) => {
            tracing::error!("backend request error: {err}");
            BackendResponse::error(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("API request error: {err}"),
            )
        }
    }
}

/// Sort a raw backend response into streamed, complete or error.
///
/// The outbound flag decides by default, but an explicit content type wins:
/// JSON is always read as a complete body and `text/event-stream` is always
/// left open as a stream.
pub async fn classify(resp: reqwest::Response, stream_requested: bool) -> BackendResponse {
    let status = resp.status();
    tracing::info!(status = status.as_u16(), "backend responded");
    if status != StatusCode::OK {
        let text = resp.text().await.unwrap_or_default();
        tracing::warn!(
            status = status.as_u16(),
            body = %truncate_for_log(&text),
            "backend returned an error status"
        );
        return BackendResponse::error(
            status,
            format!("API request failed with status {}", status.as_u16()),
        );
    }

    let content_type = resp
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_ascii_lowercase();
    let is_event_stream = content_type.contains("text/event-stream");
    let is_json = content_type.contains("json");
    if is_event_stream || (stream_requested && !is_json) {
        return BackendResponse::Streamed(resp);
    }

    match resp.text().await {
        Ok(text) => parse_complete_body(&text),
        Err(err) => BackendResponse::error(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("API request error: {err}"),
        ),
    }
}

pub fn parse_complete_body(text: &str) -> BackendResponse {
    let text = text.trim();
    if text.is_empty() {
        return BackendResponse::error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "empty response from upstream",
        );
    }
    match serde_json::from_str::<Value>(text) {
        Ok(value) => {
            tracing::debug!(body = %truncate_for_log(text), "received backend response");
            BackendResponse::Complete(value)
        }
        Err(err) => {
            tracing::warn!(body = %truncate_for_log(text), "backend body is not JSON: {err}");
            BackendResponse::error(StatusCode::INTERNAL_SERVER_ERROR, "response not valid JSON")
        }
    }
}

fn truncate_for_log(text: &str) -> &str {
    match text.char_indices().nth(LOG_PREVIEW_CHARS) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
