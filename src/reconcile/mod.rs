//! Matches the response shape the client asked for against what the
//! backend actually sent.
//!
//! | client   | backend    | output                                   |
//! |----------|------------|------------------------------------------|
//! | stream   | streamed   | de-duplicated pass-through SSE           |
//! | stream   | complete   | SSE synthesized one character at a time  |
//! | json     | complete   | body unchanged                           |
//! | json     | streamed   | last stream chunk collapsed into one body |

use crate::error::AppError;
use crate::upstream::BackendResponse;
use axum::body::Body;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures_util::StreamExt;
use serde_json::Value;
use std::convert::Infallible;
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::StreamReader;

pub mod collapse;
pub mod dedup;
pub mod synthesize;

pub use collapse::collapse_stream_text;
pub use dedup::ReconciliationState;
pub use synthesize::{StreamChunk, SyntheticStream};

pub const DONE_FRAME: &str = "data: [DONE]\n\n";

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("invalid JSON in final stream chunk")]
    InvalidFinalChunk,
    #[error("failed to read backend stream: {0}")]
    Read(String),
}

impl From<ReconcileError> for AppError {
    fn from(err: ReconcileError) -> Self {
        AppError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "reconcile_failed",
            err.to_string(),
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReconcileOptions {
    pub skip_duplicate_lines: bool,
    /// Model name for synthesized chunks when the backend body has none.
    pub fallback_model: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileCase {
    Passthrough,
    Synthesized,
    Direct,
    Collapsed,
}

impl ReconcileCase {
    pub fn as_str(self) -> &'static str {
        match self {
            ReconcileCase::Passthrough => "passthrough",
            ReconcileCase::Synthesized => "synthesized",
            ReconcileCase::Direct => "direct",
            ReconcileCase::Collapsed => "collapsed",
        }
    }
}

/// Client-facing output of one reconciled call.
pub enum Reconciled {
    Json(Value),
    EventStream(Body),
}

impl IntoResponse for Reconciled {
    fn into_response(self) -> Response {
        match self {
            Reconciled::Json(value) => (StatusCode::OK, axum::Json(value)).into_response(),
            Reconciled::EventStream(body) => (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, "text/event-stream"),
                    (header::CACHE_CONTROL, "no-cache"),
                ],
                body,
            )
                .into_response(),
        }
    }
}

pub async fn reconcile(
    backend: BackendResponse,
    wants_stream: bool,
    options: ReconcileOptions,
) -> Result<Reconciled, AppError> {
    let (case, output) = match (wants_stream, backend) {
        (_, BackendResponse::Error { status, message }) => {
            metrics::counter!("qwen2api_upstream_errors_total").increment(1);
            return Err(AppError::new(status, "upstream_error", message));
        }
        (true, BackendResponse::Streamed(resp)) => {
            let state = ReconciliationState::new(options.skip_duplicate_lines);
            (
                ReconcileCase::Passthrough,
                Reconciled::EventStream(spawn_passthrough(resp, state)),
            )
        }
        (true, BackendResponse::Complete(body)) => {
            let frames = SyntheticStream::from_complete(&body, options.fallback_model.as_deref())
                .into_frames()
                .map(|frame| Ok::<_, Infallible>(Bytes::from(frame)));
            (
                ReconcileCase::Synthesized,
                Reconciled::EventStream(Body::from_stream(futures_util::stream::iter(frames))),
            )
        }
        (false, BackendResponse::Complete(body)) => (ReconcileCase::Direct, Reconciled::Json(body)),
        (false, BackendResponse::Streamed(resp)) => {
            let text = resp
                .text()
                .await
                .map_err(|err| ReconcileError::Read(err.to_string()))?;
            let collapsed = collapse_stream_text(&text).inspect_err(|err| {
                tracing::warn!("stream collapse failed: {err}");
            })?;
            (ReconcileCase::Collapsed, Reconciled::Json(collapsed))
        }
    };
    tracing::debug!(case = case.as_str(), "response reconciled");
    metrics::counter!("qwen2api_reconciled_total", "case" => case.as_str()).increment(1);
    Ok(output)
}

/// Forward a backend SSE body line by line through `state`, without
/// buffering the stream. Forwarding stops when the client goes away.
fn spawn_passthrough(resp: reqwest::Response, state: ReconciliationState) -> Body {
    let (tx, rx) = mpsc::channel::<Bytes>(64);
    let source = Box::pin(
        resp.bytes_stream()
            .map(|item| item.map_err(std::io::Error::other)),
    );
    tokio::spawn(forward_lines(source, state, tx));
    Body::from_stream(ReceiverStream::new(rx).map(Ok::<_, Infallible>))
}

async fn forward_lines<S>(source: S, mut state: ReconciliationState, tx: mpsc::Sender<Bytes>)
where
    S: futures_util::Stream<Item = std::io::Result<Bytes>> + Unpin,
{
    let mut lines = tokio::io::BufReader::new(StreamReader::new(source)).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let Some(frame) = state.process_line(&line) else {
                    continue;
                };
                if tx.send(Bytes::from(frame)).await.is_err() {
                    tracing::debug!(
                        chunks = state.chunk_count(),
                        "client disconnected, stream forwarding stopped"
                    );
                    return;
                }
            }
            Ok(None) => break,
            Err(err) => {
                metrics::counter!("qwen2api_upstream_errors_total").increment(1);
                tracing::warn!(
                    chunks = state.chunk_count(),
                    "backend stream read failed: {err}"
                );
                return;
            }
        }
    }
    if let Some(done) = state.finish() {
        let _ = tx.send(Bytes::from(done)).await;
    }
}
