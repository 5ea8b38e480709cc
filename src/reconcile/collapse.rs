use super::ReconcileError;
use serde_json::{Value, json};

/// Collapse a fully-read SSE body into a single chat completion.
///
/// Only the last data-bearing line is used: earlier chunks may be partial or
/// repeated, the final one carries the complete content.
pub fn collapse_stream_text(text: &str) -> Result<Value, ReconcileError> {
    let last = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !is_done_line(line))
        .last()
        .ok_or(ReconcileError::InvalidFinalChunk)?;
    let data = last.strip_prefix("data:").unwrap_or(last).trim();
    let chunk: Value =
        serde_json::from_str(data).map_err(|_| ReconcileError::InvalidFinalChunk)?;
    let content = chunk
        .get("choices")
        .and_then(|v| v.as_array())
        .and_then(|arr| arr.first())
        .and_then(|choice| choice.get("delta"))
        .and_then(|delta| delta.get("content"))
        .and_then(|v| v.as_str())
        .unwrap_or("");
    Ok(json!({
        "choices": [{
            "message": { "role": "assistant", "content": content }
        }]
    }))
}

fn is_done_line(line: &str) -> bool {
    line.strip_prefix("data:")
        .map(|data| data.trim() == "[DONE]")
        .unwrap_or(false)
}
