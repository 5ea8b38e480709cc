use serde_json::Value;

/// Per-response state for forwarding a backend SSE stream.
///
/// Feed raw lines with [`process_line`](Self::process_line) as they arrive
/// and call [`finish`](Self::finish) once the backend closes the stream.
/// Cumulative `delta.content` values are rewritten into true increments.
#[derive(Debug, Default)]
pub struct ReconciliationState {
    previous_content: String,
    accumulated_content: String,
    chunk_count: usize,
    skip_duplicate_lines: bool,
    last_raw_line: Option<String>,
    saw_done: bool,
}

impl ReconciliationState {
    pub fn new(skip_duplicate_lines: bool) -> Self {
        Self {
            skip_duplicate_lines,
            ..Self::default()
        }
    }

    /// Returns the framed text to forward for `line`, or `None` when the
    /// line is dropped.
    pub fn process_line(&mut self, line: &str) -> Option<String> {
        if line.is_empty() {
            return None;
        }
        if self.skip_duplicate_lines {
            if self.last_raw_line.as_deref() == Some(line) {
                return None;
            }
            self.last_raw_line = Some(line.to_string());
        }
        self.chunk_count += 1;

        let Some(data) = line.strip_prefix("data:") else {
            return Some(frame_raw(line));
        };
        let data = data.trim();
        if data == "[DONE]" {
            self.saw_done = true;
            return Some(frame_raw(line));
        }
        let Ok(mut chunk) = serde_json::from_str::<Value>(data) else {
            return Some(frame_raw(line));
        };
        self.dedup_delta(&mut chunk);
        Some(format!("data: {chunk}\n\n"))
    }

    fn dedup_delta(&mut self, chunk: &mut Value) {
        let Some(delta) = chunk
            .get_mut("choices")
            .and_then(|v| v.as_array_mut())
            .and_then(|arr| arr.first_mut())
            .and_then(|choice| choice.get_mut("delta"))
            .and_then(|delta| delta.as_object_mut())
        else {
            return;
        };
        let Some(current) = delta
            .get("content")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
        else {
            return;
        };

        if !self.previous_content.is_empty() && current.starts_with(&self.previous_content) {
            let suffix = current[self.previous_content.len()..].to_string();
            self.accumulated_content.push_str(&suffix);
            delta.insert("content".to_string(), Value::String(suffix));
        } else {
            self.accumulated_content.push_str(&current);
        }
        self.previous_content = current;
    }

    /// The terminal sentinel, unless the backend already sent one.
    pub fn finish(self) -> Option<String> {
        if !self.accumulated_content.is_empty() {
            tracing::info!(content = %self.accumulated_content, "complete streamed response");
        }
        tracing::info!(chunks = self.chunk_count, "stream processing completed");
        if self.saw_done {
            None
        } else {
            Some(super::DONE_FRAME.to_string())
        }
    }

    pub fn accumulated_content(&self) -> &str {
        &self.accumulated_content
    }

    pub fn chunk_count(&self) -> usize {
        self.chunk_count
    }
}

fn frame_raw(line: &str) -> String {
    format!("{line}\n\n")
}
