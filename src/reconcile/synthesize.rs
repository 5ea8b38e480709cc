use serde_json::{Value, json};

/// One synthesized streaming unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamChunk {
    pub delta_content: String,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone)]
struct ChunkEnvelope {
    id: String,
    model: Value,
    created: i64,
}

impl ChunkEnvelope {
    fn render(&self, chunk: &StreamChunk) -> String {
        let event = json!({
            "id": self.id,
            "object": "chat.completion.chunk",
            "created": self.created,
            "model": self.model,
            "choices": [{
                "index": 0,
                "delta": { "role": "assistant", "content": chunk.delta_content },
                "finish_reason": chunk.finish_reason,
            }]
        });
        format!("data: {event}\n\n")
    }
}

/// Replays a complete chat response as a character-by-character stream.
///
/// Each step yields the text between the previously emitted prefix and the
/// next character boundary, so concatenating every `delta_content`
/// reproduces the original content exactly. The last chunk carries the
/// response's finish reason.
#[derive(Debug, Clone)]
pub struct SyntheticStream {
    envelope: ChunkEnvelope,
    content: String,
    emitted: usize,
    finish_reason: String,
}

impl SyntheticStream {
    pub fn from_complete(body: &Value, fallback_model: Option<&str>) -> Self {
        let choice = body
            .get("choices")
            .and_then(|v| v.as_array())
            .and_then(|arr| arr.first());
        let content = choice
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        let finish_reason = choice
            .and_then(|c| c.get("finish_reason"))
            .and_then(|v| v.as_str())
            .unwrap_or("stop")
            .to_string();
        let id = body
            .get("id")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| format!("chatcmpl-{}", uuid::Uuid::new_v4()));
        let model = body
            .get("model")
            .cloned()
            .or_else(|| fallback_model.map(|m| Value::String(m.to_string())))
            .unwrap_or(Value::Null);
        Self {
            envelope: ChunkEnvelope {
                id,
                model,
                created: chrono::Utc::now().timestamp(),
            },
            content,
            emitted: 0,
            finish_reason,
        }
    }

    /// Rendered SSE frames followed by the `[DONE]` sentinel.
    pub fn into_frames(self) -> impl Iterator<Item = String> + Send + 'static {
        let envelope = self.envelope.clone();
        self.map(move |chunk| envelope.render(&chunk))
            .chain(std::iter::once(super::DONE_FRAME.to_string()))
    }
}

impl Iterator for SyntheticStream {
    type Item = StreamChunk;

    fn next(&mut self) -> Option<StreamChunk> {
        let next_char = self.content.get(self.emitted..)?.chars().next()?;
        let end = self.emitted + next_char.len_utf8();
        let fragment = self.content[self.emitted..end].to_string();
        self.emitted = end;
        let finish_reason = (end == self.content.len()).then(|| self.finish_reason.clone());
        Some(StreamChunk {
            delta_content: fragment,
            finish_reason,
        })
    }
}
