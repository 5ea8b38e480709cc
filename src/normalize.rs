//! Inbound OpenAI chat bodies and their conversion into the backend's
//! multimodal message format.

use crate::error::AppError;
use crate::upload::{ImageUploader, UploadError};
use axum::http::StatusCode;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub messages: Option<Vec<ChatMessage>>,
    #[serde(default)]
    pub stream: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChatRequest {
    pub fn wants_stream(&self) -> bool {
        self.stream.unwrap_or(false)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub role: Option<String>,
    /// `None` only when the key is absent; an explicit `null` is `Unsupported`.
    #[serde(default, deserialize_with = "deserialize_present")]
    pub content: Option<ContentUnion>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn deserialize_present<'de, D>(deserializer: D) -> Result<Option<ContentUnion>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(|v| Some(ContentUnion::from(v)))
}

#[derive(Debug, Clone, PartialEq)]
pub enum ContentUnion {
    PlainText(String),
    PartList(Vec<ContentPart>),
    Unsupported(Value),
}

impl From<Value> for ContentUnion {
    fn from(value: Value) -> Self {
        match value {
            Value::String(s) => ContentUnion::PlainText(s),
            Value::Array(items) => {
                ContentUnion::PartList(items.iter().filter_map(ContentPart::from_item).collect())
            }
            other => ContentUnion::Unsupported(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentPart {
    Text { text: String },
    ImageRef { image_id: String },
    ImageInline { base64_or_url: String },
}

impl ContentPart {
    /// Classify one list item by its `type`. Items this proxy cannot forward
    /// (unknown types, `image_url` without a `url`) yield `None`.
    pub fn from_item(item: &Value) -> Option<Self> {
        let obj = item.as_object()?;
        match obj.get("type").and_then(|v| v.as_str())? {
            "text" => Some(ContentPart::Text {
                text: obj
                    .get("text")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string(),
            }),
            "image_url" => obj
                .get("image_url")
                .and_then(|v| v.as_object())
                .and_then(|image_url| image_url.get("url"))
                .and_then(|v| v.as_str())
                .map(|url| ContentPart::ImageInline {
                    base64_or_url: url.to_string(),
                }),
            "image" => Some(ContentPart::ImageRef {
                image_id: obj
                    .get("image")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string(),
            }),
            _ => None,
        }
    }
}

/// A content part in the shape the backend accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendPart {
    Text { text: String },
    Image { image: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct BackendMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Vec<BackendPart>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackendRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<BackendMessage>>,
    pub stream: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("image upload failed: {0}")]
    Upload(#[from] UploadError),
}

impl From<NormalizeError> for AppError {
    fn from(err: NormalizeError) -> Self {
        match err {
            NormalizeError::Upload(UploadError::Base64Decode(_)) => {
                AppError::new(StatusCode::BAD_REQUEST, "invalid_image", err.to_string())
            }
            NormalizeError::Upload(_) => AppError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "upload_failed",
                err.to_string(),
            ),
        }
    }
}

pub async fn normalize_content(
    content: ContentUnion,
    uploader: &dyn ImageUploader,
    credential: &str,
) -> Result<Vec<BackendPart>, NormalizeError> {
    let parts = match content {
        ContentUnion::PlainText(text) => return Ok(vec![BackendPart::Text { text }]),
        ContentUnion::PartList(parts) => parts,
        ContentUnion::Unsupported(_) => return Ok(Vec::new()),
    };

    let mut out = Vec::with_capacity(parts.len());
    for part in parts {
        match part {
            ContentPart::Text { text } => out.push(BackendPart::Text { text }),
            ContentPart::ImageRef { image_id } => out.push(BackendPart::Image { image: image_id }),
            ContentPart::ImageInline { base64_or_url } => {
                let image = uploader.upload(&base64_or_url, credential).await?;
                out.push(BackendPart::Image { image });
            }
        }
    }
    Ok(out)
}

/// Normalize every message of `req`. The outbound `stream` flag starts as
/// the client's; the dispatcher may still override it.
pub async fn normalize_request(
    req: ChatRequest,
    uploader: &dyn ImageUploader,
    credential: &str,
) -> Result<BackendRequest, NormalizeError> {
    let stream = req.wants_stream();
    let messages = match req.messages {
        Some(inbound) => {
            let mut messages = Vec::with_capacity(inbound.len());
            for message in inbound {
                let content = match message.content {
                    Some(content) => Some(normalize_content(content, uploader, credential).await?),
                    None => None,
                };
                messages.push(BackendMessage {
                    role: message.role,
                    content,
                    extra: message.extra,
                });
            }
            Some(messages)
        }
        None => None,
    };
    Ok(BackendRequest {
        messages,
        stream,
        extra: req.extra,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingUploader {
        calls: Mutex<Vec<(String, String)>>,
        fail: bool,
    }

    #[async_trait]
    impl ImageUploader for RecordingUploader {
        async fn upload(&self, payload: &str, credential: &str) -> Result<String, UploadError> {
            let mut calls = self.calls.lock().unwrap();
            calls.push((payload.to_string(), credential.to_string()));
            if self.fail {
                return Err(UploadError::Status(502));
            }
            Ok(format!("img-{}", calls.len()))
        }
    }

    async fn normalize_value(value: Value, uploader: &RecordingUploader) -> Vec<BackendPart> {
        normalize_content(ContentUnion::from(value), uploader, "cred")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn plain_text_becomes_single_text_part() {
        let uploader = RecordingUploader::default();
        let parts = normalize_value(json!("hello"), &uploader).await;
        assert_eq!(
            parts,
            vec![BackendPart::Text {
                text: "hello".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn image_url_parts_are_uploaded_in_order() {
        let uploader = RecordingUploader::default();
        let parts = normalize_value(
            json!([
                { "type": "text", "text": "look" },
                { "type": "image_url", "image_url": { "url": "data:image/png;base64,AAAA" } },
                { "type": "image_url", "image_url": { "url": "BBBB" } }
            ]),
            &uploader,
        )
        .await;
        assert_eq!(
            parts,
            vec![
                BackendPart::Text {
                    text: "look".to_string()
                },
                BackendPart::Image {
                    image: "img-1".to_string()
                },
                BackendPart::Image {
                    image: "img-2".to_string()
                },
            ]
        );
        let calls = uploader.calls.lock().unwrap();
        assert_eq!(calls[0].0, "data:image/png;base64,AAAA");
        assert_eq!(calls[1].1, "cred");
    }

    #[tokio::test]
    async fn unknown_and_malformed_items_are_dropped() {
        let uploader = RecordingUploader::default();
        let parts = normalize_value(
            json!([
                { "type": "audio", "data": "x" },
                { "type": "image_url", "image_url": "not-an-object" },
                { "type": "image_url", "image_url": {} },
                "bare string",
                { "type": "text" }
            ]),
            &uploader,
        )
        .await;
        assert_eq!(
            parts,
            vec![BackendPart::Text {
                text: String::new()
            }]
        );
        assert!(uploader.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn non_string_non_list_content_becomes_empty() {
        let uploader = RecordingUploader::default();
        assert!(normalize_value(json!(42), &uploader).await.is_empty());
        assert!(normalize_value(Value::Null, &uploader).await.is_empty());
    }

    #[tokio::test]
    async fn normalized_parts_are_a_fixed_point() {
        let uploader = RecordingUploader::default();
        let normalized = json!([
            { "type": "text", "text": "a" },
            { "type": "image", "image": "img-9" }
        ]);
        let parts = normalize_value(normalized.clone(), &uploader).await;
        assert_eq!(serde_json::to_value(&parts).unwrap(), normalized);
        assert!(uploader.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn upload_failure_aborts_normalization() {
        let uploader = RecordingUploader {
            fail: true,
            ..Default::default()
        };
        let req: ChatRequest = serde_json::from_value(json!({
            "model": "qwen-max",
            "messages": [{
                "role": "user",
                "content": [{ "type": "image_url", "image_url": { "url": "AAAA" } }]
            }]
        }))
        .unwrap();
        let err = normalize_request(req, &uploader, "cred").await.unwrap_err();
        assert!(matches!(err, NormalizeError::Upload(UploadError::Status(502))));
    }

    #[tokio::test]
    async fn request_passthrough_fields_survive() {
        let uploader = RecordingUploader::default();
        let req: ChatRequest = serde_json::from_value(json!({
            "model": "qwen-max",
            "stream": true,
            "temperature": 0.2,
            "messages": [
                { "role": "system", "content": "be brief", "name": "sys" },
                { "role": "assistant" },
                { "role": "user", "content": null }
            ]
        }))
        .unwrap();
        let backend = normalize_request(req, &uploader, "cred").await.unwrap();
        let v = serde_json::to_value(&backend).unwrap();
        assert_eq!(v["model"], "qwen-max");
        assert_eq!(v["stream"], true);
        assert_eq!(v["temperature"], 0.2);
        assert_eq!(
            v["messages"][0],
            json!({ "role": "system", "name": "sys", "content": [{ "type": "text", "text": "be brief" }] })
        );
        assert_eq!(v["messages"][1], json!({ "role": "assistant" }));
        assert_eq!(v["messages"][2]["content"], json!([]));
    }

    #[tokio::test]
    async fn absent_messages_stay_absent() {
        let uploader = RecordingUploader::default();
        let req: ChatRequest = serde_json::from_value(json!({ "model": "qwen-max" })).unwrap();
        let backend = normalize_request(req, &uploader, "cred").await.unwrap();
        let v = serde_json::to_value(&backend).unwrap();
        assert!(v.get("messages").is_none());
        assert_eq!(v, json!({ "model": "qwen-max", "stream": false }));

        let req: ChatRequest =
            serde_json::from_value(json!({ "model": "qwen-max", "messages": [] })).unwrap();
        let backend = normalize_request(req, &uploader, "cred").await.unwrap();
        let v = serde_json::to_value(&backend).unwrap();
        assert_eq!(v["messages"], json!([]));
    }
}
