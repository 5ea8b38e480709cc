use crate::config::BROWSER_USER_AGENT;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("base64 decode failed: {0}")]
    Base64Decode(String),
    #[error("upload request failed: {0}")]
    Transport(String),
    #[error("upload failed with HTTP status {0}")]
    Status(u16),
    #[error("upload succeeded but no file id was returned")]
    MissingId,
}

/// Turns inline image data into a backend-assigned image id.
#[async_trait]
pub trait ImageUploader: Send + Sync {
    async fn upload(&self, payload: &str, credential: &str) -> Result<String, UploadError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pub bytes: Vec<u8>,
    pub media_type: mime::Mime,
}

impl DecodedImage {
    pub fn file_name(&self) -> String {
        format!("image.{}", self.media_type.subtype())
    }
}

/// Decode a `data:<mime>;base64,<data>` URL or a bare base64 string.
pub fn decode_image_payload(payload: &str) -> Result<DecodedImage, UploadError> {
    let (header, data) = match payload.split_once(',') {
        Some((header, data)) => (Some(header), data),
        None => (None, payload),
    };
    let media_type = header
        .and_then(|h| h.trim().strip_prefix("data:"))
        .and_then(|h| h.split(';').next())
        .and_then(|m| m.trim().parse::<mime::Mime>().ok())
        .filter(|m| m.type_() == mime::IMAGE)
        .unwrap_or(mime::IMAGE_PNG);
    let data: String = data.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let bytes = STANDARD
        .decode(data)
        .map_err(|err| UploadError::Base64Decode(err.to_string()))?;
    Ok(DecodedImage { bytes, media_type })
}

/// Uploads images to the backend's files endpoint as multipart form data.
#[derive(Clone)]
pub struct HttpImageUploader {
    client: reqwest::Client,
    files_url: String,
}

impl HttpImageUploader {
    pub fn new(client: reqwest::Client, files_url: impl Into<String>) -> Self {
        Self {
            client,
            files_url: files_url.into(),
        }
    }

    async fn upload_blob(&self, image: DecodedImage, credential: &str) -> Result<String, UploadError> {
        let file_name = image.file_name();
        let part = reqwest::multipart::Part::bytes(image.bytes)
            .file_name(file_name)
            .mime_str(image.media_type.as_ref())
            .map_err(|err| UploadError::Transport(err.to_string()))?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let resp = self
            .client
            .post(&self.files_url)
            .bearer_auth(credential)
            .header(reqwest::header::ACCEPT, "application/json")
            .header(reqwest::header::USER_AGENT, BROWSER_USER_AGENT)
            .multipart(form)
            .send()
            .await
            .map_err(|err| UploadError::Transport(err.to_string()))?;

        let status = resp.status();
        if status != reqwest::StatusCode::OK {
            let text = resp.text().await.unwrap_or_default();
            tracing::error!(status = status.as_u16(), body = %text, "image upload rejected");
            return Err(UploadError::Status(status.as_u16()));
        }

        let body: Value = resp.json().await.map_err(|err| {
            tracing::error!("image upload returned unreadable body: {err}");
            UploadError::MissingId
        })?;
        let id = extract_file_id(&body).ok_or_else(|| {
            tracing::error!("image upload succeeded without an id");
            UploadError::MissingId
        })?;
        tracing::info!(image_id = %id, "image uploaded");
        Ok(id)
    }
}

#[async_trait]
impl ImageUploader for HttpImageUploader {
    async fn upload(&self, payload: &str, credential: &str) -> Result<String, UploadError> {
        let image = decode_image_payload(payload).inspect_err(|err| {
            tracing::error!("image payload rejected: {err}");
        })?;
        self.upload_blob(image, credential).await
    }
}

fn extract_file_id(body: &Value) -> Option<String> {
    body.get("id")
        .and_then(|v| v.as_str())
        .filter(|id| !id.is_empty())
        .map(|id| id.to_string())
}

#[cfg(test)]
mod tests {
    use super::{UploadError, decode_image_payload, extract_file_id};
    use serde_json::json;

    #[test]
    fn data_url_prefix_is_stripped_and_media_type_kept() {
        let image = decode_image_payload("data:image/jpeg;base64,aGVsbG8=").unwrap();
        assert_eq!(image.bytes, b"hello");
        assert_eq!(image.media_type, mime::IMAGE_JPEG);
        assert_eq!(image.file_name(), "image.jpeg");
    }

    #[test]
    fn bare_base64_defaults_to_png() {
        let image = decode_image_payload("aGVsbG8=").unwrap();
        assert_eq!(image.bytes, b"hello");
        assert_eq!(image.media_type, mime::IMAGE_PNG);
    }

    #[test]
    fn line_wrapped_base64_decodes() {
        let image = decode_image_payload("data:image/png;base64,aGVs\nbG8=").unwrap();
        assert_eq!(image.bytes, b"hello");
        let image = decode_image_payload(" aGVs\r\nbG8= \n").unwrap();
        assert_eq!(image.bytes, b"hello");
    }

    #[test]
    fn non_image_media_type_falls_back_to_png() {
        let image = decode_image_payload("data:text/plain;base64,aGVsbG8=").unwrap();
        assert_eq!(image.media_type, mime::IMAGE_PNG);
    }

    #[test]
    fn malformed_base64_is_a_decode_error() {
        let err = decode_image_payload("data:image/png;base64,@@not-base64@@").unwrap_err();
        assert!(matches!(err, UploadError::Base64Decode(_)));
        let err = decode_image_payload("https://example.com/cat.png").unwrap_err();
        assert!(matches!(err, UploadError::Base64Decode(_)));
    }

    #[test]
    fn file_id_must_be_a_non_empty_string() {
        assert_eq!(extract_file_id(&json!({"id": "f-1"})), Some("f-1".to_string()));
        assert_eq!(extract_file_id(&json!({"id": ""})), None);
        assert_eq!(extract_file_id(&json!({"id": 7})), None);
        assert_eq!(extract_file_id(&json!({})), None);
    }
}
