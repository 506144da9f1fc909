use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::encoder::{DataUrl, EncodeError, EncodedImage};
use crate::settings::Settings;

pub const NO_IMAGE_MESSAGE: &str = "No image was generated. Please try a different pair of images.";
pub const GENERIC_ERROR_MESSAGE: &str = "An unknown error occurred while generating the image.";

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("{}", NO_IMAGE_MESSAGE)]
    NoImage,
    #[error("Gemini API key not set (export GEMINI_API_KEY or add gemini_api_key to settings.json)")]
    MissingApiKey,
    #[error("{0}")]
    Service(String),
    #[error("{0}")]
    Transport(String),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error("image generation stopped unexpectedly")]
    Aborted,
}

impl GenerationError {
    /// Text for the error banner. Blank messages fall back to a generic one.
    pub fn user_message(&self) -> String {
        let msg = self.to_string();
        if msg.trim().is_empty() {
            GENERIC_ERROR_MESSAGE.to_string()
        } else {
            msg
        }
    }
}

impl From<reqwest::Error> for GenerationError {
    fn from(e: reqwest::Error) -> Self {
        GenerationError::Transport(e.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiInlineData {
    #[serde(alias = "mime_type")]
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiPart {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(alias = "inline_data", skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<GeminiInlineData>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiGenerationConfig {
    pub response_modalities: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiRequestBody {
    pub contents: Vec<GeminiContent>,
    pub generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Deserialize)]
pub struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Debug, Default, Deserialize)]
pub struct GeminiResponseBody {
    candidates: Option<Vec<GeminiCandidate>>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorBody {
    error: GeminiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetail {
    message: Option<String>,
}

fn inline_part(image: &EncodedImage) -> GeminiPart {
    GeminiPart {
        text: None,
        inline_data: Some(GeminiInlineData {
            mime_type: image.mime_type.clone(),
            data: image.data.clone(),
        }),
    }
}

/// Person first, then item, then the instruction.
pub fn build_request(person: &EncodedImage, item: &EncodedImage, instruction: &str) -> GeminiRequestBody {
    GeminiRequestBody {
        contents: vec![GeminiContent {
            role: Some("user".to_string()),
            parts: vec![
                inline_part(person),
                inline_part(item),
                GeminiPart {
                    text: Some(instruction.to_string()),
                    inline_data: None,
                },
            ],
        }],
        generation_config: GeminiGenerationConfig {
            response_modalities: vec!["IMAGE".to_string()],
        },
    }
}

/// First candidate, first part with a non-empty inline payload.
pub fn extract_image(body: GeminiResponseBody) -> Result<DataUrl, GenerationError> {
    let candidate = body
        .candidates
        .and_then(|c| c.into_iter().next())
        .ok_or(GenerationError::NoImage)?;
    let parts = candidate.content.map(|c| c.parts).unwrap_or_default();
    parts
        .into_iter()
        .filter_map(|p| p.inline_data)
        .find(|inline| !inline.data.is_empty())
        .map(|inline| DataUrl::new(inline.mime_type, inline.data))
        .ok_or(GenerationError::NoImage)
}

fn service_error_message(status: reqwest::StatusCode, body: &str) -> String {
    serde_json::from_str::<GeminiErrorBody>(body)
        .ok()
        .and_then(|b| b.error.message)
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| format!("gemini image error: HTTP {status}"))
}

#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(&self, person: &EncodedImage, item: &EncodedImage) -> Result<DataUrl, GenerationError>;
}

#[derive(Debug, Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    settings: Settings,
}

impl GeminiClient {
    pub fn new(settings: Settings) -> Self {
        Self {
            http: reqwest::Client::new(),
            settings,
        }
    }

    pub fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.settings.api_base_url(),
            self.settings.model()
        )
    }
}

#[async_trait]
impl ImageGenerator for GeminiClient {
    #[instrument(skip_all, fields(model = %self.settings.model()))]
    async fn generate(&self, person: &EncodedImage, item: &EncodedImage) -> Result<DataUrl, GenerationError> {
        let api_key = self.settings.api_key().ok_or(GenerationError::MissingApiKey)?;
        let body = build_request(person, item, self.settings.instruction());

        info!("sending try-on request");
        let resp = self
            .http
            .post(self.endpoint())
            .header("x-goog-api-key", api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(%status, "gemini rejected the request");
            return Err(GenerationError::Service(service_error_message(status, &text)));
        }

        let value: GeminiResponseBody = resp.json().await?;
        let image = extract_image(value)?;
        debug!(mime = %image.mime_type, bytes = image.byte_len(), "inline image received");
        Ok(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn encoded(mime: &str, data: &str) -> EncodedImage {
        EncodedImage {
            data: data.into(),
            mime_type: mime.into(),
        }
    }

    fn parse(v: Value) -> GeminiResponseBody {
        serde_json::from_value(v).expect("response json")
    }

    #[test]
    fn request_orders_person_item_instruction() {
        let body = build_request(&encoded("image/jpeg", "cGVyc29u"), &encoded("image/png", "aXRlbQ=="), "wear it");
        let v = serde_json::to_value(&body).unwrap();
        let parts = v["contents"][0]["parts"].as_array().unwrap();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0]["inlineData"]["mimeType"], json!("image/jpeg"));
        assert_eq!(parts[0]["inlineData"]["data"], json!("cGVyc29u"));
        assert_eq!(parts[1]["inlineData"]["mimeType"], json!("image/png"));
        assert_eq!(parts[2], json!({ "text": "wear it" }));
        assert_eq!(v["generationConfig"]["responseModalities"], json!(["IMAGE"]));
    }

    #[test]
    fn single_inline_part_becomes_data_url() {
        let body = parse(json!({
            "candidates": [{ "content": { "parts": [
                { "inlineData": { "mimeType": "image/png", "data": "Zm9v" } }
            ]}}]
        }));
        let url = extract_image(body).unwrap();
        assert_eq!(url.to_string(), "data:image/png;base64,Zm9v");
    }

    #[test]
    fn text_parts_are_skipped_and_snake_case_is_accepted() {
        let body = parse(json!({
            "candidates": [{ "content": { "parts": [
                { "text": "here you go" },
                { "inline_data": { "mime_type": "image/webp", "data": "YmFy" } },
                { "inlineData": { "mimeType": "image/png", "data": "Zm9v" } }
            ]}}]
        }));
        assert_eq!(extract_image(body).unwrap().to_string(), "data:image/webp;base64,YmFy");
    }

    #[test]
    fn missing_image_is_the_fixed_error() {
        let cases = [
            json!({}),
            json!({ "candidates": [] }),
            json!({ "candidates": [{}] }),
            json!({ "candidates": [{ "content": { "parts": [] } }] }),
            json!({ "candidates": [{ "content": { "parts": [{ "text": "sorry" }] } }] }),
        ];
        for case in cases {
            let err = extract_image(parse(case.clone())).unwrap_err();
            assert!(matches!(err, GenerationError::NoImage), "{case}");
            assert_eq!(err.user_message(), NO_IMAGE_MESSAGE);
        }
    }

    #[test]
    fn only_first_candidate_is_considered() {
        let body = parse(json!({
            "candidates": [
                { "content": { "parts": [{ "text": "nothing" }] } },
                { "content": { "parts": [{ "inlineData": { "mimeType": "image/png", "data": "Zm9v" } }] } }
            ]
        }));
        assert!(matches!(extract_image(body), Err(GenerationError::NoImage)));
    }

    #[test]
    fn transport_message_is_surfaced_verbatim_or_generic() {
        assert_eq!(GenerationError::Transport("network down".into()).user_message(), "network down");
        assert_eq!(GenerationError::Transport(String::new()).user_message(), GENERIC_ERROR_MESSAGE);
        assert_eq!(GenerationError::Service("  ".into()).user_message(), GENERIC_ERROR_MESSAGE);
    }

    #[test]
    fn service_error_prefers_reported_message() {
        let body = r#"{"error":{"code":400,"message":"API key not valid.","status":"INVALID_ARGUMENT"}}"#;
        assert_eq!(service_error_message(reqwest::StatusCode::BAD_REQUEST, body), "API key not valid.");
        assert_eq!(
            service_error_message(reqwest::StatusCode::BAD_GATEWAY, "<html>"),
            "gemini image error: HTTP 502 Bad Gateway"
        );
    }

    /// Answers one HTTP request with a canned response and hands back the raw request.
    async fn serve_once(status: &'static str, body: String) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 4096];
            loop {
                let n = sock.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
                let text = String::from_utf8_lossy(&buf);
                if let Some(end) = text.find("\r\n\r\n") {
                    let len = text[..end]
                        .lines()
                        .filter_map(|l| l.split_once(':'))
                        .find(|(k, _)| k.trim().eq_ignore_ascii_case("content-length"))
                        .and_then(|(_, v)| v.trim().parse::<usize>().ok())
                        .unwrap_or(0);
                    if buf.len() >= end + 4 + len {
                        break;
                    }
                }
            }
            let resp = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            sock.write_all(resp.as_bytes()).await.unwrap();
            sock.shutdown().await.ok();
            String::from_utf8_lossy(&buf).into_owned()
        });
        (format!("http://{addr}"), handle)
    }

    fn client_for(base: String) -> GeminiClient {
        GeminiClient::new(Settings {
            gemini_api_key: Some("test-key".into()),
            api_base_url: Some(base),
            ..Settings::default()
        })
    }

    #[tokio::test]
    async fn client_posts_to_model_endpoint_and_reads_image() {
        let reply = json!({
            "candidates": [{ "content": { "role": "model", "parts": [
                { "inlineData": { "mimeType": "image/png", "data": "Zm9v" } }
            ]}}]
        });
        let (base, server) = serve_once("200 OK", reply.to_string()).await;
        let client = client_for(base);

        let url = client
            .generate(&encoded("image/jpeg", "cGVyc29u"), &encoded("image/png", "aXRlbQ=="))
            .await
            .unwrap();
        assert_eq!(url.to_string(), "data:image/png;base64,Zm9v");

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /models/gemini-2.5-flash-image-preview:generateContent"));
        assert!(request.to_ascii_lowercase().contains("x-goog-api-key: test-key"));
        assert!(request.contains("\"responseModalities\":[\"IMAGE\"]"));
    }

    #[tokio::test]
    async fn client_surfaces_service_error_message() {
        let reply = json!({ "error": { "code": 429, "message": "Quota exceeded." } });
        let (base, server) = serve_once("429 Too Many Requests", reply.to_string()).await;
        let err = client_for(base)
            .generate(&encoded("image/png", "YQ=="), &encoded("image/png", "Yg=="))
            .await
            .unwrap_err();
        assert_eq!(err.user_message(), "Quota exceeded.");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn missing_key_fails_before_any_request() {
        let client = GeminiClient::new(Settings {
            gemini_api_key: Some("  ".into()),
            api_base_url: Some("http://127.0.0.1:9".into()),
            ..Settings::default()
        });
        // Only meaningful when the environment carries no key either.
        if std::env::var("GEMINI_API_KEY").is_ok() || std::env::var("API_KEY").is_ok() {
            return;
        }
        let err = client
            .generate(&encoded("image/png", "YQ=="), &encoded("image/png", "Yg=="))
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::MissingApiKey));
    }
}
