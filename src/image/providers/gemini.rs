//! Gemini (Google) generation client.

use crate::error::{parse_retry_after, sanitize_error_message, PhotoshootError, Result};
use crate::image::codec::data_uri;
use crate::image::provider::{compose_directive, GenerationClient, ENHANCE_DIRECTIVE};
use crate::image::types::{Composition, ImagePart};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Gemini image model variants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GeminiModel {
    /// Gemini 2.5 Flash Image, preview endpoint.
    #[default]
    FlashImagePreview,
    /// Gemini 2.5 Flash Image, stable endpoint.
    FlashImage,
}

impl GeminiModel {
    /// Returns the API model identifier.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FlashImagePreview => "gemini-2.5-flash-image-preview",
            Self::FlashImage => "gemini-2.5-flash-image",
        }
    }
}

/// Builder for GeminiClient.
#[derive(Debug, Clone, Default)]
pub struct GeminiClientBuilder {
    api_key: Option<String>,
    model: GeminiModel,
    base_url: Option<String>,
    timeout: Option<Duration>,
}

impl GeminiClientBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the API key. Falls back to the `GOOGLE_API_KEY`, then `API_KEY`
    /// env vars.
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Sets the Gemini model variant.
    pub fn model(mut self, model: GeminiModel) -> Self {
        self.model = model;
        self
    }

    /// Overrides the API base URL (proxies, tests).
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Sets a per-request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Builds the client, resolving the API key.
    pub fn build(self) -> Result<GeminiClient> {
        let api_key = self
            .api_key
            .or_else(|| non_empty_env("GOOGLE_API_KEY"))
            .or_else(|| non_empty_env("API_KEY"))
            .ok_or_else(|| {
                PhotoshootError::Auth(
                    "GOOGLE_API_KEY (or API_KEY) not set and no API key provided".into(),
                )
            })?;

        let mut http = reqwest::Client::builder();
        if let Some(timeout) = self.timeout {
            http = http.timeout(timeout);
        }

        Ok(GeminiClient {
            client: http.build()?,
            api_key,
            model: self.model,
            base_url: self
                .base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
        })
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Generation client backed by Gemini `generateContent`.
pub struct GeminiClient {
    client: reqwest::Client,
    api_key: String,
    model: GeminiModel,
    base_url: String,
}

impl GeminiClient {
    /// Creates a new `GeminiClientBuilder`.
    pub fn builder() -> GeminiClientBuilder {
        GeminiClientBuilder::new()
    }

    /// Returns the configured model.
    pub fn model(&self) -> GeminiModel {
        self.model
    }

    async fn generate_content(&self, body: &GeminiRequest) -> Result<GeminiResponse> {
        let start = Instant::now();
        let url = format!(
            "{}/models/{}:generateContent",
            self.base_url,
            self.model.as_str()
        );

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let headers = response.headers().clone();
            let text = response.text().await.unwrap_or_default();
            return Err(parse_error(status.as_u16(), &text, &headers));
        }

        let gemini_response: GeminiResponse = response.json().await?;

        tracing::debug!(
            model = self.model.as_str(),
            duration_ms = start.elapsed().as_millis() as u64,
            candidates = gemini_response.candidates.len(),
            "generateContent complete"
        );

        // Blocks arrive as HTTP 200 with prompt feedback
        if let Some(ref feedback) = gemini_response.prompt_feedback {
            if let Some(ref reason) = feedback.block_reason {
                let msg = feedback
                    .block_reason_message
                    .clone()
                    .unwrap_or_else(|| format!("Prompt blocked: {}", reason));
                return Err(PhotoshootError::ContentBlocked(msg));
            }
        }

        Ok(gemini_response)
    }
}

fn parse_error(status: u16, text: &str, headers: &reqwest::header::HeaderMap) -> PhotoshootError {
    let text = sanitize_error_message(text);
    if status == 404 {
        return PhotoshootError::InvalidRequest(
            "Model not found. Verify the model name is correct.".into(),
        );
    }
    if status == 429 {
        let retry_after = parse_retry_after(headers).map(Duration::from_secs);
        return PhotoshootError::RateLimited { retry_after };
    }
    if status == 401 || status == 403 {
        return PhotoshootError::Auth(text);
    }
    let lower = text.to_lowercase();
    if lower.contains("safety") || lower.contains("blocked") || lower.contains("prohibited") {
        return PhotoshootError::ContentBlocked(text);
    }
    PhotoshootError::Api {
        status,
        message: text,
    }
}

/// Returns the first inline image of the first candidate.
fn extract_enhanced(response: GeminiResponse) -> Result<ImagePart> {
    let candidate = response.candidates.into_iter().next().ok_or_else(|| {
        PhotoshootError::Enhancement("The model returned no candidates.".into())
    })?;

    candidate
        .content
        .into_iter()
        .flat_map(|c| c.parts)
        .find_map(|p| p.inline_data)
        .map(|inline| ImagePart::new(inline.data, inline.mime_type))
        .ok_or_else(|| {
            PhotoshootError::Enhancement(
                "Enhancement failed. The model did not return an enhanced image.".into(),
            )
        })
}

/// Folds the first candidate's parts into a [`Composition`]: text parts are
/// space-joined in order, and the last image part wins.
fn assemble_composition(response: GeminiResponse) -> Result<Composition> {
    let mut composition = Composition::default();

    let parts = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| c.parts)
        .unwrap_or_default();

    for part in parts {
        if let Some(text) = part.text.filter(|t| !t.is_empty()) {
            composition.note = Some(match composition.note.take() {
                Some(note) => format!("{note} {text}"),
                None => text,
            });
        } else if let Some(inline) = part.inline_data {
            composition.image_uri = Some(data_uri(&inline.mime_type, &inline.data));
        }
    }

    if composition.image_uri.is_none() && composition.note.is_none() {
        return Err(PhotoshootError::EmptyResponse);
    }
    Ok(composition)
}

#[async_trait]
impl GenerationClient for GeminiClient {
    async fn enhance(&self, image: &ImagePart) -> Result<ImagePart> {
        let body = GeminiRequest::enhance(image);
        self.generate_content(&body)
            .await
            .and_then(extract_enhanced)
            .map_err(|e| match e {
                PhotoshootError::Enhancement(_) => e,
                other => {
                    let msg = other.to_string();
                    let msg = msg.strip_prefix("Gemini API error: ").unwrap_or(&msg);
                    PhotoshootError::Enhancement(msg.to_string())
                }
            })
    }

    async fn compose(&self, images: &[ImagePart], prompt: &str) -> Result<Composition> {
        if images.is_empty() {
            return Err(PhotoshootError::InvalidArgument(
                "at least one image must be provided".into(),
            ));
        }
        let body = GeminiRequest::compose(images, prompt);
        let response = self.generate_content(&body).await?;
        assemble_composition(response)
    }

    fn name(&self) -> &str {
        "Gemini (Google)"
    }

    async fn health_check(&self) -> Result<()> {
        let url = format!("{}/models/{}", self.base_url, self.model.as_str());

        let response = self
            .client
            .get(&url)
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await?;

        match response.status().as_u16() {
            401 | 403 => Err(PhotoshootError::Auth("Invalid API key".into())),
            404 => Err(PhotoshootError::InvalidRequest(
                "Model not found. Verify the model name is correct.".into(),
            )),
            s if !(200..300).contains(&s) => Err(PhotoshootError::Api {
                status: s,
                message: "Health check failed".into(),
            }),
            _ => Ok(()),
        }
    }
}

// Request/Response types
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    generation_config: GeminiConfig,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    parts: Vec<GeminiRequestPart>,
}

/// A part in a Gemini request - can be text or inline image data.
#[derive(Debug, Serialize)]
#[serde(untagged)]
enum GeminiRequestPart {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: GeminiInlineData,
    },
}

impl From<&ImagePart> for GeminiRequestPart {
    fn from(image: &ImagePart) -> Self {
        Self::InlineData {
            inline_data: GeminiInlineData {
                mime_type: image.media_type.clone(),
                data: image.payload.clone(),
            },
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiInlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiConfig {
    response_modalities: Vec<&'static str>,
}

impl GeminiRequest {
    fn enhance(image: &ImagePart) -> Self {
        Self {
            contents: vec![GeminiContent {
                parts: vec![
                    image.into(),
                    GeminiRequestPart::Text {
                        text: ENHANCE_DIRECTIVE.to_string(),
                    },
                ],
            }],
            generation_config: GeminiConfig {
                response_modalities: vec!["IMAGE"],
            },
        }
    }

    fn compose(images: &[ImagePart], prompt: &str) -> Self {
        let mut parts: Vec<GeminiRequestPart> = images.iter().map(Into::into).collect();
        parts.push(GeminiRequestPart::Text {
            text: compose_directive(prompt),
        });

        Self {
            contents: vec![GeminiContent { parts }],
            generation_config: GeminiConfig {
                response_modalities: vec!["IMAGE", "TEXT"],
            },
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiContentResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
    #[serde(default)]
    block_reason_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiContentResponse {
    #[serde(default)]
    parts: Vec<GeminiPartResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPartResponse {
    #[serde(default)]
    text: Option<String>,
    #[serde(default, alias = "inline_data")]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(json: &str) -> GeminiResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_gemini_model_as_str() {
        assert_eq!(
            GeminiModel::FlashImagePreview.as_str(),
            "gemini-2.5-flash-image-preview"
        );
        assert_eq!(GeminiModel::FlashImage.as_str(), "gemini-2.5-flash-image");
        assert_eq!(GeminiModel::default(), GeminiModel::FlashImagePreview);
    }

    #[test]
    fn test_builder_with_explicit_key() {
        let client = GeminiClientBuilder::new()
            .api_key("test-key")
            .model(GeminiModel::FlashImage)
            .base_url("http://localhost:9999/v1beta/")
            .build()
            .unwrap();
        assert_eq!(client.model(), GeminiModel::FlashImage);
        assert_eq!(client.base_url, "http://localhost:9999/v1beta");
    }

    #[test]
    fn test_enhance_request_shape() {
        let req = GeminiRequest::enhance(&ImagePart::new("AAAA", "image/jpeg"));
        let json = serde_json::to_value(&req).unwrap();

        let parts = &json["contents"][0]["parts"];
        assert_eq!(parts[0]["inlineData"]["mimeType"], "image/jpeg");
        assert_eq!(parts[0]["inlineData"]["data"], "AAAA");
        assert_eq!(parts[1]["text"], ENHANCE_DIRECTIVE);
        assert_eq!(
            json["generationConfig"]["responseModalities"],
            serde_json::json!(["IMAGE"])
        );
    }

    #[test]
    fn test_compose_request_keeps_image_order() {
        let images = [
            ImagePart::new("first", "image/png"),
            ImagePart::new("second", "image/jpeg"),
        ];
        let req = GeminiRequest::compose(&images, "a picnic");
        let json = serde_json::to_value(&req).unwrap();

        let parts = json["contents"][0]["parts"].as_array().unwrap();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0]["inlineData"]["data"], "first");
        assert_eq!(parts[1]["inlineData"]["data"], "second");
        assert!(parts[2]["text"]
            .as_str()
            .unwrap()
            .ends_with("The scene should be: a picnic"));
        assert_eq!(
            json["generationConfig"]["responseModalities"],
            serde_json::json!(["IMAGE", "TEXT"])
        );
    }

    #[test]
    fn test_extract_enhanced_takes_first_image() {
        let resp = response(
            r#"{
            "candidates": [{
                "content": {
                    "parts": [
                        {"text": "here you go"},
                        {"inlineData": {"mimeType": "image/png", "data": "FIRST"}},
                        {"inlineData": {"mimeType": "image/jpeg", "data": "SECOND"}}
                    ]
                }
            }]
        }"#,
        );
        let part = extract_enhanced(resp).unwrap();
        assert_eq!(part, ImagePart::new("FIRST", "image/png"));
    }

    #[test]
    fn test_extract_enhanced_without_image_fails() {
        let resp = response(r#"{"candidates": [{"content": {"parts": [{"text": "sorry"}]}}]}"#);
        assert!(matches!(
            extract_enhanced(resp),
            Err(PhotoshootError::Enhancement(_))
        ));

        let resp = response(r#"{"candidates": []}"#);
        let err = extract_enhanced(resp).unwrap_err();
        assert!(err.to_string().starts_with("Gemini API error (enhancement)"));
    }

    #[test]
    fn test_composition_last_image_wins() {
        let resp = response(
            r#"{
            "candidates": [{
                "content": {
                    "parts": [
                        {"text": "A cozy scene."},
                        {"inlineData": {"mimeType": "image/png", "data": "IMG1"}},
                        {"inlineData": {"mimeType": "image/webp", "data": "IMG2"}}
                    ]
                }
            }]
        }"#,
        );
        let composition = assemble_composition(resp).unwrap();
        assert_eq!(composition.note.as_deref(), Some("A cozy scene."));
        assert_eq!(
            composition.image_uri.as_deref(),
            Some("data:image/webp;base64,IMG2")
        );
    }

    #[test]
    fn test_composition_joins_text_in_order() {
        let resp = response(
            r#"{
            "candidates": [{
                "content": {
                    "parts": [
                        {"text": "First."},
                        {"inlineData": {"mimeType": "image/png", "data": "IMG"}},
                        {"text": "Second."}
                    ]
                }
            }]
        }"#,
        );
        let composition = assemble_composition(resp).unwrap();
        assert_eq!(composition.note.as_deref(), Some("First. Second."));
        assert!(composition.image_uri.is_some());
    }

    #[test]
    fn test_composition_text_only() {
        let resp = response(
            r#"{"candidates": [{"content": {"parts": [{"text": "I cannot do that."}]}}]}"#,
        );
        let composition = assemble_composition(resp).unwrap();
        assert_eq!(composition.image_uri, None);
        assert_eq!(composition.note.as_deref(), Some("I cannot do that."));
    }

    #[test]
    fn test_composition_empty_fails() {
        for json in [
            r#"{}"#,
            r#"{"candidates": []}"#,
            r#"{"candidates": [{"finishReason": "STOP"}]}"#,
            r#"{"candidates": [{"content": {"parts": [{}]}}]}"#,
        ] {
            assert!(matches!(
                assemble_composition(response(json)),
                Err(PhotoshootError::EmptyResponse)
            ));
        }
    }

    #[test]
    fn test_snake_case_inline_data_accepted() {
        let resp = response(
            r#"{"candidates": [{"content": {"parts": [
                {"inline_data": {"mimeType": "image/png", "data": "X"}}
            ]}}]}"#,
        );
        assert_eq!(
            extract_enhanced(resp).unwrap(),
            ImagePart::new("X", "image/png")
        );
    }

    #[test]
    fn test_parse_error_mapping() {
        let headers = reqwest::header::HeaderMap::new();
        assert!(matches!(
            parse_error(401, "bad key", &headers),
            PhotoshootError::Auth(_)
        ));
        assert!(matches!(
            parse_error(404, "", &headers),
            PhotoshootError::InvalidRequest(_)
        ));
        assert!(matches!(
            parse_error(400, "Request blocked for safety reasons", &headers),
            PhotoshootError::ContentBlocked(_)
        ));
        assert!(matches!(
            parse_error(500, "internal", &headers),
            PhotoshootError::Api { status: 500, .. }
        ));

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(reqwest::header::RETRY_AFTER, "30".parse().unwrap());
        match parse_error(429, "slow down", &headers) {
            PhotoshootError::RateLimited { retry_after } => {
                assert_eq!(retry_after, Some(Duration::from_secs(30)));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_compose_rejects_empty_images_before_network() {
        // Unroutable base URL: any network attempt would surface as Network.
        let client = GeminiClient::builder()
            .api_key("test-key")
            .base_url("http://127.0.0.1:1")
            .build()
            .unwrap();
        let err = client.compose(&[], "anything").await.unwrap_err();
        assert!(matches!(err, PhotoshootError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_enhance_transport_failure_is_enhancement_error() {
        let client = GeminiClient::builder()
            .api_key("test-key")
            .base_url("http://127.0.0.1:1")
            .timeout(Duration::from_secs(2))
            .build()
            .unwrap();
        let err = client
            .enhance(&ImagePart::new("AAAA", "image/png"))
            .await
            .unwrap_err();
        assert!(matches!(err, PhotoshootError::Enhancement(_)));
        assert!(err
            .to_string()
            .starts_with("Gemini API error (enhancement): network error"));
    }
}
