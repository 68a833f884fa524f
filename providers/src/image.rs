use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

/// One slide-rendering request.
#[derive(Debug, Clone)]
pub struct ImageRequest {
    pub prompt: String,
    pub width: u32,
    pub height: u32,
    pub page_index: usize,
    pub page_count: usize,
}

/// One rendered slide image plus the style report the model attached to it,
/// if any. The style report text feeds the anchor extractor.
#[derive(Debug, Clone)]
pub struct ImageResponse {
    pub data: Vec<u8>,
    pub media_type: String,
    pub model_id: String,
    pub style_text: Option<String>,
}

/// Image-generation collaborator.
#[async_trait]
pub trait ImageModel: Send + Sync {
    async fn render(&self, request: ImageRequest) -> Result<ImageResponse, ProviderError>;

    fn model_id(&self) -> &str;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentBody<'a> {
    contents: Vec<RequestContent<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct RequestContent<'a> {
    parts: Vec<RequestPart<'a>>,
}

#[derive(Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_modalities: Vec<&'static str>,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    inline_data: Option<InlineData>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

/// generateContent-style image client. The model renders a full slide image
/// from a composed prompt and may return a textual style report alongside.
pub struct GeminiImageClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    pub model: String,
}

impl GeminiImageClient {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            model,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl ImageModel for GeminiImageClient {
    async fn render(&self, request: ImageRequest) -> Result<ImageResponse, ProviderError> {
        let body = GenerateContentBody {
            contents: vec![RequestContent {
                parts: vec![RequestPart {
                    text: &request.prompt,
                }],
            }],
            generation_config: GenerationConfig {
                response_modalities: vec!["TEXT", "IMAGE"],
            },
        };

        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        tracing::debug!(
            model = %self.model,
            page = request.page_index,
            "image generation request"
        );

        let resp = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            let text = resp.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), "image generation failed");
            return Err(ProviderError::from_status(status.as_u16(), text, retry_after));
        }

        let parsed: GenerateContentResponse = resp.json().await?;
        let parts = parsed
            .candidates
            .into_iter()
            .next()
            .map(|c| c.content.parts)
            .unwrap_or_default();

        let mut image: Option<(Vec<u8>, String)> = None;
        let mut texts = Vec::new();
        for part in parts {
            if let Some(inline) = part.inline_data {
                if image.is_none() {
                    let bytes = base64::engine::general_purpose::STANDARD
                        .decode(inline.data.as_bytes())
                        .map_err(|e| {
                            ProviderError::InvalidResponse(format!("invalid base64 image: {e}"))
                        })?;
                    image = Some((bytes, inline.mime_type));
                }
            } else if let Some(text) = part.text {
                texts.push(text);
            }
        }

        let (data, media_type) = image.ok_or_else(|| {
            ProviderError::InvalidResponse("response contained no image data".to_string())
        })?;
        let style_text = if texts.is_empty() {
            None
        } else {
            Some(texts.join("\n"))
        };

        Ok(ImageResponse {
            data,
            media_type,
            model_id: self.model.clone(),
            style_text,
        })
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}
