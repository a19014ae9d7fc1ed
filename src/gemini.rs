use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info, warn};

use crate::{
    config::AppConfig,
    error::GenerationError,
    generator::{ContentGenerator, GeneratedImage, ImageRequest, TextRequest},
};

// Helper function to truncate base64 data in JSON for cleaner logging
fn truncate_base64_in_json(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, val) in map.iter_mut() {
                if key == "data" {
                    if let serde_json::Value::String(s) = val {
                        let is_base64 = s.chars().all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '/' || c == '=');
                        if is_base64 && s.len() > 100 {
                            *val = serde_json::Value::String(format!("{}...[truncated {} chars]", &s[..50], s.len() - 50));
                        }
                    }
                } else {
                    truncate_base64_in_json(val);
                }
            }
        }
        serde_json::Value::Array(arr) => {
            for val in arr.iter_mut() {
                truncate_base64_in_json(val);
            }
        }
        _ => {}
    }
}

fn loggable(response_text: &str) -> String {
    if response_text.len() <= 1000 {
        return response_text.to_string();
    }
    match serde_json::from_str::<serde_json::Value>(response_text) {
        Ok(mut value) => {
            truncate_base64_in_json(&mut value);
            value.to_string()
        }
        Err(_) => format!("{}...", response_text.chars().take(1000).collect::<String>()),
    }
}

// reqwest errors print their URL; keep it out of messages that reach logs.
fn transport_error(e: reqwest::Error) -> GenerationError {
    GenerationError::Http(e.without_url().to_string())
}

pub struct GeminiClient {
    client: Client,
    config: AppConfig,
    base_url: String,
}

impl GeminiClient {
    pub fn new(config: &AppConfig) -> Result<Self, GenerationError> {
        let client = Client::builder()
            .timeout(config.upstream_timeout)
            .build()
            .map_err(|e| GenerationError::Http(e.to_string()))?;
        Ok(Self {
            client,
            base_url: config.api_base.trim_end_matches('/').to_string(),
            config: config.clone(),
        })
    }

    async fn perform_api_call(&self, model: &str, request_body: &serde_json::Value) -> Result<GeminiResponse, GenerationError> {
        let api_key = self.config.api_key.as_deref().ok_or(GenerationError::MissingCredential)?;
        let url = format!("{}/models/{}:generateContent", self.base_url, model);

        info!("🔗 Making request to: {}", url);

        let response = self.client
            .post(&url)
            .header("x-goog-api-key", api_key)
            .json(request_body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        info!("📥 Response status: {}", status);

        let response_text = response.text().await
            .map_err(transport_error)?;

        if !status.is_success() {
            error!("❌ API Error response: {}", loggable(&response_text));
            return Err(GenerationError::Status { status: status.as_u16(), body: response_text });
        }

        info!("📥 Raw Gemini API response: {}", loggable(&response_text));

        serde_json::from_str(&response_text)
            .map_err(|e| GenerationError::Parse(e.to_string()))
    }

    async fn generate_one_image(&self, prompt: &str) -> Result<GeneratedImage, GenerationError> {
        let request_body = json!({
            "contents": [{
                "parts": [{"text": prompt}]
            }],
            "generationConfig": {
                "responseModalities": ["TEXT", "IMAGE"],
                "temperature": 0.4,
                "topP": 0.95,
                "topK": 64,
                "candidateCount": 1
            }
        });
        let parsed = self.perform_api_call(&self.config.image_model, &request_body).await?;
        let inline = extract_first_image(&parsed).ok_or(GenerationError::NoContent("image"))?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(inline.data.as_bytes())
            .map_err(|e| GenerationError::Parse(format!("image base64: {e}")))?;
        let image_type = if inline.data.starts_with("iVBORw0KGgo") {
            "PNG"
        } else if inline.data.starts_with("/9j/") {
            "JPEG"
        } else {
            "Unknown"
        };
        info!("🖼️ Extracted {} image ({} bytes, {})", image_type, bytes.len(), inline.mime_type);
        Ok(GeneratedImage { mime_type: inline.mime_type.clone(), bytes })
    }
}

#[async_trait]
impl ContentGenerator for GeminiClient {
    async fn generate_text(&self, request: &TextRequest) -> Result<String, GenerationError> {
        let model = self.config.text_model_for(request.tier);
        info!(model, max_tokens = request.max_output_tokens, "Generating ebook text with Gemini API...");

        let payload = json!({
            "systemInstruction": {
                "parts": [{"text": request.system}]
            },
            "contents": [{
                "role": "user",
                "parts": [{"text": request.user}]
            }],
            "generationConfig": {
                "temperature": request.temperature,
                "maxOutputTokens": request.max_output_tokens
            }
        });

        let parsed = self.perform_api_call(model, &payload).await?;
        let text = extract_text(&parsed).ok_or(GenerationError::NoContent("text"))?;
        info!("✅ Ebook text generated ({} chars)", text.len());
        Ok(text)
    }

    async fn generate_images(&self, request: &ImageRequest) -> Result<Vec<GeneratedImage>, GenerationError> {
        // The image model returns one picture per call.
        let mut images = Vec::with_capacity(request.count);
        let mut last_error = None;
        for attempt in 0..request.count {
            match self.generate_one_image(&request.prompt).await {
                Ok(image) => images.push(image),
                Err(e) => {
                    warn!(chapter = request.chapter, attempt, "Image generation failed: {}", e);
                    last_error = Some(e);
                }
            }
        }
        match (images.is_empty(), last_error) {
            (true, Some(e)) => Err(e),
            _ => Ok(images),
        }
    }
}

// --- Response Parsing Helpers ---

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate { #[serde(default)] content: Content }

#[derive(Debug, Deserialize, Default)]
struct Content { #[serde(default)] parts: Vec<Part> }

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Part {
    Inline {
        #[serde(rename = "inlineData")]
        inline_data: InlineData
    },
    Text { text: String },
    Other(serde_json::Value)
}

#[derive(Debug, Deserialize)]
struct InlineData {
    data: String,
    #[serde(rename = "mimeType")]
    mime_type: String,
}

fn extract_first_image(resp: &GeminiResponse) -> Option<&InlineData> {
    for c in &resp.candidates {
        for p in &c.content.parts {
            if let Part::Inline { inline_data } = p {
                info!("🎯 Found image data with mime type: {}", inline_data.mime_type);
                return Some(inline_data);
            }
        }
    }
    info!("⚠️ No inline image data found in response structure");
    None
}

/// Joins every text part of the first candidate.
fn extract_text(resp: &GeminiResponse) -> Option<String> {
    let candidate = resp.candidates.first()?;
    let text: String = candidate
        .content
        .parts
        .iter()
        .filter_map(|p| match p {
            Part::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect();
    (!text.is_empty()).then_some(text)
}
