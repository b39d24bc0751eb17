// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Vision API client for the supported hosted providers

pub mod transport;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::config::{AnalysisConfig, Provider};
use crate::contract::{preview, ANALYSIS_PROMPT};
use crate::media::ImageBlob;
use crate::{ReelscopeError, Result};
pub use transport::{CurlTransport, HttpRequest, HttpResponse, HttpTransport, ReqwestTransport};

const TEMPERATURE: f32 = 0.2;
const MAX_OUTPUT_TOKENS: u32 = 4096;

/// Anything that can turn a prompt plus images into model text
#[async_trait]
pub trait VisionBackend: Send + Sync {
    async fn describe(&self, config: &AnalysisConfig, images: &[ImageBlob]) -> Result<String>;
}

// Gemini wire shapes

#[derive(Serialize)]
struct GeminiRequest<'a> {
    contents: Vec<GeminiContent<'a>>,
    #[serde(rename = "generationConfig")]
    generation_config: GeminiGenerationConfig,
}

#[derive(Serialize)]
struct GeminiContent<'a> {
    parts: Vec<GeminiPart<'a>>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum GeminiPart<'a> {
    Text { text: &'a str },
    InlineData { inline_data: GeminiInlineData<'a> },
}

#[derive(Serialize)]
struct GeminiInlineData<'a> {
    mime_type: &'a str,
    data: String,
}

#[derive(Serialize)]
struct GeminiGenerationConfig {
    temperature: f32,
    #[serde(rename = "topP")]
    top_p: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiReplyContent>,
}

#[derive(Deserialize)]
struct GeminiReplyContent {
    #[serde(default)]
    parts: Vec<GeminiReplyPart>,
}

#[derive(Deserialize)]
struct GeminiReplyPart {
    text: Option<String>,
}

// Chat-completions wire shapes

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: Vec<ChatContent<'a>>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ChatContent<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ChatImageUrl },
}

#[derive(Serialize)]
struct ChatImageUrl {
    url: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: Option<ChatReplyMessage>,
}

#[derive(Deserialize)]
struct ChatReplyMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

/// Client for the hosted vision providers.
///
/// HTTPS endpoints go through the native transport, plain HTTP ones through the fallback.
pub struct VisionClient {
    native: Arc<dyn HttpTransport>,
    plaintext: Arc<dyn HttpTransport>,
}

impl VisionClient {
    /// Client with reqwest for TLS and curl for plain HTTP
    pub fn new(curl_path: &str) -> Result<Self> {
        Ok(Self::with_transports(
            Arc::new(ReqwestTransport::new()?),
            Arc::new(CurlTransport::new(curl_path)),
        ))
    }

    pub fn with_transports(native: Arc<dyn HttpTransport>, plaintext: Arc<dyn HttpTransport>) -> Self {
        Self { native, plaintext }
    }

    /// Send the analysis prompt with `images` and return the model's raw text
    pub async fn call(&self, config: &AnalysisConfig, images: &[ImageBlob]) -> Result<String> {
        let request = build_request(config, images)?;
        let transport = if is_plaintext(&request.url) {
            debug!("Plain HTTP endpoint, using fallback transport");
            &self.plaintext
        } else {
            &self.native
        };

        debug!(
            "Sending vision request: provider={}, model={}, images={}",
            config.provider,
            config.resolved_model(),
            images.len()
        );

        let response = transport.post_json(&request).await?;
        read_reply(config.provider, &response)
    }
}

#[async_trait]
impl VisionBackend for VisionClient {
    async fn describe(&self, config: &AnalysisConfig, images: &[ImageBlob]) -> Result<String> {
        self.call(config, images).await
    }
}

fn is_plaintext(url: &str) -> bool {
    url.get(..7)
        .map(|scheme| scheme.eq_ignore_ascii_case("http://"))
        .unwrap_or(false)
}

fn encode(image: &ImageBlob) -> String {
    general_purpose::STANDARD.encode(&image.data)
}

/// Build the provider-specific POST for `images`
pub fn build_request(config: &AnalysisConfig, images: &[ImageBlob]) -> Result<HttpRequest> {
    let base = config.resolved_endpoint();
    let model = config.resolved_model();
    let timeout = config.provider.request_timeout();

    match config.provider {
        Provider::Gemini => {
            let mut parts = vec![GeminiPart::Text { text: ANALYSIS_PROMPT }];
            parts.extend(images.iter().map(|image| GeminiPart::InlineData {
                inline_data: GeminiInlineData {
                    mime_type: &image.mime_type,
                    data: encode(image),
                },
            }));
            let body = GeminiRequest {
                contents: vec![GeminiContent { parts }],
                generation_config: GeminiGenerationConfig {
                    temperature: TEMPERATURE,
                    top_p: 0.8,
                    max_output_tokens: MAX_OUTPUT_TOKENS,
                },
            };
            Ok(HttpRequest {
                url: format!(
                    "{}/v1beta/models/{}:generateContent?key={}",
                    base, model, config.api_key
                ),
                headers: Vec::new(),
                body: serde_json::to_string(&body)?,
                timeout,
            })
        }
        Provider::Grok => {
            let mut content = vec![ChatContent::Text { text: ANALYSIS_PROMPT }];
            content.extend(images.iter().map(|image| ChatContent::ImageUrl {
                image_url: ChatImageUrl {
                    url: format!("data:{};base64,{}", image.mime_type, encode(image)),
                },
            }));
            let body = ChatRequest {
                model: &model,
                messages: vec![ChatMessage {
                    role: "user",
                    content,
                }],
                temperature: TEMPERATURE,
                max_tokens: MAX_OUTPUT_TOKENS,
            };
            Ok(HttpRequest {
                url: format!("{}/v1/chat/completions", base),
                headers: vec![(
                    "Authorization".to_string(),
                    format!("Bearer {}", config.api_key),
                )],
                body: serde_json::to_string(&body)?,
                timeout,
            })
        }
    }
}

/// Turn a transport response into model text, surfacing error envelopes first
pub fn read_reply(provider: Provider, response: &HttpResponse) -> Result<String> {
    if let Some(code) = response.status {
        if !(200..300).contains(&code) {
            return Err(ReelscopeError::Api {
                code,
                body: response.body.clone(),
            });
        }
    }

    if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(&response.body) {
        return Err(ReelscopeError::Api {
            code: response.status.unwrap_or(0),
            body: envelope.error.message,
        });
    }

    let text = match provider {
        Provider::Gemini => serde_json::from_str::<GeminiResponse>(&response.body)
            .ok()
            .and_then(|r| r.candidates.into_iter().next())
            .and_then(|c| c.content)
            .and_then(|c| c.parts.into_iter().next())
            .and_then(|p| p.text),
        Provider::Grok => serde_json::from_str::<ChatResponse>(&response.body)
            .ok()
            .and_then(|r| r.choices.into_iter().next())
            .and_then(|c| c.message)
            .and_then(|m| m.content),
    };

    text.ok_or_else(|| {
        ReelscopeError::Parse(format!(
            "cannot read {} response: {}",
            provider.display_name(),
            preview(&response.body, 200)
        ))
    })
}
