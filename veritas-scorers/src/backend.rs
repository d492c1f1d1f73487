//! LLM backend abstraction
//!
//! Supports Google Gemini, OpenAI-compatible APIs and Anthropic Claude. Every
//! backend accepts mixed text and image prompt parts.

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestMessageContentPartImageArgs,
        ChatCompletionRequestMessageContentPartTextArgs, ChatCompletionRequestUserMessageArgs,
        ChatCompletionRequestUserMessageContentPart, CreateChatCompletionRequestArgs, ImageDetail,
        ImageUrlArgs,
    },
    Client,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use std::sync::Arc;
use thiserror::Error;

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const ANTHROPIC_API_BASE: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Failures talking to a vision/language service
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("service call failed: {0}")]
    Api(String),

    #[error("backend misconfigured: {0}")]
    Config(String),

    #[error("service is rate limiting requests")]
    RateLimited,

    #[error("service returned no text")]
    EmptyResponse,
}

/// One piece of a multimodal prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptPart {
    Text(String),
    Image { data: Vec<u8>, mime_type: String },
}

impl PromptPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    fn data_url(data: &[u8], mime_type: &str) -> String {
        format!("data:{};base64,{}", mime_type, BASE64.encode(data))
    }
}

/// A model that answers a single multimodal user turn
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Answer the prompt parts, in order; the reply is trimmed and non-empty
    async fn generate(&self, parts: &[PromptPart]) -> Result<String, LlmError>;

    fn model_name(&self) -> &str;
}

/// Decode a JSON reply; 429 becomes `RateLimited`
async fn read_json(
    response: reqwest::Response,
    service: &str,
) -> Result<serde_json::Value, LlmError> {
    let status = response.status();
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(LlmError::RateLimited);
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(LlmError::Api(format!("{} answered {}: {}", service, status, body)));
    }
    response
        .json()
        .await
        .map_err(|e| LlmError::Api(format!("{} reply is not JSON: {}", service, e)))
}

fn non_empty(text: &str) -> Result<String, LlmError> {
    match text.trim() {
        "" => Err(LlmError::EmptyResponse),
        trimmed => Ok(trimmed.to_string()),
    }
}

fn require_key(api_key: &str, service: &str) -> Result<(), LlmError> {
    if api_key.trim().is_empty() {
        return Err(LlmError::Config(format!("{} API key is empty", service)));
    }
    Ok(())
}

/// Gemini `generateContent` settings
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    /// Sampling temperature; 0 keeps verdicts repeatable
    pub temperature: f32,
}

impl GeminiConfig {
    pub fn new(api_key: &str, model: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: GEMINI_API_BASE.to_string(),
            temperature: 0.0,
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.to_string();
        self
    }
}

/// Google Gemini over its REST API
pub struct GeminiBackend {
    http: reqwest::Client,
    settings: GeminiConfig,
}

impl GeminiBackend {
    pub fn new(settings: GeminiConfig) -> Result<Self, LlmError> {
        require_key(&settings.api_key, "Gemini")?;
        Ok(Self {
            http: reqwest::Client::new(),
            settings,
        })
    }
}

#[async_trait]
impl LlmBackend for GeminiBackend {
    async fn generate(&self, parts: &[PromptPart]) -> Result<String, LlmError> {
        let parts_json: Vec<serde_json::Value> = parts
            .iter()
            .map(|part| match part {
                PromptPart::Text(text) => serde_json::json!({ "text": text }),
                PromptPart::Image { data, mime_type } => serde_json::json!({
                    "inline_data": { "mime_type": mime_type, "data": BASE64.encode(data) }
                }),
            })
            .collect();

        let endpoint = format!(
            "{}/models/{}:generateContent",
            self.settings.base_url.trim_end_matches('/'),
            self.settings.model
        );
        let body = serde_json::json!({
            "contents": [{ "role": "user", "parts": parts_json }],
            "generationConfig": { "temperature": self.settings.temperature }
        });

        let response = self
            .http
            .post(&endpoint)
            .query(&[("key", &self.settings.api_key)])
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Api(e.to_string()))?;
        let reply = read_json(response, "Gemini").await?;

        let text: String = reply["candidates"][0]["content"]["parts"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|p| p["text"].as_str())
            .collect();
        non_empty(&text)
    }

    fn model_name(&self) -> &str {
        &self.settings.model
    }
}

/// Settings for OpenAI or a compatible server
#[derive(Debug, Clone)]
pub struct OpenAIBackendConfig {
    pub api_key: String,
    /// Alternative endpoint (OpenRouter, vLLM, Ollama); `None` means api.openai.com
    pub base_url: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u16,
}

impl Default for OpenAIBackendConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: None,
            model: "gpt-4o-mini".to_string(),
            temperature: 0.0,
            max_tokens: 512,
        }
    }
}

impl OpenAIBackendConfig {
    pub fn openai(api_key: &str, model: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            ..Self::default()
        }
    }

    /// A local server that ignores the key
    pub fn local(base_url: &str, model: &str) -> Self {
        Self {
            api_key: "unused".to_string(),
            base_url: Some(base_url.to_string()),
            model: model.to_string(),
            ..Self::default()
        }
    }
}

/// Chat completions backend; images travel as data URLs
pub struct OpenAIBackend {
    client: Client<OpenAIConfig>,
    settings: OpenAIBackendConfig,
}

impl OpenAIBackend {
    pub fn new(settings: OpenAIBackendConfig) -> Result<Self, LlmError> {
        if settings.base_url.is_none() {
            require_key(&settings.api_key, "OpenAI")?;
        }

        let mut api = OpenAIConfig::new().with_api_key(&settings.api_key);
        if let Some(base_url) = &settings.base_url {
            api = api.with_api_base(base_url);
        }

        Ok(Self {
            client: Client::with_config(api),
            settings,
        })
    }

    fn user_turn(&self, parts: &[PromptPart]) -> Result<ChatCompletionRequestMessage, OpenAIError> {
        let content = parts
            .iter()
            .map(|part| -> Result<ChatCompletionRequestUserMessageContentPart, OpenAIError> {
                Ok(match part {
                    PromptPart::Text(text) => ChatCompletionRequestMessageContentPartTextArgs::default()
                        .text(text.as_str())
                        .build()?
                        .into(),
                    PromptPart::Image { data, mime_type } => {
                        ChatCompletionRequestMessageContentPartImageArgs::default()
                            .image_url(
                                ImageUrlArgs::default()
                                    .url(PromptPart::data_url(data, mime_type))
                                    .detail(ImageDetail::Auto)
                                    .build()?,
                            )
                            .build()?
                            .into()
                    }
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ChatCompletionRequestUserMessageArgs::default()
            .content(content)
            .build()?
            .into())
    }
}

#[async_trait]
impl LlmBackend for OpenAIBackend {
    async fn generate(&self, parts: &[PromptPart]) -> Result<String, LlmError> {
        let request = self
            .user_turn(parts)
            .and_then(|turn| {
                CreateChatCompletionRequestArgs::default()
                    .model(&self.settings.model)
                    .messages(vec![turn])
                    .temperature(self.settings.temperature)
                    .max_tokens(self.settings.max_tokens)
                    .build()
            })
            .map_err(|e| LlmError::Config(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| LlmError::Api(e.to_string()))?;

        let text = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.as_deref())
            .unwrap_or_default();
        non_empty(text)
    }

    fn model_name(&self) -> &str {
        &self.settings.model
    }
}

/// Anthropic Messages API settings
#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub max_tokens: u32,
}

impl AnthropicConfig {
    pub fn new(api_key: &str, model: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: ANTHROPIC_API_BASE.to_string(),
            max_tokens: 1024,
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.to_string();
        self
    }
}

/// Anthropic Claude over the Messages API
pub struct AnthropicBackend {
    http: reqwest::Client,
    settings: AnthropicConfig,
}

impl AnthropicBackend {
    pub fn new(settings: AnthropicConfig) -> Result<Self, LlmError> {
        require_key(&settings.api_key, "Anthropic")?;
        Ok(Self {
            http: reqwest::Client::new(),
            settings,
        })
    }
}

#[async_trait]
impl LlmBackend for AnthropicBackend {
    async fn generate(&self, parts: &[PromptPart]) -> Result<String, LlmError> {
        let content: Vec<serde_json::Value> = parts
            .iter()
            .map(|part| match part {
                PromptPart::Text(text) => serde_json::json!({ "type": "text", "text": text }),
                PromptPart::Image { data, mime_type } => serde_json::json!({
                    "type": "image",
                    "source": { "type": "base64", "media_type": mime_type, "data": BASE64.encode(data) }
                }),
            })
            .collect();

        let body = serde_json::json!({
            "model": self.settings.model,
            "max_tokens": self.settings.max_tokens,
            "messages": [{ "role": "user", "content": content }]
        });

        let response = self
            .http
            .post(format!("{}/messages", self.settings.base_url.trim_end_matches('/')))
            .header("x-api-key", &self.settings.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Api(e.to_string()))?;
        let reply = read_json(response, "Anthropic").await?;

        let text: String = reply["content"]
            .as_array()
            .into_iter()
            .flatten()
            .filter(|block| block["type"] == "text")
            .filter_map(|block| block["text"].as_str())
            .collect();
        non_empty(&text)
    }

    fn model_name(&self) -> &str {
        &self.settings.model
    }
}

pub type SharedBackend = Arc<dyn LlmBackend>;

pub fn create_gemini_backend(settings: GeminiConfig) -> Result<SharedBackend, LlmError> {
    Ok(Arc::new(GeminiBackend::new(settings)?))
}

/// OpenAI or any server speaking its chat completions API
pub fn create_backend(settings: OpenAIBackendConfig) -> Result<SharedBackend, LlmError> {
    Ok(Arc::new(OpenAIBackend::new(settings)?))
}

pub fn create_anthropic_backend(settings: AnthropicConfig) -> Result<SharedBackend, LlmError> {
    Ok(Arc::new(AnthropicBackend::new(settings)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_data_url() {
        let url = PromptPart::data_url(&[0xff, 0xd8], "image/jpeg");
        assert_eq!(url, "data:image/jpeg;base64,/9g=");
    }

    #[test]
    fn test_gemini_requires_key() {
        assert!(GeminiBackend::new(GeminiConfig::new("", "gemini-2.0-flash")).is_err());
        let backend = GeminiBackend::new(GeminiConfig::new("key", "gemini-2.0-flash")).unwrap();
        assert_eq!(backend.model_name(), "gemini-2.0-flash");
    }

    #[test]
    fn test_create_openai_backend() {
        let backend = create_backend(OpenAIBackendConfig::openai("test-key", "gpt-4o-mini")).unwrap();
        assert_eq!(backend.model_name(), "gpt-4o-mini");

        assert!(create_backend(OpenAIBackendConfig::openai(" ", "gpt-4o-mini")).is_err());
        assert!(create_backend(OpenAIBackendConfig::local("http://localhost:11434/v1", "llava")).is_ok());
    }

    #[tokio::test]
    async fn test_gemini_sends_inline_image() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/gemini-2.0-flash:generateContent"))
            .and(query_param("key", "secret"))
            .and(body_partial_json(serde_json::json!({
                "contents": [{ "parts": [
                    { "text": "Is this photo real?" },
                    { "inline_data": { "mime_type": "image/png", "data": "AQI=" } }
                ]}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "candidates": [{ "content": { "parts": [{ "text": " Looks staged. " }, { "text": "0.3" }] } }]
            })))
            .mount(&server)
            .await;

        let backend = GeminiBackend::new(
            GeminiConfig::new("secret", "gemini-2.0-flash").with_base_url(&server.uri()),
        )
        .unwrap();
        let reply = backend
            .generate(&[
                PromptPart::text("Is this photo real?"),
                PromptPart::Image {
                    data: vec![1, 2],
                    mime_type: "image/png".to_string(),
                },
            ])
            .await
            .unwrap();

        assert_eq!(reply, "Looks staged. 0.3");
    }

    #[tokio::test]
    async fn test_gemini_rate_limit() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let backend =
            GeminiBackend::new(GeminiConfig::new("k", "m").with_base_url(&server.uri())).unwrap();
        let err = backend.generate(&[PromptPart::text("hi")]).await.unwrap_err();
        assert!(matches!(err, LlmError::RateLimited));
    }

    #[tokio::test]
    async fn test_anthropic_joins_text_blocks() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages"))
            .and(header("anthropic-version", ANTHROPIC_VERSION))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "content": [
                    { "type": "text", "text": "Score: " },
                    { "type": "text", "text": "0.8" }
                ]
            })))
            .mount(&server)
            .await;

        let backend = AnthropicBackend::new(
            AnthropicConfig::new("k", "claude").with_base_url(&server.uri()),
        )
        .unwrap();
        let reply = backend.generate(&[PromptPart::text("rate")]).await.unwrap();
        assert_eq!(reply, "Score: 0.8");
    }

    #[tokio::test]
    async fn test_empty_reply_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "content": [] })))
            .mount(&server)
            .await;

        let backend = AnthropicBackend::new(
            AnthropicConfig::new("k", "claude").with_base_url(&server.uri()),
        )
        .unwrap();
        let err = backend.generate(&[PromptPart::text("rate")]).await.unwrap_err();
        assert!(matches!(err, LlmError::EmptyResponse));
    }
}
