use crate::config::ResponseConfig;
use crate::error::StageError;
use crate::stage::ResponseStage;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// Maximum caller text forwarded to the text-generation backend (64 KiB).
const MAX_RESPONSE_INPUT_BYTES: usize = 64 * 1024;

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Generates replies through an OpenAI-compatible `/chat/completions` endpoint.
///
/// Each request carries only the configured system prompt and the caller's
/// text; no conversation history is kept between utterances.
#[derive(Debug, Clone)]
pub struct ChatResponder {
    config: ResponseConfig,
    client: Client,
}

impl ChatResponder {
    pub fn new(config: ResponseConfig) -> Result<Self, StageError> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| StageError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { config, client })
    }

    fn url(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl ResponseStage for ChatResponder {
    async fn respond(&self, text: &str) -> Result<String, StageError> {
        if text.len() > MAX_RESPONSE_INPUT_BYTES {
            return Err(StageError::Upstream(format!(
                "text exceeds maximum size: {} bytes (limit: {} bytes)",
                text.len(),
                MAX_RESPONSE_INPUT_BYTES
            )));
        }

        let body = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &self.config.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: text,
                },
            ],
            max_tokens: self.config.max_tokens,
        };

        let mut request = self.client.post(self.url()).json(&body);
        if !self.config.api_key.is_empty() {
            request = request.bearer_auth(&self.config.api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| StageError::Upstream(format!("chat request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StageError::Upstream(format!(
                "chat backend returned HTTP {}: {}",
                status, body
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| StageError::Upstream(format!("invalid chat response: {}", e)))?;

        let reply = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .unwrap_or_default();

        if reply.is_empty() {
            return Err(StageError::EmptyResult(
                "chat backend returned no content".to_string(),
            ));
        }

        Ok(reply)
    }
}
