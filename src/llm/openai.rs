use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{TEMPERATURE, TransformConfig, Transformer, system_prompt, user_prompt};
use crate::error::TransformError;

/// Bound on a single completion call, connect through body.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessage,
}

/// Chat-completions client for the OpenAI API (or any compatible endpoint).
pub struct OpenAiTransformer {
    client: reqwest::Client,
    config: TransformConfig,
}

impl OpenAiTransformer {
    pub fn new(config: TransformConfig) -> Result<Self, TransformError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| TransformError::Request(format!("failed to build HTTP client: {e}")))?;
        tracing::info!(
            model = %config.model,
            max_tokens = config.max_tokens,
            "Transformation client ready"
        );
        Ok(Self { client, config })
    }

    fn completions_url(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl Transformer for OpenAiTransformer {
    async fn transform(&self, text: &str, speaker: &str) -> Result<String, TransformError> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system".into(),
                    content: system_prompt().into(),
                },
                ChatMessage {
                    role: "user".into(),
                    content: user_prompt(text, speaker),
                },
            ],
            max_tokens: self.config.max_tokens,
            temperature: TEMPERATURE,
        };

        let url = self.completions_url();
        debug!(%url, %speaker, "Sending transformation request");
        let started = std::time::Instant::now();

        let response = self
            .client
            .post(&url)
            .bearer_auth(self.config.api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| TransformError::Request(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| TransformError::Request(format!("failed to read body: {e}")))?;
        debug!(
            status = status.as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Transformation response received"
        );

        if !status.is_success() {
            return Err(TransformError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse =
            serde_json::from_str(&body).map_err(|e| TransformError::Decode(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or(TransformError::EmptyResponse)
    }
}
