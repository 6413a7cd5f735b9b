use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::integrations::{read_success_body, AiProvider, AiRequest, ChatRole, IntegrationError};

const SERVICE: &str = "anthropic";

#[derive(Debug, Clone)]
pub struct ClaudeClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    timeout: Duration,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClaudeRequest {
    pub model: String,
    pub max_tokens: u32,
    pub messages: Vec<ClaudeMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ClaudeMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClaudeResponse {
    pub id: String,
    pub model: String,
    pub role: String,
    pub content: Vec<ResponseContent>,
    pub stop_reason: Option<String>,
    pub usage: Usage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ResponseContent {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl ClaudeClient {
    pub fn new(api_key: String, model: String, timeout_secs: u64) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: "https://api.anthropic.com/v1".to_string(),
            model,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn build_request(&self, request: &AiRequest) -> ClaudeRequest {
        // The Messages API requires the first turn to come from the user.
        let messages = request
            .history
            .iter()
            .skip_while(|turn| turn.role != ChatRole::User)
            .map(|turn| ClaudeMessage {
                role: match turn.role {
                    ChatRole::User => "user".to_string(),
                    ChatRole::Assistant => "assistant".to_string(),
                },
                content: turn.content.clone(),
            })
            .collect();

        ClaudeRequest {
            model: self.model.clone(),
            max_tokens: request.max_tokens,
            messages,
            system: Some(request.system.clone()),
            temperature: Some(request.temperature),
        }
    }

    pub async fn generate_content(&self, request: &ClaudeRequest) -> Result<ClaudeResponse, IntegrationError> {
        tracing::debug!(
            model = %request.model,
            messages = request.messages.len(),
            "Claude API request"
        );

        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .timeout(self.timeout)
            .json(request)
            .send()
            .await
            .map_err(|e| IntegrationError::from_reqwest(SERVICE, e))?;

        let body = read_success_body(SERVICE, response).await?;
        serde_json::from_str(&body).map_err(|e| IntegrationError::Malformed {
            service: SERVICE,
            message: e.to_string(),
        })
    }
}

/// Concatenates the text blocks of a Messages API response.
pub fn response_text(response: &ClaudeResponse) -> Option<String> {
    let text: Vec<&str> = response
        .content
        .iter()
        .filter_map(|block| match block {
            ResponseContent::Text { text } => Some(text.as_str()),
            ResponseContent::Other => None,
        })
        .collect();
    if text.is_empty() {
        None
    } else {
        Some(text.join(""))
    }
}

#[async_trait]
impl AiProvider for ClaudeClient {
    fn name(&self) -> &'static str {
        SERVICE
    }

    async fn complete(&self, request: &AiRequest) -> Result<String, IntegrationError> {
        let claude_request = self.build_request(request);
        let response = self.generate_content(&claude_request).await?;

        tracing::debug!(
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            stop_reason = ?response.stop_reason,
            "Claude API response"
        );

        response_text(&response).ok_or_else(|| IntegrationError::Malformed {
            service: SERVICE,
            message: "no text content in response".to_string(),
        })
    }
}
