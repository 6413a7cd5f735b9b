//! OpenAI chat-completions provider (any compatible base URL).

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

use crate::integrations::{read_success_body, AiProvider, AiRequest, ChatRole, IntegrationError};

const SERVICE: &str = "openai";

pub struct OpenAiClient {
    api_key: String,
    model: String,
    base_url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl OpenAiClient {
    pub fn new(api_key: &str, model: &str, base_url: &str, timeout_secs: u64) -> Self {
        Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(timeout_secs),
            client: reqwest::Client::new(),
        }
    }

    pub fn build_body(&self, request: &AiRequest) -> Value {
        let mut messages = vec![json!({"role": "system", "content": request.system})];
        messages.extend(request.history.iter().map(|turn| {
            let role = match turn.role {
                ChatRole::User => "user",
                ChatRole::Assistant => "assistant",
            };
            json!({"role": role, "content": turn.content})
        }));

        json!({
            "model": self.model,
            "messages": messages,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        })
    }

    pub fn parse_response(json: &Value) -> Result<String, IntegrationError> {
        json.pointer("/choices/0/message/content")
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .ok_or_else(|| IntegrationError::Malformed {
                service: SERVICE,
                message: "missing choices[0].message.content".to_string(),
            })
    }
}

#[async_trait]
impl AiProvider for OpenAiClient {
    fn name(&self) -> &'static str {
        SERVICE
    }

    async fn complete(&self, request: &AiRequest) -> Result<String, IntegrationError> {
        let body = self.build_body(request);

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| IntegrationError::from_reqwest(SERVICE, e))?;

        let text = read_success_body(SERVICE, resp).await?;
        let json: Value = serde_json::from_str(&text).map_err(|e| IntegrationError::Malformed {
            service: SERVICE,
            message: e.to_string(),
        })?;
        Self::parse_response(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrations::ChatTurn;
    use axum::http::{header, HeaderMap, StatusCode};
    use axum::{routing::post, Json, Router};
    use std::sync::{Arc, Mutex};

    async fn spawn_fake_openai(seen: Arc<Mutex<Vec<(HeaderMap, Value)>>>, status: StatusCode, reply: Value) -> String {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(move |headers: HeaderMap, Json(body): Json<Value>| {
                let seen = seen.clone();
                let reply = reply.clone();
                async move {
                    seen.lock().unwrap().push((headers, body));
                    (status, Json(reply))
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/v1", addr)
    }

    fn ai_request() -> AiRequest {
        AiRequest {
            system: "stay supportive".into(),
            history: vec![ChatTurn { role: ChatRole::User, content: "hello".into() }],
            temperature: 0.3,
            max_tokens: 256,
        }
    }

    #[tokio::test]
    async fn test_complete_over_http() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let base = spawn_fake_openai(
            seen.clone(),
            StatusCode::OK,
            json!({"choices": [{"message": {"role": "assistant", "content": " I'm here. "}}]}),
        )
        .await;

        let client = OpenAiClient::new("sk-test", "gpt-4o-mini", &base, 5);
        assert_eq!(client.complete(&ai_request()).await.unwrap(), "I'm here.");

        let seen = seen.lock().unwrap();
        let (headers, body) = &seen[0];
        assert_eq!(headers[header::AUTHORIZATION], "Bearer sk-test");
        assert_eq!(body["messages"][0]["content"], "stay supportive");
        assert_eq!(body["max_tokens"], 256);
    }

    #[tokio::test]
    async fn test_server_error_is_reported() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let base = spawn_fake_openai(seen, StatusCode::SERVICE_UNAVAILABLE, json!({"error": "overloaded"})).await;

        let client = OpenAiClient::new("sk-test", "gpt-4o-mini", &base, 5);
        assert!(matches!(
            client.complete(&ai_request()).await,
            Err(IntegrationError::Status { status: 503, .. })
        ));
    }

    #[test]
    fn test_body_puts_system_prompt_first() {
        let client = OpenAiClient::new("sk-test", "gpt-4o-mini", "https://api.openai.com/v1/", 10);
        let body = client.build_body(&AiRequest {
            system: "stay supportive".into(),
            history: vec![ChatTurn { role: ChatRole::User, content: "hello".into() }],
            temperature: 0.3,
            max_tokens: 256,
        });
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hello");
        assert_eq!(body["model"], "gpt-4o-mini");
    }

    #[test]
    fn test_parse_response() {
        let raw = json!({"choices": [{"message": {"role": "assistant", "content": "  hi there "}}]});
        assert_eq!(OpenAiClient::parse_response(&raw).unwrap(), "hi there");
        assert!(OpenAiClient::parse_response(&json!({"choices": []})).is_err());
    }
}
