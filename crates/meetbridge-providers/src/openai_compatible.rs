//! OpenAI-compatible chat completion client.
//!
//! Works against anything that speaks `/chat/completions`: LM Studio,
//! Ollama, llama.cpp server, OpenAI itself. Authentication is a bearer
//! token and is only sent when a key is configured.

use std::time::Duration;

use async_trait::async_trait;
use meetbridge_core::config::LlmConfig;
use meetbridge_core::error::{BridgeError, Result};
use meetbridge_core::traits::TextGenerator;
use serde_json::{Value, json};

/// A text generator backed by an OpenAI-compatible endpoint.
pub struct OpenAiCompatibleGenerator {
    /// Base URL without the trailing slash (e.g., "http://localhost:1234/v1").
    base_url: String,
    model: String,
    api_key: String,
    temperature: f32,
    max_tokens: u32,
    timeout: Duration,
    client: reqwest::Client,
}

impl OpenAiCompatibleGenerator {
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            timeout: Duration::from_secs(config.timeout_secs.max(1)),
            client: reqwest::Client::new(),
        }
    }

    fn apply_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.api_key.is_empty() {
            req
        } else {
            req.header("Authorization", format!("Bearer {}", self.api_key))
        }
    }

    fn transport_error(&self, url: &str, e: reqwest::Error) -> BridgeError {
        if e.is_timeout() {
            BridgeError::Timeout(self.timeout.as_secs())
        } else {
            BridgeError::Http(format!("LLM connection failed ({url}): {e}"))
        }
    }
}

#[async_trait]
impl TextGenerator for OpenAiCompatibleGenerator {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let mut messages = Vec::with_capacity(2);
        if !system.trim().is_empty() {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": user}));

        let body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });

        let url = format!("{}/chat/completions", self.base_url);
        let req = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .timeout(self.timeout)
            .json(&body);
        let req = self.apply_auth(req);

        let resp = req
            .send()
            .await
            .map_err(|e| self.transport_error(&url, e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            tracing::warn!("⚠️ LLM API error {status}: {text}");
            return Err(BridgeError::Provider(format!("LLM API error {status}: {text}")));
        }

        let json: Value = resp
            .json()
            .await
            .map_err(|e| BridgeError::Provider(format!("LLM response is not JSON: {e}")))?;

        let choice = json["choices"]
            .get(0)
            .ok_or_else(|| BridgeError::Provider("No choices in response".into()))?;

        // A null or missing content field is a blank answer, not a transport failure.
        let content = choice["message"]["content"].as_str().unwrap_or_default();
        tracing::debug!("🧠 LLM returned {} chars", content.len());
        Ok(content.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn generator(base_url: &str, api_key: &str, timeout_secs: u64) -> OpenAiCompatibleGenerator {
        OpenAiCompatibleGenerator::from_config(&LlmConfig {
            base_url: format!("{base_url}/v1/"),
            api_key: api_key.into(),
            timeout_secs,
            ..LlmConfig::default()
        })
    }

    fn completion(content: Value) -> Value {
        json!({
            "id": "chatcmpl-1",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": content}, "finish_reason": "stop"}]
        })
    }

    #[tokio::test]
    async fn test_complete_posts_chat_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("Authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({
                "model": "local-model",
                "max_tokens": 2000,
                "messages": [
                    {"role": "system", "content": "sys"},
                    {"role": "user", "content": "hello"}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion(json!("[]"))))
            .expect(1)
            .mount(&server)
            .await;

        let out = generator(&server.uri(), "sk-test", 5)
            .complete("sys", "hello")
            .await
            .unwrap();
        assert_eq!(out, "[]");
    }

    #[tokio::test]
    async fn test_blank_system_prompt_is_omitted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_partial_json(json!({
                "messages": [{"role": "user", "content": "only user"}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion(json!("ok"))))
            .expect(1)
            .mount(&server)
            .await;

        let out = generator(&server.uri(), "", 5)
            .complete("", "only user")
            .await
            .unwrap();
        assert_eq!(out, "ok");
    }

    #[tokio::test]
    async fn test_null_content_is_blank_answer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion(Value::Null)))
            .mount(&server)
            .await;

        let out = generator(&server.uri(), "", 5).complete("", "x").await.unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_server_error_is_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("model loading"))
            .mount(&server)
            .await;

        let err = generator(&server.uri(), "", 5).complete("", "x").await.unwrap_err();
        assert!(matches!(err, BridgeError::Provider(ref m) if m.contains("model loading")));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_missing_choices() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
            .mount(&server)
            .await;

        let err = generator(&server.uri(), "", 5).complete("", "x").await.unwrap_err();
        assert!(matches!(err, BridgeError::Provider(_)));
    }

    #[tokio::test]
    async fn test_slow_server_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(completion(json!("late")))
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let err = generator(&server.uri(), "", 1).complete("", "x").await.unwrap_err();
        assert!(matches!(err, BridgeError::Timeout(1)));
    }
}
