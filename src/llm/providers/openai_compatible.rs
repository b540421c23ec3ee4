use async_trait::async_trait;

use crate::errors::{LocatorError, LocatorResult};
use crate::llm::provider::LlmProvider;
use crate::llm::types::GenerateRequest;

pub struct OpenAiCompatibleProvider {
    id: String,
    api_base: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatibleProvider {
    pub fn new(id: String, api_base: String, api_key: String) -> Self {
        Self {
            id,
            api_base,
            api_key,
            client: reqwest::Client::new(),
        }
    }

    fn build_body(&self, request: &GenerateRequest) -> serde_json::Value {
        serde_json::json!({
            "model": request.call.model,
            "messages": request.to_messages(),
            "stream": false,
            "temperature": request.call.temperature,
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": request.schema.name,
                    "schema": request.schema.schema,
                    "strict": true,
                }
            },
        })
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.id
    }

    async fn generate(&self, request: GenerateRequest) -> LocatorResult<String> {
        let body = self.build_body(&request);

        tracing::debug!(
            provider = %self.id,
            model = %request.call.model,
            schema = request.schema.name,
            "sending LLM request"
        );
        tracing::trace!(body = %sanitize_for_log(&body), "request body (sanitized, base64 omitted)");

        let response = self
            .client
            .post(&self.api_base)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let err_body = response.text().await.unwrap_or_default();
            let message = format!("{}: {}", status, err_body);
            return Err(match status.as_u16() {
                400 | 401 | 403 | 404 => LocatorError::NonRetryable(message),
                _ => LocatorError::LlmProvider(message),
            });
        }

        let json: serde_json::Value = response.json().await?;
        let content = json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| LocatorError::InvalidResponse("answer has no message content".into()))?
            .to_string();

        tracing::debug!(
            provider = %self.id,
            content_len = content.len(),
            "LLM JSON response received"
        );
        Ok(content)
    }
}

/// Clone the body and replace inline images so logs stay readable.
fn sanitize_for_log(body: &serde_json::Value) -> String {
    let mut log_body = body.clone();
    if let Some(msgs) = log_body.get_mut("messages").and_then(|m| m.as_array_mut()) {
        for msg in msgs {
            let Some(parts) = msg.get_mut("content").and_then(|c| c.as_array_mut()) else {
                continue;
            };
            for part in parts {
                if part.get("type").and_then(|t| t.as_str()) == Some("image_url") {
                    if let Some(url) = part.get_mut("image_url").and_then(|u| u.get_mut("url")) {
                        *url = serde_json::Value::String("<omitted_base64_image>".to_string());
                    }
                }
            }
        }
    }
    serde_json::to_string(&log_body).unwrap_or_default()
}
