use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::Provider;
use webpilot_core::types::{ChatMessage, LLMResponse, ToolCallRequest};
use webpilot_core::{Error, Result};

/// Find the largest byte index <= `max_bytes` that is a valid char boundary.
fn truncate_at_char_boundary(s: &str, max_bytes: usize) -> usize {
    if max_bytes >= s.len() {
        return s.len();
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    end
}

/// How a request authenticates against the Azure endpoint.
#[derive(Debug, Clone)]
pub enum AzureCredential {
    /// `api-key` header.
    ApiKey(String),
    /// `Authorization: Bearer` header, discovered from the ambient
    /// environment when no key is configured.
    BearerToken(String),
}

impl AzureCredential {
    /// Configured key first; otherwise fall back to an ambient token from
    /// the environment. `env` is injected so tests stay deterministic.
    pub fn resolve(
        api_key: Option<&str>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        if let Some(key) = api_key {
            let key = key.trim();
            if !key.is_empty() {
                return Ok(AzureCredential::ApiKey(key.to_string()));
            }
        }
        for var in ["AZURE_OPENAI_AD_TOKEN", "AZURE_AD_TOKEN"] {
            if let Some(token) = env(var) {
                let token = token.trim().to_string();
                if !token.is_empty() {
                    info!(source = var, "Using ambient bearer token credential");
                    return Ok(AzureCredential::BearerToken(token));
                }
            }
        }
        Err(Error::Config(
            "No credential available: set AZURE_OPENAI_API_KEY, or provide a bearer token via \
             AZURE_OPENAI_AD_TOKEN."
                .to_string(),
        ))
    }
}

pub struct AzureOpenAIProvider {
    client: Client,
    url: String,
    credential: AzureCredential,
    max_tokens: u32,
    temperature: f32,
}

impl AzureOpenAIProvider {
    pub fn new(
        endpoint: &str,
        deployment: &str,
        api_version: &str,
        credential: AzureCredential,
        max_tokens: u32,
        temperature: f32,
    ) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            url: request_url(endpoint, deployment, api_version),
            credential,
            max_tokens,
            temperature,
        }
    }
}

/// Deployment-scoped chat-completions URL for an Azure OpenAI resource.
fn request_url(endpoint: &str, deployment: &str, api_version: &str) -> String {
    format!(
        "{}/openai/deployments/{}/chat/completions?api-version={}",
        endpoint.trim_end_matches('/'),
        deployment,
        api_version
    )
}

fn no_tools(tools: &&[Value]) -> bool {
    tools.is_empty()
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "no_tools")]
    tools: &'a [Value],
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ToolCall {
    id: String,
    function: FunctionCall,
}

#[derive(Debug, Deserialize)]
struct FunctionCall {
    name: String,
    arguments: String,
}

fn into_llm_response(response: ChatResponse) -> Result<LLMResponse> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| Error::Model("No choices in response".to_string()))?;

    let tool_calls: Vec<ToolCallRequest> = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|tc| {
            // Arguments arrive as an embedded JSON string.
            let arguments: Value = serde_json::from_str(&tc.function.arguments)
                .unwrap_or(Value::Object(serde_json::Map::new()));
            ToolCallRequest {
                id: tc.id,
                name: tc.function.name,
                arguments,
            }
        })
        .collect();

    let content = choice.message.content.filter(|c| !c.is_empty());

    Ok(LLMResponse {
        content,
        tool_calls,
        finish_reason: choice.finish_reason.unwrap_or_else(|| "stop".to_string()),
    })
}

#[async_trait]
impl Provider for AzureOpenAIProvider {
    async fn chat(&self, messages: &[ChatMessage], tools: &[Value]) -> Result<LLMResponse> {
        let request = ChatRequest {
            messages,
            tools,
            tool_choice: if tools.is_empty() { None } else { Some("auto") },
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        info!(
            url = %self.url,
            tools_count = tools.len(),
            messages_count = messages.len(),
            "Calling model"
        );

        let mut builder = self.client.post(&self.url).json(&request);
        builder = match &self.credential {
            AzureCredential::ApiKey(key) => builder.header("api-key", key),
            AzureCredential::BearerToken(token) => {
                builder.header("Authorization", format!("Bearer {}", token))
            }
        };

        let response = builder
            .send()
            .await
            .map_err(|e| Error::Model(format!("Request failed: {}", e)))?;

        let status = response.status();
        let raw_body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            error!(status = %status, body = %raw_body, "Model API error");
            return Err(Error::Model(format!("API error {}: {}", status, raw_body)));
        }

        {
            let end = truncate_at_char_boundary(&raw_body, 500);
            debug!(body_len = raw_body.len(), preview = %&raw_body[..end], "Model raw response");
        }

        let chat_response: ChatResponse = serde_json::from_str(&raw_body).map_err(|e| {
            let end = truncate_at_char_boundary(&raw_body, 500);
            Error::Model(format!(
                "Failed to parse response: {}. Body: {}",
                e,
                &raw_body[..end]
            ))
        })?;

        into_llm_response(chat_response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_url_trims_trailing_slash() {
        let url = request_url("https://r.openai.azure.com/", "gpt-4o", "2024-10-21");
        assert_eq!(
            url,
            "https://r.openai.azure.com/openai/deployments/gpt-4o/chat/completions?api-version=2024-10-21"
        );
    }

    #[test]
    fn test_credential_prefers_configured_key() {
        let cred = AzureCredential::resolve(Some("secret"), |_| {
            Some("ambient-token".to_string())
        })
        .unwrap();
        assert!(matches!(cred, AzureCredential::ApiKey(k) if k == "secret"));
    }

    #[test]
    fn test_credential_falls_back_to_ambient_token() {
        let cred = AzureCredential::resolve(None, |var| {
            (var == "AZURE_OPENAI_AD_TOKEN").then(|| "tok".to_string())
        })
        .unwrap();
        assert!(matches!(cred, AzureCredential::BearerToken(t) if t == "tok"));
    }

    #[test]
    fn test_credential_missing_everything_is_config_error() {
        let err = AzureCredential::resolve(None, |_| None).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_blank_key_is_treated_as_absent() {
        let cred = AzureCredential::resolve(Some("   "), |var| {
            (var == "AZURE_AD_TOKEN").then(|| "t".to_string())
        })
        .unwrap();
        assert!(matches!(cred, AzureCredential::BearerToken(_)));
    }

    #[test]
    fn test_response_with_tool_calls() {
        let raw = r#"{
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "navigate", "arguments": "{\"url\": \"https://example.com\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        }"#;
        let parsed: ChatResponse = serde_json::from_str(raw).unwrap();
        let response = into_llm_response(parsed).unwrap();
        assert!(response.content.is_none());
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].name, "navigate");
        assert_eq!(response.tool_calls[0].arguments["url"], "https://example.com");
        assert_eq!(response.finish_reason, "tool_calls");
    }

    #[test]
    fn test_response_with_final_text() {
        let raw = r#"{
            "choices": [{
                "message": {"content": "The heading reads: Example Domain."},
                "finish_reason": "stop"
            }]
        }"#;
        let parsed: ChatResponse = serde_json::from_str(raw).unwrap();
        let response = into_llm_response(parsed).unwrap();
        assert!(response.is_final());
        assert_eq!(
            response.content.as_deref(),
            Some("The heading reads: Example Domain.")
        );
    }

    #[test]
    fn test_response_without_choices_is_model_error() {
        let parsed: ChatResponse = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        assert!(matches!(into_llm_response(parsed), Err(Error::Model(_))));
    }

    #[test]
    fn test_malformed_tool_arguments_fall_back_to_empty_object() {
        let raw = r#"{
            "choices": [{
                "message": {
                    "tool_calls": [{
                        "id": "call_1",
                        "function": {"name": "click", "arguments": "not json"}
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        }"#;
        let parsed: ChatResponse = serde_json::from_str(raw).unwrap();
        let response = into_llm_response(parsed).unwrap();
        assert!(response.tool_calls[0].arguments.as_object().unwrap().is_empty());
    }
}
