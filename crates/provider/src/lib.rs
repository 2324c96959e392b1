//! Model gateway: one backend round per call. The tool-dispatch loop lives
//! in the agent session, not here.

pub mod azure;

use async_trait::async_trait;
use serde_json::Value;

use webpilot_core::types::{ChatMessage, LLMResponse};
use webpilot_core::Result;

#[async_trait]
pub trait Provider: Send + Sync {
    async fn chat(&self, messages: &[ChatMessage], tools: &[Value]) -> Result<LLMResponse>;
}

pub use azure::{AzureCredential, AzureOpenAIProvider};
