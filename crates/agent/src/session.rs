use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::ToolCatalog;
use webpilot_core::types::ChatMessage;
use webpilot_core::{Error, Result};
use webpilot_provider::Provider;

/// One logical agent: the model gateway plus the frozen tool catalog.
///
/// `run` evaluates a single operator task to completion: it loops model
/// calls and tool dispatches until the model yields final text, the
/// iteration bound trips, or the task is cancelled. Each task starts from a
/// fresh conversation; nothing is carried across tasks.
pub struct AgentSession {
    provider: Arc<dyn Provider>,
    catalog: Arc<ToolCatalog>,
    instructions: String,
    max_tool_iterations: u32,
}

impl AgentSession {
    pub fn new(
        provider: Arc<dyn Provider>,
        catalog: Arc<ToolCatalog>,
        instructions: &str,
        max_tool_iterations: u32,
    ) -> Self {
        Self {
            provider,
            catalog,
            instructions: instructions.to_string(),
            max_tool_iterations,
        }
    }

    /// Evaluate one task. `cancel` is observed at every suspension point;
    /// on cancellation the task's partial conversation is discarded.
    pub async fn run(&self, task: &str, cancel: &CancellationToken) -> Result<String> {
        let tools = self.catalog.as_model_tools();
        let mut messages = vec![
            ChatMessage::system(&self.instructions),
            ChatMessage::user(task),
        ];

        for iteration in 0..self.max_tool_iterations {
            debug!(iteration, "Model call");

            let response = tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                result = self.provider.chat(&messages, &tools) => result?,
            };

            if response.tool_calls.is_empty() {
                return Ok(response.content.unwrap_or_default());
            }

            let mut assistant = ChatMessage::assistant(response.content.as_deref().unwrap_or(""));
            assistant.tool_calls = Some(response.tool_calls.clone());
            messages.push(assistant);

            // Dispatch sequentially, in emission order; results are appended
            // in the same order.
            for call in &response.tool_calls {
                let dispatched = tokio::select! {
                    _ = cancel.cancelled() => return Err(Error::Cancelled),
                    result = self.catalog.dispatch(&call.name, call.arguments.clone()) => result,
                };

                let text = match dispatched {
                    Ok(value) => render_tool_result(value),
                    Err(e) if e.is_tool_recoverable() => {
                        // Hand the failure back to the model; it may pick a
                        // valid tool or give up on the next round.
                        warn!(tool = %call.name, error = %e, "Tool call failed");
                        format!("Error: {}", e)
                    }
                    Err(e) => return Err(e),
                };

                let mut tool_msg = ChatMessage::tool_result(&call.id, &text);
                tool_msg.name = Some(call.name.clone());
                messages.push(tool_msg);
            }
        }

        Err(Error::ToolLoopExceeded(self.max_tool_iterations))
    }
}

fn render_tool_result(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
