use std::io::Write;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use webpilot_agent::AgentSession;
use webpilot_core::{Error, Result};

const EXIT_COMMAND: &str = "exit";
const PROMPT: &str = "prompt> ";

/// Whole-line, ASCII case-insensitive. "exitnow" is a task, not an exit.
pub fn is_exit_command(line: &str) -> bool {
    line.trim().eq_ignore_ascii_case(EXIT_COMMAND)
}

/// The operator REPL: one task in flight at a time.
///
/// Blank lines re-prompt without touching the model. Task failures are
/// logged and the loop continues; cancellation ends the loop cleanly. The
/// caller owns transport teardown, which runs whatever way this returns.
pub async fn run_loop<R>(
    reader: R,
    session: &AgentSession,
    cancel: &CancellationToken,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();

    while !cancel.is_cancelled() {
        print!("{}", PROMPT);
        let _ = std::io::stdout().flush();

        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => line?,
        };

        let Some(line) = line else {
            // End of input: terminate without error.
            break;
        };

        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        if is_exit_command(input) {
            println!("Exit requested. Goodbye!");
            break;
        }

        match session.run(input, cancel).await {
            Ok(text) => {
                if text.trim().is_empty() {
                    println!("[no response]");
                } else {
                    println!("{}", text);
                }
            }
            Err(Error::Cancelled) => {
                info!("Cancellation requested. Shutting down.");
                break;
            }
            Err(e) => {
                error!(error = %e, "Task failed. Fix the issue and try again.");
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use webpilot_agent::ToolCatalog;
    use webpilot_core::types::{ChatMessage, LLMResponse};
    use webpilot_mcp::{McpTool, ToolTransport};
    use webpilot_provider::Provider;

    struct CountingProvider {
        calls: AtomicUsize,
        reply: String,
    }

    impl CountingProvider {
        fn new(reply: &str) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                reply: reply.to_string(),
            }
        }
    }

    #[async_trait]
    impl Provider for CountingProvider {
        async fn chat(&self, _messages: &[ChatMessage], _tools: &[Value]) -> webpilot_core::Result<LLMResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(LLMResponse {
                content: Some(self.reply.clone()),
                tool_calls: vec![],
                finish_reason: "stop".to_string(),
            })
        }
    }

    struct EmptyTransport;

    #[async_trait]
    impl ToolTransport for EmptyTransport {
        async fn list_tools(&self) -> webpilot_core::Result<Vec<McpTool>> {
            Ok(vec![McpTool {
                name: "navigate".to_string(),
                description: None,
                input_schema: json!({"type": "object"}),
            }])
        }

        async fn call_tool(&self, _name: &str, _arguments: Value) -> webpilot_core::Result<Value> {
            Ok(Value::Null)
        }
    }

    async fn session(provider: Arc<CountingProvider>) -> AgentSession {
        let catalog = Arc::new(ToolCatalog::build(Arc::new(EmptyTransport)).await.unwrap());
        AgentSession::new(provider, catalog, "instructions", 5)
    }

    #[test]
    fn test_exit_command_matching() {
        assert!(is_exit_command("exit"));
        assert!(is_exit_command("EXIT"));
        assert!(is_exit_command("ExIt"));
        assert!(is_exit_command("  exit  "));
        assert!(!is_exit_command("exitnow"));
        assert!(!is_exit_command("please exit"));
    }

    #[tokio::test]
    async fn test_blank_lines_and_exit_never_call_the_model() {
        let provider = Arc::new(CountingProvider::new("unused"));
        let session = session(provider.clone()).await;
        let input: &[u8] = b"\n   \n\t\nEXIT\n";

        run_loop(input, &session, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_eof_terminates_without_error() {
        let provider = Arc::new(CountingProvider::new("unused"));
        let session = session(provider.clone()).await;
        let input: &[u8] = b"";

        run_loop(input, &session, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_non_exit_lines_become_tasks() {
        let provider = Arc::new(CountingProvider::new("done"));
        let session = session(provider.clone()).await;
        // "exitnow" is not the exit keyword, so it runs as a task.
        let input: &[u8] = b"exitnow\nopen example.com\nexit\n";

        run_loop(input, &session, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancellation_while_awaiting_input() {
        let provider = Arc::new(CountingProvider::new("unused"));
        let session = session(provider.clone()).await;

        // A reader that never produces a line.
        let (reader, _writer) = tokio::io::duplex(64);
        let reader = tokio::io::BufReader::new(reader);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        tokio::time::timeout(Duration::from_secs(2), run_loop(reader, &session, &cancel))
            .await
            .expect("loop must end promptly after cancellation")
            .unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }
}
