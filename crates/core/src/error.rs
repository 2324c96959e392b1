use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Failed to launch tool server: {0}")]
    Launch(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Invocation error: {0}")]
    Invocation(String),

    #[error("Tool server exited: {0}")]
    ProcessExited(String),

    #[error("Unknown capability: {0}")]
    UnknownCapability(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Tool loop exceeded after {0} iterations without a final answer")]
    ToolLoopExceeded(u32),

    #[error("Cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Operator interrupt, as opposed to an application fault.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// Failures the model can react to if handed back as a tool result.
    /// Transport-fatal errors are excluded: once the server process is gone
    /// there is nothing left for the model to retry against.
    pub fn is_tool_recoverable(&self) -> bool {
        matches!(self, Error::Invocation(_) | Error::UnknownCapability(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancelled_is_not_tool_recoverable() {
        assert!(Error::Cancelled.is_cancelled());
        assert!(!Error::Cancelled.is_tool_recoverable());
    }

    #[test]
    fn test_recoverable_classification() {
        assert!(Error::UnknownCapability("navigate".into()).is_tool_recoverable());
        assert!(Error::Invocation("timeout".into()).is_tool_recoverable());
        assert!(!Error::ProcessExited("stdout closed".into()).is_tool_recoverable());
        assert!(!Error::Protocol("malformed response".into()).is_tool_recoverable());
        assert!(!Error::Model("api error".into()).is_tool_recoverable());
    }
}
