pub mod catalog;
pub mod session;

pub use catalog::ToolCatalog;
pub use session::AgentSession;
