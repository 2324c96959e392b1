use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Azure OpenAI backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelConfig {
    /// Resource endpoint, e.g. "https://my-resource.openai.azure.com".
    /// Required; startup fails with an actionable message when absent.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_deployment")]
    pub deployment: String,
    /// If absent, an ambient bearer token is discovered from the
    /// environment instead (AZURE_OPENAI_AD_TOKEN / AZURE_AD_TOKEN).
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_deployment() -> String {
    "gpt-4o".to_string()
}

fn default_api_version() -> String {
    "2024-10-21".to_string()
}

fn default_max_tokens() -> u32 {
    8192
}

fn default_temperature() -> f32 {
    0.7
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            deployment: default_deployment(),
            api_key: None,
            api_version: default_api_version(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    #[serde(default = "default_instructions")]
    pub instructions: String,
    /// Upper bound on backend rounds per task. A task that keeps emitting
    /// tool calls past this bound fails instead of looping forever.
    #[serde(default = "default_max_tool_iterations")]
    pub max_tool_iterations: u32,
}

fn default_instructions() -> String {
    "You are a browser operations specialist. Use the Playwright MCP tools to inspect pages, \
     fill forms, and report factual findings before responding."
        .to_string()
}

fn default_max_tool_iterations() -> u32 {
    20
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            instructions: default_instructions(),
            max_tool_iterations: default_max_tool_iterations(),
        }
    }
}

/// Launch settings for the MCP tool server child process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpServerConfig {
    #[serde(default = "default_mcp_name")]
    pub name: String,
    #[serde(default = "default_mcp_command")]
    pub command: String,
    #[serde(default = "default_mcp_args")]
    pub args: Vec<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_mcp_name() -> String {
    "playwright".to_string()
}

fn default_mcp_command() -> String {
    "npx".to_string()
}

fn default_mcp_args() -> Vec<String> {
    vec!["@playwright/mcp@latest".to_string()]
}

fn default_request_timeout_secs() -> u64 {
    120
}

impl Default for McpServerConfig {
    fn default() -> Self {
        Self {
            name: default_mcp_name(),
            command: default_mcp_command(),
            args: default_mcp_args(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub mcp: McpServerConfig,
}

/// Command-line layer. Every field is optional; `None` leaves the
/// underlying value untouched. Applied last, so CLI wins over both the
/// environment and the config file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub endpoint: Option<String>,
    pub deployment: Option<String>,
    pub api_key: Option<String>,
    pub api_version: Option<String>,
    pub instructions: Option<String>,
    pub mcp_name: Option<String>,
    pub mcp_command: Option<String>,
    pub mcp_args: Option<String>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Resolve the file layer. An explicitly requested file must exist;
    /// the default location is optional.
    pub fn load_or_default(explicit_path: Option<&Path>) -> Result<Self> {
        match explicit_path {
            Some(path) => {
                if !path.exists() {
                    return Err(Error::Config(format!(
                        "Config file not found: {}",
                        path.display()
                    )));
                }
                Self::load(path)
            }
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::load(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".webpilot").join("config.json"))
    }

    /// Apply the environment layer. Takes the variables as an iterator so
    /// tests can inject pairs without touching the process environment.
    pub fn apply_env<I>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            if value.trim().is_empty() {
                continue;
            }
            match key.as_str() {
                "AZURE_OPENAI_ENDPOINT" => self.model.endpoint = Some(value),
                "AZURE_OPENAI_DEPLOYMENT_NAME" => self.model.deployment = value,
                "AZURE_OPENAI_API_KEY" => self.model.api_key = Some(value),
                "AZURE_OPENAI_API_VERSION" => self.model.api_version = value,
                "AGENT_INSTRUCTIONS" => self.agent.instructions = value,
                "PLAYWRIGHT_MCP_NAME" => self.mcp.name = value,
                "PLAYWRIGHT_MCP_COMMAND" => self.mcp.command = value,
                "PLAYWRIGHT_MCP_ARGS" => self.mcp.args = split_args(&value),
                _ => {}
            }
        }
    }

    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(v) = &overrides.endpoint {
            self.model.endpoint = Some(v.clone());
        }
        if let Some(v) = &overrides.deployment {
            self.model.deployment = v.clone();
        }
        if let Some(v) = &overrides.api_key {
            self.model.api_key = Some(v.clone());
        }
        if let Some(v) = &overrides.api_version {
            self.model.api_version = v.clone();
        }
        if let Some(v) = &overrides.instructions {
            self.agent.instructions = v.clone();
        }
        if let Some(v) = &overrides.mcp_name {
            self.mcp.name = v.clone();
        }
        if let Some(v) = &overrides.mcp_command {
            self.mcp.command = v.clone();
        }
        if let Some(v) = &overrides.mcp_args {
            self.mcp.args = split_args(v);
        }
    }

    /// Build the fully layered config: defaults <- file <- env <- CLI.
    pub fn resolve(explicit_path: Option<&Path>, overrides: &ConfigOverrides) -> Result<Self> {
        let mut config = Self::load_or_default(explicit_path)?;
        config.apply_env(std::env::vars());
        config.apply_overrides(overrides);
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        match &self.model.endpoint {
            Some(endpoint) if !endpoint.trim().is_empty() => Ok(()),
            _ => Err(Error::Config(
                "Set AZURE_OPENAI_ENDPOINT (or pass --endpoint) to your Azure OpenAI endpoint."
                    .to_string(),
            )),
        }
    }

    /// Endpoint after `validate()` has passed.
    pub fn endpoint(&self) -> &str {
        self.model.endpoint.as_deref().unwrap_or_default()
    }
}

/// Split a raw argument string on whitespace, trimming and discarding
/// empty tokens.
pub fn split_args(raw: &str) -> Vec<String> {
    raw.split_whitespace()
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
        .collect()
}
