//! Error types for a3s-agents

use thiserror::Error;

/// Errors that can occur in the agent runtime
#[derive(Debug, Error)]
pub enum AgentError {
    /// Construction or `on_ready` failure
    #[error("Failed to initialize agent '{agent}': {reason}")]
    Init {
        agent: String,
        reason: String,
    },

    /// `on_message` failure during fan-out
    #[error("Agent '{agent}' failed to handle message: {reason}")]
    Dispatch {
        agent: String,
        reason: String,
    },

    /// A configured agent directory is missing or unreadable
    #[error("Failed to discover agents in '{path}': {reason}")]
    Discovery {
        path: String,
        reason: String,
    },

    /// A definition file could not be read, parsed, or resolved
    #[error("Failed to load agent definitions from '{path}': {reason}")]
    Load {
        path: String,
        reason: String,
    },

    /// A hot-swap replacement failed; the previous instance keeps serving
    #[error("Failed to reload agent '{agent}': {reason}")]
    Reload {
        agent: String,
        reason: String,
    },

    /// Entry point used before startup or after teardown
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// One or more cleanup hooks failed (the instance is terminated regardless)
    #[error("Cleanup of agent '{agent}' reported {} failure(s): {}", failures.len(), failures.join("; "))]
    Cleanup {
        agent: String,
        failures: Vec<String>,
    },

    /// Tool lookup failure
    #[error("Agent '{agent}' has no tool named '{tool}'")]
    ToolNotFound {
        agent: String,
        tool: String,
    },

    /// Tool validation or execution failure
    #[error("Tool '{tool}' failed: {reason}")]
    Tool {
        tool: String,
        reason: String,
    },

    /// Generative-text provider failure
    #[error("Provider error: {0}")]
    Provider(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Filesystem watcher failure
    #[error("Watch error: {0}")]
    Watch(String),

    /// JSON serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML manifest/config parse failure
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl AgentError {
    /// Build a tool failure with the tool name attached
    pub fn tool(tool: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Tool {
            tool: tool.into(),
            reason: reason.to_string(),
        }
    }

    /// Build an init failure for the named agent
    pub fn init(agent: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Init {
            agent: agent.into(),
            reason: reason.to_string(),
        }
    }
}

/// Result type alias for agent runtime operations
pub type Result<T> = std::result::Result<T, AgentError>;
