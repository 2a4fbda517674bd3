//! Tools: capability objects owned by a single agent instance
//!
//! A tool is handed to an instance by value (`Box<dyn Tool>`), so it can only
//! ever have one owner. The tool sees its owner through a `ToolContext`,
//! which holds a weak reference and never keeps the instance alive.

use crate::error::{AgentError, Result};
use crate::instance::AgentInstance;
use async_trait::async_trait;
use std::sync::{Arc, Weak};

/// Core trait for agent tools
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name; the key it is registered under
    fn name(&self) -> &str;

    /// Human-readable description
    fn description(&self) -> &str {
        ""
    }

    /// Validate arguments before execution
    ///
    /// Default implementation accepts everything.
    fn validate(&self, _args: &serde_json::Value) -> Result<()> {
        Ok(())
    }

    /// Execute the tool
    async fn execute(&self, ctx: &ToolContext, args: serde_json::Value) -> Result<serde_json::Value>;

    /// Release any resources held by the tool
    async fn cleanup(&self) -> Result<()> {
        Ok(())
    }
}

/// Constructor for a tool, used by definitions to build fresh tools per instance
pub type ToolFactory = Arc<dyn Fn() -> Box<dyn Tool> + Send + Sync>;

/// Execution context handed to a tool
///
/// Carries a non-owning back-reference to the instance that owns the tool.
#[derive(Clone)]
pub struct ToolContext {
    owner: Weak<AgentInstance>,
    tool: String,
}

impl ToolContext {
    pub(crate) fn new(owner: Weak<AgentInstance>, tool: impl Into<String>) -> Self {
        Self {
            owner,
            tool: tool.into(),
        }
    }

    /// A context with no owner, for driving a tool outside any agent
    pub fn detached(tool: impl Into<String>) -> Self {
        Self::new(Weak::new(), tool)
    }

    /// The owning instance
    ///
    /// Fails when the tool is not bound or the owner has been dropped.
    pub fn agent(&self) -> Result<Arc<AgentInstance>> {
        self.owner
            .upgrade()
            .ok_or_else(|| AgentError::tool(&self.tool, "Tool not bound to any agent"))
    }

    /// Name of the owning instance, if it is still alive
    pub fn agent_name(&self) -> Option<String> {
        self.owner.upgrade().map(|a| a.name().to_string())
    }

    /// Name of the tool this context was built for
    pub fn tool_name(&self) -> &str {
        &self.tool
    }
}

impl std::fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolContext")
            .field("tool", &self.tool)
            .field("bound", &(self.owner.strong_count() > 0))
            .finish()
    }
}

/// Pull a required string argument out of a JSON object
pub fn required_str<'a>(tool: &str, args: &'a serde_json::Value, key: &str) -> Result<&'a str> {
    args.get(key)
        .ok_or_else(|| AgentError::tool(tool, format!("'{}' is required", key)))?
        .as_str()
        .ok_or_else(|| AgentError::tool(tool, format!("'{}' must be a string", key)))
}
