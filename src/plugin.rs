//! Plugin registry: compiled-in agent and tool constructors by kind
//!
//! Definition files on disk name a plugin kind; the loader resolves that kind
//! here. Agent code is registered explicitly at startup rather than scanned
//! out of arbitrary files.

use crate::agent::{Agent, AgentDefinition, AgentFactory};
use crate::error::Result;
use crate::tool::{Tool, ToolFactory};
use std::collections::HashMap;
use std::sync::Arc;

/// Registry of agent and tool constructors keyed by kind
#[derive(Default, Clone)]
pub struct PluginRegistry {
    agents: HashMap<String, AgentFactory>,
    tools: HashMap<String, ToolFactory>,
}

impl PluginRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry pre-populated with the built-in plugins
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::builtin::register(&mut registry);
        registry
    }

    /// Register an agent constructor under `kind`
    pub fn register_agent<F>(&mut self, kind: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&AgentDefinition) -> Result<Box<dyn Agent>> + Send + Sync + 'static,
    {
        let kind = kind.into();
        tracing::debug!(kind = %kind, "Agent plugin registered");
        self.agents.insert(kind, Arc::new(factory));
        self
    }

    /// Register a tool constructor under `kind`
    pub fn register_tool<F>(&mut self, kind: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> Box<dyn Tool> + Send + Sync + 'static,
    {
        let kind = kind.into();
        tracing::debug!(kind = %kind, "Tool plugin registered");
        self.tools.insert(kind, Arc::new(factory));
        self
    }

    /// Agent constructor for `kind`
    pub fn agent(&self, kind: &str) -> Option<AgentFactory> {
        self.agents.get(kind).cloned()
    }

    /// Tool constructor for `kind`
    pub fn tool(&self, kind: &str) -> Option<ToolFactory> {
        self.tools.get(kind).cloned()
    }

    /// Registered agent kinds, sorted
    pub fn agent_kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.agents.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    /// Registered tool kinds, sorted
    pub fn tool_kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.tools.keys().cloned().collect();
        kinds.sort();
        kinds
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("agents", &self.agent_kinds())
            .field("tools", &self.tool_kinds())
            .finish()
    }
}
