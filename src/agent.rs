//! Agent capability trait and immutable agent definitions
//!
//! An `Agent` is the message-processing behaviour; an `AgentDefinition`
//! describes how to build one (constructor, model, tools, initial config).
//! Definitions are immutable: a reload produces a new definition rather than
//! mutating the old one.

use crate::error::Result;
use crate::instance::AgentInstance;
use crate::tool::{Tool, ToolFactory};
use crate::types::Message;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// The capability set every agent satisfies
///
/// Hooks receive the owning `AgentInstance`, which gives access to the
/// instance's tools, configuration, model, and provider handle. Hooks must
/// not call `initialize` or `cleanup` on their own instance.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Called once when the instance becomes ready
    async fn on_ready(&self, _ctx: &AgentInstance) -> Result<()> {
        Ok(())
    }

    /// Handle a message; `None` (or an empty object) means no response
    async fn on_message(&self, ctx: &AgentInstance, message: &Message) -> Result<Option<Message>>;

    /// Release agent-held resources (tools are cleaned up by the instance)
    async fn cleanup(&self, _ctx: &AgentInstance) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl<T: Agent + ?Sized> Agent for Arc<T> {
    async fn on_ready(&self, ctx: &AgentInstance) -> Result<()> {
        (**self).on_ready(ctx).await
    }

    async fn on_message(&self, ctx: &AgentInstance, message: &Message) -> Result<Option<Message>> {
        (**self).on_message(ctx, message).await
    }

    async fn cleanup(&self, ctx: &AgentInstance) -> Result<()> {
        (**self).cleanup(ctx).await
    }
}

/// Constructor reference for an agent
pub type AgentFactory = Arc<dyn Fn(&AgentDefinition) -> Result<Box<dyn Agent>> + Send + Sync>;

/// Immutable description of how to build an agent
#[derive(Clone)]
pub struct AgentDefinition {
    /// Agent name; registry key and (lower-cased) route key
    pub name: String,

    /// Plugin kind the constructor was resolved from
    pub kind: String,

    /// Model identifier; the runtime default applies when unset
    pub model: Option<String>,

    /// Declared tool dependencies (advisory)
    pub required_tools: Vec<String>,

    /// Initial configuration applied after construction
    pub config: serde_json::Map<String, serde_json::Value>,

    /// File the definition was loaded from, if any
    pub source: Option<PathBuf>,

    /// When the definition was produced
    pub loaded_at: DateTime<Utc>,

    factory: AgentFactory,
    tools: Vec<ToolFactory>,
}

impl AgentDefinition {
    /// Create a definition from a constructor
    pub fn new<F>(name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&AgentDefinition) -> Result<Box<dyn Agent>> + Send + Sync + 'static,
    {
        let name = name.into();
        Self {
            kind: name.clone(),
            name,
            model: None,
            required_tools: Vec::new(),
            config: serde_json::Map::new(),
            source: None,
            loaded_at: Utc::now(),
            factory: Arc::new(factory),
            tools: Vec::new(),
        }
    }

    /// Create a definition from a shared constructor
    pub fn from_factory(name: impl Into<String>, kind: impl Into<String>, factory: AgentFactory) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            model: None,
            required_tools: Vec::new(),
            config: serde_json::Map::new(),
            source: None,
            loaded_at: Utc::now(),
            factory,
            tools: Vec::new(),
        }
    }

    /// Set the model identifier
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Add a tool constructor; each new instance gets a fresh tool
    pub fn with_tool<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Tool> + Send + Sync + 'static,
    {
        self.tools.push(Arc::new(factory));
        self
    }

    /// Add a shared tool constructor
    pub fn with_tool_factory(mut self, factory: ToolFactory) -> Self {
        self.tools.push(factory);
        self
    }

    /// Declare a required tool
    pub fn requires_tool(mut self, tool: impl Into<String>) -> Self {
        self.required_tools.push(tool.into());
        self
    }

    /// Add an initial configuration entry
    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    /// Record the source file
    pub fn with_source(mut self, source: impl Into<PathBuf>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Run the constructor
    pub fn build(&self) -> Result<Box<dyn Agent>> {
        (self.factory)(self)
    }

    /// Build fresh tools for a new instance
    pub fn build_tools(&self) -> Vec<Box<dyn Tool>> {
        self.tools.iter().map(|f| f()).collect()
    }

    /// Source file path, if the definition came from disk
    pub fn source_path(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Route key this agent is registered under
    pub fn route_key(&self) -> String {
        self.name.to_lowercase()
    }
}

impl std::fmt::Debug for AgentDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentDefinition")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("model", &self.model)
            .field("required_tools", &self.required_tools)
            .field("tools", &self.tools.len())
            .field("source", &self.source)
            .field("loaded_at", &self.loaded_at)
            .finish()
    }
}
