//! Agent instances and their lifecycle
//!
//! `Uninitialized → Ready → Terminated`. Initialization and cleanup are
//! serialized by a per-instance async lock, so concurrent `initialize` calls
//! run `on_ready` exactly once and cleanup never interleaves with it.

use crate::agent::{Agent, AgentDefinition};
use crate::config::default_model;
use crate::error::{AgentError, Result};
use crate::provider::Provider;
use crate::tool::{Tool, ToolContext};
use crate::types::{AgentState, Message};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

/// A running agent: behaviour plus lifecycle, configuration, and tools
pub struct AgentInstance {
    id: String,
    name: String,
    model: String,
    agent: Box<dyn Agent>,

    /// Held across `on_ready` / cleanup hooks
    lifecycle: tokio::sync::Mutex<()>,

    /// Shared by every in-flight `on_message`; cleanup takes it exclusively
    dispatch: tokio::sync::RwLock<()>,
    state: RwLock<AgentState>,

    config: RwLock<HashMap<String, serde_json::Value>>,
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,

    provider: Option<Arc<dyn Provider>>,
    source: Option<PathBuf>,

    /// Back-reference handed to tools
    self_ref: Weak<AgentInstance>,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

/// Builder for standalone instances
pub struct AgentInstanceBuilder {
    name: String,
    model: String,
    agent: Box<dyn Agent>,
    provider: Option<Arc<dyn Provider>>,
    source: Option<PathBuf>,
}

impl AgentInstanceBuilder {
    /// Set the model identifier
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Attach a provider handle
    pub fn provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Record the definition source
    pub fn source(mut self, source: impl Into<PathBuf>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Build the instance (state `Uninitialized`)
    pub fn build(self) -> Arc<AgentInstance> {
        Arc::new_cyclic(|self_ref| AgentInstance {
            id: format!("agt-{}", uuid::Uuid::new_v4()),
            name: self.name,
            model: self.model,
            agent: self.agent,
            lifecycle: tokio::sync::Mutex::new(()),
            dispatch: tokio::sync::RwLock::new(()),
            state: RwLock::new(AgentState::Uninitialized),
            config: RwLock::new(HashMap::new()),
            tools: RwLock::new(HashMap::new()),
            provider: self.provider,
            source: self.source,
            self_ref: self_ref.clone(),
        })
    }
}

impl AgentInstance {
    /// Start building an instance around an agent
    pub fn builder(name: impl Into<String>, agent: impl Agent + 'static) -> AgentInstanceBuilder {
        Self::builder_boxed(name, Box::new(agent))
    }

    /// Start building an instance around a boxed agent
    pub fn builder_boxed(name: impl Into<String>, agent: Box<dyn Agent>) -> AgentInstanceBuilder {
        AgentInstanceBuilder {
            name: name.into(),
            model: default_model(),
            agent,
            provider: None,
            source: None,
        }
    }

    /// Build an instance with default model and no provider
    pub fn new(name: impl Into<String>, agent: impl Agent + 'static) -> Arc<Self> {
        Self::builder(name, agent).build()
    }

    /// Construct an instance from a definition
    ///
    /// Runs the definition's constructor, registers a fresh set of its tools,
    /// and applies its initial configuration. Does not initialize.
    pub fn from_definition(
        definition: &AgentDefinition,
        provider: Option<Arc<dyn Provider>>,
        default_model: &str,
    ) -> Result<Arc<Self>> {
        let agent = definition.build().map_err(|e| match e {
            e @ AgentError::Init { .. } => e,
            other => AgentError::init(&definition.name, other),
        })?;

        let mut builder = Self::builder_boxed(&definition.name, agent)
            .model(definition.model.as_deref().unwrap_or(default_model));
        if let Some(provider) = provider {
            builder = builder.provider(provider);
        }
        if let Some(ref source) = definition.source {
            builder = builder.source(source);
        }
        let instance = builder.build();

        for tool in definition.build_tools() {
            instance.register_tool(tool);
        }
        instance.configure(definition.config.clone());
        Ok(instance)
    }

    /// Unique instance id (`agt-<uuid>`)
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Agent name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Model identifier
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Provider handle, if one was injected
    pub fn provider(&self) -> Option<&Arc<dyn Provider>> {
        self.provider.as_ref()
    }

    /// Definition source file, if any
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Current lifecycle state
    pub fn state(&self) -> AgentState {
        *read(&self.state)
    }

    /// Whether `on_ready` has completed
    pub fn is_ready(&self) -> bool {
        self.state() == AgentState::Ready
    }

    /// Run `on_ready` once and mark the instance ready
    ///
    /// Idempotent once ready. A failed hook leaves the instance
    /// `Uninitialized`; a terminated instance cannot be re-initialized.
    pub async fn initialize(&self) -> Result<()> {
        let _guard = self.lifecycle.lock().await;

        match self.state() {
            AgentState::Ready => return Ok(()),
            AgentState::Terminated => {
                return Err(AgentError::Precondition(format!(
                    "Agent '{}' has been terminated",
                    self.name
                )))
            }
            AgentState::Uninitialized => {}
        }

        self.agent.on_ready(self).await.map_err(|e| match e {
            e @ AgentError::Init { .. } => e,
            other => AgentError::init(&self.name, other),
        })?;

        *write(&self.state) = AgentState::Ready;
        tracing::info!(agent = %self.name, id = %self.id, model = %self.model, "Agent ready");
        Ok(())
    }

    /// Register a tool, binding it to this instance
    ///
    /// A tool registered under an existing name replaces the previous one.
    pub fn register_tool(&self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        let previous = write(&self.tools).insert(name.clone(), Arc::from(tool));
        tracing::debug!(
            agent = %self.name,
            tool = %name,
            replaced = previous.is_some(),
            "Tool registered"
        );
    }

    /// Look up a tool by name
    pub fn tool(&self, name: &str) -> Option<Arc<dyn Tool>> {
        read(&self.tools).get(name).cloned()
    }

    /// Whether a tool is registered under `name`
    pub fn has_tool(&self, name: &str) -> bool {
        read(&self.tools).contains_key(name)
    }

    /// Registered tool names, sorted
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = read(&self.tools).keys().cloned().collect();
        names.sort();
        names
    }

    /// Validate and execute a tool owned by this instance
    pub async fn execute_tool(&self, name: &str, args: serde_json::Value) -> Result<serde_json::Value> {
        let tool = self.tool(name).ok_or_else(|| AgentError::ToolNotFound {
            agent: self.name.clone(),
            tool: name.to_string(),
        })?;
        tool.validate(&args)?;
        let ctx = ToolContext::new(self.self_ref.clone(), name);
        tool.execute(&ctx, args).await
    }

    /// Merge options into the configuration; colliding keys are overwritten
    pub fn configure<K, I>(&self, options: I)
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, serde_json::Value)>,
    {
        let mut config = write(&self.config);
        for (key, value) in options {
            config.insert(key.into(), value);
        }
    }

    /// Snapshot of the configuration
    pub fn config(&self) -> HashMap<String, serde_json::Value> {
        read(&self.config).clone()
    }

    /// A single configuration value
    pub fn config_value(&self, key: &str) -> Option<serde_json::Value> {
        read(&self.config).get(key).cloned()
    }

    /// Deliver a message to the agent
    ///
    /// Cleanup waits for every delivery already in progress, so a handler
    /// never sees its instance torn down mid-message.
    pub async fn handle_message(&self, message: &Message) -> Result<Option<Message>> {
        let _dispatch = self.dispatch.read().await;
        if self.state() == AgentState::Terminated {
            return Err(AgentError::Dispatch {
                agent: self.name.clone(),
                reason: "agent has been terminated".to_string(),
            });
        }
        self.agent.on_message(self, message).await
    }

    /// Tear the instance down
    ///
    /// Runs the agent's cleanup hook, then every tool's cleanup (each
    /// isolated), clears tools and configuration, and marks the instance
    /// `Terminated`. The transition always completes; hook failures are
    /// reported afterwards as one `Cleanup` error. No-op when terminated.
    /// Messages already being handled finish first; later ones are rejected.
    pub async fn cleanup(&self) -> Result<()> {
        let _guard = self.lifecycle.lock().await;
        let _drained = self.dispatch.write().await;

        if self.state() == AgentState::Terminated {
            return Ok(());
        }

        let mut failures = Vec::new();

        if let Err(e) = self.agent.cleanup(self).await {
            tracing::warn!(agent = %self.name, error = %e, "Agent cleanup hook failed");
            failures.push(format!("agent hook: {}", e));
        }

        let tools: Vec<(String, Arc<dyn Tool>)> = write(&self.tools).drain().collect();
        for (name, tool) in tools {
            if let Err(e) = tool.cleanup().await {
                tracing::warn!(agent = %self.name, tool = %name, error = %e, "Tool cleanup failed");
                failures.push(format!("tool '{}': {}", name, e));
            }
        }

        write(&self.config).clear();
        *write(&self.state) = AgentState::Terminated;
        tracing::info!(agent = %self.name, id = %self.id, "Agent terminated");

        if failures.is_empty() {
            Ok(())
        } else {
            Err(AgentError::Cleanup {
                agent: self.name.clone(),
                failures,
            })
        }
    }
}

impl std::fmt::Debug for AgentInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentInstance")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("model", &self.model)
            .field("state", &self.state())
            .field("tools", &self.tool_names())
            .field("has_provider", &self.provider.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct Counting {
        ready: AtomicUsize,
        cleaned: AtomicUsize,
    }

    #[async_trait]
    impl Agent for Counting {
        async fn on_ready(&self, _ctx: &AgentInstance) -> Result<()> {
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.ready.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn on_message(&self, _ctx: &AgentInstance, message: &Message) -> Result<Option<Message>> {
            Ok(Some(message.clone()))
        }

        async fn cleanup(&self, _ctx: &AgentInstance) -> Result<()> {
            self.cleaned.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingReady;

    #[async_trait]
    impl Agent for FailingReady {
        async fn on_ready(&self, _ctx: &AgentInstance) -> Result<()> {
            Err(AgentError::Provider("backend down".to_string()))
        }

        async fn on_message(&self, _ctx: &AgentInstance, _message: &Message) -> Result<Option<Message>> {
            Ok(None)
        }
    }

    struct TrackedTool {
        name: &'static str,
        fail_cleanup: bool,
        cleaned: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Tool for TrackedTool {
        fn name(&self) -> &str {
            self.name
        }

        fn validate(&self, args: &serde_json::Value) -> Result<()> {
            if args.get("bad").is_some() {
                return Err(AgentError::tool(self.name, "bad argument"));
            }
            Ok(())
        }

        async fn execute(&self, ctx: &ToolContext, args: serde_json::Value) -> Result<serde_json::Value> {
            let owner = ctx.agent()?;
            Ok(json!({"owner": owner.name(), "args": args}))
        }

        async fn cleanup(&self) -> Result<()> {
            self.cleaned.fetch_add(1, Ordering::SeqCst);
            if self.fail_cleanup {
                return Err(AgentError::tool(self.name, "cleanup exploded"));
            }
            Ok(())
        }
    }

    fn tracked(name: &'static str, fail_cleanup: bool, cleaned: &Arc<AtomicUsize>) -> Box<dyn Tool> {
        Box::new(TrackedTool {
            name,
            fail_cleanup,
            cleaned: cleaned.clone(),
        })
    }

    #[tokio::test]
    async fn test_initialize_runs_on_ready_once() {
        let agent = Arc::new(Counting::default());
        let instance = AgentInstance::new("counter", agent.clone());
        assert_eq!(instance.state(), AgentState::Uninitialized);

        instance.initialize().await.unwrap();
        instance.initialize().await.unwrap();

        assert!(instance.is_ready());
        assert_eq!(agent.ready.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_initialize_is_serialized() {
        let agent = Arc::new(Counting::default());
        let instance = AgentInstance::new("counter", agent.clone());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let instance = instance.clone();
                tokio::spawn(async move { instance.initialize().await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(agent.ready.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_on_ready_stays_uninitialized() {
        let instance = AgentInstance::new("broken", FailingReady);
        let err = instance.initialize().await.unwrap_err();
        assert!(matches!(err, AgentError::Init { ref agent, .. } if agent == "broken"));
        assert_eq!(instance.state(), AgentState::Uninitialized);
    }

    #[tokio::test]
    async fn test_configure_merges_last_write_wins() {
        let instance = AgentInstance::new("cfg", Counting::default());
        instance.configure([("a", json!(1))]);
        instance.configure([("a", json!(2)), ("b", json!(3))]);

        let config = instance.config();
        assert_eq!(config.len(), 2);
        assert_eq!(config["a"], 2);
        assert_eq!(config["b"], 3);
    }

    #[tokio::test]
    async fn test_register_tool_last_wins_and_binds_owner() {
        let cleaned = Arc::new(AtomicUsize::new(0));
        let instance = AgentInstance::new("owner", Counting::default());
        instance.register_tool(tracked("search", false, &cleaned));
        instance.register_tool(tracked("search", false, &cleaned));
        assert_eq!(instance.tool_names(), vec!["search"]);

        let out = instance.execute_tool("search", json!({"q": "rust"})).await.unwrap();
        assert_eq!(out["owner"], "owner");
        assert_eq!(out["args"]["q"], "rust");
    }

    #[tokio::test]
    async fn test_execute_tool_missing_and_invalid() {
        let cleaned = Arc::new(AtomicUsize::new(0));
        let instance = AgentInstance::new("owner", Counting::default());
        instance.register_tool(tracked("search", false, &cleaned));

        let err = instance.execute_tool("nope", json!({})).await.unwrap_err();
        assert!(matches!(err, AgentError::ToolNotFound { .. }));

        let err = instance.execute_tool("search", json!({"bad": 1})).await.unwrap_err();
        assert!(matches!(err, AgentError::Tool { .. }));
    }

    #[tokio::test]
    async fn test_cleanup_isolates_tool_failures() {
        let cleaned = Arc::new(AtomicUsize::new(0));
        let agent = Arc::new(Counting::default());
        let instance = AgentInstance::new("owner", agent.clone());
        instance.register_tool(tracked("a", true, &cleaned));
        instance.register_tool(tracked("b", false, &cleaned));
        instance.register_tool(tracked("c", false, &cleaned));
        instance.configure([("k", json!("v"))]);
        instance.initialize().await.unwrap();

        let err = instance.cleanup().await.unwrap_err();
        match err {
            AgentError::Cleanup { failures, .. } => assert_eq!(failures.len(), 1),
            other => panic!("unexpected error: {other}"),
        }

        assert_eq!(cleaned.load(Ordering::SeqCst), 3);
        assert_eq!(agent.cleaned.load(Ordering::SeqCst), 1);
        assert_eq!(instance.state(), AgentState::Terminated);
        assert!(instance.tool_names().is_empty());
        assert!(instance.config().is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_twice_is_noop() {
        let agent = Arc::new(Counting::default());
        let instance = AgentInstance::new("owner", agent.clone());
        instance.cleanup().await.unwrap();
        instance.cleanup().await.unwrap();
        assert_eq!(agent.cleaned.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_terminated_rejects_initialize_and_messages() {
        let instance = AgentInstance::new("owner", Counting::default());
        instance.initialize().await.unwrap();
        instance.cleanup().await.unwrap();

        assert!(matches!(
            instance.initialize().await.unwrap_err(),
            AgentError::Precondition(_)
        ));
        let msg = crate::types::message(json!({"x": 1}));
        assert!(matches!(
            instance.handle_message(&msg).await.unwrap_err(),
            AgentError::Dispatch { .. }
        ));
    }

    #[tokio::test]
    async fn test_tool_context_outlives_owner() {
        let cleaned = Arc::new(AtomicUsize::new(0));
        let instance = AgentInstance::new("owner", Counting::default());
        instance.register_tool(tracked("t", false, &cleaned));
        let tool = instance.tool("t").unwrap();
        let ctx = ToolContext::new(Arc::downgrade(&instance), "t");
        drop(instance);

        let err = tool.execute(&ctx, json!({})).await.unwrap_err();
        assert!(err.to_string().contains("not bound"));
    }

    #[tokio::test]
    async fn test_from_definition_applies_tools_and_config() {
        let cleaned = Arc::new(AtomicUsize::new(0));
        let tool_cleaned = cleaned.clone();
        let def = AgentDefinition::new("Memory", |_| Ok(Box::new(Counting::default())))
            .with_tool(move || tracked("memory_store", false, &tool_cleaned))
            .with_config("temperature", 0.8);

        let instance = AgentInstance::from_definition(&def, None, "llama2").unwrap();
        assert_eq!(instance.name(), "Memory");
        assert_eq!(instance.model(), "llama2");
        assert!(instance.has_tool("memory_store"));
        assert_eq!(instance.config_value("temperature"), Some(json!(0.8)));
        assert_eq!(instance.state(), AgentState::Uninitialized);
    }

    struct Slow;

    #[async_trait]
    impl Agent for Slow {
        async fn on_message(&self, ctx: &AgentInstance, _message: &Message) -> Result<Option<Message>> {
            tokio::time::sleep(Duration::from_millis(150)).await;
            Ok(Some(crate::types::message(json!({
                "state": ctx.state().to_string(),
                "mode": ctx.config_value("mode"),
            }))))
        }
    }

    #[tokio::test]
    async fn test_cleanup_waits_for_in_flight_message() {
        let instance = AgentInstance::new("slow", Slow);
        instance.configure([("mode", json!("fast"))]);
        instance.initialize().await.unwrap();

        let handling = instance.clone();
        let reply = tokio::spawn(async move { handling.handle_message(&Message::new()).await });
        tokio::time::sleep(Duration::from_millis(30)).await;

        instance.cleanup().await.unwrap();
        assert_eq!(instance.state(), AgentState::Terminated);

        let reply = reply.await.unwrap().unwrap().unwrap();
        assert_eq!(reply["state"], AgentState::Ready.to_string());
        assert_eq!(reply["mode"], "fast");

        // later deliveries are rejected
        assert!(instance.handle_message(&Message::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_from_definition_constructor_failure_is_init_error() {
        let def = AgentDefinition::new("broken", |_| Err(AgentError::Config("nope".to_string())));
        let err = AgentInstance::from_definition(&def, None, "llama2").unwrap_err();
        assert!(matches!(err, AgentError::Init { ref agent, .. } if agent == "broken"));
    }
}
