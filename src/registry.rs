//! Agent registry: sole owner of live agent instances
//!
//! Instances are keyed by name and kept in insertion order. The registry
//! constructs instances from definitions (injecting the shared provider) and
//! is the only place instances are dropped from.

use crate::agent::AgentDefinition;
use crate::config::default_model;
use crate::error::{AgentError, Result};
use crate::instance::AgentInstance;
use crate::provider::Provider;
use indexmap::IndexMap;
use std::sync::{Arc, RwLock};

/// Registry of live agent instances
pub struct AgentRegistry {
    agents: RwLock<IndexMap<String, Arc<AgentInstance>>>,
    provider: Option<Arc<dyn Provider>>,
    default_model: String,
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new(None)
    }
}

impl AgentRegistry {
    /// Create a registry that hands `provider` to every instance it builds
    pub fn new(provider: Option<Arc<dyn Provider>>) -> Self {
        Self {
            agents: RwLock::new(IndexMap::new()),
            provider,
            default_model: default_model(),
        }
    }

    /// Model used for definitions that do not name one
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    /// Shared provider handle
    pub fn provider(&self) -> Option<&Arc<dyn Provider>> {
        self.provider.as_ref()
    }

    /// Construct an instance from a definition (not yet initialized or registered)
    pub fn construct(&self, definition: &AgentDefinition) -> Result<Arc<AgentInstance>> {
        let instance =
            AgentInstance::from_definition(definition, self.provider.clone(), &self.default_model)?;

        for tool in &definition.required_tools {
            if !instance.has_tool(tool) {
                tracing::warn!(
                    agent = %definition.name,
                    tool = %tool,
                    "Declared tool dependency is not registered"
                );
            }
        }
        Ok(instance)
    }

    /// Construct and initialize an instance
    pub async fn start(&self, definition: &AgentDefinition) -> Result<Arc<AgentInstance>> {
        let instance = self.construct(definition)?;
        instance.initialize().await?;
        Ok(instance)
    }

    /// Register an instance under its name
    ///
    /// Fails if a different instance already holds the name; use `replace`
    /// for hot swaps.
    pub fn insert(&self, instance: Arc<AgentInstance>) -> Result<()> {
        let mut agents = self.agents.write().map_err(|e| {
            AgentError::Precondition(format!("Agent registry lock poisoned: {}", e))
        })?;
        if let Some(existing) = agents.get(instance.name()) {
            if existing.id() != instance.id() {
                return Err(AgentError::Precondition(format!(
                    "Agent '{}' is already registered",
                    instance.name()
                )));
            }
            return Ok(());
        }
        tracing::debug!(agent = %instance.name(), id = %instance.id(), "Agent registered");
        agents.insert(instance.name().to_string(), instance);
        Ok(())
    }

    /// Swap `expected` for `replacement` if `expected` is still the live entry
    ///
    /// Returns `false` (and changes nothing) if the entry moved on.
    pub fn replace(&self, expected: &AgentInstance, replacement: Arc<AgentInstance>) -> Result<bool> {
        self.replace_with(expected, replacement, |_| {})
    }

    /// Like `replace`, running `publish` inside the same critical section
    ///
    /// The hot-reload path uses this to swap route-table references while the
    /// registry entry is being swapped, so no reader of the registry can see
    /// one side updated without the other.
    pub fn replace_with(
        &self,
        expected: &AgentInstance,
        replacement: Arc<AgentInstance>,
        publish: impl FnOnce(&Arc<AgentInstance>),
    ) -> Result<bool> {
        let mut agents = self.agents.write().map_err(|e| {
            AgentError::Precondition(format!("Agent registry lock poisoned: {}", e))
        })?;
        match agents.get_mut(expected.name()) {
            Some(slot) if slot.id() == expected.id() => {
                publish(&replacement);
                *slot = replacement;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Look up an instance by name
    pub fn get(&self, name: &str) -> Option<Arc<AgentInstance>> {
        self.agents
            .read()
            .ok()
            .and_then(|agents| agents.get(name).cloned())
    }

    /// Whether an instance is registered under `name`
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Remove an instance by name (the caller is responsible for cleanup)
    pub fn remove(&self, name: &str) -> Option<Arc<AgentInstance>> {
        self.agents
            .write()
            .ok()
            .and_then(|mut agents| agents.shift_remove(name))
    }

    /// Registered names in insertion order
    pub fn names(&self) -> Vec<String> {
        self.agents
            .read()
            .map(|agents| agents.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Snapshot of all instances in insertion order
    pub fn instances(&self) -> Vec<Arc<AgentInstance>> {
        self.agents
            .read()
            .map(|agents| agents.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of registered instances
    pub fn len(&self) -> usize {
        self.agents.read().map(|agents| agents.len()).unwrap_or(0)
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove and return every instance
    pub fn drain(&self) -> Vec<Arc<AgentInstance>> {
        self.agents
            .write()
            .map(|mut agents| agents.drain(..).map(|(_, v)| v).collect())
            .unwrap_or_default()
    }

    /// Clean up every instance (errors logged), then clear the registry
    pub async fn cleanup_all(&self) {
        for instance in self.drain() {
            if let Err(e) = instance.cleanup().await {
                tracing::warn!(agent = %instance.name(), error = %e, "Agent cleanup reported failures");
            }
        }
    }
}
