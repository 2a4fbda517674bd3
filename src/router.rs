//! Fan-out message router
//!
//! Route keys group registrations but do not filter dispatch: every message
//! goes to every distinct registered instance. Responses come back in the
//! order instances were first registered with the router.
//!
//! The route table is an immutable snapshot behind a lock. Dispatch clones
//! the `Arc` and releases the lock before awaiting anything; mutation is
//! copy-on-write, so a dispatch always sees one consistent table.

use crate::agent::Agent;
use crate::error::{AgentError, Result};
use crate::history::ConversationHistory;
use crate::instance::AgentInstance;
use crate::types::{Message, RouteResponse};
use async_trait::async_trait;
use futures::future::join_all;
use futures::FutureExt;
use indexmap::IndexMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

/// Route key → instance associations
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: IndexMap<String, Vec<Arc<AgentInstance>>>,

    /// Distinct instances in first-registration order
    members: Vec<Arc<AgentInstance>>,
}

impl RouteTable {
    fn register(&mut self, key: String, instance: Arc<AgentInstance>) {
        if !self.members.iter().any(|m| m.id() == instance.id()) {
            self.members.push(instance.clone());
        }
        self.routes.entry(key).or_default().push(instance);
    }

    fn replace(&mut self, old_id: &str, replacement: &Arc<AgentInstance>) -> usize {
        let mut replaced = 0;
        for slot in self
            .routes
            .values_mut()
            .flat_map(|v| v.iter_mut())
            .chain(self.members.iter_mut())
        {
            if slot.id() == old_id {
                *slot = replacement.clone();
                replaced += 1;
            }
        }
        replaced
    }

    fn remove(&mut self, id: &str) -> bool {
        let before = self.members.len();
        self.members.retain(|m| m.id() != id);
        for instances in self.routes.values_mut() {
            instances.retain(|m| m.id() != id);
        }
        self.routes.retain(|_, instances| !instances.is_empty());
        before != self.members.len()
    }

    /// Distinct instances in dispatch order
    pub fn members(&self) -> &[Arc<AgentInstance>] {
        &self.members
    }

    /// Route keys in registration order
    pub fn keys(&self) -> Vec<String> {
        self.routes.keys().cloned().collect()
    }

    /// Instances registered under `key` (duplicates preserved)
    pub fn route(&self, key: &str) -> &[Arc<AgentInstance>] {
        self.routes.get(key).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Fan-out router with bounded conversation history
pub struct Router {
    name: String,
    routes: RwLock<Arc<RouteTable>>,
    history: Mutex<ConversationHistory>,
    open: AtomicBool,
}

impl Router {
    /// Create a router with the given name and history capacity
    pub fn new(name: impl Into<String>, max_history: usize) -> Self {
        Self {
            name: name.into(),
            routes: RwLock::new(Arc::new(RouteTable::default())),
            history: Mutex::new(ConversationHistory::new(max_history)),
            open: AtomicBool::new(true),
        }
    }

    /// Router name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the router accepts messages
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Accept messages again after a cleanup
    pub fn reopen(&self) {
        self.open.store(true, Ordering::SeqCst);
    }

    /// Register `instance` under `key`
    pub fn register_route(&self, key: impl Into<String>, instance: Arc<AgentInstance>) {
        let key = key.into();
        tracing::debug!(router = %self.name, key = %key, agent = %instance.name(), "Route registered");
        self.update(|table| table.register(key, instance));
    }

    /// Swap every reference to `old` for `replacement` in one update
    ///
    /// Returns the number of references replaced.
    pub fn replace_instance(&self, old: &AgentInstance, replacement: Arc<AgentInstance>) -> usize {
        let old_id = old.id().to_string();
        self.update(|table| table.replace(&old_id, &replacement))
    }

    /// Drop every reference to `instance`
    pub fn remove_instance(&self, instance: &AgentInstance) -> bool {
        let id = instance.id().to_string();
        self.update(|table| table.remove(&id))
    }

    /// Current route table snapshot
    pub fn snapshot(&self) -> Arc<RouteTable> {
        self.routes
            .read()
            .map(|table| table.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }

    /// Distinct registered instances in dispatch order
    pub fn instances(&self) -> Vec<Arc<AgentInstance>> {
        self.snapshot().members().to_vec()
    }

    /// Route keys in registration order
    pub fn route_keys(&self) -> Vec<String> {
        self.snapshot().keys()
    }

    /// History snapshot, oldest first
    pub fn history(&self) -> Vec<Message> {
        self.history
            .lock()
            .map(|h| h.to_vec())
            .unwrap_or_else(|e| e.into_inner().to_vec())
    }

    /// History capacity
    pub fn max_history(&self) -> usize {
        self.history
            .lock()
            .map(|h| h.capacity())
            .unwrap_or_else(|e| e.into_inner().capacity())
    }

    /// Record `message`, fan it out, and aggregate the responses
    ///
    /// The message is appended to history before any dispatch starts. Every
    /// distinct instance is invoked concurrently; an error or panic in one
    /// is logged and never affects the others. Returns `None` when no
    /// instance produced a non-empty response.
    pub async fn route_message(&self, message: &Message) -> Result<Option<RouteResponse>> {
        if !self.is_open() {
            return Err(AgentError::Precondition(format!(
                "Router '{}' has been torn down",
                self.name
            )));
        }

        self.with_history(|h| h.push(message.clone()));

        let table = self.snapshot();
        let dispatches = table
            .members()
            .iter()
            .map(|instance| dispatch(instance, message));
        let responses: Vec<Message> = join_all(dispatches).await.into_iter().flatten().collect();

        tracing::debug!(
            router = %self.name,
            targets = table.members().len(),
            responses = responses.len(),
            "Message routed"
        );

        Ok(RouteResponse::from_responses(responses))
    }

    /// Clear history and routes and stop accepting messages
    pub fn cleanup(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.with_history(|h| h.clear());
        self.update(|table| *table = RouteTable::default());
        tracing::info!(router = %self.name, "Router cleaned up");
    }

    fn update<R>(&self, f: impl FnOnce(&mut RouteTable) -> R) -> R {
        let mut guard = self.routes.write().unwrap_or_else(|e| e.into_inner());
        f(Arc::make_mut(&mut guard))
    }

    fn with_history(&self, f: impl FnOnce(&mut ConversationHistory)) {
        let mut guard = self.history.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard);
    }
}

/// Deliver one message to one instance, containing any failure
async fn dispatch(instance: &Arc<AgentInstance>, message: &Message) -> Option<Message> {
    match AssertUnwindSafe(instance.handle_message(message))
        .catch_unwind()
        .await
    {
        Ok(Ok(Some(response))) if !response.is_empty() => Some(response),
        Ok(Ok(_)) => None,
        Ok(Err(e)) => {
            tracing::warn!(agent = %instance.name(), id = %instance.id(), error = %e, "Agent failed to handle message");
            None
        }
        Err(panic) => {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            let err = AgentError::Dispatch {
                agent: instance.name().to_string(),
                reason: format!("panicked: {}", reason),
            };
            tracing::error!(id = %instance.id(), error = %err, "Agent panicked while handling message");
            None
        }
    }
}

#[async_trait]
impl Agent for Router {
    async fn on_ready(&self, _ctx: &AgentInstance) -> Result<()> {
        self.reopen();
        tracing::info!(router = %self.name, "Router ready");
        Ok(())
    }

    async fn on_message(&self, _ctx: &AgentInstance, message: &Message) -> Result<Option<Message>> {
        Ok(self
            .route_message(message)
            .await?
            .map(RouteResponse::into_message))
    }

    async fn cleanup(&self, _ctx: &AgentInstance) -> Result<()> {
        Router::cleanup(self);
        Ok(())
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("name", &self.name)
            .field("open", &self.is_open())
            .field("routes", &self.route_keys())
            .finish()
    }
}
