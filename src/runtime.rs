//! Agent runtime wiring the registry, router, loader and watcher together
//!
//! Startup order: router opened, statically registered definitions started,
//! directory-discovered definitions started, watcher started. Shutdown runs
//! the reverse: watcher stopped, reloader closed, router torn down, every
//! instance cleaned up.

use crate::agent::AgentDefinition;
use crate::config::RuntimeConfig;
use crate::error::{AgentError, Result};
use crate::instance::AgentInstance;
use crate::loader::AgentLoader;
use crate::plugin::PluginRegistry;
use crate::provider::{create_provider, Provider};
use crate::registry::AgentRegistry;
use crate::reload::{HotReloader, ReloadOutcome, ReloadReport};
use crate::router::Router;
use crate::types::{Message, RouteResponse};
use crate::watcher::AgentWatcher;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Message-driven agent runtime
pub struct AgentRuntime {
    config: RuntimeConfig,
    registry: Arc<AgentRegistry>,
    router: Arc<Router>,
    loader: Arc<AgentLoader>,
    reloader: Arc<HotReloader>,
    watcher: AgentWatcher,
    definitions: Mutex<Vec<AgentDefinition>>,
    lifecycle: tokio::sync::Mutex<()>,
    ready: AtomicBool,
}

impl AgentRuntime {
    /// Create a runtime, building the configured provider (if any) once
    pub fn new(config: RuntimeConfig, plugins: PluginRegistry) -> Result<Self> {
        let provider = match config.provider {
            Some(ref provider) => Some(create_provider(provider)?),
            None => None,
        };
        Self::with_provider(config, plugins, provider)
    }

    /// Create a runtime sharing `provider` with every instance
    pub fn with_provider(
        config: RuntimeConfig,
        plugins: PluginRegistry,
        provider: Option<Arc<dyn Provider>>,
    ) -> Result<Self> {
        config.validate()?;

        let mut registry = AgentRegistry::new(provider);
        if let Some(ref provider) = config.provider {
            registry = registry.with_default_model(&provider.default_model);
        }
        let registry = Arc::new(registry);
        let router = Arc::new(Router::new(&config.prefix, config.max_history));
        let loader = Arc::new(AgentLoader::new(Arc::new(plugins)));
        let reloader = Arc::new(HotReloader::new(loader.clone(), registry.clone(), router.clone()));
        let watcher = AgentWatcher::new(
            reloader.clone(),
            config.hot_reload,
            Duration::from_millis(config.debounce_ms),
        );

        Ok(Self {
            config,
            registry,
            router,
            loader,
            reloader,
            watcher,
            definitions: Mutex::new(Vec::new()),
            lifecycle: tokio::sync::Mutex::new(()),
            ready: AtomicBool::new(false),
        })
    }

    /// Declare an agent in code; must be called before `start`
    pub fn register(&self, definition: AgentDefinition) -> Result<()> {
        if self.is_ready() {
            return Err(AgentError::Precondition(format!(
                "Cannot register '{}' after the runtime has started",
                definition.name
            )));
        }
        tracing::debug!(agent = %definition.name, "Static agent registered");
        self.definitions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(definition);
        Ok(())
    }

    /// Start every known agent and begin watching for changes
    ///
    /// Idempotent. An agent that fails to construct or initialize is logged
    /// and left out; a directory or file that fails to discover or load is
    /// logged and skipped. Only a watcher subscription failure is returned.
    pub async fn start(&self) -> Result<()> {
        let _guard = self.lifecycle.lock().await;
        if self.is_ready() {
            return Ok(());
        }

        self.router.reopen();
        self.reloader.open();

        let definitions = self
            .definitions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for definition in &definitions {
            self.start_definition(definition).await;
        }

        for dir in &self.config.agent_dirs {
            let files = match self.loader.discover(dir) {
                Ok(files) => files,
                Err(e) => {
                    tracing::error!(dir = %dir.display(), error = %e, "Agent discovery failed");
                    continue;
                }
            };
            for file in files {
                match self.loader.load(&file) {
                    Ok(loaded) => {
                        for definition in &loaded {
                            self.start_definition(definition).await;
                        }
                    }
                    Err(e) => tracing::error!(path = %file.display(), error = %e, "Agent load failed"),
                }
            }
        }

        self.watcher.start_watching(&self.config.agent_dirs).await?;

        self.ready.store(true, Ordering::SeqCst);
        tracing::info!(
            router = %self.router.name(),
            agents = ?self.registry.names(),
            hot_reload = self.watcher.is_enabled(),
            "Agent runtime started"
        );
        Ok(())
    }

    async fn start_definition(&self, definition: &AgentDefinition) -> Option<Arc<AgentInstance>> {
        if self.registry.contains(&definition.name) {
            tracing::warn!(agent = %definition.name, "Agent name already in use, skipping");
            return None;
        }

        let instance = match self.registry.start(definition).await {
            Ok(instance) => instance,
            Err(e) => {
                tracing::error!(agent = %definition.name, error = %e, "Agent failed to start");
                return None;
            }
        };

        if let Err(e) = self.registry.insert(instance.clone()) {
            tracing::error!(agent = %definition.name, error = %e, "Agent registration failed");
            if let Err(e) = instance.cleanup().await {
                tracing::warn!(agent = %definition.name, error = %e, "Unregistered agent cleanup failed");
            }
            return None;
        }
        self.router.register_route(definition.route_key(), instance.clone());
        Some(instance)
    }

    /// Route a message to every agent and aggregate the responses
    pub async fn process_message(&self, message: Message) -> Result<Option<RouteResponse>> {
        self.ensure_ready()?;
        self.router.route_message(&message).await
    }

    /// Route a message on a background task
    ///
    /// The returned handle may be dropped; routing failures are logged.
    pub fn send_message(&self, message: Message) -> Result<JoinHandle<Option<RouteResponse>>> {
        self.ensure_ready()?;
        let router = self.router.clone();
        Ok(tokio::spawn(async move {
            match router.route_message(&message).await {
                Ok(response) => response,
                Err(e) => {
                    tracing::warn!(router = %router.name(), error = %e, "Background message dropped");
                    None
                }
            }
        }))
    }

    /// Hot-swap (or start) the agent described by `definition`
    pub async fn reload_definition(&self, definition: AgentDefinition) -> Result<ReloadOutcome> {
        self.ensure_ready()?;
        self.reloader.reload_definition(definition).await
    }

    /// Re-load a definition file and apply it
    pub async fn reload_file(&self, path: impl AsRef<Path>) -> Result<ReloadReport> {
        self.ensure_ready()?;
        self.reloader.reload_file(path.as_ref()).await
    }

    /// Stop watching, tear down the router, and clean up every agent
    ///
    /// A reload already swapping is allowed to finish and its agent is cleaned
    /// up with the rest; reloads arriving later are rejected. Safe to call
    /// more than once; a later `start` brings the runtime back.
    pub async fn shutdown(&self) {
        let _guard = self.lifecycle.lock().await;

        self.watcher.stop_watching().await;
        self.reloader.close().await;
        self.router.cleanup();
        self.registry.cleanup_all().await;
        self.ready.store(false, Ordering::SeqCst);

        tracing::info!(router = %self.router.name(), "Agent runtime shut down");
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(AgentError::Precondition(
                "Agent runtime is not running".to_string(),
            ))
        }
    }

    /// Whether `start` has completed and `shutdown` has not run
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Live agent instances
    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    /// Root router
    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// Definition loader and its load index
    pub fn loader(&self) -> &Arc<AgentLoader> {
        &self.loader
    }

    /// Directory watcher
    pub fn watcher(&self) -> &AgentWatcher {
        &self.watcher
    }
}

impl std::fmt::Debug for AgentRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRuntime")
            .field("router", &self.router.name())
            .field("agents", &self.registry.names())
            .field("ready", &self.is_ready())
            .finish()
    }
}
