//! Hot reload: replace live agents from changed definitions
//!
//! A replacement is constructed and initialized while the old instance keeps
//! serving. Only a ready replacement is published, and the registry entry and
//! every route-table reference change in one critical section. The old
//! instance is cleaned up after the swap; on any failure it is left alone.
//! Once closed, the reloader rejects new work so nothing can be published
//! into a runtime that is shutting down.

use crate::agent::AgentDefinition;
use crate::error::{AgentError, Result};
use crate::loader::AgentLoader;
use crate::registry::AgentRegistry;
use crate::router::Router;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// What a successful reload did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// A live instance was swapped for a new one
    Replaced,
    /// No instance was live under the name; a new agent was started
    Started,
}

/// Per-file reload summary
#[derive(Debug, Default)]
pub struct ReloadReport {
    pub path: PathBuf,
    pub replaced: Vec<String>,
    pub started: Vec<String>,
    pub failed: Vec<AgentError>,
}

impl ReloadReport {
    /// Whether every definition in the file was applied
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Applies reloaded definitions to the registry and router
pub struct HotReloader {
    loader: Arc<AgentLoader>,
    registry: Arc<AgentRegistry>,
    router: Arc<Router>,
    swap_lock: Mutex<()>,
    closed: AtomicBool,
}

impl HotReloader {
    pub fn new(loader: Arc<AgentLoader>, registry: Arc<AgentRegistry>, router: Arc<Router>) -> Self {
        Self {
            loader,
            registry,
            router,
            swap_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
        }
    }

    /// Reject further reloads, waiting for one already swapping to finish
    pub async fn close(&self) {
        let _swap = self.swap_lock.lock().await;
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Accept reloads again after `close`
    pub fn open(&self) {
        self.closed.store(false, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(AgentError::Precondition("Hot reloader is closed".to_string()))
        } else {
            Ok(())
        }
    }

    /// Re-load `path` and apply every definition it contains
    ///
    /// A file that no longer parses is a `Load` error and changes nothing.
    /// Otherwise each definition is applied independently; failures are
    /// collected in the report.
    pub async fn reload_file(&self, path: &Path) -> Result<ReloadReport> {
        self.ensure_open()?;
        let definitions = self.loader.load(path)?;

        let mut report = ReloadReport {
            path: path.to_path_buf(),
            ..Default::default()
        };
        for definition in definitions {
            let name = definition.name.clone();
            match self.reload_definition(definition).await {
                Ok(ReloadOutcome::Replaced) => report.replaced.push(name),
                Ok(ReloadOutcome::Started) => report.started.push(name),
                Err(e) => {
                    tracing::error!(path = %path.display(), agent = %name, error = %e, "Agent reload failed");
                    report.failed.push(e);
                }
            }
        }

        tracing::info!(
            path = %path.display(),
            replaced = report.replaced.len(),
            started = report.started.len(),
            failed = report.failed.len(),
            "Definition file reloaded"
        );
        Ok(report)
    }

    /// Replace (or start) the agent described by `definition`
    pub async fn reload_definition(&self, definition: AgentDefinition) -> Result<ReloadOutcome> {
        let _swap = self.swap_lock.lock().await;
        self.ensure_open()?;
        let name = definition.name.clone();
        let reload_err = |e: AgentError| AgentError::Reload {
            agent: name.clone(),
            reason: e.to_string(),
        };

        let replacement = self.registry.construct(&definition).map_err(reload_err)?;
        if let Err(e) = replacement.initialize().await {
            // the half-built replacement may hold tools
            if let Err(cleanup) = replacement.cleanup().await {
                tracing::warn!(agent = %name, error = %cleanup, "Discarded replacement cleanup failed");
            }
            return Err(reload_err(e));
        }

        let Some(old) = self.registry.get(&name) else {
            self.registry.insert(replacement.clone()).map_err(reload_err)?;
            self.router.register_route(definition.route_key(), replacement);
            tracing::info!(agent = %name, "New agent started from reload");
            return Ok(ReloadOutcome::Started);
        };

        let swapped = self.registry.replace_with(&old, replacement.clone(), |new| {
            self.router.replace_instance(&old, new.clone());
        })?;
        if !swapped {
            if let Err(e) = replacement.cleanup().await {
                tracing::warn!(agent = %name, error = %e, "Discarded replacement cleanup failed");
            }
            return Err(reload_err(AgentError::Precondition(
                "live instance changed during reload".to_string(),
            )));
        }

        tracing::info!(agent = %name, old = %old.id(), new = %replacement.id(), "Agent hot-swapped");

        if let Err(e) = old.cleanup().await {
            tracing::warn!(agent = %name, error = %e, "Replaced agent cleanup failed");
        }
        Ok(ReloadOutcome::Replaced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Agent;
    use crate::instance::AgentInstance;
    use crate::plugin::PluginRegistry;
    use crate::types::{message, AgentState, Message};
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;

    type Cleaned = Arc<std::sync::Mutex<Vec<u32>>>;

    /// Replies with its version after `delay`; records its version on cleanup
    struct Version {
        version: u32,
        delay: Duration,
        cleaned: Cleaned,
    }

    #[async_trait]
    impl Agent for Version {
        async fn on_message(&self, ctx: &AgentInstance, _message: &Message) -> Result<Option<Message>> {
            tokio::time::sleep(self.delay).await;
            Ok(Some(message(json!({
                "version": self.version,
                "configured": ctx.config_value("version"),
                "ready": ctx.is_ready(),
            }))))
        }

        async fn cleanup(&self, _ctx: &AgentInstance) -> Result<()> {
            self.cleaned.lock().unwrap().push(self.version);
            Ok(())
        }
    }

    struct BrokenReady;

    #[async_trait]
    impl Agent for BrokenReady {
        async fn on_ready(&self, _ctx: &AgentInstance) -> Result<()> {
            Err(AgentError::Config("missing api key".into()))
        }

        async fn on_message(&self, _ctx: &AgentInstance, _message: &Message) -> Result<Option<Message>> {
            Ok(None)
        }
    }

    fn slow_version(v: u32, delay: Duration, cleaned: &Cleaned) -> AgentDefinition {
        let cleaned = cleaned.clone();
        AgentDefinition::new("Echo", move |_| {
            Ok(Box::new(Version {
                version: v,
                delay,
                cleaned: cleaned.clone(),
            }))
        })
        .with_config("version", v)
    }

    fn version(v: u32, cleaned: &Cleaned) -> AgentDefinition {
        slow_version(v, Duration::ZERO, cleaned)
    }

    struct Fixture {
        reloader: HotReloader,
        registry: Arc<AgentRegistry>,
        router: Arc<Router>,
        old: Arc<AgentInstance>,
        cleaned: Cleaned,
    }

    async fn fixture_with(old: impl FnOnce(&Cleaned) -> AgentDefinition) -> Fixture {
        let cleaned = Cleaned::default();
        let loader = Arc::new(AgentLoader::new(Arc::new(PluginRegistry::new())));
        let registry = Arc::new(AgentRegistry::default());
        let router = Arc::new(Router::new("root", 10));

        let old = registry.start(&old(&cleaned)).await.unwrap();
        registry.insert(old.clone()).unwrap();
        router.register_route("echo", old.clone());

        let reloader = HotReloader::new(loader, registry.clone(), router.clone());
        Fixture {
            reloader,
            registry,
            router,
            old,
            cleaned,
        }
    }

    async fn fixture() -> Fixture {
        fixture_with(|cleaned| version(1, cleaned)).await
    }

    #[tokio::test]
    async fn test_reload_swaps_and_cleans_old() {
        let f = fixture().await;

        let outcome = f.reloader.reload_definition(version(2, &f.cleaned)).await.unwrap();
        assert_eq!(outcome, ReloadOutcome::Replaced);

        let live = f.registry.get("Echo").unwrap();
        assert_ne!(live.id(), f.old.id());
        assert!(live.is_ready());
        assert_eq!(f.old.state(), AgentState::Terminated);
        assert_eq!(f.router.instances()[0].id(), live.id());
        assert_eq!(*f.cleaned.lock().unwrap(), vec![1]);

        let response = f.router.route_message(&message(json!({}))).await.unwrap().unwrap();
        assert_eq!(response.responses[0]["version"], 2);

        f.registry.cleanup_all().await;
        assert_eq!(*f.cleaned.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_failed_reload_keeps_old_serving() {
        let f = fixture().await;

        let broken = AgentDefinition::new("Echo", |_| Ok(Box::new(BrokenReady)));
        let err = f.reloader.reload_definition(broken).await.unwrap_err();
        assert!(matches!(err, AgentError::Reload { .. }));

        assert_eq!(f.registry.get("Echo").unwrap().id(), f.old.id());
        assert_eq!(f.old.state(), AgentState::Ready);
        assert_eq!(f.router.instances()[0].id(), f.old.id());
        assert!(f.cleaned.lock().unwrap().is_empty());

        let response = f.router.route_message(&message(json!({}))).await.unwrap().unwrap();
        assert_eq!(response.responses[0]["version"], 1);
    }

    #[tokio::test]
    async fn test_failed_construction_keeps_old() {
        let f = fixture().await;

        let broken = AgentDefinition::new("Echo", |_| Err(AgentError::Config("bad".into())));
        assert!(f.reloader.reload_definition(broken).await.is_err());
        assert_eq!(f.registry.get("Echo").unwrap().id(), f.old.id());
        assert!(f.old.is_ready());
        assert!(f.cleaned.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_name_starts_new_agent() {
        let f = fixture().await;

        let cleaned = f.cleaned.clone();
        let fresh = AgentDefinition::new("Other", move |_| {
            Ok(Box::new(Version {
                version: 7,
                delay: Duration::ZERO,
                cleaned: cleaned.clone(),
            }))
        });
        let outcome = f.reloader.reload_definition(fresh).await.unwrap();
        assert_eq!(outcome, ReloadOutcome::Started);
        assert_eq!(f.registry.names(), vec!["Echo", "Other"]);
        assert_eq!(f.router.route_keys(), vec!["echo", "other"]);
        assert!(f.cleaned.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_in_flight_message_finishes_on_old_instance() {
        let f = fixture_with(|cleaned| slow_version(1, Duration::from_millis(200), cleaned)).await;

        let router = f.router.clone();
        let in_flight = tokio::spawn(async move { router.route_message(&message(json!({}))).await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        f.reloader.reload_definition(version(2, &f.cleaned)).await.unwrap();

        let response = in_flight.await.unwrap().unwrap().unwrap();
        assert_eq!(response.source_count, 1);
        assert_eq!(response.responses[0]["version"], 1);
        assert_eq!(response.responses[0]["configured"], 1);
        assert_eq!(response.responses[0]["ready"], true);

        assert_eq!(f.old.state(), AgentState::Terminated);
        assert_eq!(*f.cleaned.lock().unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn test_closed_reloader_rejects_reloads() {
        let f = fixture().await;
        f.reloader.close().await;
        assert!(f.reloader.is_closed());

        let err = f.reloader.reload_definition(version(2, &f.cleaned)).await.unwrap_err();
        assert!(matches!(err, AgentError::Precondition(_)));
        let err = f
            .reloader
            .reload_file(Path::new("/nonexistent/agent.yaml"))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Precondition(_)));

        assert_eq!(f.registry.get("Echo").unwrap().id(), f.old.id());
        assert!(f.old.is_ready());
        assert!(f.cleaned.lock().unwrap().is_empty());

        f.reloader.open();
        let outcome = f.reloader.reload_definition(version(2, &f.cleaned)).await.unwrap();
        assert_eq!(outcome, ReloadOutcome::Replaced);
    }

    #[tokio::test]
    async fn test_reload_file_missing_is_load_error() {
        let f = fixture().await;
        let err = f
            .reloader
            .reload_file(Path::new("/nonexistent/agent.yaml"))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Load { .. }));
    }
}
