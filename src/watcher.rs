//! Filesystem watcher for agent definition files
//!
//! notify delivers raw events on its own thread; they are forwarded over an
//! unbounded channel to an event loop task. The loop hands events to the
//! `ReloadGate`, which waits for a path to go quiet for the debounce window
//! and then reloads it, one reload at a time. Edits arriving while a reload
//! runs schedule another one, so the last write always wins.

use crate::error::{AgentError, Result};
use crate::loader::is_definition_file;
use crate::reload::HotReloader;
use crate::types::{ChangeKind, WatchEvent};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// What the gate did with a watch event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// Not a definition file, not a create/modify, or the gate is closed
    Ignored,
    /// A reload of the path was already pending; its quiet period restarts
    Debounced,
    /// A reload of the path was scheduled
    Scheduled,
}

type Pending = Arc<Mutex<HashMap<PathBuf, Instant>>>;

/// Trailing-edge debounce and serialization in front of the reloader
pub struct ReloadGate {
    reloader: Arc<HotReloader>,
    debounce: Duration,
    /// Last event time per path awaiting its reload
    pending: Pending,
    reload_lock: Arc<tokio::sync::Mutex<()>>,
    closed: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ReloadGate {
    pub fn new(reloader: Arc<HotReloader>, debounce: Duration) -> Self {
        Self {
            reloader,
            debounce,
            pending: Arc::new(Mutex::new(HashMap::new())),
            reload_lock: Arc::new(tokio::sync::Mutex::new(())),
            closed: watch::Sender::new(false),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Whether a reload is running
    pub fn in_flight(&self) -> bool {
        self.reload_lock.try_lock().is_err()
    }

    /// Paths waiting out their debounce window
    pub fn pending(&self) -> usize {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Offer an event
    ///
    /// The first event for a path schedules a reload that fires once no
    /// further event for it has arrived for the debounce window. Later
    /// events only push that deadline back.
    pub fn submit(&self, event: WatchEvent) -> Submission {
        if !event.triggers_reload() || !is_definition_file(&event.path) {
            return Submission::Ignored;
        }
        if *self.closed.borrow() {
            tracing::debug!(path = %event.path.display(), "Reload gate closed, dropping event");
            return Submission::Ignored;
        }

        {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(last) = pending.get_mut(&event.path) {
                *last = Instant::now();
                return Submission::Debounced;
            }
            pending.insert(event.path.clone(), Instant::now());
        }

        let handle = tokio::spawn(settle_then_reload(
            event.path,
            self.debounce,
            self.pending.clone(),
            self.reload_lock.clone(),
            self.closed.subscribe(),
            self.reloader.clone(),
        ));
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
        Submission::Scheduled
    }

    /// Wait until no reload is pending or running
    pub async fn wait_idle(&self) {
        loop {
            let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(|e| e.into_inner()));
            if tasks.is_empty() {
                return;
            }
            for task in tasks {
                if let Err(e) = task.await {
                    tracing::error!(error = %e, "Reload task aborted");
                }
            }
        }
    }

    /// Drop pending reloads and refuse new ones; a running reload finishes
    pub fn close(&self) {
        self.closed.send_replace(true);
    }

    /// Accept events again after `close`
    pub fn reopen(&self) {
        self.closed.send_replace(false);
    }
}

/// Wait for `path` to go quiet, then reload it behind `reload_lock`
async fn settle_then_reload(
    path: PathBuf,
    debounce: Duration,
    pending: Pending,
    reload_lock: Arc<tokio::sync::Mutex<()>>,
    mut closed: watch::Receiver<bool>,
    reloader: Arc<HotReloader>,
) {
    let forget = |pending: &Pending, path: &PathBuf| {
        pending.lock().unwrap_or_else(|e| e.into_inner()).remove(path);
    };

    loop {
        if *closed.borrow_and_update() {
            forget(&pending, &path);
            return;
        }
        let last = pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&path)
            .copied();
        let Some(last) = last else {
            return;
        };

        let deadline = last + debounce;
        if deadline <= Instant::now() {
            let mut guard = pending.lock().unwrap_or_else(|e| e.into_inner());
            // an event may have landed since the read above
            if guard.get(&path).is_some_and(|seen| *seen + debounce <= Instant::now()) {
                guard.remove(&path);
                break;
            }
            continue;
        }

        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {}
            changed = closed.changed() => {
                if changed.is_err() {
                    forget(&pending, &path);
                    return;
                }
            }
        }
    }

    let _serial = reload_lock.lock().await;
    if *closed.borrow() {
        return;
    }
    tracing::info!(path = %path.display(), "Definition file changed, reloading");
    if let Err(e) = reloader.reload_file(&path).await {
        tracing::error!(path = %path.display(), error = %e, "Reload failed");
    }
}

struct Running {
    watcher: RecommendedWatcher,
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Watches agent directories and triggers hot reloads
pub struct AgentWatcher {
    enabled: bool,
    gate: Arc<ReloadGate>,
    running: tokio::sync::Mutex<Option<Running>>,
}

impl AgentWatcher {
    /// Create a watcher; a disabled watcher never subscribes
    pub fn new(reloader: Arc<HotReloader>, enabled: bool, debounce: Duration) -> Self {
        Self {
            enabled,
            gate: Arc::new(ReloadGate::new(reloader, debounce)),
            running: tokio::sync::Mutex::new(None),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Whether the event loop is running
    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Debounce and serialization gate
    pub fn gate(&self) -> &ReloadGate {
        &self.gate
    }

    /// Subscribe to `directories` recursively
    ///
    /// No-op when hot reload is disabled or the watcher is already running.
    /// Directories that cannot be watched are logged and skipped.
    pub async fn start_watching(&self, directories: &[PathBuf]) -> Result<()> {
        if !self.enabled {
            tracing::debug!("Hot reload disabled, not watching");
            return Ok(());
        }

        let mut running = self.running.lock().await;
        if running.is_some() {
            return Ok(());
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = tx.send(res);
        })
        .map_err(|e| AgentError::Watch(e.to_string()))?;

        for dir in directories {
            match watcher.watch(dir, RecursiveMode::Recursive) {
                Ok(()) => tracing::info!(dir = %dir.display(), "Watching agent directory"),
                Err(e) => tracing::warn!(dir = %dir.display(), error = %e, "Cannot watch agent directory"),
            }
        }

        self.gate.reopen();
        let (stop_tx, mut stop_rx) = oneshot::channel();
        let gate = self.gate.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    received = rx.recv() => match received {
                        Some(Ok(event)) => {
                            let kind = ChangeKind::from(&event.kind);
                            for path in event.paths {
                                gate.submit(WatchEvent { path, kind });
                            }
                        }
                        Some(Err(e)) => tracing::warn!(error = %e, "Watch error"),
                        None => break,
                    },
                }
            }
            tracing::debug!("Watcher event loop stopped");
        });

        *running = Some(Running {
            watcher,
            stop: stop_tx,
            task,
        });
        Ok(())
    }

    /// Unsubscribe, stop the event loop, and wait for any in-flight reload
    ///
    /// Reloads still waiting out their debounce window are dropped.
    /// Idempotent; safe when never started.
    pub async fn stop_watching(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };
        // dropping the watcher unsubscribes from notify
        drop(running.watcher);
        // the loop may already have exited when notify hung up
        let _ = running.stop.send(());
        if let Err(e) = running.task.await {
            tracing::error!(error = %e, "Watcher event loop aborted");
        }
        self.gate.close();
        self.gate.wait_idle().await;
        tracing::info!("Stopped watching agent directories");
    }
}
