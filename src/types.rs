//! Core value types shared across the runtime
//!
//! Messages are schemaless JSON objects; agents agree on keys by convention.
//! Aggregates use camelCase JSON serialization for wire compatibility.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A message flowing through the router: an opaque key-value map
pub type Message = serde_json::Map<String, serde_json::Value>;

/// Build a `Message` from a `serde_json::json!` object literal
///
/// Non-object values produce an empty message.
pub fn message(value: serde_json::Value) -> Message {
    match value {
        serde_json::Value::Object(map) => map,
        _ => Message::new(),
    }
}

/// Aggregated result of a fan-out dispatch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteResponse {
    /// Non-empty responses in canonical (first-registration) order
    pub responses: Vec<Message>,

    /// Number of responses collected
    pub source_count: usize,
}

impl RouteResponse {
    /// Build an aggregate, or `None` when nothing answered
    pub fn from_responses(responses: Vec<Message>) -> Option<Self> {
        if responses.is_empty() {
            return None;
        }
        let source_count = responses.len();
        Some(Self {
            responses,
            source_count,
        })
    }

    /// Render the aggregate as a message (used when a router is nested)
    pub fn into_message(self) -> Message {
        let mut map = Message::new();
        map.insert("sourceCount".to_string(), self.source_count.into());
        map.insert(
            "responses".to_string(),
            serde_json::Value::Array(
                self.responses
                    .into_iter()
                    .map(serde_json::Value::Object)
                    .collect(),
            ),
        );
        map
    }
}

/// Lifecycle state of an agent instance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AgentState {
    /// Constructed, `on_ready` not yet run
    #[default]
    Uninitialized,
    /// `on_ready` completed; the instance accepts messages
    Ready,
    /// Cleaned up; terminal
    Terminated,
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Uninitialized => "uninitialized",
            Self::Ready => "ready",
            Self::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

/// Kind of filesystem change seen by the watcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Modified,
    Removed,
    Other,
}

impl From<&notify::EventKind> for ChangeKind {
    fn from(kind: &notify::EventKind) -> Self {
        match kind {
            notify::EventKind::Create(_) => Self::Created,
            notify::EventKind::Modify(_) => Self::Modified,
            notify::EventKind::Remove(_) => Self::Removed,
            _ => Self::Other,
        }
    }
}

/// A filesystem change relevant to agent definitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    /// Path of the changed file
    pub path: PathBuf,

    /// What happened to it
    pub kind: ChangeKind,
}

impl WatchEvent {
    /// Whether this change should trigger a reload
    pub fn triggers_reload(&self) -> bool {
        matches!(self.kind, ChangeKind::Created | ChangeKind::Modified)
    }
}
