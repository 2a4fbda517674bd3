//! Key-value memory tool and the context-tracking memory agent

use crate::agent::Agent;
use crate::error::{AgentError, Result};
use crate::history::ConversationHistory;
use crate::instance::AgentInstance;
use crate::tool::{required_str, Tool, ToolContext};
use crate::types::{message, Message};
use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::{json, Value};
use std::sync::Mutex;

const DEFAULT_MAX_HISTORY: usize = 100;

/// In-memory key-value store (`store`, `retrieve`, `list`)
///
/// Keys are listed in first-store order. Storage is dropped on cleanup.
#[derive(Debug, Default)]
pub struct MemoryStoreTool {
    storage: Mutex<IndexMap<String, Value>>,
}

impl MemoryStoreTool {
    pub const NAME: &'static str = "memory_store";

    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.storage.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Tool for MemoryStoreTool {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "Manages persistent memory storage"
    }

    fn validate(&self, args: &Value) -> Result<()> {
        let operation = required_str(Self::NAME, args, "operation")?;
        match operation {
            "list" => Ok(()),
            "retrieve" => required_str(Self::NAME, args, "key").map(|_| ()),
            "store" => {
                required_str(Self::NAME, args, "key")?;
                if args.get("value").is_none() {
                    return Err(AgentError::tool(Self::NAME, "'value' is required for store"));
                }
                Ok(())
            }
            other => Err(AgentError::tool(Self::NAME, format!("Unknown operation: {}", other))),
        }
    }

    async fn execute(&self, _ctx: &ToolContext, args: Value) -> Result<Value> {
        let operation = required_str(Self::NAME, &args, "operation")?;
        let mut storage = self.storage.lock().unwrap_or_else(|e| e.into_inner());

        match operation {
            "store" => {
                let key = required_str(Self::NAME, &args, "key")?;
                let value = args.get("value").cloned().unwrap_or(Value::Null);
                storage.insert(key.to_string(), value);
                Ok(json!({ "operation": "store", "status": "success", "key": key }))
            }
            "retrieve" => {
                let key = required_str(Self::NAME, &args, "key")?;
                Ok(match storage.get(key) {
                    Some(value) => json!({
                        "operation": "retrieve", "status": "success", "key": key, "value": value,
                    }),
                    None => json!({
                        "operation": "retrieve", "status": "not_found", "key": key, "value": null,
                    }),
                })
            }
            "list" => {
                let keys: Vec<&String> = storage.keys().collect();
                Ok(json!({ "operation": "list", "status": "success", "keys": keys }))
            }
            other => Err(AgentError::tool(Self::NAME, format!("Unknown operation: {}", other))),
        }
    }

    async fn cleanup(&self) -> Result<()> {
        self.storage.lock().unwrap_or_else(|e| e.into_inner()).clear();
        Ok(())
    }
}

/// Tracks every message it sees and answers `memory` operations
///
/// `{"memory": {"operation": "store", "key": "k", "value": ...}}` and friends
/// go to the memory store; any other message gets a context summary.
pub struct MemoryAgent {
    history: Mutex<ConversationHistory>,
}

impl Default for MemoryAgent {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HISTORY)
    }
}

impl MemoryAgent {
    pub fn new(max_history: usize) -> Self {
        Self {
            history: Mutex::new(ConversationHistory::new(max_history)),
        }
    }

    /// Build from definition config (`max_history`)
    pub fn from_config(config: &serde_json::Map<String, Value>) -> Self {
        let max_history = config
            .get("max_history")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_MAX_HISTORY);
        Self::new(max_history)
    }

    async fn memory_op(&self, ctx: &AgentInstance, op: &Value) -> Result<Value> {
        let output = ctx.execute_tool(MemoryStoreTool::NAME, op.clone()).await?;
        Ok(match output["operation"].as_str() {
            Some("store") => json!({ "type": "memory_store", "status": "success", "key": output["key"] }),
            Some("retrieve") => json!({ "type": "memory_retrieve", "key": output["key"], "value": output["value"] }),
            _ => json!({ "type": "memory_list", "keys": output["keys"] }),
        })
    }
}

#[async_trait]
impl Agent for MemoryAgent {
    async fn on_ready(&self, ctx: &AgentInstance) -> Result<()> {
        if !ctx.has_tool(MemoryStoreTool::NAME) {
            ctx.register_tool(Box::new(MemoryStoreTool::new()));
        }
        Ok(())
    }

    async fn on_message(&self, ctx: &AgentInstance, msg: &Message) -> Result<Option<Message>> {
        let (history_size, last) = {
            let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
            history.push(msg.clone());
            (history.len(), history.last().cloned())
        };

        if let Some(op) = msg.get("memory") {
            return Ok(Some(message(self.memory_op(ctx, op).await?)));
        }

        Ok(Some(message(json!({
            "type": "context",
            "history_size": history_size,
            "last_message": last,
        }))))
    }

    async fn cleanup(&self, _ctx: &AgentInstance) -> Result<()> {
        self.history.lock().unwrap_or_else(|e| e.into_inner()).clear();
        Ok(())
    }
}
