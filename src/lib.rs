//! # a3s-agents
//!
//! Message-driven agent runtime with fan-out routing and hot reload for the
//! A3S ecosystem.
//!
//! ## Overview
//!
//! `a3s-agents` hosts a set of agents behind a single router. Every inbound
//! message is recorded in a bounded history and delivered to every agent;
//! the non-empty replies are aggregated in registration order. A failing or
//! panicking agent never affects the others. Agent definitions on disk are
//! watched and hot-swapped: a replacement is published only once it is
//! ready, and the old instance keeps serving if it is not.
//!
//! ## Quick Start
//!
//! ```rust
//! use a3s_agents::{AgentRuntime, PluginRegistry, RuntimeConfig, message};
//! use a3s_agents::builtin::CalculatorAgent;
//! use a3s_agents::AgentDefinition;
//!
//! # async fn example() -> a3s_agents::Result<()> {
//! let runtime = AgentRuntime::new(RuntimeConfig::default(), PluginRegistry::with_builtins())?;
//! runtime.register(AgentDefinition::new("Calculator", |_| Ok(Box::new(CalculatorAgent::new()))))?;
//! runtime.start().await?;
//!
//! let reply = runtime
//!     .process_message(message(serde_json::json!({
//!         "calculate": {"operation": "add", "a": 2, "b": 3}
//!     })))
//!     .await?;
//! println!("{:?}", reply);
//!
//! runtime.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **Agent** trait: `on_ready` / `on_message` / `cleanup` hooks
//! - **AgentInstance**: one live agent with its tools, config, and lifecycle
//! - **AgentRegistry**: sole owner of live instances
//! - **Router**: fan-out dispatch with conversation history (itself an `Agent`)
//! - **AgentLoader** / **PluginRegistry**: manifest discovery and kind resolution
//! - **HotReloader** / **AgentWatcher**: atomic swap on definition changes
//! - **Provider** trait: generative-text backend shared by every instance

pub mod agent;
pub mod builtin;
pub mod config;
pub mod error;
pub mod history;
pub mod instance;
pub mod loader;
pub mod plugin;
pub mod provider;
pub mod registry;
pub mod reload;
pub mod router;
pub mod runtime;
pub mod tool;
pub mod types;
pub mod watcher;

// Re-export core types
pub use agent::{Agent, AgentDefinition, AgentFactory};
pub use config::{ProviderConfig, RuntimeConfig};
pub use error::{AgentError, Result};
pub use instance::{AgentInstance, AgentInstanceBuilder};
pub use loader::AgentLoader;
pub use plugin::PluginRegistry;
pub use provider::{create_provider, Completion, GenerateOptions, OllamaProvider, Provider, TextStream};
pub use registry::AgentRegistry;
pub use reload::{HotReloader, ReloadOutcome, ReloadReport};
pub use router::{RouteTable, Router};
pub use runtime::AgentRuntime;
pub use tool::{Tool, ToolContext, ToolFactory};
pub use types::{message, AgentState, ChangeKind, Message, RouteResponse, WatchEvent};
pub use watcher::{AgentWatcher, ReloadGate, Submission};
