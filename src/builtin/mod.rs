//! Built-in agents and tools
//!
//! Agent kinds: `calculator`, `memory`, `completion`.
//! Tool kinds: `calculator`, `memory_store`.

mod calculator;
mod completion;
mod memory;

pub use calculator::{CalculatorAgent, CalculatorParams, CalculatorTool, Operation};
pub use completion::CompletionAgent;
pub use memory::{MemoryAgent, MemoryStoreTool};

use crate::plugin::PluginRegistry;

/// Register every built-in kind
pub fn register(plugins: &mut PluginRegistry) {
    plugins
        .register_tool(CalculatorTool::NAME, || Box::new(CalculatorTool::new()))
        .register_tool(MemoryStoreTool::NAME, || Box::new(MemoryStoreTool::new()))
        .register_agent("calculator", |_| Ok(Box::new(CalculatorAgent::new())))
        .register_agent("memory", |definition| {
            Ok(Box::new(MemoryAgent::from_config(&definition.config)))
        })
        .register_agent("completion", |_| Ok(Box::new(CompletionAgent)));
}
