//! Arithmetic tool and the agent that answers `calculate` messages
//!
//! ```json
//! { "calculate": { "operation": "multiply", "a": 6, "b": 7 } }
//! ```

use crate::agent::Agent;
use crate::error::{AgentError, Result};
use crate::instance::AgentInstance;
use crate::tool::{Tool, ToolContext};
use crate::types::{message, Message};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Mutex;

/// Supported operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Add,
    Subtract,
    Multiply,
    Divide,
    Power,
}

impl Operation {
    /// Apply to two operands; division by zero yields infinity
    pub fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            Self::Add => a + b,
            Self::Subtract => a - b,
            Self::Multiply => a * b,
            Self::Divide if b == 0.0 => f64::INFINITY,
            Self::Divide => a / b,
            Self::Power => a.powf(b),
        }
    }
}

/// Calculator arguments
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalculatorParams {
    pub operation: Operation,
    pub a: f64,
    pub b: f64,
}

/// Basic arithmetic on two numbers
#[derive(Debug, Default)]
pub struct CalculatorTool;

impl CalculatorTool {
    pub const NAME: &'static str = "calculator";

    pub fn new() -> Self {
        Self
    }

    fn params(args: &Value) -> Result<CalculatorParams> {
        serde_json::from_value(args.clone()).map_err(|e| AgentError::tool(Self::NAME, e))
    }
}

#[async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "Performs basic mathematical calculations"
    }

    fn validate(&self, args: &Value) -> Result<()> {
        Self::params(args).map(|_| ())
    }

    async fn execute(&self, _ctx: &ToolContext, args: Value) -> Result<Value> {
        let params = Self::params(&args)?;
        let result = params.operation.apply(params.a, params.b);

        // JSON has no infinity; non-finite results serialize as null
        Ok(json!({
            "operation": params.operation,
            "a": params.a,
            "b": params.b,
            "result": result,
        }))
    }
}

/// Answers `calculate` messages through its calculator tool
///
/// Registers a `CalculatorTool` on ready if the definition did not attach
/// one, and keeps a per-instance history of calculations.
#[derive(Debug, Default)]
pub struct CalculatorAgent {
    history: Mutex<Vec<Value>>,
}

impl CalculatorAgent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful calculations
    pub fn history_size(&self) -> usize {
        self.history.lock().map(|h| h.len()).unwrap_or(0)
    }
}

#[async_trait]
impl Agent for CalculatorAgent {
    async fn on_ready(&self, ctx: &AgentInstance) -> Result<()> {
        if !ctx.has_tool(CalculatorTool::NAME) {
            ctx.register_tool(Box::new(CalculatorTool::new()));
        }
        tracing::info!(agent = %ctx.name(), "Ready for calculations");
        Ok(())
    }

    async fn on_message(&self, ctx: &AgentInstance, msg: &Message) -> Result<Option<Message>> {
        let Some(calc) = msg.get("calculate") else {
            return Ok(None);
        };

        let reply = match ctx.execute_tool(CalculatorTool::NAME, calc.clone()).await {
            Ok(output) => {
                let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
                history.push(json!({ "operation": calc, "result": output["result"] }));
                json!({
                    "type": "calculation",
                    "result": output["result"],
                    "history_size": history.len(),
                })
            }
            Err(e) => json!({
                "type": "calculation_error",
                "error": e.to_string(),
            }),
        };
        Ok(Some(message(reply)))
    }

    async fn cleanup(&self, _ctx: &AgentInstance) -> Result<()> {
        self.history.lock().unwrap_or_else(|e| e.into_inner()).clear();
        Ok(())
    }
}
