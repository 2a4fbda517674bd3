//! Runtime configuration
//!
//! Every field has a serde default, so an empty document is a valid config.

use crate::error::{AgentError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Name of the root router (also used as its log label)
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Conversation history capacity of the root router
    #[serde(default = "default_max_history")]
    pub max_history: usize,

    /// Watch agent directories and hot-swap changed definitions
    #[serde(default, alias = "live_reload")]
    pub hot_reload: bool,

    /// Base directories scanned for agent definition files
    #[serde(default)]
    pub agent_dirs: Vec<PathBuf>,

    /// Quiet period a changed file must see before it is reloaded
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Generative-text backend; `None` runs without a provider
    #[serde(default)]
    pub provider: Option<ProviderConfig>,
}

fn default_prefix() -> String {
    "router".to_string()
}

fn default_max_history() -> usize {
    100
}

fn default_debounce_ms() -> u64 {
    500
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            max_history: default_max_history(),
            hot_reload: false,
            agent_dirs: Vec::new(),
            debounce_ms: default_debounce_ms(),
            provider: None,
        }
    }
}

impl RuntimeConfig {
    /// Parse a YAML (or JSON) document
    pub fn from_yaml_str(source: &str) -> Result<Self> {
        if source.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file on disk
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| {
            AgentError::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&source)
    }

    /// Add an agent directory
    pub fn with_agent_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.agent_dirs.push(dir.into());
        self
    }

    /// Enable or disable hot reload
    pub fn with_hot_reload(mut self, enabled: bool) -> Self {
        self.hot_reload = enabled;
        self
    }

    /// Check invariants not expressible in the schema
    pub fn validate(&self) -> Result<()> {
        if self.prefix.trim().is_empty() {
            return Err(AgentError::Config("Router prefix cannot be empty".to_string()));
        }
        if let Some(ref provider) = self.provider {
            if provider.base_url.trim().is_empty() {
                return Err(AgentError::Config("Provider base_url cannot be empty".to_string()));
            }
        }
        Ok(())
    }
}

/// Provider backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Backend kind (currently "ollama")
    #[serde(default = "default_provider_kind")]
    pub kind: String,

    /// Backend base URL
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model used when an agent does not name one
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Request timeout for non-streaming calls
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_provider_kind() -> String {
    "ollama".to_string()
}

fn default_base_url() -> String {
    "http://localhost:11434".to_string()
}

pub(crate) fn default_model() -> String {
    "llama2".to_string()
}

fn default_timeout_secs() -> u64 {
    120
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: default_provider_kind(),
            base_url: default_base_url(),
            default_model: default_model(),
            timeout_secs: default_timeout_secs(),
        }
    }
}
