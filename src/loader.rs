//! Agent discovery and loading
//!
//! Each agent lives in its own subdirectory of a configured base directory,
//! described by a manifest named `agent.{yaml,yml,json}` or
//! `setup.{yaml,yml,json}`. A manifest describes one agent, or several under
//! an `agents:` list:
//!
//! ```yaml
//! name: Calculator
//! kind: calculator
//! model: llama3:latest
//! tools: [calculator]
//! requires: [calculator]
//! config:
//!   temperature: 0.7
//! ```
//!
//! Loading resolves `kind` and `tools` through the `PluginRegistry`. Every
//! load is recorded in an index (name → definition and source file).

use crate::agent::AgentDefinition;
use crate::error::{AgentError, Result};
use crate::plugin::PluginRegistry;
use indexmap::IndexMap;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use walkdir::WalkDir;

/// File names recognized as agent definitions
pub const DEFINITION_FILES: &[&str] = &[
    "agent.yaml",
    "agent.yml",
    "agent.json",
    "setup.yaml",
    "setup.yml",
    "setup.json",
];

/// Whether `path` names an agent definition file
pub fn is_definition_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| DEFINITION_FILES.contains(&n))
        .unwrap_or(false)
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ManifestFile {
    Many { agents: Vec<AgentManifest> },
    One(AgentManifest),
}

#[derive(Debug, Deserialize)]
struct AgentManifest {
    name: String,

    /// Plugin kind; defaults to the lower-cased name
    #[serde(default)]
    kind: Option<String>,

    #[serde(default)]
    model: Option<String>,

    /// Tool kinds to attach to every instance
    #[serde(default)]
    tools: Vec<String>,

    #[serde(default, alias = "required_tools")]
    requires: Vec<String>,

    #[serde(default)]
    config: serde_json::Map<String, serde_json::Value>,
}

impl ManifestFile {
    fn into_entries(self) -> Vec<AgentManifest> {
        match self {
            Self::Many { agents } => agents,
            Self::One(one) => vec![one],
        }
    }
}

/// Discovers, loads, and indexes agent definitions
pub struct AgentLoader {
    plugins: Arc<PluginRegistry>,
    index: RwLock<IndexMap<String, AgentDefinition>>,
}

impl AgentLoader {
    /// Create a loader resolving kinds through `plugins`
    pub fn new(plugins: Arc<PluginRegistry>) -> Self {
        Self {
            plugins,
            index: RwLock::new(IndexMap::new()),
        }
    }

    /// Plugin registry used for resolution
    pub fn plugins(&self) -> &PluginRegistry {
        &self.plugins
    }

    /// Recursively find definition files under `directory`, sorted
    ///
    /// A missing or unreadable directory is a `Discovery` error; unreadable
    /// entries below it are skipped with a warning.
    pub fn discover(&self, directory: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
        let directory = directory.as_ref();
        if !directory.is_dir() {
            return Err(AgentError::Discovery {
                path: directory.display().to_string(),
                reason: "directory not found".to_string(),
            });
        }

        let mut found = Vec::new();
        for entry in WalkDir::new(directory).follow_links(true) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if e.depth() == 0 => {
                    return Err(AgentError::Discovery {
                        path: directory.display().to_string(),
                        reason: e.to_string(),
                    })
                }
                Err(e) => {
                    tracing::warn!(dir = %directory.display(), error = %e, "Skipping unreadable entry");
                    continue;
                }
            };
            if entry.file_type().is_file() && is_definition_file(entry.path()) {
                found.push(entry.into_path());
            }
        }
        found.sort();

        tracing::debug!(dir = %directory.display(), count = found.len(), "Agent definitions discovered");
        Ok(found)
    }

    /// Load every agent defined in `path` and record it in the index
    ///
    /// The whole file fails as one `Load` error if it cannot be read or
    /// parsed, names an unknown kind, or defines a name twice.
    pub fn load(&self, path: impl AsRef<Path>) -> Result<Vec<AgentDefinition>> {
        let path = path.as_ref();
        let load_err = |reason: String| AgentError::Load {
            path: path.display().to_string(),
            reason,
        };

        let source = std::fs::read_to_string(path).map_err(|e| load_err(e.to_string()))?;
        let manifest: ManifestFile =
            serde_yaml::from_str(&source).map_err(|e| load_err(e.to_string()))?;

        let mut seen = HashSet::new();
        let mut definitions = Vec::new();
        for entry in manifest.into_entries() {
            if !seen.insert(entry.name.clone()) {
                return Err(load_err(format!("agent '{}' defined twice", entry.name)));
            }
            definitions.push(self.resolve(entry, path).map_err(load_err)?);
        }

        let mut index = self.index.write().unwrap_or_else(|e| e.into_inner());
        for definition in &definitions {
            index.insert(definition.name.clone(), definition.clone());
        }
        drop(index);

        tracing::info!(
            path = %path.display(),
            agents = ?definitions.iter().map(|d| d.name.as_str()).collect::<Vec<_>>(),
            "Agent definitions loaded"
        );
        Ok(definitions)
    }

    fn resolve(&self, entry: AgentManifest, path: &Path) -> std::result::Result<AgentDefinition, String> {
        let kind = entry.kind.unwrap_or_else(|| entry.name.to_lowercase());
        let factory = self
            .plugins
            .agent(&kind)
            .ok_or_else(|| format!("unknown agent kind '{}' for '{}'", kind, entry.name))?;

        let mut definition = AgentDefinition::from_factory(&entry.name, kind, factory).with_source(path);
        if let Some(model) = entry.model {
            definition = definition.with_model(model);
        }
        for tool in &entry.tools {
            let factory = self
                .plugins
                .tool(tool)
                .ok_or_else(|| format!("unknown tool kind '{}' for '{}'", tool, entry.name))?;
            definition = definition.with_tool_factory(factory);
        }
        for required in entry.requires {
            definition = definition.requires_tool(required);
        }
        definition.config = entry.config;
        Ok(definition)
    }

    /// Declared tool dependencies of a definition
    ///
    /// Advisory only: nothing blocks an agent whose tools are missing.
    pub fn resolve_dependencies(&self, definition: &AgentDefinition) -> Vec<String> {
        definition.required_tools.clone()
    }

    /// Most recently loaded definition for `name`
    pub fn definition(&self, name: &str) -> Option<AgentDefinition> {
        self.read_index().get(name).cloned()
    }

    /// Source file `name` was last loaded from
    pub fn source_of(&self, name: &str) -> Option<PathBuf> {
        self.read_index().get(name).and_then(|d| d.source.clone())
    }

    /// Names last loaded from `path`
    pub fn names_from(&self, path: &Path) -> Vec<String> {
        let target = canonical(path);
        self.read_index()
            .values()
            .filter(|d| d.source.as_deref().map(canonical).as_ref() == Some(&target))
            .map(|d| d.name.clone())
            .collect()
    }

    /// Every indexed name in load order
    pub fn loaded_names(&self) -> Vec<String> {
        self.read_index().keys().cloned().collect()
    }

    fn read_index(&self) -> std::sync::RwLockReadGuard<'_, IndexMap<String, AgentDefinition>> {
        self.index.read().unwrap_or_else(|e| e.into_inner())
    }
}

fn canonical(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn loader() -> AgentLoader {
        AgentLoader::new(Arc::new(PluginRegistry::with_builtins()))
    }

    fn write(dir: &Path, rel: &str, body: &str) -> PathBuf {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_is_definition_file() {
        assert!(is_definition_file(Path::new("/a/calc/agent.yaml")));
        assert!(is_definition_file(Path::new("setup.json")));
        assert!(!is_definition_file(Path::new("/a/calc/tools.yaml")));
        assert!(!is_definition_file(Path::new("/a/calc/")));
    }

    #[test]
    fn test_discover_recursive_and_sorted() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "memory/agent.yaml", "name: Memory");
        write(dir.path(), "calc/setup.yml", "name: Calculator");
        write(dir.path(), "calc/notes.md", "ignored");
        write(dir.path(), "nested/deep/agent.json", "{\"name\": \"Memory\"}");

        let found = loader().discover(dir.path()).unwrap();
        let rel: Vec<String> = found
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().display().to_string())
            .collect();
        assert_eq!(rel, vec!["calc/setup.yml", "memory/agent.yaml", "nested/deep/agent.json"]);
    }

    #[test]
    fn test_discover_missing_directory() {
        let err = loader().discover("/nonexistent/a3s-agents").unwrap_err();
        assert!(matches!(err, AgentError::Discovery { .. }));
    }

    #[test]
    fn test_load_single_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "calc/agent.yaml",
            "name: Calculator\nkind: calculator\nmodel: llama3:latest\ntools: [calculator]\nrequires: [calculator]\nconfig:\n  temperature: 0.7\n",
        );

        let loader = loader();
        let defs = loader.load(&path).unwrap();
        assert_eq!(defs.len(), 1);
        let def = &defs[0];
        assert_eq!(def.name, "Calculator");
        assert_eq!(def.kind, "calculator");
        assert_eq!(def.model.as_deref(), Some("llama3:latest"));
        assert_eq!(def.config["temperature"], 0.7);
        assert_eq!(def.build_tools().len(), 1);
        assert_eq!(loader.resolve_dependencies(def), vec!["calculator"]);

        assert_eq!(loader.source_of("Calculator"), Some(path.clone()));
        assert_eq!(loader.names_from(&path), vec!["Calculator"]);
    }

    #[test]
    fn test_load_many_and_default_kind() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "pack/agent.yaml",
            "agents:\n  - name: Memory\n    tools: [memory_store]\n  - name: Calculator\n",
        );
        let loader = loader();
        let defs = loader.load(&path).unwrap();
        let names: Vec<&str> = defs.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["Memory", "Calculator"]);
        assert_eq!(defs[0].kind, "memory");
        assert_eq!(loader.loaded_names(), vec!["Memory", "Calculator"]);
    }

    #[test]
    fn test_load_json_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "m/agent.json", r#"{"name": "Memory", "config": {"limit": 3}}"#);
        let defs = loader().load(&path).unwrap();
        assert_eq!(defs[0].config["limit"], 3);
    }

    #[test]
    fn test_load_errors() {
        let dir = tempfile::tempdir().unwrap();
        let loader = loader();

        let unknown = write(dir.path(), "a/agent.yaml", "name: Ghost\nkind: ghost\n");
        let err = loader.load(&unknown).unwrap_err();
        assert!(matches!(err, AgentError::Load { .. }));
        assert!(err.to_string().contains("unknown agent kind 'ghost'"));

        let bad_tool = write(dir.path(), "b/agent.yaml", "name: Memory\ntools: [laser]\n");
        assert!(loader.load(&bad_tool).unwrap_err().to_string().contains("unknown tool kind"));

        let garbage = write(dir.path(), "c/agent.yaml", "[[[");
        assert!(matches!(loader.load(&garbage).unwrap_err(), AgentError::Load { .. }));

        let dup = write(
            dir.path(),
            "d/agent.yaml",
            "agents:\n  - name: Memory\n  - name: Memory\n",
        );
        assert!(loader.load(&dup).unwrap_err().to_string().contains("defined twice"));

        assert!(matches!(
            loader.load(dir.path().join("missing/agent.yaml")).unwrap_err(),
            AgentError::Load { .. }
        ));

        // failed loads never reach the index
        assert!(loader.loaded_names().is_empty());
    }

    #[test]
    fn test_reload_supersedes_index_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "m/agent.yaml", "name: Memory\nmodel: a\n");
        let loader = loader();
        loader.load(&path).unwrap();
        write(dir.path(), "m/agent.yaml", "name: Memory\nmodel: b\n");
        loader.load(&path).unwrap();
        assert_eq!(loader.definition("Memory").unwrap().model.as_deref(), Some("b"));
        assert_eq!(loader.loaded_names().len(), 1);
    }
}
