//! Tool registry for managing available tools.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::llm::ToolDefinition;
use crate::tools::schema::validate_schema;
use crate::tools::tool::{Tool, ToolDomain, ToolError};

/// Registry of available tools.
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
    /// Names registered at startup; dynamic registrations may not shadow them.
    builtin_names: RwLock<HashSet<String>>,
    /// Names registered twice at startup, reported by `validate`.
    conflicts: RwLock<Vec<String>>,
}

impl ToolRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
            builtin_names: RwLock::new(HashSet::new()),
            conflicts: RwLock::new(Vec::new()),
        }
    }

    /// Register a tool. Rejects tools that try to shadow a built-in name.
    pub async fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.builtin_names.read().await.contains(&name) {
            tracing::warn!(
                tool = %name,
                "Rejected tool registration: would shadow a built-in tool"
            );
            return;
        }
        self.tools.write().await.insert(name.clone(), tool);
        tracing::debug!("Registered tool: {}", name);
    }

    /// Register a built-in tool (sync version for startup).
    pub fn register_sync(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        let (Ok(mut tools), Ok(mut builtins)) =
            (self.tools.try_write(), self.builtin_names.try_write())
        else {
            tracing::warn!(tool = %name, "Registry busy, tool not registered");
            return;
        };

        if tools.contains_key(&name) {
            tracing::warn!(tool = %name, "Tool registered twice");
            if let Ok(mut conflicts) = self.conflicts.try_write() {
                conflicts.push(name);
            }
            return;
        }

        tools.insert(name.clone(), tool);
        builtins.insert(name.clone());
        tracing::debug!("Registered tool: {}", name);
    }

    /// Unregister a tool.
    pub async fn unregister(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.builtin_names.write().await.remove(name);
        self.tools.write().await.remove(name)
    }

    /// Get a tool by name.
    pub async fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.read().await.get(name).cloned()
    }

    /// Check if a tool exists.
    pub async fn has(&self, name: &str) -> bool {
        self.tools.read().await.contains_key(name)
    }

    /// List all tool names, sorted.
    pub async fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Get the number of registered tools.
    pub fn count(&self) -> usize {
        self.tools.try_read().map(|t| t.len()).unwrap_or(0)
    }

    /// Get all tools.
    pub async fn all(&self) -> Vec<Arc<dyn Tool>> {
        self.tools.read().await.values().cloned().collect()
    }

    /// Get tool definitions for LLM function calling, sorted by name.
    pub async fn tool_definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .tools
            .read()
            .await
            .values()
            .map(|tool| tool.definition())
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Get tool definitions filtered by domain.
    pub async fn tool_definitions_for_domain(&self, domain: ToolDomain) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .tools
            .read()
            .await
            .values()
            .filter(|tool| tool.domain() == domain)
            .map(|tool| tool.definition())
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Definitions in the OpenAI `{"type": "function", ...}` shape.
    pub async fn openai_function_specs(&self) -> Vec<serde_json::Value> {
        self.tool_definitions()
            .await
            .iter()
            .map(ToolDefinition::to_openai_function)
            .collect()
    }

    /// Check the registry is usable: non-empty, no duplicates, every schema valid.
    pub async fn validate(&self) -> Result<(), ToolError> {
        if let Some(name) = self.conflicts.read().await.first() {
            return Err(ToolError::Duplicate(name.clone()));
        }

        let tools = self.tools.read().await;
        if tools.is_empty() {
            return Err(ToolError::Empty);
        }
        for (key, tool) in tools.iter() {
            let def = tool.definition();
            if def.name != *key {
                return Err(ToolError::InvalidSchema {
                    name: key.clone(),
                    reason: format!("registered under '{key}' but reports name '{}'", def.name),
                });
            }
            validate_schema(&def)?;
        }
        Ok(())
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
