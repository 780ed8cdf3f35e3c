//! Tool Registry & Masking
//!
//! JSON schema-based tool definitions behind a non-destructive mask layer:
//! - Tools are registered once and never removed
//! - Masks disable, restrict or mark tools unavailable without losing them
//! - Global tools cannot be masked off
//! - Caller-facing tool lists are filtered by permissions and request context
//!
//! Industry standard: OpenAI Function Calling, Claude Tool Use

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::traits::ToolExecutor;

/// JSON Schema for tool parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    /// Tool name (snake_case)
    pub name: String,
    pub description: String,
    /// JSON Schema for parameters
    pub parameters: Value,
    /// Required parameter names
    pub required: Vec<String>,
}

impl ToolSchema {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            parameters: json!({
                "type": "object",
                "properties": {}
            }),
            required: vec![],
        }
    }

    fn with_param(mut self, name: &str, schema: Value, required: bool) -> Self {
        if let Some(props) = self.parameters.get_mut("properties") {
            props[name] = schema;
        }
        if required {
            self.required.push(name.to_string());
        }
        self
    }

    pub fn with_string_param(self, name: &str, description: &str, required: bool) -> Self {
        self.with_param(name, json!({ "type": "string", "description": description }), required)
    }

    pub fn with_int_param(self, name: &str, description: &str, required: bool) -> Self {
        self.with_param(name, json!({ "type": "integer", "description": description }), required)
    }

    /// Add an array-of-strings parameter
    pub fn with_string_list_param(self, name: &str, description: &str, required: bool) -> Self {
        self.with_param(
            name,
            json!({ "type": "array", "items": { "type": "string" }, "description": description }),
            required,
        )
    }

    /// Validate parameters against schema
    pub fn validate(&self, params: &Value) -> Result<()> {
        for req in &self.required {
            if params.get(req).is_none() {
                return Err(anyhow!("Missing required parameter: {}", req));
            }
        }

        if let Some(props) = self.parameters.get("properties").and_then(Value::as_object) {
            for (name, schema) in props {
                if let Some(value) = params.get(name) {
                    let expected_type = schema.get("type").and_then(|t| t.as_str());
                    let valid = match expected_type {
                        Some("string") => value.is_string(),
                        Some("integer") => value.is_i64() || value.is_u64(),
                        Some("number") => value.is_number(),
                        Some("boolean") => value.is_boolean(),
                        Some("array") => value.is_array(),
                        Some("object") => value.is_object(),
                        _ => true,
                    };
                    if !valid {
                        return Err(anyhow!(
                            "Parameter '{}' has wrong type, expected {}",
                            name,
                            expected_type.unwrap_or("unknown")
                        ));
                    }
                }
            }
        }

        Ok(())
    }

    /// Format as Claude-compatible tool definition
    pub fn to_claude_format(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "input_schema": {
                "type": "object",
                "properties": self.parameters.get("properties").cloned().unwrap_or(Value::Object(Default::default())),
                "required": self.required
            }
        })
    }
}

/// Result from tool execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_name: String,
    pub success: bool,
    /// Structured result data (`null` on failure)
    pub data: Value,
    pub error: Option<String>,
    pub execution_time_ms: u64,
}

impl ToolResult {
    pub fn success(tool_name: &str, data: Value) -> Self {
        Self {
            tool_name: tool_name.to_string(),
            success: true,
            data,
            error: None,
            execution_time_ms: 0,
        }
    }

    pub fn failure(tool_name: &str, error: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.to_string(),
            success: false,
            data: Value::Null,
            error: Some(error.into()),
            execution_time_ms: 0,
        }
    }

    pub fn with_execution_time(mut self, ms: u64) -> Self {
        self.execution_time_ms = ms;
        self
    }
}

/// Type alias for tool handler function
pub type ToolHandler =
    Arc<dyn Fn(Value) -> Pin<Box<dyn Future<Output = Result<Value>> + Send>> + Send + Sync>;

/// A registered tool: schema plus an optional local handler
///
/// Declared tools (no handler) are advertised to planners and executed by
/// whatever `ToolExecutor` the orchestrator was given.
pub struct Tool {
    pub schema: ToolSchema,
    handler: Option<ToolHandler>,
}

impl Tool {
    pub fn new<F, Fut>(schema: ToolSchema, handler: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self {
            schema,
            handler: Some(Arc::new(move |params| Box::pin(handler(params)))),
        }
    }

    pub fn declare(schema: ToolSchema) -> Self {
        Self {
            schema,
            handler: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.schema.name
    }

    pub fn has_handler(&self) -> bool {
        self.handler.is_some()
    }

    /// Validate and run the local handler
    pub async fn execute(&self, params: Value) -> Result<Value> {
        self.schema.validate(&params)?;
        let handler = self
            .handler
            .as_ref()
            .ok_or_else(|| anyhow!("Tool '{}' has no local handler", self.schema.name))?;
        handler(params).await
    }
}

/// Mask status of a registered tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Enabled,
    Disabled,
    /// Advertised with a warning, still callable
    Restricted,
    Unavailable,
}

impl ToolStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Enabled => "enabled",
            Self::Disabled => "disabled",
            Self::Restricted => "restricted",
            Self::Unavailable => "unavailable",
        }
    }
}

/// Availability overlay for one tool
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolMask {
    pub tool_name: String,
    pub status: ToolStatus,
    pub reason: Option<String>,
    pub disabled_at: Option<DateTime<Utc>>,
    pub permissions_required: Vec<String>,
    pub context_requirements: Map<String, Value>,
}

impl ToolMask {
    fn enabled(tool_name: &str) -> Self {
        Self {
            tool_name: tool_name.to_string(),
            status: ToolStatus::Enabled,
            reason: None,
            disabled_at: None,
            permissions_required: Vec::new(),
            context_requirements: Map::new(),
        }
    }

    fn permits(&self, permissions: &HashSet<String>) -> bool {
        self.permissions_required.iter().all(|p| permissions.contains(p))
    }

    fn matches_context(&self, context: &Map<String, Value>) -> bool {
        self.context_requirements
            .iter()
            .all(|(key, expected)| context.get(key) == Some(expected))
    }
}

/// Registry row returned by `list_all_tools`
#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub status: ToolStatus,
    pub reason: Option<String>,
    pub is_global: bool,
    pub has_handler: bool,
}

struct RegisteredTool {
    tool: Arc<Tool>,
    mask: ToolMask,
    is_global: bool,
}

/// Tool registry with masks; shared behind an `Arc`
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<BTreeMap<String, RegisteredTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a tool; the mask resets to enabled
    pub fn register_tool(&self, tool: Tool, is_global: bool) {
        let name = tool.name().to_string();
        let mut tools = self.tools.write();
        if tools.contains_key(&name) {
            debug!("Re-registering tool: {}", name);
        } else {
            info!("Registered tool: {}{}", name, if is_global { " (global)" } else { "" });
        }
        tools.insert(
            name.clone(),
            RegisteredTool {
                mask: ToolMask::enabled(&name),
                tool: Arc::new(tool),
                is_global,
            },
        );
    }

    /// Change a tool's mask. Returns false for unknown tools and for
    /// attempts to mask off a global tool.
    pub fn mask_tool(&self, name: &str, status: ToolStatus, reason: Option<&str>) -> bool {
        let mut tools = self.tools.write();
        let Some(entry) = tools.get_mut(name) else {
            warn!("Cannot mask unknown tool: {}", name);
            return false;
        };

        if entry.is_global && status != ToolStatus::Enabled {
            warn!("Cannot mask global tool '{}' as {}", name, status.as_str());
            return false;
        }

        entry.mask.status = status;
        entry.mask.reason = reason.map(str::to_string);
        entry.mask.disabled_at = match status {
            ToolStatus::Disabled | ToolStatus::Unavailable => Some(Utc::now()),
            ToolStatus::Enabled | ToolStatus::Restricted => None,
        };
        info!(
            "Tool '{}' masked as {}{}",
            name,
            status.as_str(),
            reason.map(|r| format!(": {}", r)).unwrap_or_default()
        );
        true
    }

    pub fn set_tool_permissions(&self, name: &str, permissions: &[&str]) -> bool {
        match self.tools.write().get_mut(name) {
            Some(entry) => {
                entry.mask.permissions_required = permissions.iter().map(|p| p.to_string()).collect();
                true
            }
            None => false,
        }
    }

    pub fn set_tool_context(&self, name: &str, requirements: Map<String, Value>) -> bool {
        match self.tools.write().get_mut(name) {
            Some(entry) => {
                entry.mask.context_requirements = requirements;
                true
            }
            None => false,
        }
    }

    pub fn tool_status(&self, name: &str) -> Option<ToolMask> {
        self.tools.read().get(name).map(|e| e.mask.clone())
    }

    pub fn is_global(&self, name: &str) -> bool {
        self.tools.read().get(name).map(|e| e.is_global).unwrap_or(false)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.read().contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<Tool>> {
        self.tools.read().get(name).map(|e| e.tool.clone())
    }

    /// Tool names, sorted
    pub fn list(&self) -> Vec<String> {
        self.tools.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tools.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.read().is_empty()
    }

    pub fn list_all_tools(&self) -> Vec<ToolInfo> {
        self.tools
            .read()
            .values()
            .map(|e| ToolInfo {
                name: e.tool.schema.name.clone(),
                description: e.tool.schema.description.clone(),
                status: e.mask.status,
                reason: e.mask.reason.clone(),
                is_global: e.is_global,
                has_handler: e.tool.has_handler(),
            })
            .collect()
    }

    /// Schemas the caller may see, in name order
    ///
    /// Disabled tools are hidden, as are tools whose required permissions or
    /// context values the caller lacks. Other non-enabled tools are listed
    /// with their status appended to the description.
    pub fn get_available_tools(
        &self,
        permissions: &HashSet<String>,
        context: &Map<String, Value>,
    ) -> Vec<ToolSchema> {
        self.tools
            .read()
            .values()
            .filter(|e| e.mask.status != ToolStatus::Disabled)
            .filter(|e| e.mask.permits(permissions))
            .filter(|e| e.mask.matches_context(context))
            .map(|e| {
                let mut schema = e.tool.schema.clone();
                if e.mask.status != ToolStatus::Enabled {
                    schema.description.push_str(&format!(
                        "\n[STATUS: {} - {}]",
                        e.mask.status.as_str().to_uppercase(),
                        e.mask.reason.as_deref().unwrap_or("no reason given")
                    ));
                }
                schema
            })
            .collect()
    }

    /// Format visible tools for Claude API
    pub fn to_claude_format(&self, permissions: &HashSet<String>, context: &Map<String, Value>) -> Vec<Value> {
        self.get_available_tools(permissions, context)
            .iter()
            .map(ToolSchema::to_claude_format)
            .collect()
    }
}

#[async_trait]
impl ToolExecutor for ToolRegistry {
    async fn execute(&self, tool_name: &str, arguments: Value) -> ToolResult {
        let start = Instant::now();
        let Some(tool) = self.get(tool_name) else {
            return ToolResult::failure(tool_name, format!("Unknown tool: {}", tool_name));
        };

        let result = match tool.execute(arguments).await {
            Ok(data) => ToolResult::success(tool_name, data),
            Err(e) => ToolResult::failure(tool_name, format!("{:#}", e)),
        };
        result.with_execution_time(start.elapsed().as_millis() as u64)
    }
}

/// Built-in tools
pub mod builtin {
    use super::*;

    /// Retrievable passage for `rag_search`
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Passage {
        pub text: String,
        #[serde(default)]
        pub file_name: String,
        #[serde(default)]
        pub page_label: String,
    }

    fn terms(text: &str) -> Vec<String> {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.chars().count() > 2)
            .map(str::to_lowercase)
            .collect()
    }

    /// Rank passages by how many query terms they contain
    pub fn search_passages<'a>(corpus: &'a [Passage], query: &str, top_k: usize) -> Vec<(&'a Passage, usize)> {
        let query_terms = terms(query);
        let mut scored: Vec<(&Passage, usize)> = corpus
            .iter()
            .map(|p| {
                let text = p.text.to_lowercase();
                let score = query_terms.iter().filter(|t| text.contains(t.as_str())).count();
                (p, score)
            })
            .filter(|(_, score)| *score > 0)
            .collect();
        // Stable sort keeps corpus order among equal scores
        scored.sort_by(|a, b| b.1.cmp(&a.1));
        scored.truncate(top_k);
        scored
    }

    /// Keyword retrieval over an in-memory corpus
    pub fn rag_search_tool(corpus: Arc<Vec<Passage>>) -> Tool {
        let schema = ToolSchema::new("rag_search", "Search the document corpus for passages relevant to a query")
            .with_string_param("query", "Search query", false)
            .with_string_list_param("queries", "Several search queries", false)
            .with_int_param("top_k", "Passages per query (default 3)", false);

        Tool::new(schema, move |params| {
            let corpus = corpus.clone();
            async move {
                let mut queries: Vec<String> = Vec::new();
                if let Some(q) = params.get("query").and_then(Value::as_str) {
                    queries.push(q.to_string());
                }
                if let Some(list) = params.get("queries").and_then(Value::as_array) {
                    queries.extend(list.iter().filter_map(Value::as_str).map(str::to_string));
                }
                if queries.is_empty() {
                    return Err(anyhow!("rag_search needs 'query' or 'queries'"));
                }
                let top_k = params.get("top_k").and_then(Value::as_u64).unwrap_or(3) as usize;

                let mut results = Vec::new();
                let mut sources = Vec::new();
                for query in &queries {
                    for (passage, score) in search_passages(&corpus, query, top_k) {
                        results.push(json!({
                            "text": passage.text,
                            "score": score,
                            "file_name": passage.file_name,
                            "page_label": passage.page_label,
                        }));
                        sources.push(json!({
                            "file_name": passage.file_name,
                            "page_label": passage.page_label,
                        }));
                    }
                }

                Ok(json!({
                    "queries": queries,
                    "results": results,
                    "sources": sources,
                }))
            }
        })
    }

    /// Return the input unchanged
    pub fn echo_tool() -> Tool {
        let schema = ToolSchema::new("echo", "Echo the given text back")
            .with_string_param("text", "Text to echo", true);

        Tool::new(schema, |params| async move {
            Ok::<_, anyhow::Error>(json!({ "text": params.get("text").cloned().unwrap_or(Value::Null) }))
        })
    }
}
