//! Planner
//!
//! Decomposes an intent into tool tasks:
//! - Planner actor wrapping any `PlanGenerator`
//! - Prompt construction and JSON plan parsing for LLM planners
//! - Heuristic planner (one retrieval task per sub-question) for offline use

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::actor::Actor;
use super::messages::{Intent, OrchestratorMessage, Plan, PlanMsg, PlanRequest, Task};
use super::tools::ToolSchema;
use crate::traits::PlanGenerator;

/// Actor front for a `PlanGenerator`
///
/// Each request is planned on its own task so a slow model call never
/// holds up the mailbox.
pub struct PlannerActor {
    generator: Arc<dyn PlanGenerator>,
}

impl PlannerActor {
    pub fn new(generator: Arc<dyn PlanGenerator>) -> Self {
        Self { generator }
    }
}

#[async_trait]
impl Actor for PlannerActor {
    type Message = PlanRequest;

    fn name(&self) -> &str {
        "planner"
    }

    async fn handle(&mut self, request: PlanRequest) -> Result<()> {
        let generator = self.generator.clone();
        debug!(
            correlation_id = %request.correlation_id,
            "Planning with {} visible tools", request.tools.len()
        );

        tokio::spawn(async move {
            let PlanRequest {
                correlation_id,
                intent,
                tools,
                reply_to,
            } = request;

            let plan = match generator.plan(&intent, &tools).await {
                Ok(plan) => {
                    let plan = plan.normalized();
                    info!(
                        correlation_id = %correlation_id,
                        "Plan ready: {} tasks", plan.tasks.len()
                    );
                    Ok(plan)
                }
                Err(e) => {
                    warn!(correlation_id = %correlation_id, "Planning failed: {:#}", e);
                    Err(format!("{:#}", e))
                }
            };

            if reply_to
                .tell(OrchestratorMessage::Plan(PlanMsg { correlation_id, plan }))
                .is_err()
            {
                debug!("Orchestrator gone, plan dropped");
            }
        });

        Ok(())
    }
}

/// Prompt asking a model for a JSON plan over `tools`
pub fn plan_prompt(intent: &Intent, tools: &[ToolSchema]) -> String {
    let tool_lines: Vec<String> = tools
        .iter()
        .map(|t| {
            format!(
                "- {}: {} (parameters: {})",
                t.name,
                t.description,
                t.parameters.get("properties").cloned().unwrap_or(Value::Null)
            )
        })
        .collect();

    format!(
        r#"Plan how to answer this request using the available tools.

Request: {}

Available tools:
{}

Return a JSON object with:
- analysis: one or two sentences on how you will answer
- tasks: array of {{id, tool_name, parameters, description}}
- execution_order: task ids in the order they should run

Use only the tools listed. If no tool is needed, return an empty tasks array
and put the direct answer in analysis.

JSON only:"#,
        intent.content,
        if tool_lines.is_empty() {
            "(none)".to_string()
        } else {
            tool_lines.join("\n")
        }
    )
}

/// Parse a model completion into a plan
pub fn parse_plan(response: &str) -> Result<Plan> {
    let json_str = extract_json_object(response).ok_or_else(|| anyhow!("No JSON object in planner response"))?;
    let plan: Plan = serde_json::from_str(json_str).context("Planner returned malformed plan JSON")?;
    Ok(plan.normalized())
}

/// Extract the first balanced JSON object from text
pub(crate) fn extract_json_object(s: &str) -> Option<&str> {
    let start = s.find('{')?;
    let mut depth = 0;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in s[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }

    None
}

/// Offline planner: one retrieval task per sub-question
pub struct HeuristicPlanner {
    search_tool: String,
    max_queries: usize,
}

impl Default for HeuristicPlanner {
    fn default() -> Self {
        Self {
            search_tool: "rag_search".to_string(),
            max_queries: 4,
        }
    }
}

impl HeuristicPlanner {
    pub fn new(search_tool: &str, max_queries: usize) -> Self {
        Self {
            search_tool: search_tool.to_string(),
            max_queries: max_queries.max(1),
        }
    }

    fn queries(&self, intent: &Intent) -> Vec<String> {
        if let Some(list) = intent.context.get("queries").and_then(Value::as_array) {
            let queries: Vec<String> = list
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .take(self.max_queries)
                .collect();
            if !queries.is_empty() {
                return queries;
            }
        }
        split_questions(&intent.content, self.max_queries)
    }
}

/// Split compound questions on `?`, `;` and newlines
fn split_questions(content: &str, limit: usize) -> Vec<String> {
    let parts: Vec<String> = content
        .split_inclusive(['?', ';', '\n'])
        .map(|p| p.trim().trim_end_matches([';', '\n']).trim())
        .filter(|p| p.chars().filter(|c| c.is_alphanumeric()).count() >= 3)
        .map(str::to_string)
        .take(limit)
        .collect();

    if parts.is_empty() && !content.trim().is_empty() {
        vec![content.trim().to_string()]
    } else {
        parts
    }
}

#[async_trait]
impl PlanGenerator for HeuristicPlanner {
    async fn plan(&self, intent: &Intent, tools: &[ToolSchema]) -> Result<Plan> {
        if !tools.iter().any(|t| t.name == self.search_tool) {
            return Ok(Plan::new(format!(
                "No retrieval tool is available, so I cannot look this up: {}",
                intent.content.trim()
            )));
        }

        let queries = self.queries(intent);
        let mut plan = Plan::new(format!(
            "Searching the documents for {} quer{}.",
            queries.len(),
            if queries.len() == 1 { "y" } else { "ies" }
        ));
        for (i, query) in queries.iter().enumerate() {
            plan = plan.with_task(
                Task::new(format!("task_{}", i + 1), &self.search_tool, json!({ "query": query }))
                    .with_description(format!("Search: {}", query)),
            );
        }
        Ok(plan)
    }
}
