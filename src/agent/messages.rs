//! Intents, plans and the messages actors exchange
//!
//! Every message carries the correlation id of the request it belongs to.
//! The orchestrator's mailbox accepts a closed sum of message kinds, each
//! child actor accepts exactly one request type.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::time::Instant;

use super::actor::{ActorHandle, Correlated};
use super::tools::ToolSchema;

/// Free-form request context (permissions, session metadata, ...)
pub type Context = Map<String, Value>;

/// A user request to be planned and answered
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    /// Correlation id; generated when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub content: String,
    #[serde(rename = "type", default = "default_intent_type")]
    pub intent_type: String,
    #[serde(default)]
    pub context: Context,
}

fn default_intent_type() -> String {
    "question".to_string()
}

impl Intent {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            id: None,
            content: content.into(),
            intent_type: default_intent_type(),
            context: Context::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_type(mut self, intent_type: impl Into<String>) -> Self {
        self.intent_type = intent_type.into();
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    /// Permissions granted to the caller, read from `context.permissions`
    pub fn permissions(&self) -> HashSet<String> {
        self.context
            .get("permissions")
            .and_then(Value::as_array)
            .map(|perms| {
                perms
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

/// One tool invocation inside a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    #[serde(alias = "tool")]
    pub tool_name: String,
    #[serde(default = "empty_object")]
    pub parameters: Value,
    #[serde(default)]
    pub description: String,
}

impl Task {
    pub fn new(id: impl Into<String>, tool_name: impl Into<String>, parameters: Value) -> Self {
        Self {
            id: id.into(),
            tool_name: tool_name.into(),
            parameters,
            description: String::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Search queries carried in `query` / `queries` parameters
    pub fn queries(&self) -> Vec<String> {
        let mut queries = Vec::new();
        if let Some(query) = self.parameters.get("query").and_then(Value::as_str) {
            queries.push(query.to_string());
        }
        if let Some(list) = self.parameters.get("queries").and_then(Value::as_array) {
            queries.extend(list.iter().filter_map(Value::as_str).map(str::to_string));
        }
        queries
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("execution order references unknown task '{0}'")]
    UnknownTask(String),
    #[error("duplicate task id '{0}'")]
    DuplicateTask(String),
}

/// Planner output: analysis text plus tasks in execution order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default)]
    pub analysis: String,
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub execution_order: Vec<String>,
}

impl Plan {
    pub fn new(analysis: impl Into<String>) -> Self {
        Self {
            analysis: analysis.into(),
            ..Default::default()
        }
    }

    /// Append a task and schedule it last
    pub fn with_task(mut self, task: Task) -> Self {
        self.execution_order.push(task.id.clone());
        self.tasks.push(task);
        self
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// Empty execution order means declaration order
    pub fn normalized(mut self) -> Self {
        if self.execution_order.is_empty() {
            self.execution_order = self.tasks.iter().map(|t| t.id.clone()).collect();
        }
        self
    }

    pub fn validate(&self) -> Result<(), PlanError> {
        let mut ids = HashSet::new();
        for task in &self.tasks {
            if !ids.insert(task.id.as_str()) {
                return Err(PlanError::DuplicateTask(task.id.clone()));
            }
        }
        match self.execution_order.iter().find(|id| !ids.contains(id.as_str())) {
            Some(missing) => Err(PlanError::UnknownTask(missing.clone())),
            None => Ok(()),
        }
    }

    /// Tasks in execution order
    pub fn ordered_tasks(&self) -> Vec<&Task> {
        self.execution_order
            .iter()
            .filter_map(|id| self.task(id))
            .collect()
    }

    /// All search queries across the plan, in execution order
    pub fn queries(&self) -> Vec<String> {
        self.ordered_tasks().iter().flat_map(|t| t.queries()).collect()
    }
}

/// Why a task produced no result
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    #[error("{message}")]
    Failed { tool: String, message: String },
    #[error("Task timeout")]
    Timeout,
    #[error("Tool '{0}' is temporarily blocked after repeated failures")]
    CircuitOpen(String),
    #[error("Tool '{tool}' is unavailable: {reason}")]
    Unavailable { tool: String, reason: String },
    #[error("Unknown tool: {0}")]
    UnknownTool(String),
    #[error("Task aborted: {0}")]
    Aborted(String),
}

impl TaskError {
    /// Error payload as stored in task results and tool_result events
    pub fn to_payload(&self) -> Value {
        json!({ "error": self.to_string() })
    }
}

/// Result of one task: tool data or the reason there is none
pub type TaskOutcome = Result<Value, TaskError>;

/// Lifecycle of one correlation id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationStatus {
    Planning,
    Executing,
    Verifying,
    Reflecting,
    Completed,
    Failed,
}

impl CorrelationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planning => "planning",
            Self::Executing => "executing",
            Self::Verifying => "verifying",
            Self::Reflecting => "reflecting",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// Per-request bookkeeping owned by the orchestrator
#[derive(Debug)]
pub struct CorrelationState {
    pub correlation_id: String,
    pub intent: Intent,
    pub status: CorrelationStatus,
    pub plan: Option<Plan>,
    pub task_results: HashMap<String, TaskOutcome>,
    pub started_at: Instant,
    pending: HashMap<String, oneshot::Sender<TaskOutcome>>,
}

impl CorrelationState {
    pub fn new(correlation_id: impl Into<String>, intent: Intent) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            intent,
            status: CorrelationStatus::Planning,
            plan: None,
            task_results: HashMap::new(),
            started_at: Instant::now(),
            pending: HashMap::new(),
        }
    }

    /// Register a waiter for `task_id`, replacing any previous one
    pub(crate) fn await_result(&mut self, task_id: &str) -> oneshot::Receiver<TaskOutcome> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(task_id.to_string(), tx);
        rx
    }

    /// Deliver a result to its waiter. Returns false when nobody is waiting.
    pub(crate) fn resolve(&mut self, task_id: &str, outcome: TaskOutcome) -> bool {
        match self.pending.remove(task_id) {
            Some(waiter) => {
                self.task_results.insert(task_id.to_string(), outcome.clone());
                // The waiter may have timed out between the lookup and now
                waiter.send(outcome).is_ok()
            }
            None => false,
        }
    }

    /// Record the final outcome of a task and drop its waiter
    pub(crate) fn settle(&mut self, task_id: &str, outcome: TaskOutcome) {
        self.pending.remove(task_id);
        self.task_results.insert(task_id.to_string(), outcome);
    }

    pub fn is_waiting_on(&self, task_id: &str) -> bool {
        self.pending.contains_key(task_id)
    }
}

// ============================================================================
// Actor messages
// ============================================================================

/// Everything the orchestrator's mailbox accepts
#[derive(Debug)]
pub enum OrchestratorMessage {
    Intent(IntentMsg),
    Plan(PlanMsg),
    TaskResult(TaskResultMsg),
    ChildError(ChildErrorMsg),
}

#[derive(Debug)]
pub struct IntentMsg {
    pub correlation_id: String,
    pub intent: Intent,
}

#[derive(Debug)]
pub struct PlanMsg {
    pub correlation_id: String,
    /// Plan, or the planning failure rendered as text
    pub plan: Result<Plan, String>,
}

#[derive(Debug)]
pub struct TaskResultMsg {
    pub correlation_id: String,
    pub task_id: String,
    pub outcome: TaskOutcome,
}

/// A child actor's handler failed while processing a message
#[derive(Debug, Clone)]
pub struct ChildErrorMsg {
    pub child: String,
    pub correlation_id: Option<String>,
    pub task_id: Option<String>,
    pub error: String,
}

/// Orchestrator → Planner
#[derive(Debug)]
pub struct PlanRequest {
    pub correlation_id: String,
    pub intent: Intent,
    /// Tool list visible to this caller
    pub tools: Vec<ToolSchema>,
    pub reply_to: ActorHandle<OrchestratorMessage>,
}

/// Shared between the waiting orchestrator and the executor of one
/// dispatch. Only the first side to claim it reports to the breaker.
#[derive(Debug, Clone, Default)]
pub struct BreakerClaim(Arc<AtomicBool>);

impl BreakerClaim {
    pub fn new() -> Self {
        Self::default()
    }

    /// True for the first caller only
    pub fn claim(&self) -> bool {
        !self.0.swap(true, Ordering::AcqRel)
    }
}

/// Orchestrator → Router
#[derive(Debug)]
pub struct RouteTask {
    pub correlation_id: String,
    pub task: Task,
    pub claim: BreakerClaim,
    pub reply_to: ActorHandle<OrchestratorMessage>,
}

/// Router → Executor
#[derive(Debug)]
pub struct ExecuteTask {
    pub correlation_id: String,
    pub task: Task,
    pub claim: BreakerClaim,
    pub reply_to: ActorHandle<OrchestratorMessage>,
}

impl From<RouteTask> for ExecuteTask {
    fn from(route: RouteTask) -> Self {
        Self {
            correlation_id: route.correlation_id,
            task: route.task,
            claim: route.claim,
            reply_to: route.reply_to,
        }
    }
}

impl Correlated for OrchestratorMessage {
    fn correlation_id(&self) -> Option<&str> {
        match self {
            Self::Intent(m) => Some(&m.correlation_id),
            Self::Plan(m) => Some(&m.correlation_id),
            Self::TaskResult(m) => Some(&m.correlation_id),
            Self::ChildError(m) => m.correlation_id.as_deref(),
        }
    }

    fn task_id(&self) -> Option<&str> {
        match self {
            Self::TaskResult(m) => Some(&m.task_id),
            Self::ChildError(m) => m.task_id.as_deref(),
            _ => None,
        }
    }
}

impl Correlated for PlanRequest {
    fn correlation_id(&self) -> Option<&str> {
        Some(&self.correlation_id)
    }
}

impl Correlated for RouteTask {
    fn correlation_id(&self) -> Option<&str> {
        Some(&self.correlation_id)
    }

    fn task_id(&self) -> Option<&str> {
        Some(&self.task.id)
    }
}

impl Correlated for ExecuteTask {
    fn correlation_id(&self) -> Option<&str> {
        Some(&self.correlation_id)
    }

    fn task_id(&self) -> Option<&str> {
        Some(&self.task.id)
    }
}
