//! Orchestrator
//!
//! Turns one intent into an ordered stream of events:
//! - Correlation-keyed event queues with an idle timeout
//! - Plan → Execute → Verify → Answer per correlation id
//! - Strictly sequential tasks, each bounded by a result timeout
//! - Answer synthesis over retrieved fragments with deduplicated citations
//!
//! Every stream ends with exactly one `done` or `error` event.

use anyhow::Result;
use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::actor::{self, Actor, ActorHandle, Supervisor};
use super::events::{Event, EventType};
use super::executor::ExecutorActor;
use super::messages::{
    BreakerClaim, ChildErrorMsg, CorrelationState, CorrelationStatus, Intent, IntentMsg, OrchestratorMessage,
    Plan, PlanMsg, PlanRequest, RouteTask, Task, TaskError, TaskOutcome, TaskResultMsg,
};
use super::planner::PlannerActor;
use super::recovery::CircuitBreakerManager;
use super::router::RouterActor;
use super::tools::ToolRegistry;
use crate::traits::{AnswerGenerator, EventSink, PlanGenerator, ToolExecutor};

/// Event stream for one request
pub type EventStream = BoxStream<'static, Event>;

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// How long to wait for a single task's result
    pub task_timeout: Duration,
    /// Longest silence tolerated on an event stream
    pub stream_idle_timeout: Duration,
    /// Fragments handed to answer generation
    pub max_context_fragments: usize,
    /// Citations in the `source` event
    pub max_sources: usize,
    /// Fragments this short or shorter are ignored
    pub min_fragment_chars: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            task_timeout: Duration::from_secs(30),
            stream_idle_timeout: Duration::from_secs(60),
            max_context_fragments: 15,
            max_sources: 5,
            min_fragment_chars: 20,
        }
    }
}

/// Collaborators the orchestrator is wired to
pub struct OrchestratorServices {
    pub registry: Arc<ToolRegistry>,
    pub breakers: Arc<CircuitBreakerManager>,
    pub planner: Arc<dyn PlanGenerator>,
    pub executor: Arc<dyn ToolExecutor>,
    pub answerer: Arc<dyn AnswerGenerator>,
}

/// State shared between the actor, its pipelines and the stream guards
struct Shared {
    config: OrchestratorConfig,
    correlations: Mutex<HashMap<String, CorrelationState>>,
    queues: Mutex<HashMap<String, mpsc::UnboundedSender<Event>>>,
}

impl Shared {
    fn emit(&self, correlation_id: &str, event: Event) {
        let sink = self.queues.lock().get(correlation_id).cloned();
        match sink {
            Some(sink) => {
                if let Err(e) = sink.put(event) {
                    debug!(correlation_id, "Event dropped: {}", e);
                }
            }
            None => debug!(
                correlation_id,
                "No consumer, {} event dropped",
                event.event_type.as_str()
            ),
        }
    }

    fn emit_new(&self, correlation_id: &str, event_type: EventType, content: impl Into<String>) {
        self.emit(correlation_id, Event::new(event_type, content, correlation_id));
    }

    fn is_active(&self, correlation_id: &str) -> bool {
        self.correlations.lock().contains_key(correlation_id)
    }

    fn set_status(&self, correlation_id: &str, status: CorrelationStatus) {
        if let Some(state) = self.correlations.lock().get_mut(correlation_id) {
            state.status = status;
        }
    }

    fn evict(&self, correlation_id: &str, status: CorrelationStatus) {
        if let Some(state) = self.correlations.lock().remove(correlation_id) {
            info!(
                correlation_id,
                "Request {} after {}ms",
                status.as_str(),
                state.started_at.elapsed().as_millis()
            );
        }
    }

    /// Emit `done` and drop the request's state
    fn finish(&self, correlation_id: &str, status: CorrelationStatus) {
        self.set_status(correlation_id, status);
        self.emit_new(correlation_id, EventType::Done, "Processing complete");
        self.evict(correlation_id, status);
    }

    /// Emit `error` and drop the request's state
    fn fail(&self, correlation_id: &str, message: &str) {
        self.set_status(correlation_id, CorrelationStatus::Failed);
        self.emit_new(correlation_id, EventType::Error, message);
        self.evict(correlation_id, CorrelationStatus::Failed);
    }
}

/// Removes a request's queue and state when its stream goes away
struct CorrelationGuard {
    shared: Arc<Shared>,
    correlation_id: String,
}

impl Drop for CorrelationGuard {
    fn drop(&mut self) {
        self.shared.queues.lock().remove(&self.correlation_id);
        if let Some(state) = self.shared.correlations.lock().remove(&self.correlation_id) {
            debug!(
                correlation_id = %self.correlation_id,
                "Stream closed while request was {}",
                state.status.as_str()
            );
        }
    }
}

struct StreamState {
    rx: mpsc::UnboundedReceiver<Event>,
    idle_timeout: Duration,
    guard: CorrelationGuard,
}

/// Sequential execution of one plan, run off the actor's mailbox
#[derive(Clone)]
struct Pipeline {
    shared: Arc<Shared>,
    router: ActorHandle<RouteTask>,
    breakers: Arc<CircuitBreakerManager>,
    answerer: Arc<dyn AnswerGenerator>,
    reply_to: ActorHandle<OrchestratorMessage>,
}

impl Pipeline {
    async fn run(self, correlation_id: String, intent: Intent, plan: Plan) {
        let tasks = plan.ordered_tasks();
        let mut outcomes: Vec<TaskOutcome> = Vec::with_capacity(tasks.len());

        for task in &tasks {
            if !self.shared.is_active(&correlation_id) {
                info!(
                    correlation_id = %correlation_id,
                    "Request gone, {} tasks abandoned",
                    tasks.len() - outcomes.len()
                );
                return;
            }

            self.shared.emit(&correlation_id, tool_call_event(&correlation_id, task));
            let outcome = self.dispatch(&correlation_id, task).await;
            self.shared
                .emit(&correlation_id, tool_result_event(&correlation_id, task, &outcome));
            outcomes.push(outcome);
        }

        self.answer(&correlation_id, &intent, &outcomes).await;
    }

    /// Route one task and wait for its result
    async fn dispatch(&self, correlation_id: &str, task: &Task) -> TaskOutcome {
        let waiter = match self.shared.correlations.lock().get_mut(correlation_id) {
            Some(state) => state.await_result(&task.id),
            None => return Err(TaskError::Aborted("request no longer active".to_string())),
        };

        let claim = BreakerClaim::new();
        let route = RouteTask {
            correlation_id: correlation_id.to_string(),
            task: task.clone(),
            claim: claim.clone(),
            reply_to: self.reply_to.clone(),
        };

        let outcome = match self.router.tell(route) {
            Err(e) => Err(TaskError::Aborted(e.to_string())),
            Ok(()) => match tokio::time::timeout(self.shared.config.task_timeout, waiter).await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(_)) => Err(TaskError::Aborted("result channel closed".to_string())),
                Err(_) => {
                    warn!(
                        correlation_id,
                        "Task {} ({}) timed out after {}s",
                        task.id,
                        task.tool_name,
                        self.shared.config.task_timeout.as_secs()
                    );
                    if claim.claim() {
                        self.breakers.record_tool_failure(&task.tool_name, "Task timeout");
                    }
                    Err(TaskError::Timeout)
                }
            },
        };

        if let Some(state) = self.shared.correlations.lock().get_mut(correlation_id) {
            state.settle(&task.id, outcome.clone());
        }
        outcome
    }

    async fn answer(&self, correlation_id: &str, intent: &Intent, outcomes: &[TaskOutcome]) {
        self.shared.set_status(correlation_id, CorrelationStatus::Verifying);
        let config = &self.shared.config;

        let mut fragments = Vec::new();
        let mut seen_fragments = HashSet::new();
        let mut sources = Vec::new();
        let mut seen_sources = HashSet::new();

        for data in outcomes.iter().filter_map(|o| o.as_ref().ok()) {
            for text in result_texts(data) {
                if text.chars().count() > config.min_fragment_chars && seen_fragments.insert(text.clone()) {
                    fragments.push(text);
                }
            }
            for source in data.get("sources").and_then(Value::as_array).into_iter().flatten() {
                if seen_sources.insert(citation_key(source)) {
                    sources.push(source.clone());
                }
            }
        }
        fragments.truncate(config.max_context_fragments);
        sources.truncate(config.max_sources);

        if !self.shared.is_active(correlation_id) {
            return;
        }
        self.shared.set_status(correlation_id, CorrelationStatus::Reflecting);
        self.shared.emit(
            correlation_id,
            Event::new(
                EventType::Thinking,
                format!("Generating answer from {} passages", fragments.len()),
                correlation_id,
            )
            .with_data(json!({
                "type": "generating",
                "context_count": fragments.len(),
                "source_count": sources.len(),
            })),
        );

        match self.answerer.generate(&intent.content, &fragments).await {
            Ok(answer) => {
                self.shared.emit_new(correlation_id, EventType::Answer, answer);
                if !sources.is_empty() {
                    self.shared.emit(
                        correlation_id,
                        Event::new(
                            EventType::Source,
                            format!("{} reference sources", sources.len()),
                            correlation_id,
                        )
                        .with_data(json!({ "sources": sources })),
                    );
                }
                self.shared.finish(correlation_id, CorrelationStatus::Completed);
            }
            Err(e) => {
                error!(correlation_id, "Answer generation failed: {:#}", e);
                self.shared.emit_new(
                    correlation_id,
                    EventType::Answer,
                    format!("Processing finished, but the answer could not be generated: {:#}", e),
                );
                self.shared.finish(correlation_id, CorrelationStatus::Failed);
            }
        }
    }
}

/// Orchestrator actor: owns the per-request lifecycle
struct OrchestratorActor {
    shared: Arc<Shared>,
    registry: Arc<ToolRegistry>,
    planner: ActorHandle<PlanRequest>,
    pipeline: Pipeline,
}

impl OrchestratorActor {
    fn handle_intent(&mut self, msg: IntentMsg) {
        let IntentMsg {
            correlation_id,
            intent,
        } = msg;

        if !self.shared.queues.lock().contains_key(&correlation_id) {
            debug!(correlation_id = %correlation_id, "Consumer left before intent was handled");
            return;
        }
        info!(
            correlation_id = %correlation_id,
            "Intent received: {}",
            truncate(&intent.content, 120)
        );

        let tools = self
            .registry
            .get_available_tools(&intent.permissions(), &intent.context);
        self.shared.correlations.lock().insert(
            correlation_id.clone(),
            CorrelationState::new(&correlation_id, intent.clone()),
        );
        self.shared.emit_new(
            &correlation_id,
            EventType::Thinking,
            "Analyzing the question and planning tasks...",
        );

        let request = PlanRequest {
            correlation_id: correlation_id.clone(),
            intent,
            tools,
            reply_to: self.pipeline.reply_to.clone(),
        };
        if let Err(e) = self.planner.tell(request) {
            error!(correlation_id = %correlation_id, "Planner unreachable: {}", e);
            self.shared.fail(&correlation_id, &format!("Planner unavailable: {}", e));
        }
    }

    fn handle_plan(&mut self, msg: PlanMsg) {
        let PlanMsg {
            correlation_id,
            plan,
        } = msg;

        let intent = match self.shared.correlations.lock().get(&correlation_id) {
            Some(state) => state.intent.clone(),
            None => {
                debug!(correlation_id = %correlation_id, "Plan for inactive request discarded");
                return;
            }
        };

        let plan = match plan.and_then(|p| {
            let p = p.normalized();
            p.validate().map_err(|e| e.to_string())?;
            Ok(p)
        }) {
            Ok(plan) => plan,
            Err(e) => {
                warn!(correlation_id = %correlation_id, "Unusable plan: {}", e);
                self.shared.emit_new(
                    &correlation_id,
                    EventType::Answer,
                    format!("Sorry, I could not plan this request: {}", e),
                );
                self.shared.finish(&correlation_id, CorrelationStatus::Failed);
                return;
            }
        };

        if plan.tasks.is_empty() {
            info!(correlation_id = %correlation_id, "Plan has no tasks, answering directly");
            let answer = if plan.analysis.trim().is_empty() {
                "I have no further information to add.".to_string()
            } else {
                plan.analysis.clone()
            };
            self.shared.emit_new(&correlation_id, EventType::Answer, answer);
            self.shared.finish(&correlation_id, CorrelationStatus::Completed);
            return;
        }

        if let Some(state) = self.shared.correlations.lock().get_mut(&correlation_id) {
            state.status = CorrelationStatus::Executing;
            state.plan = Some(plan.clone());
        }
        info!(
            correlation_id = %correlation_id,
            "Executing plan with {} tasks",
            plan.execution_order.len()
        );

        if !plan.analysis.trim().is_empty() {
            self.shared
                .emit_new(&correlation_id, EventType::Thinking, plan.analysis.clone());
        }
        self.shared.emit(&correlation_id, plan_event(&correlation_id, &plan));

        let pipeline = self.pipeline.clone();
        let shared = self.shared.clone();
        tokio::spawn(async move {
            let run = tokio::spawn(pipeline.run(correlation_id.clone(), intent, plan));
            if let Err(e) = run.await {
                if e.is_panic() {
                    error!(correlation_id = %correlation_id, "Pipeline panicked");
                    shared.fail(&correlation_id, "Internal error while processing the request");
                }
            }
        });
    }

    fn handle_task_result(&mut self, msg: TaskResultMsg) {
        let mut correlations = self.shared.correlations.lock();
        match correlations.get_mut(&msg.correlation_id) {
            Some(state) => {
                if !state.resolve(&msg.task_id, msg.outcome) {
                    debug!(
                        correlation_id = %msg.correlation_id,
                        "Late result for task {} discarded", msg.task_id
                    );
                }
            }
            None => debug!(
                correlation_id = %msg.correlation_id,
                "Result for inactive request discarded"
            ),
        }
    }

    fn handle_child_error(&mut self, msg: ChildErrorMsg) {
        warn!(child = %msg.child, "Child actor failed: {}", msg.error);
        let Some(correlation_id) = msg.correlation_id else {
            return;
        };
        let reason = format!("{} failed: {}", msg.child, msg.error);

        match msg.task_id {
            Some(task_id) => {
                let resolved = self
                    .shared
                    .correlations
                    .lock()
                    .get_mut(&correlation_id)
                    .map(|state| state.resolve(&task_id, Err(TaskError::Aborted(reason))))
                    .unwrap_or(false);
                if !resolved {
                    debug!(correlation_id = %correlation_id, "No waiter for failed task {}", task_id);
                }
            }
            None => self.shared.fail(&correlation_id, &reason),
        }
    }
}

#[async_trait]
impl Actor for OrchestratorActor {
    type Message = OrchestratorMessage;

    fn name(&self) -> &str {
        "orchestrator"
    }

    async fn handle(&mut self, message: OrchestratorMessage) -> Result<()> {
        match message {
            OrchestratorMessage::Intent(msg) => self.handle_intent(msg),
            OrchestratorMessage::Plan(msg) => self.handle_plan(msg),
            OrchestratorMessage::TaskResult(msg) => self.handle_task_result(msg),
            OrchestratorMessage::ChildError(msg) => self.handle_child_error(msg),
        }
        Ok(())
    }
}

/// Handle to a running orchestrator and its child actors
#[derive(Clone)]
pub struct Orchestrator {
    shared: Arc<Shared>,
    handle: ActorHandle<OrchestratorMessage>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Orchestrator {
    /// Spawn the orchestrator, planner, router and executor actors.
    /// Must be called inside a tokio runtime.
    pub fn start(config: OrchestratorConfig, services: OrchestratorServices) -> Self {
        let shared = Arc::new(Shared {
            config,
            correlations: Mutex::new(HashMap::new()),
            queues: Mutex::new(HashMap::new()),
        });

        let (handle, mailbox) = actor::mailbox::<OrchestratorMessage>("orchestrator");
        let supervisor: Supervisor = {
            let handle = handle.clone();
            Arc::new(move |error: ChildErrorMsg| {
                if handle.tell(OrchestratorMessage::ChildError(error)).is_err() {
                    debug!("Orchestrator stopped, child error dropped");
                }
            })
        };

        let (executor, executor_task) = actor::spawn_actor(
            ExecutorActor::new(services.executor, services.breakers.clone()),
            Some(supervisor.clone()),
        );
        let (router, router_task) = actor::spawn_actor(
            RouterActor::new(services.registry.clone(), services.breakers.clone(), executor),
            Some(supervisor.clone()),
        );
        let (planner, planner_task) =
            actor::spawn_actor(PlannerActor::new(services.planner), Some(supervisor));

        let orchestrator = OrchestratorActor {
            shared: shared.clone(),
            registry: services.registry,
            planner,
            pipeline: Pipeline {
                shared: shared.clone(),
                router,
                breakers: services.breakers,
                answerer: services.answerer,
                reply_to: handle.clone(),
            },
        };
        let orchestrator_task = actor::spawn(orchestrator, mailbox, None);

        Self {
            shared,
            handle,
            tasks: Arc::new(Mutex::new(vec![
                orchestrator_task,
                planner_task,
                router_task,
                executor_task,
            ])),
        }
    }

    /// Submit an intent and stream its events until `done` or `error`
    ///
    /// Uses `intent.id` as correlation id, or a fresh UUID. A correlation id
    /// already in flight yields a single `error` event. Dropping the stream
    /// abandons the request.
    pub fn process_intent(&self, intent: Intent) -> EventStream {
        let correlation_id = intent
            .id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut queues = self.shared.queues.lock();
            if queues.contains_key(&correlation_id) {
                warn!(correlation_id = %correlation_id, "Duplicate correlation id rejected");
                let event = Event::new(
                    EventType::Error,
                    format!("Request {} is already being processed", correlation_id),
                    &correlation_id,
                );
                return stream::iter(vec![event]).boxed();
            }
            queues.insert(correlation_id.clone(), tx);
        }

        let guard = CorrelationGuard {
            shared: self.shared.clone(),
            correlation_id: correlation_id.clone(),
        };

        let message = OrchestratorMessage::Intent(IntentMsg {
            correlation_id: correlation_id.clone(),
            intent,
        });
        if let Err(e) = self.handle.tell(message) {
            error!(correlation_id = %correlation_id, "Orchestrator unreachable: {}", e);
            self.shared.emit_new(
                &correlation_id,
                EventType::Error,
                format!("Orchestrator unavailable: {}", e),
            );
        }

        let state = StreamState {
            rx,
            idle_timeout: self.shared.config.stream_idle_timeout,
            guard,
        };

        stream::unfold(Some(state), |state| async move {
            let Some(mut state) = state else {
                return None;
            };
            match tokio::time::timeout(state.idle_timeout, state.rx.recv()).await {
                Ok(Some(event)) => {
                    let next = if event.is_terminal() { None } else { Some(state) };
                    Some((event, next))
                }
                Ok(None) => None,
                Err(_) => {
                    let correlation_id = state.guard.correlation_id.clone();
                    warn!(
                        correlation_id = %correlation_id,
                        "No events for {}s, giving up",
                        state.idle_timeout.as_secs()
                    );
                    Some((Event::new(EventType::Error, "Processing timeout", &correlation_id), None))
                }
            }
        })
        .boxed()
    }

    /// Requests with live state
    pub fn active_correlations(&self) -> usize {
        self.shared.correlations.lock().len()
    }

    /// Status of an in-flight request
    pub fn status_of(&self, correlation_id: &str) -> Option<CorrelationStatus> {
        self.shared
            .correlations
            .lock()
            .get(correlation_id)
            .map(|state| state.status)
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.shared.config
    }

    /// Stop all actors; open streams end at their idle timeout
    pub fn shutdown(&self) {
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in &tasks {
            task.abort();
        }
        info!("Orchestrator shut down ({} actors stopped)", tasks.len());
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => format!("{}...", &text[..end]),
        None => text.to_string(),
    }
}

/// `results[].text` values of a retrieval result
fn result_texts(data: &Value) -> Vec<String> {
    data.get("results")
        .and_then(Value::as_array)
        .map(|results| {
            results
                .iter()
                .filter_map(|r| r.get("text").and_then(Value::as_str))
                .map(|t| t.trim().to_string())
                .collect()
        })
        .unwrap_or_default()
}

/// (file, page) identity of a citation; accepts `file_name`/`file` and `page_label`/`page`.
/// Missing fields key as empty strings.
fn citation_key(source: &Value) -> (String, String) {
    fn field(source: &Value, names: &[&str]) -> Option<String> {
        names
            .iter()
            .find_map(|name| source.get(*name))
            .filter(|v| !v.is_null())
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
    }
    let file = field(source, &["file_name", "file"]).unwrap_or_default();
    let page = field(source, &["page_label", "page"]).unwrap_or_default();
    (file, page)
}

fn plan_event(correlation_id: &str, plan: &Plan) -> Event {
    let tasks: Vec<Value> = plan
        .ordered_tasks()
        .iter()
        .map(|t| json!({ "id": t.id, "tool": t.tool_name, "description": t.description }))
        .collect();

    Event::new(
        EventType::Plan,
        format!("Planned {} tasks", tasks.len()),
        correlation_id,
    )
    .with_data(json!({
        "type": "planning",
        "summary": plan.analysis,
        "queries": plan.queries(),
        "tasks": tasks,
    }))
}

fn tool_call_event(correlation_id: &str, task: &Task) -> Event {
    let content = if task.description.is_empty() {
        format!("Calling {}", task.tool_name)
    } else {
        task.description.clone()
    };

    Event::new(EventType::ToolCall, content, correlation_id)
        .with_source(task.tool_name.clone())
        .with_data(json!({
            "task_id": task.id,
            "arguments": task.parameters,
            "queries": task.queries(),
            "description": task.description,
        }))
}

fn tool_result_event(correlation_id: &str, task: &Task, outcome: &TaskOutcome) -> Event {
    let event = match outcome {
        Ok(data) => {
            let texts = result_texts(data);
            let preview = match texts.first() {
                Some(text) => truncate(text, 200),
                None => truncate(&data.to_string(), 200),
            };
            Event::new(
                EventType::ToolResult,
                format!("{} returned {} results", task.tool_name, texts.len()),
                correlation_id,
            )
            .with_data(json!({
                "task_id": task.id,
                "preview": preview,
                "results_count": texts.len(),
            }))
        }
        Err(e) => {
            let mut data = e.to_payload();
            data["task_id"] = json!(task.id);
            Event::new(
                EventType::ToolResult,
                format!("{} failed: {}", task.tool_name, e),
                correlation_id,
            )
            .with_data(data)
        }
    };
    event.with_source(task.tool_name.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdef", 3), "abc...");
        assert_eq!(truncate("ééééé", 2), "éé...");
    }

    #[test]
    fn test_citation_key_aliases() {
        assert_eq!(
            citation_key(&json!({ "file_name": "a.pdf", "page_label": "3" })),
            ("a.pdf".to_string(), "3".to_string())
        );
        assert_eq!(
            citation_key(&json!({ "file": "a.pdf", "page": 3 })),
            ("a.pdf".to_string(), "3".to_string())
        );
        assert_eq!(citation_key(&json!({ "file": "b.pdf" })), ("b.pdf".to_string(), String::new()));
        assert_eq!(citation_key(&json!({ "page": 1 })), (String::new(), "1".to_string()));
        assert_eq!(citation_key(&json!({ "score": 0.4 })), (String::new(), String::new()));
    }

    #[test]
    fn test_result_texts() {
        let data = json!({ "results": [{ "text": " one " }, { "score": 1 }, { "text": "two" }] });
        assert_eq!(result_texts(&data), vec!["one", "two"]);
        assert!(result_texts(&json!({ "answer": 42 })).is_empty());
    }

    #[test]
    fn test_tool_result_event_shapes() {
        let task = Task::new("t1", "rag_search", json!({ "query": "attention" }));

        let ok = tool_result_event("c", &task, &Ok(json!({ "results": [{ "text": "x".repeat(300) }] })));
        let data = ok.data().unwrap();
        assert_eq!(data["results_count"], 1);
        assert_eq!(data["preview"].as_str().unwrap().chars().count(), 203);
        assert_eq!(ok.source, "rag_search");

        let failed = tool_result_event("c", &task, &Err(TaskError::Timeout));
        assert_eq!(failed.data().unwrap()["error"], "Task timeout");
        assert_eq!(failed.data().unwrap()["task_id"], "t1");
    }

    #[test]
    fn test_plan_event_shape() {
        let plan = Plan::new("Look it up").with_task(
            Task::new("t1", "rag_search", json!({ "query": "attention" })).with_description("Search"),
        );
        let event = plan_event("c", &plan);
        let data = event.data().unwrap();

        assert_eq!(event.event_type, EventType::Plan);
        assert_eq!(event.progress_kind(), Some("planning"));
        assert_eq!(data["summary"], "Look it up");
        assert_eq!(data["queries"], json!(["attention"]));
        assert_eq!(data["tasks"][0], json!({ "id": "t1", "tool": "rag_search", "description": "Search" }));
    }
}
