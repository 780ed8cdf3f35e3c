//! Orchestrator Integration Tests
//!
//! Full intent → events runs through the actor pipeline with scripted
//! planners, in-memory tools and a recording answerer.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use intent_orchestrator::agent::tools::builtin::{self, Passage};
use intent_orchestrator::agent::{
    CircuitBreakerManager, CircuitState, EventCollector, EventStream, EventType, Intent, Orchestrator,
    OrchestratorConfig, OrchestratorServices, Plan, Task, Tool, ToolRegistry, ToolSchema, ToolStatus,
};
use intent_orchestrator::{AnswerGenerator, PlanGenerator};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Test doubles
// ============================================================================

struct ScriptedPlanner(Plan);

#[async_trait]
impl PlanGenerator for ScriptedPlanner {
    async fn plan(&self, _intent: &Intent, _tools: &[ToolSchema]) -> Result<Plan> {
        Ok(self.0.clone())
    }
}

struct FailingPlanner;

#[async_trait]
impl PlanGenerator for FailingPlanner {
    async fn plan(&self, _intent: &Intent, _tools: &[ToolSchema]) -> Result<Plan> {
        Err(anyhow!("model overloaded"))
    }
}

struct StalledPlanner;

#[async_trait]
impl PlanGenerator for StalledPlanner {
    async fn plan(&self, _intent: &Intent, _tools: &[ToolSchema]) -> Result<Plan> {
        std::future::pending::<()>().await;
        Ok(Plan::default())
    }
}

/// Records the context it was given
#[derive(Default)]
struct RecordingAnswerer {
    seen: Mutex<Vec<String>>,
}

#[async_trait]
impl AnswerGenerator for RecordingAnswerer {
    async fn generate(&self, question: &str, context: &[String]) -> Result<String> {
        *self.seen.lock() = context.to_vec();
        Ok(format!("{} ({} passages)", question, context.len()))
    }
}

struct Harness {
    orchestrator: Orchestrator,
    registry: Arc<ToolRegistry>,
    breakers: Arc<CircuitBreakerManager>,
    answerer: Arc<RecordingAnswerer>,
}

fn corpus() -> Vec<Passage> {
    vec![
        Passage {
            text: "Attention maps a query and key-value pairs to a weighted sum of values.".to_string(),
            file_name: "paper.pdf".to_string(),
            page_label: "3".to_string(),
        },
        Passage {
            text: "Transformers stack attention layers with position-wise feed-forward blocks.".to_string(),
            file_name: "paper.pdf".to_string(),
            page_label: "5".to_string(),
        },
    ]
}

fn search_task(id: &str, query: &str) -> Task {
    Task::new(id, "rag_search", json!({ "query": query })).with_description(format!("Search: {}", query))
}

fn start(planner: Arc<dyn PlanGenerator>, config: OrchestratorConfig) -> Harness {
    let registry = Arc::new(ToolRegistry::new());
    registry.register_tool(builtin::rag_search_tool(Arc::new(corpus())), false);
    let breakers = Arc::new(CircuitBreakerManager::default());
    let answerer = Arc::new(RecordingAnswerer::default());

    let orchestrator = Orchestrator::start(
        config,
        OrchestratorServices {
            registry: registry.clone(),
            breakers: breakers.clone(),
            planner,
            executor: registry.clone(),
            answerer: answerer.clone(),
        },
    );

    Harness {
        orchestrator,
        registry,
        breakers,
        answerer,
    }
}

async fn collect(mut stream: EventStream) -> EventCollector {
    let mut collector = EventCollector::new();
    while let Some(event) = stream.next().await {
        collector.add(event);
    }
    collector
}

fn error_of(event: &intent_orchestrator::Event) -> String {
    event.data().and_then(|d| d.get("error")).and_then(Value::as_str).unwrap_or("").to_string()
}

// ============================================================================
// Happy path
// ============================================================================

#[tokio::test]
async fn test_two_query_question_streams_full_lifecycle() {
    let plan = Plan::new("Look up attention and transformers")
        .with_task(search_task("t1", "attention"))
        .with_task(search_task("t2", "transformers"));
    let harness = start(Arc::new(ScriptedPlanner(plan)), OrchestratorConfig::default());

    let events = collect(
        harness
            .orchestrator
            .process_intent(Intent::new("What is attention?").with_id("req-1")),
    )
    .await;

    assert_eq!(
        events.types(),
        vec![
            EventType::Thinking,
            EventType::Thinking,
            EventType::Plan,
            EventType::ToolCall,
            EventType::ToolResult,
            EventType::ToolCall,
            EventType::ToolResult,
            EventType::Thinking,
            EventType::Answer,
            EventType::Source,
            EventType::Done,
        ]
    );
    assert!(events.is_complete());
    assert!(events.events().iter().all(|e| e.correlation_id == "req-1"));

    let plan_event = &events.of_type(EventType::Plan)[0];
    assert_eq!(plan_event.progress_kind(), Some("planning"));
    assert_eq!(plan_event.data().unwrap()["queries"], json!(["attention", "transformers"]));

    let calls = events.of_type(EventType::ToolCall);
    assert_eq!(calls[0].data().unwrap()["task_id"], "t1");
    assert_eq!(calls[1].data().unwrap()["arguments"], json!({ "query": "transformers" }));

    // "attention" hits both passages, "transformers" repeats one of them
    let results = events.of_type(EventType::ToolResult);
    assert_eq!(results[0].data().unwrap()["results_count"], 2);
    assert_eq!(results[1].data().unwrap()["results_count"], 1);

    let generating = events
        .of_type(EventType::Thinking)
        .into_iter()
        .find(|e| e.progress_kind() == Some("generating"))
        .unwrap();
    assert_eq!(generating.data().unwrap()["context_count"], 2);
    assert_eq!(generating.data().unwrap()["source_count"], 2);

    assert_eq!(harness.answerer.seen.lock().len(), 2);
    assert_eq!(events.answer(), Some("What is attention? (2 passages)"));

    let sources = events.of_type(EventType::Source)[0].data().unwrap()["sources"].clone();
    assert_eq!(
        sources,
        json!([
            { "file_name": "paper.pdf", "page_label": "3" },
            { "file_name": "paper.pdf", "page_label": "5" }
        ])
    );

    assert_eq!(harness.orchestrator.active_correlations(), 0);
    harness.orchestrator.shutdown();
}

#[tokio::test]
async fn test_generated_correlation_id_is_shared() {
    let plan = Plan::new("").with_task(search_task("t1", "attention"));
    let harness = start(Arc::new(ScriptedPlanner(plan)), OrchestratorConfig::default());

    let events = collect(harness.orchestrator.process_intent(Intent::new("attention?"))).await;
    let cid = events.events()[0].correlation_id.clone();

    assert!(!cid.is_empty());
    assert!(events.events().iter().all(|e| e.correlation_id == cid));
    // Empty analysis adds no extra thinking event
    assert_eq!(events.types()[1], EventType::Plan);
}

// ============================================================================
// Planning outcomes
// ============================================================================

#[tokio::test]
async fn test_planning_failure_answers_and_completes() {
    let harness = start(Arc::new(FailingPlanner), OrchestratorConfig::default());

    let events = collect(harness.orchestrator.process_intent(Intent::new("anything"))).await;

    assert_eq!(events.types(), vec![EventType::Thinking, EventType::Answer, EventType::Done]);
    assert!(events.answer().unwrap().contains("model overloaded"));
    assert_eq!(events.count(EventType::Error), 0);
}

#[tokio::test]
async fn test_empty_plan_answers_with_analysis() {
    let harness = start(
        Arc::new(ScriptedPlanner(Plan::new("Hello! No lookup needed."))),
        OrchestratorConfig::default(),
    );

    let events = collect(harness.orchestrator.process_intent(Intent::new("hi"))).await;

    assert_eq!(events.types(), vec![EventType::Thinking, EventType::Answer, EventType::Done]);
    assert_eq!(events.answer(), Some("Hello! No lookup needed."));
    assert_eq!(events.count(EventType::ToolCall), 0);
}

#[tokio::test]
async fn test_plan_with_unknown_order_entry_is_rejected() {
    let mut plan = Plan::new("broken").with_task(search_task("t1", "attention"));
    plan.execution_order = vec!["t1".to_string(), "t9".to_string()];
    let harness = start(Arc::new(ScriptedPlanner(plan)), OrchestratorConfig::default());

    let events = collect(harness.orchestrator.process_intent(Intent::new("q"))).await;

    assert_eq!(events.types(), vec![EventType::Thinking, EventType::Answer, EventType::Done]);
    assert!(events.answer().unwrap().contains("t9"));
}

// ============================================================================
// Task failures
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_stuck_tool_times_out() {
    let plan = Plan::new("")
        .with_task(Task::new("t1", "stuck", json!({})))
        .with_task(search_task("t2", "attention"));
    let harness = start(Arc::new(ScriptedPlanner(plan)), OrchestratorConfig::default());
    harness.registry.register_tool(
        Tool::new(ToolSchema::new("stuck", "Never returns"), |_params| async move {
            std::future::pending::<()>().await;
            Ok(json!({}))
        }),
        false,
    );

    let events = collect(harness.orchestrator.process_intent(Intent::new("q"))).await;

    let results = events.of_type(EventType::ToolResult);
    assert_eq!(results.len(), 2);
    assert_eq!(error_of(results[0]), "Task timeout");
    // The next task still runs
    assert_eq!(results[1].data().unwrap()["task_id"], "t2");
    assert_eq!(results[1].data().unwrap()["results_count"], 2);
    assert_eq!(events.of_type(EventType::ToolCall).len(), 2);
    assert_eq!(events.types().last(), Some(&EventType::Done));
    assert_eq!(harness.breakers.status()["stuck"].failure_count, 1);
}

#[tokio::test(start_paused = true)]
async fn test_late_failure_after_timeout_counted_once() {
    let plan = Plan::new("")
        .with_task(Task::new("t1", "slow", json!({})))
        .with_task(Task::new("t2", "slow", json!({})));
    let harness = start(Arc::new(ScriptedPlanner(plan)), OrchestratorConfig::default());
    harness.registry.register_tool(
        Tool::new(ToolSchema::new("slow", "Fails after 40s"), |_params| async move {
            tokio::time::sleep(Duration::from_secs(40)).await;
            Err(anyhow!("upstream gave up"))
        }),
        false,
    );

    let events = collect(harness.orchestrator.process_intent(Intent::new("q"))).await;
    let results = events.of_type(EventType::ToolResult);
    assert_eq!(error_of(results[0]), "Task timeout");
    assert_eq!(error_of(results[1]), "Task timeout");

    // Let both orphaned calls finish and fail
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(harness.breakers.status()["slow"].failure_count, 2);
    assert_eq!(harness.breakers.state_of("slow"), Some(CircuitState::Closed));
}

#[tokio::test]
async fn test_breaker_stops_calling_failing_tool() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();

    let mut plan = Plan::new("retry a lot");
    for i in 1..=4 {
        plan = plan.with_task(Task::new(format!("t{}", i), "flaky", json!({})));
    }
    let harness = start(Arc::new(ScriptedPlanner(plan)), OrchestratorConfig::default());
    harness.registry.register_tool(
        Tool::new(ToolSchema::new("flaky", "Always fails"), move |_params| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(anyhow!("connection refused"))
            }
        }),
        false,
    );

    let events = collect(harness.orchestrator.process_intent(Intent::new("q"))).await;

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(harness.breakers.state_of("flaky"), Some(CircuitState::Open));

    let results = events.of_type(EventType::ToolResult);
    assert_eq!(results.len(), 4);
    assert_eq!(error_of(results[0]), "connection refused");
    assert!(error_of(results[3]).contains("temporarily blocked"));
    assert_eq!(events.types().last(), Some(&EventType::Done));
}

#[tokio::test]
async fn test_disabled_tool_is_not_executed() {
    let plan = Plan::new("").with_task(search_task("t1", "attention"));
    let harness = start(Arc::new(ScriptedPlanner(plan)), OrchestratorConfig::default());
    harness
        .registry
        .mask_tool("rag_search", ToolStatus::Disabled, Some("index rebuilding"));

    let events = collect(harness.orchestrator.process_intent(Intent::new("q"))).await;

    let results = events.of_type(EventType::ToolResult);
    assert!(error_of(results[0]).contains("index rebuilding"));
    // Rejected before execution, so the breaker never saw it
    assert!(!harness.breakers.status().contains_key("rag_search"));
    assert!(harness.answerer.seen.lock().is_empty());
}

// ============================================================================
// Stream lifecycle
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_idle_stream_times_out() {
    let config = OrchestratorConfig {
        stream_idle_timeout: Duration::from_secs(5),
        ..OrchestratorConfig::default()
    };
    let harness = start(Arc::new(StalledPlanner), config);

    let events = collect(harness.orchestrator.process_intent(Intent::new("q").with_id("slow"))).await;

    assert_eq!(events.types(), vec![EventType::Thinking, EventType::Error]);
    assert_eq!(events.events()[1].content(), "Processing timeout");
    assert_eq!(harness.orchestrator.active_correlations(), 0);
}

#[tokio::test]
async fn test_duplicate_correlation_id_rejected() {
    let plan = Plan::new("").with_task(search_task("t1", "attention"));
    let harness = start(Arc::new(ScriptedPlanner(plan)), OrchestratorConfig::default());

    let first = harness.orchestrator.process_intent(Intent::new("q").with_id("same"));
    let second = collect(harness.orchestrator.process_intent(Intent::new("q").with_id("same"))).await;

    assert_eq!(second.types(), vec![EventType::Error]);
    assert!(second.events()[0].content().contains("already being processed"));

    let first = collect(first).await;
    assert_eq!(first.types().last(), Some(&EventType::Done));

    // The id is free again once its stream is finished
    let again = collect(harness.orchestrator.process_intent(Intent::new("q").with_id("same"))).await;
    assert_eq!(again.types().last(), Some(&EventType::Done));
}

#[tokio::test]
async fn test_dropped_stream_releases_request() {
    let harness = start(Arc::new(StalledPlanner), OrchestratorConfig::default());

    let mut stream = harness.orchestrator.process_intent(Intent::new("q").with_id("gone"));
    let first = stream.next().await.unwrap();
    assert_eq!(first.event_type, EventType::Thinking);
    assert_eq!(harness.orchestrator.active_correlations(), 1);

    drop(stream);
    assert_eq!(harness.orchestrator.active_correlations(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_rejects_new_intents() {
    let harness = start(Arc::new(FailingPlanner), OrchestratorConfig::default());
    harness.orchestrator.shutdown();
    tokio::task::yield_now().await;

    let events = collect(harness.orchestrator.process_intent(Intent::new("q"))).await;
    assert_eq!(events.types(), vec![EventType::Error]);
}
