//! Intent Orchestrator - Entry Point
//!
//! Answers one question from the command line and prints the event stream
//! as Server-Sent Events frames on stdout. Logs go to stderr.

use anyhow::{bail, Context, Result};
use futures_util::StreamExt;
use intent_orchestrator::agent::tools::builtin::{self, Passage};
use intent_orchestrator::agent::{CircuitBreakerManager, HeuristicPlanner, TaskClassifier, ToolRegistry};
use intent_orchestrator::{
    AnswerGenerator, ClaudeClient, Config, ExtractiveAnswerer, Intent, Orchestrator, OrchestratorServices,
    PlanGenerator,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

struct Args {
    json_logs: bool,
    corpus: Option<PathBuf>,
    question: String,
}

fn print_help() {
    println!("Intent Orchestrator v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Usage: intent-orchestrator [OPTIONS] QUESTION...");
    println!();
    println!("Options:");
    println!("  --corpus <FILE>   JSON array of {{text, file_name, page_label}} passages");
    println!("  --json            Log as JSON");
    println!("  --help, -h        Show this help");
    println!();
    println!("Environment variables:");
    println!("  ANTHROPIC_API_KEY              Claude API key (offline planner/answerer without it)");
    println!("  ORCH_MODEL                     Model hint: haiku, sonnet, opus (default: sonnet)");
    println!("  ORCH_TASK_TIMEOUT_SECS         Per-task result timeout (default: 30)");
    println!("  ORCH_STREAM_IDLE_TIMEOUT_SECS  Event stream idle timeout (default: 60)");
    println!("  ORCH_POLICY_PATH               TOML file overriding the orchestration policy");
    println!("  RUST_LOG                       Log filter (default: info)");
}

fn parse_args() -> Result<Option<Args>> {
    let mut json_logs = false;
    let mut corpus = None;
    let mut words = Vec::new();

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--help" | "-h" => return Ok(None),
            "--json" => json_logs = true,
            "--corpus" => {
                let path = args.next().context("--corpus needs a file path")?;
                corpus = Some(PathBuf::from(path));
            }
            other if other.starts_with("--") => bail!("Unknown option: {}", other),
            _ => words.push(arg),
        }
    }

    if words.is_empty() {
        return Ok(None);
    }
    Ok(Some(Args {
        json_logs,
        corpus,
        question: words.join(" "),
    }))
}

fn load_corpus(path: Option<&PathBuf>) -> Result<Vec<Passage>> {
    match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read corpus {}", path.display()))?;
            let passages: Vec<Passage> =
                serde_json::from_str(&raw).with_context(|| format!("Invalid corpus {}", path.display()))?;
            info!("Loaded {} passages from {}", passages.len(), path.display());
            Ok(passages)
        }
        None => Ok(default_corpus()),
    }
}

fn default_corpus() -> Vec<Passage> {
    let passage = |text: &str, page: &str| Passage {
        text: text.to_string(),
        file_name: "attention_is_all_you_need.pdf".to_string(),
        page_label: page.to_string(),
    };
    vec![
        passage(
            "An attention function maps a query and a set of key-value pairs to an output, \
             computed as a weighted sum of the values.",
            "3",
        ),
        passage(
            "Multi-head attention lets the model jointly attend to information from different \
             representation subspaces at different positions.",
            "4",
        ),
        passage(
            "The Transformer relies entirely on self-attention to compute representations of its \
             input and output without using recurrence.",
            "2",
        ),
    ]
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    let Some(args) = parse_args()? else {
        print_help();
        return Ok(());
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if args.json_logs {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    info!("Intent Orchestrator v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    let policy = Arc::new(config.load_policy()?);

    let registry = Arc::new(ToolRegistry::new());
    registry.register_tool(builtin::rag_search_tool(Arc::new(load_corpus(args.corpus.as_ref())?)), false);
    registry.register_tool(builtin::echo_tool(), false);

    let category = TaskClassifier::new(policy.clone()).configure_registry_for_task(&registry, &args.question);
    info!("Question classified as {}", category);

    let planner: Arc<dyn PlanGenerator>;
    let answerer: Arc<dyn AnswerGenerator>;
    if config.anthropic_api_key.is_some() {
        let client = Arc::new(ClaudeClient::from_config(&config));
        planner = client.clone();
        answerer = client;
    } else {
        warn!("ANTHROPIC_API_KEY not set - using offline planner and answerer");
        planner = Arc::new(HeuristicPlanner::default());
        answerer = Arc::new(ExtractiveAnswerer::default());
    }

    let orchestrator = Orchestrator::start(
        config.orchestrator.clone(),
        OrchestratorServices {
            registry: registry.clone(),
            breakers: Arc::new(CircuitBreakerManager::new(config.breaker.clone(), policy)),
            planner,
            executor: registry,
            answerer,
        },
    );

    let mut events = orchestrator.process_intent(Intent::new(args.question));
    while let Some(event) = events.next().await {
        print!("{}", event.to_sse()?);
    }

    orchestrator.shutdown();
    Ok(())
}
