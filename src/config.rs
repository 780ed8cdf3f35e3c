//! Configuration management

use anyhow::Result;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

use crate::agent::orchestrator::OrchestratorConfig;
use crate::agent::recovery::CircuitBreakerConfig;
use crate::memory::MemoryWindow;
use crate::policy::OrchestrationPolicy;

/// Runtime configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Anthropic API key (optional - offline collaborators are used without it)
    pub anthropic_api_key: Option<String>,

    /// Default model (haiku, sonnet, opus)
    pub default_model: String,

    pub orchestrator: OrchestratorConfig,

    pub breaker: CircuitBreakerConfig,

    pub memory: MemoryWindow,

    /// TOML file replacing the built-in policy
    pub policy_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            anthropic_api_key: None,
            default_model: "sonnet".to_string(),
            orchestrator: OrchestratorConfig::default(),
            breaker: CircuitBreakerConfig::default(),
            memory: MemoryWindow::default(),
            policy_path: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from any key/value source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let secs = |key: &str, default: Duration| {
            Duration::from_secs(parse_or(&lookup, key, default.as_secs()))
        };

        let orchestrator = OrchestratorConfig {
            task_timeout: secs("ORCH_TASK_TIMEOUT_SECS", defaults.orchestrator.task_timeout),
            stream_idle_timeout: secs(
                "ORCH_STREAM_IDLE_TIMEOUT_SECS",
                defaults.orchestrator.stream_idle_timeout,
            ),
            max_context_fragments: parse_or(
                &lookup,
                "ORCH_MAX_CONTEXT_FRAGMENTS",
                defaults.orchestrator.max_context_fragments,
            ),
            max_sources: parse_or(&lookup, "ORCH_MAX_SOURCES", defaults.orchestrator.max_sources),
            ..defaults.orchestrator
        };

        let breaker = CircuitBreakerConfig {
            failure_threshold: parse_or(
                &lookup,
                "ORCH_BREAKER_FAILURE_THRESHOLD",
                defaults.breaker.failure_threshold,
            ),
            recovery_timeout: secs("ORCH_BREAKER_RECOVERY_SECS", defaults.breaker.recovery_timeout),
            init_recovery_timeout: secs(
                "ORCH_BREAKER_INIT_RECOVERY_SECS",
                defaults.breaker.init_recovery_timeout,
            ),
            half_open_max_calls: parse_or(
                &lookup,
                "ORCH_BREAKER_HALF_OPEN_CALLS",
                defaults.breaker.half_open_max_calls,
            ),
            ..defaults.breaker
        };

        let token_budget = lookup("ORCH_MEMORY_TOKEN_BUDGET").and_then(|raw| match raw.trim().parse() {
            Ok(budget) => Some(budget),
            Err(_) => {
                warn!("Ignoring ORCH_MEMORY_TOKEN_BUDGET={:?}: not a number", raw);
                None
            }
        });
        let memory = MemoryWindow {
            window_size: parse_or(&lookup, "ORCH_MEMORY_WINDOW", defaults.memory.window_size),
            summary_threshold: parse_or(
                &lookup,
                "ORCH_MEMORY_SUMMARY_THRESHOLD",
                defaults.memory.summary_threshold,
            ),
            token_budget,
        };

        Ok(Self {
            anthropic_api_key: lookup("ANTHROPIC_API_KEY").filter(|k| !k.trim().is_empty()),
            default_model: lookup("ORCH_MODEL").unwrap_or(defaults.default_model),
            orchestrator,
            breaker,
            memory,
            policy_path: lookup("ORCH_POLICY_PATH").map(PathBuf::from),
        })
    }

    /// Built-in policy, or the one at `policy_path`
    pub fn load_policy(&self) -> Result<OrchestrationPolicy> {
        match &self.policy_path {
            Some(path) => {
                info!("Loading orchestration policy from {}", path.display());
                OrchestrationPolicy::load(path)
            }
            None => Ok(OrchestrationPolicy::default()),
        }
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr + std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                warn!("Ignoring {}={:?}: not valid, using {}", key, raw, default);
                default
            }
        },
        None => default,
    }
}
