//! Tool Circuit Breakers
//!
//! Isolates failing tools so one broken dependency cannot stall every plan:
//! - Closed → Open after repeated failures
//! - Open → HalfOpen once the recovery timeout elapses
//! - HalfOpen → Closed on a successful probe, back to Open on failure
//! - Initialization errors trip immediately and back off longer
//!
//! Industry standard: Netflix Hystrix, resilience4j

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::policy::OrchestrationPolicy;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation
    Closed,
    /// Blocking all requests
    Open,
    /// Letting a limited number of probes through
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Failures before opening the circuit
    pub failure_threshold: usize,
    /// Time to wait before half-opening
    pub recovery_timeout: Duration,
    /// Probes allowed while half-open
    pub half_open_max_calls: usize,
    /// Threshold applied after an initialization error
    pub init_failure_threshold: usize,
    /// Recovery timeout applied after an initialization error
    pub init_recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(1800),
            half_open_max_calls: 1,
            init_failure_threshold: 1,
            init_recovery_timeout: Duration::from_secs(3600),
        }
    }
}

/// Circuit breaker for a single tool
///
/// Not synchronized on its own; the manager serializes access.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    name: String,
    state: CircuitState,
    failure_count: usize,
    failure_threshold: usize,
    recovery_timeout: Duration,
    last_failure: Option<Instant>,
    half_open_calls: usize,
    half_open_max_calls: usize,
    consecutive_successes: usize,
}

impl CircuitBreaker {
    pub fn new(name: &str) -> Self {
        Self::with_config(name, &CircuitBreakerConfig::default())
    }

    pub fn with_config(name: &str, config: &CircuitBreakerConfig) -> Self {
        Self {
            name: name.to_string(),
            state: CircuitState::Closed,
            failure_count: 0,
            failure_threshold: config.failure_threshold.max(1),
            recovery_timeout: config.recovery_timeout,
            last_failure: None,
            half_open_calls: 0,
            half_open_max_calls: config.half_open_max_calls.max(1),
            consecutive_successes: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn failure_count(&self) -> usize {
        self.failure_count
    }

    pub fn failure_threshold(&self) -> usize {
        self.failure_threshold
    }

    pub fn recovery_timeout(&self) -> Duration {
        self.recovery_timeout
    }

    pub fn consecutive_successes(&self) -> usize {
        self.consecutive_successes
    }

    /// Tighten the breaker for a tool that failed to initialize
    pub fn escalate(&mut self, failure_threshold: usize, recovery_timeout: Duration) {
        self.failure_threshold = failure_threshold.max(1);
        self.recovery_timeout = recovery_timeout;
    }

    /// Check if a call may proceed. Moving Open → HalfOpen consumes the first probe.
    pub fn should_allow_request(&mut self) -> bool {
        match self.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let recovered = self
                    .last_failure
                    .map(|at| at.elapsed() > self.recovery_timeout)
                    .unwrap_or(false);
                if recovered {
                    info!("Circuit breaker '{}' half-open, probing", self.name);
                    self.state = CircuitState::HalfOpen;
                    self.half_open_calls = 1;
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if self.half_open_calls < self.half_open_max_calls {
                    self.half_open_calls += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&mut self) {
        self.consecutive_successes += 1;
        match self.state {
            CircuitState::HalfOpen => {
                info!("Circuit breaker '{}' closed after successful probe", self.name);
                self.state = CircuitState::Closed;
                self.failure_count = 0;
                self.half_open_calls = 0;
            }
            CircuitState::Closed => {
                self.failure_count = self.failure_count.saturating_sub(1);
            }
            CircuitState::Open => {}
        }
    }

    /// Record a failure. Returns true when this failure opened the circuit.
    pub fn record_failure(&mut self, error: &str) -> bool {
        self.consecutive_successes = 0;
        self.failure_count += 1;
        self.last_failure = Some(Instant::now());

        if self.failure_count >= self.failure_threshold {
            if self.state != CircuitState::Open {
                warn!(
                    "Circuit breaker '{}' opened after {} failures: {}",
                    self.name, self.failure_count, error
                );
            }
            self.state = CircuitState::Open;
            return true;
        }

        if self.state == CircuitState::HalfOpen {
            warn!("Circuit breaker '{}' re-opened, probe failed: {}", self.name, error);
            self.state = CircuitState::Open;
            return true;
        }

        false
    }

    /// Time left before the next probe is allowed (open circuits only)
    pub fn time_until_recovery(&self) -> Option<Duration> {
        if self.state != CircuitState::Open {
            return None;
        }
        let elapsed = self.last_failure.map(|at| at.elapsed()).unwrap_or_default();
        Some(self.recovery_timeout.saturating_sub(elapsed))
    }

    pub fn status(&self) -> BreakerStatus {
        BreakerStatus {
            state: self.state,
            failure_count: self.failure_count,
            consecutive_successes: self.consecutive_successes,
            time_until_recovery_secs: self.time_until_recovery().map(|d| d.as_secs()),
        }
    }
}

/// Point-in-time view of one breaker
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerStatus {
    pub state: CircuitState,
    pub failure_count: usize,
    pub consecutive_successes: usize,
    pub time_until_recovery_secs: Option<u64>,
}

/// Lazily created breaker per tool name
pub struct CircuitBreakerManager {
    config: CircuitBreakerConfig,
    policy: Arc<OrchestrationPolicy>,
    breakers: Mutex<HashMap<String, CircuitBreaker>>,
}

impl Default for CircuitBreakerManager {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default(), Arc::new(OrchestrationPolicy::default()))
    }
}

impl CircuitBreakerManager {
    pub fn new(config: CircuitBreakerConfig, policy: Arc<OrchestrationPolicy>) -> Self {
        Self {
            config,
            policy,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    fn with_breaker<R>(&self, tool_name: &str, f: impl FnOnce(&mut CircuitBreaker) -> R) -> R {
        let mut breakers = self.breakers.lock();
        let breaker = breakers
            .entry(tool_name.to_string())
            .or_insert_with(|| CircuitBreaker::with_config(tool_name, &self.config));
        f(breaker)
    }

    /// Check if `tool_name` may be called right now
    pub fn should_use_tool(&self, tool_name: &str) -> bool {
        let allowed = self.with_breaker(tool_name, |b| b.should_allow_request());
        if !allowed {
            debug!("Tool '{}' blocked by circuit breaker", tool_name);
        }
        allowed
    }

    pub fn record_tool_success(&self, tool_name: &str) {
        self.with_breaker(tool_name, |b| b.record_success());
    }

    /// Record a failure. Initialization errors open the circuit immediately.
    /// Returns true when the circuit opened.
    pub fn record_tool_failure(&self, tool_name: &str, error: &str) -> bool {
        let is_init_error = self.policy.is_init_error(error);
        let (init_threshold, init_recovery) = (
            self.config.init_failure_threshold,
            self.config.init_recovery_timeout,
        );

        self.with_breaker(tool_name, |b| {
            if is_init_error {
                error!(
                    "Tool '{}' failed to initialize, backing off for {}s",
                    tool_name,
                    init_recovery.as_secs()
                );
                b.escalate(init_threshold, init_recovery);
            }
            b.record_failure(error)
        })
    }

    /// Tools whose circuits are currently open, sorted by name
    pub fn blocked_tools(&self) -> Vec<String> {
        let breakers = self.breakers.lock();
        let mut blocked: Vec<String> = breakers
            .values()
            .filter(|b| b.state() == CircuitState::Open)
            .map(|b| b.name().to_string())
            .collect();
        blocked.sort();
        blocked
    }

    pub fn state_of(&self, tool_name: &str) -> Option<CircuitState> {
        self.breakers.lock().get(tool_name).map(|b| b.state())
    }

    pub fn status(&self) -> BTreeMap<String, BreakerStatus> {
        self.breakers
            .lock()
            .iter()
            .map(|(name, b)| (name.clone(), b.status()))
            .collect()
    }

    /// Forget a tool's history; the next call starts from a fresh closed breaker
    pub fn reset_tool(&self, tool_name: &str) {
        if self.breakers.lock().remove(tool_name).is_some() {
            info!("Circuit breaker '{}' reset", tool_name);
        }
    }
}
