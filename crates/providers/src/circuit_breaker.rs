//! Per-(operation, provider, model) circuit breaker.
//!
//! Tracks a sliding failure window and flips closed → open → half-open the
//! same way [`crate::auth`]'s key rotator tracks per-key cooldowns, but keyed
//! on the provider/model tuple instead of an API key index. When
//! `observe_only` is set (the default), the breaker never actually denies a
//! call — it still transitions state and still emits
//! [`tf_domain::trace::TraceEvent::LlmBreakerDenied`] so operators can see
//! what it *would* have blocked before flipping enforcement on.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tf_domain::config::CircuitBreakerConfig;
use tf_domain::trace::TraceEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

struct Entry {
    state: BreakerState,
    failures: Vec<Instant>,
    opened_at: Option<Instant>,
    half_open_probes: u32,
}

impl Entry {
    fn new() -> Self {
        Self {
            state: BreakerState::Closed,
            failures: Vec::new(),
            opened_at: None,
            half_open_probes: 0,
        }
    }
}

/// Thread-safe breaker shared across the LLM router.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    entries: Mutex<HashMap<(String, String, String), Entry>>,
}

/// What the caller should do for this call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allow,
    /// The breaker wanted to deny the call but `observe_only` is set, so the
    /// caller should proceed anyway.
    AllowObserved,
    Deny,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn key(operation: &str, provider: &str, model: &str) -> (String, String, String) {
        (operation.to_string(), provider.to_string(), model.to_string())
    }

    /// Check whether a call for this tuple should proceed, transitioning
    /// open → half-open once `open_seconds` has elapsed.
    pub fn admit(&self, operation: &str, provider: &str, model: &str) -> Admission {
        let key = Self::key(operation, provider, model);
        let mut entries = self.entries.lock();
        let entry = entries.entry(key).or_insert_with(Entry::new);

        if entry.state == BreakerState::Open {
            let opened = entry.opened_at.unwrap_or_else(Instant::now);
            if opened.elapsed() >= Duration::from_secs(self.config.open_seconds) {
                entry.state = BreakerState::HalfOpen;
                entry.half_open_probes = 0;
            }
        }

        match entry.state {
            BreakerState::Closed | BreakerState::HalfOpen => Admission::Allow,
            BreakerState::Open => {
                TraceEvent::LlmBreakerDenied {
                    operation: operation.to_string(),
                    provider: provider.to_string(),
                    model: model.to_string(),
                    enforced: !self.config.observe_only,
                }
                .emit();
                if self.config.observe_only {
                    Admission::AllowObserved
                } else {
                    Admission::Deny
                }
            }
        }
    }

    /// Record a successful call, closing the breaker if it was half-open.
    pub fn record_success(&self, operation: &str, provider: &str, model: &str) {
        let key = Self::key(operation, provider, model);
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(&key) {
            if entry.state == BreakerState::HalfOpen {
                entry.half_open_probes += 1;
                if entry.half_open_probes >= self.config.half_open_probe_count {
                    entry.state = BreakerState::Closed;
                    entry.failures.clear();
                    entry.opened_at = None;
                }
            } else {
                entry.failures.clear();
            }
        }
    }

    /// Record a failed call. Half-open failures reopen immediately; closed
    /// failures accumulate within the sliding window until the threshold
    /// trips the breaker open.
    pub fn record_failure(&self, operation: &str, provider: &str, model: &str) {
        let key = Self::key(operation, provider, model);
        let mut entries = self.entries.lock();
        let entry = entries.entry(key).or_insert_with(Entry::new);
        let now = Instant::now();

        if entry.state == BreakerState::HalfOpen {
            entry.state = BreakerState::Open;
            entry.opened_at = Some(now);
            entry.failures.clear();
            return;
        }

        entry.failures.push(now);
        let window = Duration::from_secs(self.config.failure_window_seconds);
        entry.failures.retain(|t| now.duration_since(*t) < window);

        if entry.failures.len() as u32 >= self.config.failure_threshold {
            entry.state = BreakerState::Open;
            entry.opened_at = Some(now);
        }
    }

    pub fn state_of(&self, operation: &str, provider: &str, model: &str) -> BreakerState {
        let key = Self::key(operation, provider, model);
        self.entries
            .lock()
            .get(&key)
            .map(|e| e.state)
            .unwrap_or(BreakerState::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 3,
            failure_window_seconds: 60,
            open_seconds: 1,
            half_open_probe_count: 1,
            observe_only: false,
        }
    }

    #[test]
    fn closed_by_default() {
        let cb = CircuitBreaker::new(cfg());
        assert_eq!(cb.admit("llm", "groq", "llama"), Admission::Allow);
    }

    #[test]
    fn opens_after_threshold_failures() {
        let cb = CircuitBreaker::new(cfg());
        for _ in 0..3 {
            cb.record_failure("llm", "groq", "llama");
        }
        assert_eq!(cb.state_of("llm", "groq", "llama"), BreakerState::Open);
        assert_eq!(cb.admit("llm", "groq", "llama"), Admission::Deny);
    }

    #[test]
    fn observe_only_allows_through_an_open_breaker() {
        let mut c = cfg();
        c.observe_only = true;
        let cb = CircuitBreaker::new(c);
        for _ in 0..3 {
            cb.record_failure("llm", "groq", "llama");
        }
        assert_eq!(cb.admit("llm", "groq", "llama"), Admission::AllowObserved);
    }

    #[test]
    fn half_open_after_cooldown_then_closes_on_success() {
        let cb = CircuitBreaker::new(cfg());
        for _ in 0..3 {
            cb.record_failure("llm", "groq", "llama");
        }
        std::thread::sleep(Duration::from_millis(1100));
        assert_eq!(cb.admit("llm", "groq", "llama"), Admission::Allow);
        assert_eq!(cb.state_of("llm", "groq", "llama"), BreakerState::HalfOpen);
        cb.record_success("llm", "groq", "llama");
        assert_eq!(cb.state_of("llm", "groq", "llama"), BreakerState::Closed);
    }

    #[test]
    fn half_open_failure_reopens() {
        let cb = CircuitBreaker::new(cfg());
        for _ in 0..3 {
            cb.record_failure("llm", "groq", "llama");
        }
        std::thread::sleep(Duration::from_millis(1100));
        cb.admit("llm", "groq", "llama");
        cb.record_failure("llm", "groq", "llama");
        assert_eq!(cb.state_of("llm", "groq", "llama"), BreakerState::Open);
    }

    #[test]
    fn distinct_keys_are_independent() {
        let cb = CircuitBreaker::new(cfg());
        for _ in 0..3 {
            cb.record_failure("llm", "groq", "llama");
        }
        assert_eq!(cb.state_of("llm", "groq", "llama"), BreakerState::Open);
        assert_eq!(cb.state_of("llm", "anthropic", "claude"), BreakerState::Closed);
    }
}
