use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Circuit breaker config (spec.md §4.7, §6.3 `circuit_breaker_*`)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    #[serde(default = "d_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "d_failure_window_seconds")]
    pub failure_window_seconds: u64,
    #[serde(default = "d_open_seconds")]
    pub open_seconds: u64,
    #[serde(default = "d_half_open_probe_count")]
    pub half_open_probe_count: u32,
    /// When true (default), the breaker tracks state but never denies
    /// calls; denials are counted for alerting only.
    #[serde(default = "d_true")]
    pub observe_only: bool,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: d_failure_threshold(),
            failure_window_seconds: d_failure_window_seconds(),
            open_seconds: d_open_seconds(),
            half_open_probe_count: d_half_open_probe_count(),
            observe_only: true,
        }
    }
}

fn d_failure_threshold() -> u32 {
    5
}
fn d_failure_window_seconds() -> u64 {
    60
}
fn d_open_seconds() -> u64 {
    30
}
fn d_half_open_probe_count() -> u32 {
    2
}
fn d_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = CircuitBreakerConfig::default();
        assert_eq!(cfg.failure_threshold, 5);
        assert_eq!(cfg.failure_window_seconds, 60);
        assert_eq!(cfg.open_seconds, 30);
        assert_eq!(cfg.half_open_probe_count, 2);
        assert!(cfg.observe_only);
    }
}
