use serde::Serialize;

/// Structured trace events emitted across all turnflow crates. Distinct
/// from [`crate::entities::PipelineEvent`]: this is the ambient logging
/// surface, `PipelineEvent` is the durable per-run record a stage's
/// `ctx.emit_event` call feeds.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    PipelineStarted {
        pipeline_run_id: String,
        topology: String,
        behavior: String,
    },
    PipelineCompleted {
        pipeline_run_id: String,
        total_latency_ms: u64,
    },
    PipelineCancelled {
        pipeline_run_id: String,
        stage: String,
        reason: String,
    },
    PipelineFailed {
        pipeline_run_id: String,
        stage: String,
        error: String,
    },
    LlmStarted {
        pipeline_run_id: String,
        provider: String,
        model: String,
    },
    LlmFirstToken {
        pipeline_run_id: String,
        ttft_ms: u64,
    },
    LlmCompleted {
        pipeline_run_id: String,
        stream_token_count: usize,
        ttft_ms: Option<u64>,
        provider_call_id: String,
    },
    LlmBreakerDenied {
        operation: String,
        provider: String,
        model: String,
        enforced: bool,
    },
    AudioFirstPlay {
        pipeline_run_id: String,
        tts_latency_ms: u64,
        audio_duration_ms: u64,
    },
    PolicyDecision {
        checkpoint: String,
        decision: String,
        reason: String,
    },
    PolicyForced {
        checkpoint: String,
        decision: String,
    },
    PolicyIntentDenied {
        checkpoint: String,
        intent: String,
    },
    PolicyBudgetExceeded {
        checkpoint: String,
        prompt_tokens_estimate: u32,
        max_prompt_tokens: u32,
    },
    PolicyQuotaExceeded {
        user_id: String,
        runs_last_minute: u32,
        max_runs_per_minute: u32,
    },
    PolicyEscalationDenied {
        checkpoint: String,
        kind: String,
        value: String,
    },
    GuardrailsDecision {
        checkpoint: String,
        decision: String,
        reason: String,
    },
    SummaryError {
        session_id: String,
        error: String,
    },
    IdentityResolved {
        user_id: String,
        org_id: String,
        auth_provider: String,
    },
    SessionCreated {
        session_id: String,
        user_id: String,
    },
    SessionStateUpdated {
        session_id: String,
        version: u64,
    },
    ContractViolation {
        kind: String,
        pipeline_run_id: String,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "tf_event");
    }
}
