/// Shared error type used across all turnflow crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("config: {0}")]
    Config(String),

    #[error("auth: {0}")]
    Auth(String),

    /// A policy gateway checkpoint blocked the run (spec.md §4.5, §7).
    #[error("policy blocked at {checkpoint}: {reason}")]
    PolicyBlock { checkpoint: String, reason: String },

    /// Guardrails rejected input or output content (spec.md §4.6, §7).
    #[error("guardrails blocked at {checkpoint}: {reason}")]
    GuardrailsBlock { checkpoint: String, reason: String },

    /// A circuit breaker is open for this provider/model and the breaker
    /// is not in observe-only mode (spec.md §4.7, §7).
    #[error("circuit open for {operation}/{provider}/{model}")]
    CircuitOpen {
        operation: String,
        provider: String,
        model: String,
    },

    /// A DAG stage raised an unrecoverable error (spec.md §4.1, §7).
    #[error("stage {stage} failed: {message}")]
    StageExecutionError { stage: String, message: String },

    /// The pipeline run was cancelled mid-stage (spec.md §4.2, §4.3, §7).
    #[error("pipeline cancelled at {stage}: {reason}")]
    PipelineCancelled { stage: String, reason: String },

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
