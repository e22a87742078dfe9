//! Staged DAG pipeline execution: the stage model, executor, policy and
//! guardrails gateways, LLM streaming stage, summary service, and the
//! orchestrator that ties a run's bookkeeping together.

pub mod cancel;
pub mod dag;
pub mod event_sink;
pub mod guardrails;
pub mod llm_stage;
pub mod orchestrator;
pub mod policy;
pub mod provider_log;
pub mod registry;
pub mod summary;

pub use cancel::CancelToken;
pub use dag::{DagError, DagExecutor, PipelineOutcome, Stage, StageSpec};
pub use event_sink::{EventSink, InMemoryEventSink, NullEventSink};
pub use guardrails::{GuardrailsDecision, GuardrailsDecisionKind, GuardrailsGuardStage, GuardrailsStage};
pub use llm_stage::{LlmStage, TtsProvider};
pub use orchestrator::{Orchestrator, OrchestratorResult, CANNED_TROUBLE_MESSAGE};
pub use policy::{PolicyContext, PolicyDecision, PolicyGateway, PolicyGuardStage};
pub use provider_log::{InMemoryProviderCallSink, NullProviderCallSink, ProviderCallSink};
pub use summary::SummaryService;
