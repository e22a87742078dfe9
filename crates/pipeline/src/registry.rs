//! Pipeline registry (spec.md §2, §9).
//!
//! No decorator-based registration or import-time side effects: each
//! named topology is an explicit constructor function that wires up
//! `StageSpec`s and returns a ready-to-run [`DagExecutor`].

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;
use tf_domain::config::{Checkpoint, Config, ModelChoice};
use tf_domain::stage::{StageContext, StageKind, StageOutput, Topology};
use tf_providers::LlmRouter;

use crate::dag::{DagError, DagExecutor, Stage, StageSpec};
use crate::guardrails::GuardrailsGuardStage;
use crate::llm_stage::LlmStage;
use crate::policy::{PolicyContext, PolicyGateway, PolicyGuardStage};
use crate::provider_log::ProviderCallSink;

/// Empty-transcript voice turns cancel the pipeline (spec.md §8 boundary
/// behavior) rather than reaching the LLM stage at all.
struct SttStage;

#[async_trait::async_trait]
impl Stage for SttStage {
    async fn execute(&self, ctx: StageContext) -> StageOutput {
        let transcript = ctx.snapshot.input_text.clone().unwrap_or_default();
        if transcript.trim().is_empty() {
            return ctx.into_output(StageOutput::cancel("empty transcript", HashMap::new()));
        }
        let mut data = HashMap::new();
        data.insert("transcript".to_string(), json!(transcript));
        ctx.into_output(StageOutput::ok(data))
    }
}

fn policy_stage(config: &Config, deps: Vec<&str>) -> StageSpec {
    let gateway = PolicyGateway::new(config.policy.clone());
    let build_context = |ctx: &StageContext| PolicyContext {
        checkpoint: Checkpoint::PreLlm,
        intent: format!("{:?}", ctx.snapshot.behavior),
        prompt_tokens_estimate: ctx.snapshot.input_text.as_ref().map(|t| (t.len() / 4) as u32),
        proposed_action_types: vec![],
        proposed_artifact_types: vec![],
        artifacts: vec![],
        runs_in_last_minute: 0,
    };
    StageSpec::new(
        "policy_pre_llm",
        StageKind::Guard,
        Arc::new(PolicyGuardStage::new(gateway, build_context)),
    )
    .depends_on(deps)
}

fn guardrails_stage(config: &Config, deps: Vec<&str>) -> StageSpec {
    let stage = GuardrailsGuardStage::new(
        Checkpoint::PreLlm,
        config.guardrails.clone(),
        |ctx: &StageContext| ctx.snapshot.input_text.clone().unwrap_or_default(),
    );
    StageSpec::new("guardrails_pre_llm", StageKind::Guard, Arc::new(stage)).depends_on(deps)
}

fn llm_stage(
    router: Arc<LlmRouter>,
    config: &Config,
    deps: Vec<&str>,
    call_log: Option<Arc<dyn ProviderCallSink>>,
) -> StageSpec {
    let mut stage = LlmStage::new(router, config.llm.model_choice, config.policy.llm_max_tokens);
    if let Some(sink) = call_log {
        stage = stage.with_call_log(sink);
    }
    StageSpec::new("llm", StageKind::Work, Arc::new(stage))
        .depends_on(deps)
        .conditional(true)
}

/// Text-channel, low-latency topology: policy and guardrails run
/// concurrently (both depend only on the snapshot), then the LLM stage.
pub fn chat_fast(
    router: Arc<LlmRouter>,
    config: &Config,
    call_log: Option<Arc<dyn ProviderCallSink>>,
) -> Result<DagExecutor, DagError> {
    let specs = vec![
        policy_stage(config, vec![]),
        guardrails_stage(config, vec![]),
        llm_stage(router, config, vec!["policy_pre_llm", "guardrails_pre_llm"], call_log),
    ];
    DagExecutor::new(specs)
}

/// Same shape as `chat_fast`; the "accurate" distinction (larger model,
/// higher token budget) lives in `config`, not the graph shape, per
/// spec.md §9's guidance to keep topology selection data-driven.
pub fn chat_accurate(
    router: Arc<LlmRouter>,
    config: &Config,
    call_log: Option<Arc<dyn ProviderCallSink>>,
) -> Result<DagExecutor, DagError> {
    chat_fast(router, config, call_log)
}

/// Voice topology: transcription gates everything downstream; an empty
/// transcript cancels the whole run before policy/guardrails ever run.
pub fn voice_fast(
    router: Arc<LlmRouter>,
    config: &Config,
    call_log: Option<Arc<dyn ProviderCallSink>>,
) -> Result<DagExecutor, DagError> {
    let specs = vec![
        StageSpec::new("stt", StageKind::Transform, Arc::new(SttStage)),
        policy_stage(config, vec!["stt"]),
        guardrails_stage(config, vec!["stt"]),
        llm_stage(router, config, vec!["policy_pre_llm", "guardrails_pre_llm"], call_log),
    ];
    DagExecutor::new(specs)
}

pub fn voice_accurate(
    router: Arc<LlmRouter>,
    config: &Config,
    call_log: Option<Arc<dyn ProviderCallSink>>,
) -> Result<DagExecutor, DagError> {
    voice_fast(router, config, call_log)
}

/// Resolve a topology to its constructor. Used by the gateway, which
/// only knows the `Topology` a connection negotiated, not which
/// constructor built it.
pub fn build(
    topology: Topology,
    router: Arc<LlmRouter>,
    config: &Config,
    call_log: Option<Arc<dyn ProviderCallSink>>,
) -> Result<DagExecutor, DagError> {
    match topology {
        Topology::ChatFast => chat_fast(router, config, call_log),
        Topology::ChatAccurate => chat_accurate(router, config, call_log),
        Topology::VoiceFast => voice_fast(router, config, call_log),
        Topology::VoiceAccurate => voice_accurate(router, config, call_log),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tf_providers::ProviderRegistry;

    fn router(config: &Config) -> Arc<LlmRouter> {
        let registry = ProviderRegistry::from_config(&config.llm).unwrap();
        Arc::new(LlmRouter::new(registry, &config.llm, &config.circuit_breaker))
    }

    #[test]
    fn every_named_topology_builds_a_valid_dag() {
        let config = Config::default();
        for topology in [
            Topology::ChatFast,
            Topology::ChatAccurate,
            Topology::VoiceFast,
            Topology::VoiceAccurate,
        ] {
            assert!(build(topology, router(&config), &config, None).is_ok());
        }
    }

    #[test]
    fn chat_fast_has_no_undeclared_or_cyclic_dependencies() {
        let config = Config::default();
        assert!(chat_fast(router(&config), &config, None).is_ok());
    }
}
