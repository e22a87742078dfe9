//! End-to-end tests wiring the policy gateway, guardrails stage, and a
//! stand-in LLM stage together through the DAG executor and orchestrator —
//! the same shape `tf_pipeline::registry` assembles, minus network calls.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tf_domain::config::{Checkpoint, ForcedDecision, ForcedGuardrailsDecision, GuardrailsConfig, PolicyConfig, PolicyDecisionKind};
use tf_domain::stage::{
    Behavior, Channel, ContextSnapshot, StageContext, StageKind, StageOutput, StagePorts, Topology,
};
use tf_pipeline::{
    CancelToken, DagExecutor, GuardrailsGuardStage, InMemoryEventSink, NullEventSink, Orchestrator,
    OrchestratorResult, PolicyContext, PolicyGateway, PolicyGuardStage, Stage, StageSpec,
    CANNED_TROUBLE_MESSAGE,
};
use uuid::Uuid;

fn snapshot(input_text: Option<&str>) -> ContextSnapshot {
    ContextSnapshot {
        pipeline_run_id: Uuid::new_v4(),
        request_id: "req-1".into(),
        session_id: Uuid::new_v4(),
        user_id: Uuid::new_v4(),
        org_id: None,
        interaction_id: None,
        topology: Topology::ChatFast,
        channel: Channel::TextChannel,
        behavior: Behavior::FreeConversation,
        messages: vec![],
        profile: None,
        memory: None,
        skills: None,
        documents: None,
        web_results: None,
        input_text: input_text.map(str::to_string),
        input_audio_duration_ms: None,
        exercise_id: None,
        assessment_state: None,
        routing_decision: None,
        created_at: Utc::now(),
    }
}

fn noop_ports() -> StagePorts {
    StagePorts::new(Arc::new(|_, _, _| {}), Arc::new(|_| {}))
}

/// Stands in for `LlmStage`: honors an upstream `BLOCK` decision the same
/// way the real stage's `blocked_reason` does, otherwise "streams" a fixed
/// reply.
struct StubLlm(&'static str);

#[async_trait]
impl Stage for StubLlm {
    async fn execute(&self, ctx: StageContext) -> StageOutput {
        for key in ["policy_decision", "guardrails_decision"] {
            if ctx.inputs.get(key, None).as_ref().and_then(|v| v.as_str()) == Some("BLOCK") {
                return ctx.into_output(StageOutput::skip(format!("{key}_blocked")));
            }
        }
        let mut data = HashMap::new();
        data.insert("full_text".to_string(), json!(self.0));
        ctx.into_output(StageOutput::ok(data))
    }
}

/// Stands in for a transcription stage: an empty transcript cancels the
/// whole run before policy/guardrails ever see it (spec.md §8 boundary
/// behavior for voice turns).
struct StubStt;

#[async_trait]
impl Stage for StubStt {
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

fn policy_spec(config: PolicyConfig, deps: Vec<&str>) -> StageSpec {
    let gateway = PolicyGateway::new(config);
    let build_context = |ctx: &StageContext| PolicyContext {
        checkpoint: Checkpoint::PreLlm,
        intent: "chat".into(),
        prompt_tokens_estimate: ctx.snapshot.input_text.as_ref().map(|t| (t.len() / 4) as u32),
        proposed_action_types: vec![],
        proposed_artifact_types: vec![],
        artifacts: vec![],
        runs_in_last_minute: 1,
    };
    StageSpec::new("policy_pre_llm", StageKind::Guard, Arc::new(PolicyGuardStage::new(gateway, build_context)))
        .depends_on(deps)
}

fn guardrails_spec(config: GuardrailsConfig, deps: Vec<&str>) -> StageSpec {
    let stage = GuardrailsGuardStage::new(Checkpoint::PreLlm, config, |ctx: &StageContext| {
        ctx.snapshot.input_text.clone().unwrap_or_default()
    });
    StageSpec::new("guardrails_pre_llm", StageKind::Guard, Arc::new(stage)).depends_on(deps)
}

fn chat_fast_with(policy: PolicyConfig, guardrails: GuardrailsConfig) -> DagExecutor {
    let specs = vec![
        policy_spec(policy, vec![]),
        guardrails_spec(guardrails, vec![]),
        StageSpec::new("llm", StageKind::Work, Arc::new(StubLlm("hello there")))
            .depends_on(["policy_pre_llm", "guardrails_pre_llm"])
            .conditional(true),
    ];
    DagExecutor::new(specs).unwrap()
}

#[tokio::test]
async fn happy_path_chat_completes_with_llm_text() {
    let executor = chat_fast_with(PolicyConfig::default(), GuardrailsConfig::default());
    let orchestrator = Orchestrator::new(Arc::new(NullEventSink));
    let ports = noop_ports();

    let result = orchestrator
        .run(&executor, snapshot(Some("hi there")), "chat", "fast", ports, CancelToken::new())
        .await;

    match result {
        OrchestratorResult::Completed { content, canned, run } => {
            assert_eq!(content, "hello there");
            assert!(!canned);
            assert!(run.success);
        }
        _ => panic!("expected completion"),
    }
}

#[tokio::test]
async fn policy_block_skips_llm_and_produces_canned_completion() {
    let mut policy = PolicyConfig::default();
    policy.forced_decision = Some(ForcedDecision {
        checkpoint: Checkpoint::PreLlm,
        decision: PolicyDecisionKind::Block,
        reason: "test_forced".into(),
    });
    let executor = chat_fast_with(policy, GuardrailsConfig::default());
    let sink = Arc::new(InMemoryEventSink::new(64));
    let orchestrator = Orchestrator::new(sink.clone());
    let ports = noop_ports();

    let result = orchestrator
        .run(&executor, snapshot(Some("hi there")), "chat", "fast", ports, CancelToken::new())
        .await;

    match result {
        OrchestratorResult::Completed { content, canned, run } => {
            assert_eq!(content, CANNED_TROUBLE_MESSAGE);
            assert!(canned);
            assert!(run.success, "a handled block is still a successful run");
        }
        _ => panic!("expected a canned completion, not a failure or cancellation"),
    }

    let events = sink.flush();
    assert!(events.iter().any(|e| e.kind == "policy.forced"));
}

#[tokio::test]
async fn guardrails_block_also_skips_llm() {
    let mut guardrails = GuardrailsConfig::default();
    guardrails.forced_decision = Some(ForcedGuardrailsDecision {
        checkpoint: Checkpoint::PreLlm,
        blocked: true,
        reason: "unsafe_content".into(),
    });
    let executor = chat_fast_with(PolicyConfig::default(), guardrails);
    let orchestrator = Orchestrator::new(Arc::new(NullEventSink));
    let ports = noop_ports();

    let result = orchestrator
        .run(&executor, snapshot(Some("hi there")), "chat", "fast", ports, CancelToken::new())
        .await;

    match result {
        OrchestratorResult::Completed { canned, .. } => assert!(canned),
        _ => panic!("expected a canned completion"),
    }
}

#[tokio::test]
async fn empty_voice_transcript_cancels_before_policy_or_guardrails_run() {
    let specs = vec![
        StageSpec::new("stt", StageKind::Transform, Arc::new(StubStt)),
        policy_spec(PolicyConfig::default(), vec!["stt"]),
        guardrails_spec(GuardrailsConfig::default(), vec!["stt"]),
        StageSpec::new("llm", StageKind::Work, Arc::new(StubLlm("unreachable")))
            .depends_on(["policy_pre_llm", "guardrails_pre_llm"])
            .conditional(true),
    ];
    let executor = DagExecutor::new(specs).unwrap();
    let orchestrator = Orchestrator::new(Arc::new(NullEventSink));
    let ports = noop_ports();

    let result = orchestrator
        .run(&executor, snapshot(Some("   ")), "voice", "fast", ports, CancelToken::new())
        .await;

    match result {
        OrchestratorResult::Cancelled { reason, run } => {
            assert_eq!(reason, "empty transcript");
            assert!(!run.success);
        }
        _ => panic!("expected cancellation"),
    }
}

#[tokio::test]
async fn unrecoverable_llm_failure_produces_a_dead_letter_row() {
    struct Boom;
    #[async_trait]
    impl Stage for Boom {
        async fn execute(&self, ctx: StageContext) -> StageOutput {
            ctx.into_output(StageOutput::fail("LlmStreamFailure(stream_token_count=3): connection reset"))
        }
    }
    let specs = vec![
        policy_spec(PolicyConfig::default(), vec![]),
        guardrails_spec(GuardrailsConfig::default(), vec![]),
        StageSpec::new("llm", StageKind::Work, Arc::new(Boom))
            .depends_on(["policy_pre_llm", "guardrails_pre_llm"])
            .conditional(true),
    ];
    let executor = DagExecutor::new(specs).unwrap();
    let orchestrator = Orchestrator::new(Arc::new(NullEventSink));
    let ports = noop_ports();

    let result = orchestrator
        .run(&executor, snapshot(Some("hi there")), "chat", "fast", ports, CancelToken::new())
        .await;

    match result {
        OrchestratorResult::Failed { stage, run, dlq, .. } => {
            assert_eq!(stage, "llm");
            assert!(!run.success);
            assert_eq!(dlq.failed_stage, "llm");
            assert!(dlq.error_message.contains("stream_token_count=3"));
        }
        _ => panic!("expected failure with a DLQ row"),
    }
}

#[tokio::test]
async fn run_rate_quota_blocks_even_when_everything_else_would_allow() {
    let mut policy = PolicyConfig::default();
    policy.max_runs_per_minute = 1;
    let gateway = PolicyGateway::new(policy);
    let build_context = |_ctx: &StageContext| PolicyContext {
        checkpoint: Checkpoint::PreLlm,
        intent: "chat".into(),
        prompt_tokens_estimate: Some(10),
        proposed_action_types: vec![],
        proposed_artifact_types: vec![],
        artifacts: vec![],
        runs_in_last_minute: 42,
    };
    let specs = vec![
        StageSpec::new("policy_pre_llm", StageKind::Guard, Arc::new(PolicyGuardStage::new(gateway, build_context))),
        guardrails_spec(GuardrailsConfig::default(), vec![]),
        StageSpec::new("llm", StageKind::Work, Arc::new(StubLlm("unreachable")))
            .depends_on(["policy_pre_llm", "guardrails_pre_llm"])
            .conditional(true),
    ];
    let executor = DagExecutor::new(specs).unwrap();
    let orchestrator = Orchestrator::new(Arc::new(NullEventSink));
    let ports = noop_ports();

    let result = orchestrator
        .run(&executor, snapshot(Some("hi there")), "chat", "fast", ports, CancelToken::new())
        .await;

    match result {
        OrchestratorResult::Completed { canned, .. } => assert!(canned),
        _ => panic!("expected a canned completion from the quota block"),
    }
}

#[tokio::test]
async fn diamond_dependency_all_stages_complete_through_the_orchestrator() {
    struct Echo(&'static str);
    #[async_trait]
    impl Stage for Echo {
        async fn execute(&self, ctx: StageContext) -> StageOutput {
            let mut data = HashMap::new();
            data.insert("who".to_string(), json!(self.0));
            ctx.into_output(StageOutput::ok(data))
        }
    }

    let specs = vec![
        StageSpec::new("a", StageKind::Transform, Arc::new(Echo("a"))),
        StageSpec::new("b", StageKind::Transform, Arc::new(Echo("b"))).depends_on(["a"]),
        StageSpec::new("c", StageKind::Transform, Arc::new(Echo("c"))).depends_on(["a"]),
        StageSpec::new("llm", StageKind::Work, Arc::new(StubLlm("done"))).depends_on(["b", "c"]),
    ];
    let executor = DagExecutor::new(specs).unwrap();
    let orchestrator = Orchestrator::new(Arc::new(NullEventSink));
    let ports = noop_ports();

    let result = orchestrator
        .run(&executor, snapshot(Some("hi")), "chat", "fast", ports, CancelToken::new())
        .await;

    match result {
        OrchestratorResult::Completed { content, run, .. } => {
            assert_eq!(content, "done");
            assert!(run.success);
        }
        _ => panic!("expected completion"),
    }
}
