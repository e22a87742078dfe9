//! Policy gateway (spec.md §4.5).
//!
//! Pure decision engine evaluated at the three fixed checkpoints. Kept
//! separate from the `Stage` wiring so the rule order and event
//! emission can be unit tested without a running DAG.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tf_domain::config::{Checkpoint, ForcedDecision, PolicyConfig, PolicyDecisionKind};
use tf_domain::stage::{Artifact, StageContext, StageEvent, StageOutput};

use crate::dag::Stage;

#[derive(Debug, Clone)]
pub struct PolicyContext {
    pub checkpoint: Checkpoint,
    pub intent: String,
    pub prompt_tokens_estimate: Option<u32>,
    pub proposed_action_types: Vec<String>,
    pub proposed_artifact_types: Vec<String>,
    pub artifacts: Vec<Artifact>,
    pub runs_in_last_minute: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyDecision {
    pub decision: PolicyDecisionKind,
    pub reason: String,
}

impl PolicyDecision {
    fn allow(reason: impl Into<String>) -> Self {
        Self { decision: PolicyDecisionKind::Allow, reason: reason.into() }
    }
    fn block(reason: impl Into<String>) -> Self {
        Self { decision: PolicyDecisionKind::Block, reason: reason.into() }
    }
}

pub struct PolicyGateway {
    config: PolicyConfig,
}

impl PolicyGateway {
    pub fn new(config: PolicyConfig) -> Self {
        Self { config }
    }

    /// Evaluate the ordered rule list (spec.md §4.5), first match wins.
    /// Returns the decision plus every event the evaluation produced —
    /// a `policy.decision` event is always last, win or lose.
    pub fn evaluate(&self, ctx: &PolicyContext) -> (PolicyDecision, Vec<StageEvent>) {
        let mut events = Vec::new();
        let outcome = self.evaluate_rules(ctx, &mut events);

        events.push(event(
            "policy.decision",
            serde_json::json!({
                "checkpoint": ctx.checkpoint,
                "decision": outcome.decision,
                "reason": outcome.reason,
            }),
        ));

        (outcome, events)
    }

    fn evaluate_rules(&self, ctx: &PolicyContext, events: &mut Vec<StageEvent>) -> PolicyDecision {
        if !self.config.enabled {
            return PolicyDecision::allow("policy.disabled");
        }

        if let Some(ForcedDecision { checkpoint, decision, reason }) = &self.config.forced_decision
        {
            if *checkpoint == ctx.checkpoint {
                events.push(event("policy.forced", serde_json::json!({ "reason": reason })));
                return PolicyDecision { decision: *decision, reason: reason.clone() };
            }
        }

        if let Some(allowed) = self.config.intent_rules.get(&ctx.checkpoint) {
            if !allowed.iter().any(|i| i == &ctx.intent) {
                events.push(event(
                    "policy.intent.denied",
                    serde_json::json!({ "intent": ctx.intent }),
                ));
                return PolicyDecision::block("intent_not_allowed");
            }
        }

        if ctx.checkpoint == Checkpoint::PreLlm {
            if let Some(estimate) = ctx.prompt_tokens_estimate {
                if estimate > self.config.max_prompt_tokens {
                    events.push(event(
                        "policy.budget.exceeded",
                        serde_json::json!({
                            "estimate": estimate,
                            "max": self.config.max_prompt_tokens,
                        }),
                    ));
                    return PolicyDecision::block("budget.prompt_tokens_exceeded");
                }
            }
        }

        if ctx.runs_in_last_minute > self.config.max_runs_per_minute {
            events.push(event(
                "policy.quota.exceeded",
                serde_json::json!({
                    "runs_in_last_minute": ctx.runs_in_last_minute,
                    "max": self.config.max_runs_per_minute,
                }),
            ));
            return PolicyDecision::block("quota.runs_per_minute_exceeded");
        }

        if matches!(ctx.checkpoint, Checkpoint::PreAction | Checkpoint::PrePersist) {
            if let Some(allowed) = self.config.escalation_action_types.get(&ctx.checkpoint) {
                if let Some(bad) = ctx.proposed_action_types.iter().find(|t| !allowed.contains(t))
                {
                    events.push(event(
                        "policy.escalation.denied",
                        serde_json::json!({ "action_type": bad }),
                    ));
                    return PolicyDecision::block("escalation.action_type_not_allowed");
                }
            }
            if let Some(allowed) = self.config.escalation_artifact_types.get(&ctx.checkpoint) {
                if let Some(bad) =
                    ctx.proposed_artifact_types.iter().find(|t| !allowed.contains(t))
                {
                    events.push(event(
                        "policy.escalation.denied",
                        serde_json::json!({ "artifact_type": bad }),
                    ));
                    return PolicyDecision::block("escalation.artifact_type_not_allowed");
                }
            }
        }

        if ctx.checkpoint == Checkpoint::PrePersist {
            if ctx.artifacts.len() as u32 > self.config.max_artifacts {
                return PolicyDecision::block("artifact.count_exceeded");
            }
            for artifact in &ctx.artifacts {
                if payload_size(&artifact.payload) > self.config.max_artifact_payload_bytes {
                    return PolicyDecision::block("artifact.payload_too_large");
                }
            }
        }

        PolicyDecision::allow("default")
    }
}

fn payload_size(value: &Value) -> u64 {
    serde_json::to_vec(value).map(|b| b.len() as u64).unwrap_or(0)
}

fn event(kind: &str, data: Value) -> StageEvent {
    StageEvent { kind: kind.to_string(), data, timestamp: chrono::Utc::now() }
}

/// Wires [`PolicyGateway`] into the DAG. `build_context` extracts the
/// per-run fields the gateway needs (intent, prompt-token estimate,
/// proposed action/artifact types, run-rate count) from whatever
/// upstream stage populated them — kept as an injected closure since
/// that extraction differs by pipeline (chat vs. voice, PRE_LLM vs.
/// PRE_ACTION/PRE_PERSIST).
pub struct PolicyGuardStage {
    gateway: PolicyGateway,
    build_context: Arc<dyn Fn(&StageContext) -> PolicyContext + Send + Sync>,
}

impl PolicyGuardStage {
    pub fn new(
        gateway: PolicyGateway,
        build_context: impl Fn(&StageContext) -> PolicyContext + Send + Sync + 'static,
    ) -> Self {
        Self { gateway, build_context: Arc::new(build_context) }
    }
}

#[async_trait::async_trait]
impl Stage for PolicyGuardStage {
    async fn execute(&self, mut ctx: StageContext) -> StageOutput {
        let policy_ctx = (self.build_context)(&ctx);
        let (decision, events) = self.gateway.evaluate(&policy_ctx);
        for e in events {
            ctx.emit_event(e.kind, e.data);
        }

        let mut data = HashMap::new();
        data.insert(
            "policy_decision".to_string(),
            serde_json::json!(match decision.decision {
                PolicyDecisionKind::Allow => "ALLOW",
                PolicyDecisionKind::Block => "BLOCK",
                PolicyDecisionKind::RequireApproval => "REQUIRE_APPROVAL",
            }),
        );
        data.insert("policy_reason".to_string(), serde_json::json!(decision.reason));

        ctx.into_output(StageOutput::ok(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base_ctx() -> PolicyContext {
        PolicyContext {
            checkpoint: Checkpoint::PreLlm,
            intent: "chat".into(),
            prompt_tokens_estimate: Some(100),
            proposed_action_types: vec![],
            proposed_artifact_types: vec![],
            artifacts: vec![],
            runs_in_last_minute: 1,
        }
    }

    #[test]
    fn defaults_to_allow() {
        let gw = PolicyGateway::new(PolicyConfig::default());
        let (decision, events) = gw.evaluate(&base_ctx());
        assert_eq!(decision.decision, PolicyDecisionKind::Allow);
        assert_eq!(events.last().unwrap().kind, "policy.decision");
    }

    #[test]
    fn forced_decision_wins_over_everything() {
        let mut cfg = PolicyConfig::default();
        cfg.forced_decision = Some(ForcedDecision {
            checkpoint: Checkpoint::PreLlm,
            decision: PolicyDecisionKind::Block,
            reason: "test_forced".into(),
        });
        let gw = PolicyGateway::new(cfg);
        let (decision, events) = gw.evaluate(&base_ctx());
        assert_eq!(decision.decision, PolicyDecisionKind::Block);
        assert!(events.iter().any(|e| e.kind == "policy.forced"));
    }

    #[test]
    fn intent_not_in_allowlist_is_blocked() {
        let mut cfg = PolicyConfig::default();
        cfg.intent_rules.insert(Checkpoint::PreLlm, vec!["practice".into()]);
        let gw = PolicyGateway::new(cfg);
        let (decision, _) = gw.evaluate(&base_ctx());
        assert_eq!(decision.reason, "intent_not_allowed");
    }

    #[test]
    fn prompt_budget_exceeded_blocks_at_pre_llm_only() {
        let mut cfg = PolicyConfig::default();
        cfg.max_prompt_tokens = 50;
        let gw = PolicyGateway::new(cfg);
        let (decision, _) = gw.evaluate(&base_ctx());
        assert_eq!(decision.reason, "budget.prompt_tokens_exceeded");
    }

    #[test]
    fn run_rate_quota_blocks_regardless_of_checkpoint() {
        let mut cfg = PolicyConfig::default();
        cfg.max_runs_per_minute = 5;
        let gw = PolicyGateway::new(cfg);
        let mut ctx = base_ctx();
        ctx.runs_in_last_minute = 6;
        let (decision, _) = gw.evaluate(&ctx);
        assert_eq!(decision.reason, "quota.runs_per_minute_exceeded");
    }

    #[test]
    fn escalation_rejects_disallowed_action_type() {
        let mut cfg = PolicyConfig::default();
        cfg.escalation_action_types
            .insert(Checkpoint::PreAction, vec!["send_message".into()]);
        let gw = PolicyGateway::new(cfg);
        let mut ctx = base_ctx();
        ctx.checkpoint = Checkpoint::PreAction;
        ctx.proposed_action_types = vec!["delete_account".into()];
        let (decision, _) = gw.evaluate(&ctx);
        assert_eq!(decision.reason, "escalation.action_type_not_allowed");
    }

    #[test]
    fn artifact_payload_too_large_blocks_at_pre_persist() {
        let mut cfg = PolicyConfig::default();
        cfg.max_artifact_payload_bytes = 4;
        let gw = PolicyGateway::new(cfg);
        let mut ctx = base_ctx();
        ctx.checkpoint = Checkpoint::PrePersist;
        ctx.artifacts =
            vec![Artifact { kind: "text".into(), payload: serde_json::json!("too long") }];
        let (decision, _) = gw.evaluate(&ctx);
        assert_eq!(decision.reason, "artifact.payload_too_large");
    }

    #[test]
    fn disabled_policy_always_allows() {
        let mut cfg = PolicyConfig::default();
        cfg.enabled = false;
        cfg.max_runs_per_minute = 0;
        let gw = PolicyGateway::new(cfg);
        let (decision, _) = gw.evaluate(&base_ctx());
        assert_eq!(decision.decision, PolicyDecisionKind::Allow);
    }

    #[test]
    fn decision_event_always_emitted() {
        let gw = PolicyGateway::new(PolicyConfig::default());
        let map: HashMap<&str, &str> = HashMap::new();
        let _ = map;
        let (_, events) = gw.evaluate(&base_ctx());
        assert!(events.iter().any(|e| e.kind == "policy.decision"));
    }
}
