//! Guardrails stage (spec.md §4.6).
//!
//! Same shape as the policy gateway but evaluates content safety on a
//! truncated excerpt of the user's input rather than routing metadata.

use std::collections::HashMap;
use std::sync::Arc;

use tf_domain::config::{Checkpoint, ForcedGuardrailsDecision, GuardrailsConfig};
use tf_domain::stage::{StageContext, StageEvent, StageOutput};

use crate::dag::Stage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardrailsDecisionKind {
    Allow,
    Block,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardrailsDecision {
    pub decision: GuardrailsDecisionKind,
    pub reason: String,
}

pub struct GuardrailsStage {
    config: GuardrailsConfig,
}

impl GuardrailsStage {
    pub fn new(config: GuardrailsConfig) -> Self {
        Self { config }
    }

    /// Truncate to the configured excerpt length before evaluating, so
    /// the decision never depends on content outside what downstream
    /// logs and traces would also see.
    pub fn excerpt<'a>(&self, input: &'a str) -> &'a str {
        let max = self.config.input_excerpt_max_chars;
        match input.char_indices().nth(max) {
            Some((byte_idx, _)) => &input[..byte_idx],
            None => input,
        }
    }

    pub fn evaluate(
        &self,
        checkpoint: Checkpoint,
        input: &str,
    ) -> (GuardrailsDecision, Vec<StageEvent>) {
        let mut events = Vec::new();

        if !self.config.enabled {
            let decision = GuardrailsDecision {
                decision: GuardrailsDecisionKind::Allow,
                reason: "guardrails.disabled".into(),
            };
            events.push(decision_event(checkpoint, &decision));
            return (decision, events);
        }

        let excerpt = self.excerpt(input);

        if let Some(ForcedGuardrailsDecision { checkpoint: forced_checkpoint, blocked, reason }) =
            &self.config.forced_decision
        {
            if *forced_checkpoint == checkpoint {
                let decision = GuardrailsDecision {
                    decision: if *blocked {
                        GuardrailsDecisionKind::Block
                    } else {
                        GuardrailsDecisionKind::Allow
                    },
                    reason: reason.clone(),
                };
                events.push(event(
                    "guardrails.forced",
                    serde_json::json!({ "reason": reason, "excerpt_len": excerpt.len() }),
                ));
                events.push(decision_event(checkpoint, &decision));
                return (decision, events);
            }
        }

        let decision = GuardrailsDecision {
            decision: GuardrailsDecisionKind::Allow,
            reason: "default".into(),
        };
        events.push(decision_event(checkpoint, &decision));
        (decision, events)
    }
}

fn decision_event(checkpoint: Checkpoint, decision: &GuardrailsDecision) -> StageEvent {
    event(
        "guardrails.decision",
        serde_json::json!({
            "checkpoint": checkpoint,
            "decision": match decision.decision {
                GuardrailsDecisionKind::Allow => "ALLOW",
                GuardrailsDecisionKind::Block => "BLOCK",
            },
            "reason": decision.reason,
        }),
    )
}

fn event(kind: &str, data: serde_json::Value) -> StageEvent {
    StageEvent { kind: kind.to_string(), data, timestamp: chrono::Utc::now() }
}

/// Wires [`GuardrailsStage`] into the DAG. `extract_input` pulls the
/// text to evaluate out of the snapshot/prior outputs — the user's raw
/// input for PRE_LLM, or a proposed assistant/action payload further
/// downstream.
pub struct GuardrailsGuardStage {
    checkpoint: Checkpoint,
    stage: GuardrailsStage,
    extract_input: Arc<dyn Fn(&StageContext) -> String + Send + Sync>,
}

impl GuardrailsGuardStage {
    pub fn new(
        checkpoint: Checkpoint,
        config: GuardrailsConfig,
        extract_input: impl Fn(&StageContext) -> String + Send + Sync + 'static,
    ) -> Self {
        Self { checkpoint, stage: GuardrailsStage::new(config), extract_input: Arc::new(extract_input) }
    }
}

#[async_trait::async_trait]
impl Stage for GuardrailsGuardStage {
    async fn execute(&self, mut ctx: StageContext) -> StageOutput {
        let input = (self.extract_input)(&ctx);
        let (decision, events) = self.stage.evaluate(self.checkpoint, &input);
        for e in events {
            ctx.emit_event(e.kind, e.data);
        }

        let mut data = HashMap::new();
        data.insert(
            "guardrails_decision".to_string(),
            serde_json::json!(match decision.decision {
                GuardrailsDecisionKind::Allow => "ALLOW",
                GuardrailsDecisionKind::Block => "BLOCK",
            }),
        );
        data.insert("guardrails_reason".to_string(), serde_json::json!(decision.reason));

        ctx.into_output(StageOutput::ok(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn excerpt_truncates_to_configured_length() {
        let mut cfg = GuardrailsConfig::default();
        cfg.input_excerpt_max_chars = 5;
        let stage = GuardrailsStage::new(cfg);
        assert_eq!(stage.excerpt("hello world"), "hello");
    }

    #[test]
    fn excerpt_passes_through_shorter_input() {
        let stage = GuardrailsStage::new(GuardrailsConfig::default());
        assert_eq!(stage.excerpt("hi"), "hi");
    }

    #[test]
    fn default_allows_and_emits_decision_event() {
        let stage = GuardrailsStage::new(GuardrailsConfig::default());
        let (decision, events) = stage.evaluate(Checkpoint::PreLlm, "hello");
        assert_eq!(decision.decision, GuardrailsDecisionKind::Allow);
        assert!(events.iter().any(|e| e.kind == "guardrails.decision"));
    }

    #[test]
    fn forced_block_at_matching_checkpoint() {
        let mut cfg = GuardrailsConfig::default();
        cfg.forced_decision = Some(ForcedGuardrailsDecision {
            checkpoint: Checkpoint::PreLlm,
            blocked: true,
            reason: "test_block".into(),
        });
        let stage = GuardrailsStage::new(cfg);
        let (decision, events) = stage.evaluate(Checkpoint::PreLlm, "hello");
        assert_eq!(decision.decision, GuardrailsDecisionKind::Block);
        assert!(events.iter().any(|e| e.kind == "guardrails.forced"));
    }

    #[test]
    fn forced_decision_ignored_at_other_checkpoints() {
        let mut cfg = GuardrailsConfig::default();
        cfg.forced_decision = Some(ForcedGuardrailsDecision {
            checkpoint: Checkpoint::PrePersist,
            blocked: true,
            reason: "test_block".into(),
        });
        let stage = GuardrailsStage::new(cfg);
        let (decision, _) = stage.evaluate(Checkpoint::PreLlm, "hello");
        assert_eq!(decision.decision, GuardrailsDecisionKind::Allow);
    }

    #[test]
    fn disabled_guardrails_always_allows() {
        let mut cfg = GuardrailsConfig::default();
        cfg.enabled = false;
        let stage = GuardrailsStage::new(cfg);
        let (decision, _) = stage.evaluate(Checkpoint::PreLlm, "anything");
        assert_eq!(decision.decision, GuardrailsDecisionKind::Allow);
    }
}
