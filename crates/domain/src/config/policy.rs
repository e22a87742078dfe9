use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Policy gateway config (spec.md §4.5, §6.3 `policy_*`)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    #[serde(default = "d_true")]
    pub enabled: bool,
    /// Forced decision for test mode (rule 1). `None` = not forced.
    #[serde(default)]
    pub forced_decision: Option<ForcedDecision>,
    /// Per-checkpoint comma-separated intent allowlists (rule 2).
    #[serde(default)]
    pub intent_rules: HashMap<Checkpoint, Vec<String>>,
    #[serde(default = "d_max_prompt_tokens")]
    pub max_prompt_tokens: u32,
    #[serde(default = "d_max_runs_per_minute")]
    pub max_runs_per_minute: u32,
    /// Max tokens the LLM stage itself may request (separate from the
    /// prompt-token budget check).
    #[serde(default)]
    pub llm_max_tokens: Option<u32>,
    /// Per-checkpoint allowed action/artifact types (rule 5).
    #[serde(default)]
    pub escalation_action_types: HashMap<Checkpoint, Vec<String>>,
    #[serde(default)]
    pub escalation_artifact_types: HashMap<Checkpoint, Vec<String>>,
    #[serde(default = "d_max_artifacts")]
    pub max_artifacts: u32,
    #[serde(default = "d_max_artifact_payload_bytes")]
    pub max_artifact_payload_bytes: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            forced_decision: None,
            intent_rules: HashMap::new(),
            max_prompt_tokens: d_max_prompt_tokens(),
            max_runs_per_minute: d_max_runs_per_minute(),
            llm_max_tokens: None,
            escalation_action_types: HashMap::new(),
            escalation_artifact_types: HashMap::new(),
            max_artifacts: d_max_artifacts(),
            max_artifact_payload_bytes: d_max_artifact_payload_bytes(),
        }
    }
}

/// The three fixed policy/guardrails checkpoints (spec.md §4.5, GLOSSARY).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Checkpoint {
    PreLlm,
    PreAction,
    PrePersist,
}

/// `PolicyDecision ∈ {ALLOW, BLOCK, REQUIRE_APPROVAL}` (spec.md §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PolicyDecisionKind {
    Allow,
    Block,
    RequireApproval,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForcedDecision {
    pub checkpoint: Checkpoint,
    pub decision: PolicyDecisionKind,
    pub reason: String,
}

fn d_true() -> bool {
    true
}
fn d_max_prompt_tokens() -> u32 {
    8_000
}
fn d_max_runs_per_minute() -> u32 {
    20
}
fn d_max_artifacts() -> u32 {
    10
}
fn d_max_artifact_payload_bytes() -> u64 {
    1_000_000
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Guardrails config (spec.md §4.6, §6.3 `guardrails_*`)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardrailsConfig {
    #[serde(default = "d_true")]
    pub enabled: bool,
    /// Forced decision for tests, at a specific checkpoint.
    #[serde(default)]
    pub forced_decision: Option<ForcedGuardrailsDecision>,
    #[serde(default = "d_excerpt_len")]
    pub input_excerpt_max_chars: usize,
}

impl Default for GuardrailsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            forced_decision: None,
            input_excerpt_max_chars: d_excerpt_len(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForcedGuardrailsDecision {
    pub checkpoint: Checkpoint,
    pub blocked: bool,
    pub reason: String,
}

fn d_excerpt_len() -> usize {
    5_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_is_enabled_with_spec_defaults() {
        let cfg = PolicyConfig::default();
        assert!(cfg.enabled);
        assert_eq!(cfg.max_prompt_tokens, 8_000);
        assert_eq!(cfg.max_artifact_payload_bytes, 1_000_000);
    }

    #[test]
    fn guardrails_excerpt_default_is_5000() {
        assert_eq!(GuardrailsConfig::default().input_excerpt_max_chars, 5_000);
    }
}
