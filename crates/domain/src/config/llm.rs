use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM provider system
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Maps onto §6.3's `llm_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// `llm_model_choice` — which of `model1`/`model2` a connection uses
    /// absent a per-connection override.
    #[serde(default)]
    pub model_choice: ModelChoice,
    /// `llm_model1_id`.
    #[serde(default = "d_model1")]
    pub model1_id: String,
    /// `llm_model2_id`.
    #[serde(default = "d_model2")]
    pub model2_id: String,
    /// `triage_model_id` — triage itself is out of scope; the id is kept
    /// here so the out-of-scope stage has somewhere to read it from.
    #[serde(default)]
    pub triage_model_id: Option<String>,
    /// `llm_backup_provider` — empty/`None` disables fallback entirely.
    #[serde(default)]
    pub backup_provider: Option<String>,
    /// `assessment_backup_provider`.
    #[serde(default)]
    pub assessment_backup_provider: Option<String>,
    #[serde(default = "d_20000u")]
    pub default_timeout_ms: u64,
    /// `provider_timeout_llm_stream_ttft_seconds`.
    #[serde(default = "d_10")]
    pub stream_ttft_timeout_seconds: u64,
    /// Registered LLM providers (data-driven: adding a provider = adding config).
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    /// Per-model pricing for cost estimation (key = model id).
    #[serde(default)]
    pub pricing: HashMap<String, ModelPricing>,
    #[serde(default)]
    pub startup_policy: LlmStartupPolicy,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model_choice: ModelChoice::Model1,
            model1_id: d_model1(),
            model2_id: d_model2(),
            triage_model_id: None,
            backup_provider: None,
            assessment_backup_provider: None,
            default_timeout_ms: 20_000,
            stream_ttft_timeout_seconds: 10,
            providers: Vec::new(),
            pricing: HashMap::new(),
            startup_policy: LlmStartupPolicy::AllowNone,
        }
    }
}

/// `llm_model_choice ∈ {model1, model2}` (spec.md §6.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ModelChoice {
    #[default]
    Model1,
    Model2,
}

/// Controls whether the gateway aborts startup when zero LLM providers
/// initialize successfully (mirrors the teacher's dev-friendly default).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LlmStartupPolicy {
    #[default]
    AllowNone,
    RequireOne,
}

/// Pricing per million tokens for a specific model, feeding
/// `ProviderCall.cost_cents`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ModelPricing {
    pub input_per_1m: f64,
    pub output_per_1m: f64,
}

impl ModelPricing {
    /// Estimated cost in whole cents for the given token counts.
    pub fn estimate_cost_cents(&self, input_tokens: u32, output_tokens: u32) -> f64 {
        let usd = (input_tokens as f64 * self.input_per_1m
            + output_tokens as f64 * self.output_per_1m)
            / 1_000_000.0;
        usd * 100.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    pub kind: ProviderKind,
    pub base_url: String,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub default_model: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    OpenaiCompat,
    Anthropic,
    Google,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthConfig {
    #[serde(default)]
    pub mode: AuthMode,
    /// Env var containing the key.
    #[serde(default)]
    pub env: Option<String>,
    /// Direct key (config-only setups; prefer env in production).
    #[serde(default)]
    pub key: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    #[default]
    ApiKey,
    QueryParam,
    None,
}

// ── serde default helpers ───────────────────────────────────────────

fn d_model1() -> String {
    "groq/llama-3.3-70b-versatile".into()
}
fn d_model2() -> String {
    "openrouter/anthropic/claude-sonnet-4".into()
}
fn d_20000u() -> u64 {
    20_000
}
fn d_10() -> u64 {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_pricing_estimate_cost_cents() {
        let pricing = ModelPricing {
            input_per_1m: 2.50,
            output_per_1m: 10.00,
        };
        // 1000 input @ $2.50/1M = $0.0025; 500 output @ $10/1M = $0.005
        // total $0.0075 = 0.75 cents
        let cents = pricing.estimate_cost_cents(1000, 500);
        assert!((cents - 0.75).abs() < 1e-9);
    }

    #[test]
    fn model_pricing_zero_tokens() {
        let pricing = ModelPricing {
            input_per_1m: 5.00,
            output_per_1m: 15.00,
        };
        assert_eq!(pricing.estimate_cost_cents(0, 0), 0.0);
    }

    #[test]
    fn llm_config_default_model_choice_is_model1() {
        assert_eq!(LlmConfig::default().model_choice, ModelChoice::Model1);
    }

    #[test]
    fn llm_config_pricing_deserializes() {
        let json = r#"{
            "pricing": {
                "llama-3.3-70b-versatile": { "input_per_1m": 0.59, "output_per_1m": 0.79 }
            }
        }"#;
        let config: LlmConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.pricing.len(), 1);
    }

    #[test]
    fn model_choice_serde_roundtrip() {
        for choice in &["model1", "model2"] {
            let json = format!("\"{}\"", choice);
            let parsed: ModelChoice = serde_json::from_str(&json).unwrap();
            let back = serde_json::to_string(&parsed).unwrap();
            assert_eq!(back, json);
        }
    }
}
