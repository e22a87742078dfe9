//! LLM router.
//!
//! The router resolves `llm_model_choice` (`model1`/`model2`) to a concrete
//! provider/model pair, consults the [`CircuitBreaker`] before dispatching,
//! and falls back to `llm_backup_provider` when the primary call fails with
//! a retriable error.

use crate::circuit_breaker::{Admission, CircuitBreaker};
use crate::registry::ProviderRegistry;
use crate::traits::{ChatRequest, ChatResponse, LlmProvider};
use tf_domain::config::{CircuitBreakerConfig, LlmConfig, ModelChoice};
use tf_domain::error::{Error, Result};
use tf_domain::stream::{BoxStream, StreamEvent};
use tf_domain::trace::TraceEvent;
use std::sync::Arc;
use std::time::Instant;

/// The resolved (provider id, model name) pair for a model choice.
pub type ResolvedModel = (String, String);

pub struct LlmRouter {
    registry: ProviderRegistry,
    breaker: CircuitBreaker,
    model1_id: String,
    model2_id: String,
    backup_provider: Option<String>,
    default_timeout_ms: u64,
}

impl LlmRouter {
    pub fn from_config(llm_config: &LlmConfig, breaker_config: &CircuitBreakerConfig) -> Result<Self> {
        let registry = ProviderRegistry::from_config(llm_config)?;
        Ok(Self::new(registry, llm_config, breaker_config))
    }

    /// Build from an already-constructed registry (useful for testing).
    pub fn new(registry: ProviderRegistry, llm_config: &LlmConfig, breaker_config: &CircuitBreakerConfig) -> Self {
        Self {
            registry,
            breaker: CircuitBreaker::new(breaker_config.clone()),
            model1_id: llm_config.model1_id.clone(),
            model2_id: llm_config.model2_id.clone(),
            backup_provider: llm_config.backup_provider.clone(),
            default_timeout_ms: llm_config.default_timeout_ms,
        }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Resolve a [`ModelChoice`] to its configured `provider/model` pair.
    pub fn resolve_choice(&self, choice: ModelChoice) -> ResolvedModel {
        let spec = match choice {
            ModelChoice::Model1 => &self.model1_id,
            ModelChoice::Model2 => &self.model2_id,
        };
        let (provider, model) = resolve_model(spec);
        (provider.to_string(), model.to_string())
    }

    /// Stream a chat completion for the configured model choice, falling
    /// back to `llm_backup_provider` (reusing the same model suffix) on a
    /// retriable failure, and consulting the circuit breaker first.
    pub async fn chat_stream_for_choice(
        &self,
        choice: ModelChoice,
        mut req: ChatRequest,
    ) -> Result<(ResolvedModel, BoxStream<'static, Result<StreamEvent>>)> {
        let (provider_id, model_name) = self.resolve_choice(choice);

        if let Some(provider) = self.registry.get(&provider_id) {
            match self.breaker.admit("llm", &provider_id, &model_name) {
                Admission::Deny => {
                    return Err(Error::CircuitOpen {
                        operation: "llm".into(),
                        provider: provider_id.clone(),
                        model: model_name.clone(),
                    });
                }
                Admission::Allow | Admission::AllowObserved => {}
            }

            req.model = Some(model_name.clone());
            TraceEvent::LlmStarted {
                pipeline_run_id: String::new(),
                provider: provider_id.clone(),
                model: model_name.clone(),
            }
            .emit();

            match self.try_stream(&provider, &req).await {
                Ok(stream) => {
                    self.breaker.record_success("llm", &provider_id, &model_name);
                    return Ok(((provider_id, model_name), stream));
                }
                Err(e) if Self::is_retriable(&e) => {
                    self.breaker.record_failure("llm", &provider_id, &model_name);
                    tracing::warn!(
                        provider = %provider_id,
                        model = %model_name,
                        error = %e,
                        "primary model failed, trying backup provider"
                    );
                }
                Err(e) => {
                    self.breaker.record_failure("llm", &provider_id, &model_name);
                    return Err(e);
                }
            }
        } else {
            tracing::warn!(provider = %provider_id, "primary provider not found in registry");
        }

        let backup_id = self
            .backup_provider
            .clone()
            .ok_or_else(|| Error::Provider {
                provider: "router".into(),
                message: format!("model '{}/{}' unavailable and no backup provider configured", provider_id, model_name),
            })?;
        let backup = self.registry.get(&backup_id).ok_or_else(|| Error::Provider {
            provider: "router".into(),
            message: format!("backup provider '{}' not found in registry", backup_id),
        })?;

        if self.breaker.admit("llm", &backup_id, &model_name) == Admission::Deny {
            return Err(Error::CircuitOpen {
                operation: "llm".into(),
                provider: backup_id,
                model: model_name,
            });
        }

        req.model = Some(model_name.clone());
        match self.try_stream(&backup, &req).await {
            Ok(stream) => {
                self.breaker.record_success("llm", &backup_id, &model_name);
                Ok(((backup_id, model_name), stream))
            }
            Err(e) => {
                self.breaker.record_failure("llm", &backup_id, &model_name);
                Err(e)
            }
        }
    }

    /// Non-streaming chat, used by summarization. Same breaker/fallback
    /// behavior as [`Self::chat_stream_for_choice`] but waits for the full
    /// response.
    pub async fn chat_for_choice(&self, choice: ModelChoice, mut req: ChatRequest) -> Result<ChatResponse> {
        let (provider_id, model_name) = self.resolve_choice(choice);
        let provider = self.registry.get(&provider_id).ok_or_else(|| Error::Provider {
            provider: "router".into(),
            message: format!("provider '{}' not found in registry", provider_id),
        })?;

        if self.breaker.admit("llm", &provider_id, &model_name) == Admission::Deny {
            return Err(Error::CircuitOpen {
                operation: "llm".into(),
                provider: provider_id,
                model: model_name,
            });
        }

        req.model = Some(model_name.clone());
        let timeout = std::time::Duration::from_millis(self.default_timeout_ms);
        let start = Instant::now();
        let result = match tokio::time::timeout(timeout, provider.chat(&req)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!(
                "provider '{}' timed out after {}ms",
                provider_id, self.default_timeout_ms
            ))),
        };
        let _elapsed = start.elapsed();

        match &result {
            Ok(_) => self.breaker.record_success("llm", &provider_id, &model_name),
            Err(_) => self.breaker.record_failure("llm", &provider_id, &model_name),
        }
        result
    }

    async fn try_stream(
        &self,
        provider: &Arc<dyn LlmProvider>,
        req: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let timeout = std::time::Duration::from_secs(self.default_timeout_ms / 1000);
        match tokio::time::timeout(timeout, provider.chat_stream(req)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!(
                "provider '{}' timed out establishing stream after {}ms",
                provider.provider_id(),
                self.default_timeout_ms
            ))),
        }
    }

    fn is_retriable(err: &Error) -> bool {
        match err {
            Error::Timeout(_) => true,
            Error::Http(_) => true,
            Error::Provider { message, .. } => {
                message.contains("HTTP 5")
                    || message.contains("HTTP 502")
                    || message.contains("HTTP 503")
                    || message.contains("HTTP 504")
                    || message.contains("HTTP 500")
                    || message.contains("HTTP 529")
            }
            _ => false,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Split a `"provider_id/model_name"` string into its two components.
///
/// If there is no `/`, the entire string is treated as the provider id
/// and an empty model name is returned (the provider's default will be used).
pub fn resolve_model(model_str: &str) -> (&str, &str) {
    match model_str.split_once('/') {
        Some((provider, model)) => (provider, model),
        None => (model_str, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_model_splits_on_slash() {
        assert_eq!(resolve_model("groq/llama-3.3-70b"), ("groq", "llama-3.3-70b"));
    }

    #[test]
    fn resolve_model_no_slash_is_bare_provider() {
        assert_eq!(resolve_model("groq"), ("groq", ""));
    }

    #[test]
    fn resolve_model_nested_model_name_keeps_remainder() {
        assert_eq!(
            resolve_model("openrouter/anthropic/claude-sonnet-4"),
            ("openrouter", "anthropic/claude-sonnet-4")
        );
    }
}
