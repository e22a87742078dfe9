//! Integration tests for the LLM router across provider resolution, the
//! circuit breaker, and primary/backup fallback, without requiring any
//! live provider endpoint.

use tf_domain::config::{CircuitBreakerConfig, LlmConfig, ModelChoice};
use tf_domain::error::Error;
use tf_providers::{ChatRequest, LlmRouter, ProviderRegistry};

fn config(model1: &str, model2: &str, backup: Option<&str>) -> LlmConfig {
    LlmConfig {
        model1_id: model1.to_string(),
        model2_id: model2.to_string(),
        backup_provider: backup.map(str::to_string),
        ..LlmConfig::default()
    }
}

fn router(llm_config: &LlmConfig, breaker_config: &CircuitBreakerConfig) -> LlmRouter {
    let registry = ProviderRegistry::from_config(llm_config).unwrap();
    LlmRouter::new(registry, llm_config, breaker_config)
}

#[test]
fn resolve_choice_maps_model1_and_model2_independently() {
    let llm_config = config("groq/llama-3.3-70b", "anthropic/claude-sonnet-4", None);
    let router = router(&llm_config, &CircuitBreakerConfig::default());

    assert_eq!(
        router.resolve_choice(ModelChoice::Model1),
        ("groq".to_string(), "llama-3.3-70b".to_string())
    );
    assert_eq!(
        router.resolve_choice(ModelChoice::Model2),
        ("anthropic".to_string(), "claude-sonnet-4".to_string())
    );
}

#[tokio::test]
async fn missing_primary_provider_without_backup_fails_clearly() {
    let llm_config = config("ghost/model-a", "ghost/model-b", None);
    let router = router(&llm_config, &CircuitBreakerConfig::default());

    let result = router.chat_stream_for_choice(ModelChoice::Model1, ChatRequest::default()).await;

    match result {
        Err(Error::Provider { provider, message }) => {
            assert_eq!(provider, "router");
            assert!(message.contains("unavailable"));
        }
        other => panic!("expected Error::Provider, got {other:?}"),
    }
}

#[tokio::test]
async fn missing_primary_falls_through_to_missing_backup_error() {
    let llm_config = config("ghost/model-a", "ghost/model-b", Some("also-ghost"));
    let router = router(&llm_config, &CircuitBreakerConfig::default());

    // Neither the primary nor the backup provider is registered, so the
    // router surfaces a clear "not found" error instead of panicking or
    // silently returning an empty stream.
    let result = router.chat_stream_for_choice(ModelChoice::Model1, ChatRequest::default()).await;
    assert!(matches!(result, Err(Error::Provider { .. })));
}

#[tokio::test]
async fn missing_provider_fails_non_streaming_call_the_same_way() {
    let llm_config = config("ghost/model-a", "ghost/model-b", None);
    let router = router(&llm_config, &CircuitBreakerConfig::default());

    let result = router.chat_for_choice(ModelChoice::Model1, ChatRequest::default()).await;
    match result {
        Err(Error::Provider { provider, .. }) => assert_eq!(provider, "router"),
        other => panic!("expected Error::Provider, got {other:?}"),
    }
}

#[test]
fn empty_provider_list_yields_empty_registry_without_erroring() {
    let llm_config = LlmConfig::default();
    let registry = ProviderRegistry::from_config(&llm_config).unwrap();
    assert!(registry.is_empty());
    assert_eq!(registry.list_providers().len(), 0);
}

#[test]
fn resolve_model_helper_splits_provider_and_model() {
    assert_eq!(
        tf_providers::router::resolve_model("groq/llama-3.3-70b"),
        ("groq", "llama-3.3-70b")
    );
}
