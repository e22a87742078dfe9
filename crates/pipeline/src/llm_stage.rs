//! LLM streaming stage with incremental TTS fan-out (spec.md §4.4).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use serde_json::json;
use tf_domain::config::ModelChoice;
use tf_domain::entities::{ProviderCall, ProviderOperation};
use tf_domain::error::Result as DomainResult;
use tf_domain::message::Message;
use tf_domain::stage::{StageContext, StageOutput};
use tf_domain::stream::StreamEvent;
use tf_providers::{ChatRequest, LlmRouter};
use uuid::Uuid;

use crate::dag::Stage;
use crate::provider_log::ProviderCallSink;

/// Synthesizes speech for a slice of text. Implementations wrap a TTS
/// vendor's HTTP API the same way `LlmProvider` wraps an LLM's.
#[async_trait::async_trait]
pub trait TtsProvider: Send + Sync {
    async fn synthesize(&self, text: &str) -> DomainResult<Vec<u8>>;
    fn provider_id(&self) -> &str;
}

const TTS_MAX_RETRIES: u32 = 2;
const TTS_BASE_BACKOFF: Duration = Duration::from_secs(1);
const CLAUSE_FALLBACK_THRESHOLD: usize = 80;
const CLAUSE_MIN_LEN: usize = 10;
const SENTENCE_MIN_LEN: usize = 2;

pub struct LlmStage {
    router: Arc<LlmRouter>,
    model_choice: ModelChoice,
    max_tokens: Option<u32>,
    tts: Option<Arc<dyn TtsProvider>>,
    call_log: Option<Arc<dyn ProviderCallSink>>,
}

impl LlmStage {
    pub fn new(router: Arc<LlmRouter>, model_choice: ModelChoice, max_tokens: Option<u32>) -> Self {
        Self { router, model_choice, max_tokens, tts: None, call_log: None }
    }

    pub fn with_tts(mut self, tts: Arc<dyn TtsProvider>) -> Self {
        self.tts = Some(tts);
        self
    }

    pub fn with_call_log(mut self, call_log: Arc<dyn ProviderCallSink>) -> Self {
        self.call_log = Some(call_log);
        self
    }
}

#[async_trait::async_trait]
impl Stage for LlmStage {
    async fn execute(&self, mut ctx: StageContext) -> StageOutput {
        if let Some(reason) = blocked_reason(&ctx) {
            return ctx.into_output(StageOutput::skip(reason));
        }

        let messages: Vec<Message> =
            ctx.snapshot.messages.iter().map(|m| m.to_provider_message()).collect();
        let prompt_messages = serde_json::to_value(&messages).ok();

        let request = ChatRequest {
            messages,
            temperature: None,
            max_tokens: self.max_tokens,
            json_mode: false,
            model: None,
        };

        ctx.emit_event("llm.started", json!({}));
        (ctx.inputs.ports.send_status)("llm", "started", json!({}));

        let stage_start = Instant::now();
        let (intended_provider, intended_model) = self.router.resolve_choice(self.model_choice);
        let (resolved, stream) =
            match self.router.chat_stream_for_choice(self.model_choice, request).await {
                Ok(v) => v,
                Err(err) => {
                    self.log_call(
                        &ctx,
                        &intended_provider,
                        &intended_model,
                        prompt_messages.clone(),
                        None,
                        stage_start.elapsed().as_millis() as u64,
                        false,
                        Some(err.to_string()),
                    );
                    let output = StageOutput::fail(format!(
                        "LlmStreamFailure(stream_token_count=0): {err}"
                    ));
                    return ctx.into_output(output);
                }
            };
        let (provider_id, model_name) = resolved;

        let mut stream = stream;
        let mut full_text = String::new();
        let mut stream_token_count: u32 = 0;
        let mut first_token_at: Option<Instant> = None;
        let mut tts_sent_position: usize = 0;
        let first_audio_emitted = AtomicBool::new(false);
        let mut finish_reason: Option<String> = None;
        let mut usage: Option<tf_domain::stream::Usage> = None;

        loop {
            let event = match stream.next().await {
                Some(event) => event,
                None => break,
            };

            match event {
                Ok(StreamEvent::Token { text }) => {
                    if first_token_at.is_none() {
                        first_token_at = Some(Instant::now());
                        let ttft_ms = stage_start.elapsed().as_millis() as u64;
                        ctx.emit_event("llm.first_token", json!({ "ttft_ms": ttft_ms }));
                        (ctx.inputs.ports.send_status)("llm", "streaming", json!({}));
                    }

                    full_text.push_str(&text);
                    stream_token_count += 1;
                    (ctx.inputs.ports.send_token)(&text);

                    if let Some(tts) = &self.tts {
                        self.drain_tts(
                            &mut ctx,
                            tts,
                            &full_text,
                            &mut tts_sent_position,
                            &first_audio_emitted,
                            stage_start,
                        )
                        .await;
                    }
                }
                Ok(StreamEvent::Done { finish_reason: reason, usage: call_usage }) => {
                    finish_reason = reason;
                    usage = call_usage;
                    break;
                }
                Ok(StreamEvent::Error { message }) => {
                    self.log_call(
                        &ctx,
                        &provider_id,
                        &model_name,
                        prompt_messages.clone(),
                        Some(&full_text),
                        stage_start.elapsed().as_millis() as u64,
                        false,
                        Some(message.clone()),
                    );
                    let output = if first_token_at.is_none() {
                        StageOutput::fail(format!("LlmStreamFailure(stream_token_count=0): {message}"))
                    } else {
                        StageOutput::fail(format!(
                            "LlmStreamFailure(stream_token_count={stream_token_count}): {message}"
                        ))
                    };
                    return ctx.into_output(output);
                }
                Err(err) => {
                    self.log_call(
                        &ctx,
                        &provider_id,
                        &model_name,
                        prompt_messages.clone(),
                        Some(&full_text),
                        stage_start.elapsed().as_millis() as u64,
                        false,
                        Some(err.to_string()),
                    );
                    let output = if first_token_at.is_none() {
                        StageOutput::fail(format!("LlmStreamFailure(stream_token_count=0): {err}"))
                    } else {
                        StageOutput::fail(format!(
                            "LlmStreamFailure(stream_token_count={stream_token_count}): {err}"
                        ))
                    };
                    return ctx.into_output(output);
                }
            }
        }

        if let Some(tts) = &self.tts {
            if tts_sent_position < full_text.len() {
                let tail = &full_text[tts_sent_position..];
                if !tail.trim().is_empty() {
                    let _ = self.synthesize_with_retry(&mut ctx, tts, tail, true).await;
                }
            }
        }

        let ttft_ms = first_token_at.map(|t| (t - stage_start).as_millis() as u64);
        ctx.emit_event(
            "llm.completed",
            json!({
                "stream_token_count": stream_token_count,
                "ttft_ms": ttft_ms,
                "provider": provider_id,
                "model": model_name,
            }),
        );
        (ctx.inputs.ports.send_status)(
            "llm",
            "complete",
            json!({
                "token_count": stream_token_count,
                "duration_ms": stage_start.elapsed().as_millis() as u64,
                "provider": provider_id,
                "model": model_name,
                "finish_reason": finish_reason,
            }),
        );

        self.log_call_with_usage(
            &ctx,
            &provider_id,
            &model_name,
            prompt_messages,
            Some(&full_text),
            stage_start.elapsed().as_millis() as u64,
            true,
            None,
            usage,
        );

        let mut data = std::collections::HashMap::new();
        data.insert("full_text".to_string(), json!(full_text));
        data.insert("stream_token_count".to_string(), json!(stream_token_count));
        data.insert("provider".to_string(), json!(provider_id));
        data.insert("model".to_string(), json!(model_name));
        data.insert("ttft_ms".to_string(), json!(ttft_ms));

        ctx.into_output(StageOutput::ok(data))
    }
}

impl LlmStage {
    async fn drain_tts(
        &self,
        ctx: &mut StageContext,
        tts: &Arc<dyn TtsProvider>,
        full_text: &str,
        tts_sent_position: &mut usize,
        first_audio_emitted: &AtomicBool,
        pipeline_start: Instant,
    ) {
        let tail = &full_text[*tts_sent_position..];

        let slice_end = find_sentence_boundary(tail, SENTENCE_MIN_LEN).or_else(|| {
            if tail.len() > CLAUSE_FALLBACK_THRESHOLD {
                find_clause_boundary(tail, CLAUSE_MIN_LEN)
            } else {
                None
            }
        });

        let Some(end) = slice_end else { return };
        let chunk = sanitize_for_tts(&tail[..end]);
        *tts_sent_position += end;

        if chunk.is_empty() {
            return;
        }

        if let Some(audio) = self.synthesize_with_retry(ctx, tts, &chunk, false).await {
            if first_audio_emitted.compare_exchange(
                false,
                true,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) == Ok(false)
            {
                let ttfa_ms = pipeline_start.elapsed().as_millis() as u64;
                ctx.emit_event(
                    "audio.first_play",
                    json!({ "tts_latency_ms": ttfa_ms, "audio_duration_ms": audio.len() }),
                );
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn log_call(
        &self,
        ctx: &StageContext,
        provider: &str,
        model: &str,
        prompt_messages: Option<serde_json::Value>,
        output_content: Option<&str>,
        latency_ms: u64,
        success: bool,
        error: Option<String>,
    ) {
        self.log_call_with_usage(
            ctx,
            provider,
            model,
            prompt_messages,
            output_content,
            latency_ms,
            success,
            error,
            None,
        );
    }

    #[allow(clippy::too_many_arguments)]
    fn log_call_with_usage(
        &self,
        ctx: &StageContext,
        provider: &str,
        model: &str,
        prompt_messages: Option<serde_json::Value>,
        output_content: Option<&str>,
        latency_ms: u64,
        success: bool,
        error: Option<String>,
        usage: Option<tf_domain::stream::Usage>,
    ) {
        let Some(sink) = &self.call_log else { return };
        sink.record(ProviderCall {
            id: Uuid::new_v4(),
            pipeline_run_id: Some(ctx.snapshot.pipeline_run_id),
            session_id: ctx.snapshot.session_id,
            user_id: ctx.snapshot.user_id,
            service: format!("{:?}", ctx.snapshot.topology),
            operation: ProviderOperation::Llm,
            provider: provider.to_string(),
            model_id: model.to_string(),
            prompt_messages,
            output_content: output_content.map(str::to_string),
            output_parsed: None,
            latency_ms,
            tokens_in: usage.map(|u| u.prompt_tokens),
            tokens_out: usage.map(|u| u.completion_tokens),
            audio_duration_ms: None,
            cost_cents: None,
            success,
            error,
            created_at: chrono::Utc::now(),
        });
    }

    async fn synthesize_with_retry(
        &self,
        ctx: &mut StageContext,
        tts: &Arc<dyn TtsProvider>,
        text: &str,
        is_final: bool,
    ) -> Option<Vec<u8>> {
        let mut attempt = 0;
        loop {
            match tts.synthesize(text).await {
                Ok(audio) => {
                    if let Some(send_audio) = &ctx.inputs.ports.send_audio_chunk {
                        send_audio(&audio, is_final);
                    }
                    return Some(audio);
                }
                Err(err) if attempt < TTS_MAX_RETRIES => {
                    attempt += 1;
                    tokio::time::sleep(TTS_BASE_BACKOFF * 2u32.pow(attempt - 1)).await;
                    let _ = err;
                }
                Err(err) => {
                    ctx.emit_event(
                        "tts.failed",
                        json!({ "provider": tts.provider_id(), "error": err.to_string() }),
                    );
                    return None;
                }
            }
        }
    }
}

/// First `[.!?]\s+` boundary in `tail`, requiring the sentence candidate
/// (everything before the terminator) to be longer than `min_len`.
fn find_sentence_boundary(tail: &str, min_len: usize) -> Option<usize> {
    let bytes = tail.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        if matches!(b, b'.' | b'!' | b'?') && i + 1 < bytes.len() && bytes[i + 1].is_ascii_whitespace()
        {
            if i > min_len {
                return Some(i + 2);
            }
        }
    }
    None
}

/// First `[,;:]\s+` boundary, same contract as [`find_sentence_boundary`].
fn find_clause_boundary(tail: &str, min_len: usize) -> Option<usize> {
    let bytes = tail.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        if matches!(b, b',' | b';' | b':') && i + 1 < bytes.len() && bytes[i + 1].is_ascii_whitespace()
        {
            if i > min_len {
                return Some(i + 2);
            }
        }
    }
    None
}

/// A declared policy/guardrails dependency with a `BLOCK` decision skips
/// the LLM call entirely; the orchestrator is responsible for turning a
/// `SKIP` here into the canned safe completion (spec.md §7).
fn blocked_reason(ctx: &StageContext) -> Option<String> {
    if ctx.inputs.get("policy_decision", None).as_ref().and_then(|v| v.as_str()) == Some("BLOCK")
    {
        let reason = ctx
            .inputs
            .get("policy_reason", None)
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| "policy_blocked".to_string());
        return Some(format!("policy_blocked: {reason}"));
    }
    if ctx.inputs.get("guardrails_decision", None).as_ref().and_then(|v| v.as_str())
        == Some("BLOCK")
    {
        let reason = ctx
            .inputs
            .get("guardrails_reason", None)
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| "guardrails_blocked".to_string());
        return Some(format!("guardrails_blocked: {reason}"));
    }
    None
}

/// Strips markdown emphasis/heading/code markers that would otherwise be
/// read aloud literally by most TTS vendors.
fn sanitize_for_tts(text: &str) -> String {
    text.chars()
        .filter(|c| !matches!(c, '*' | '_' | '#' | '`'))
        .collect::<String>()
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentence_boundary_requires_min_length() {
        assert_eq!(find_sentence_boundary("Hi. ", 2), None);
        assert_eq!(find_sentence_boundary("Hello there. ", 2), Some(13));
    }

    #[test]
    fn sentence_boundary_absent_returns_none() {
        assert_eq!(find_sentence_boundary("no terminator here", 2), None);
    }

    #[test]
    fn clause_boundary_requires_min_length() {
        assert_eq!(find_clause_boundary("ok, ", 10), None);
        assert_eq!(find_clause_boundary("a rather long clause, ", 10), Some(22));
    }

    #[test]
    fn sanitize_strips_markdown_markers() {
        assert_eq!(sanitize_for_tts("**hello** `world`"), "hello world");
    }
}
