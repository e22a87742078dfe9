//! Pipeline orchestrator (spec.md §4.3).
//!
//! Wraps a [`DagExecutor`] run with `PipelineRun` bookkeeping, metadata
//! injection on the outbound callbacks, and DLQ writes on failure.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::json;
use tf_domain::entities::{DeadLetterQueue, DlqStatus, PipelineRun};
use tf_domain::stage::{ContextSnapshot, StageOutput, StagePorts};
use uuid::Uuid;

use crate::cancel::CancelToken;
use crate::dag::{DagExecutor, PipelineOutcome};
use crate::event_sink::EventSink;

/// Canned text used when a run terminates via a safe completion path
/// (policy/guardrails block, circuit breaker denial, unrecoverable
/// stage failure) rather than a genuine model response (spec.md §7).
pub const CANNED_TROUBLE_MESSAGE: &str = "I'm having trouble connecting right now. Please try again in a moment.";

/// Outcome handed back to the WebSocket handler once a run finishes.
pub enum OrchestratorResult {
    /// A `chat.complete`/`voice.complete`-worthy response was produced,
    /// either from the LLM stage or a canned safe completion.
    Completed { content: String, canned: bool, run: PipelineRun },
    /// The run was cancelled (e.g. empty transcript); no completion is
    /// emitted, the client returns to listening.
    Cancelled { reason: String, run: PipelineRun },
    /// The run failed outside of any handled block path; a DLQ row was
    /// written for later replay.
    Failed { stage: String, error: String, run: PipelineRun, dlq: DeadLetterQueue },
}

pub struct Orchestrator {
    event_sink: Arc<dyn EventSink>,
}

impl Orchestrator {
    pub fn new(event_sink: Arc<dyn EventSink>) -> Self {
        Self { event_sink }
    }

    /// Run `executor` to completion for one turn, producing a
    /// `PipelineRun` row and the externally-visible [`OrchestratorResult`].
    ///
    /// `ports` carries the caller-assembled capability bag (database/
    /// chat-service/provider/queue handles, audio callbacks); the
    /// orchestrator only wraps `send_status` with request/run metadata
    /// before handing the bag to the executor.
    pub async fn run(
        &self,
        executor: &DagExecutor,
        snapshot: ContextSnapshot,
        service: &str,
        quality_mode: &str,
        mut ports: StagePorts,
        cancel: CancelToken,
    ) -> OrchestratorResult {
        let started_at = Utc::now();
        let start_instant = Instant::now();

        let mut run = PipelineRun {
            id: snapshot.pipeline_run_id,
            service: service.to_string(),
            topology: snapshot.topology,
            behavior: snapshot.behavior,
            quality_mode: quality_mode.to_string(),
            request_id: snapshot.request_id.clone(),
            session_id: snapshot.session_id,
            user_id: snapshot.user_id,
            org_id: snapshot.org_id,
            success: false,
            error: None,
            total_latency_ms: None,
            ttft_ms: None,
            ttfa_ms: None,
            ttfc_ms: None,
            tokens_in: None,
            tokens_out: None,
            cost_cents: None,
            stages: json!({}),
            run_metadata: json!({}),
            context_snapshot_metadata: json!({ "topology": snapshot.topology }),
            started_at,
            completed_at: None,
        };

        self.event_sink.record(
            run.id,
            "orchestrator".to_string(),
            tf_domain::stage::StageEvent {
                kind: "pipeline.started".to_string(),
                data: json!({ "topology": run.topology, "behavior": run.behavior }),
                timestamp: started_at,
            },
        );

        let request_id = snapshot.request_id.clone();
        let pipeline_run_id = run.id;
        ports.send_status = {
            let inner = ports.send_status.clone();
            let request_id = request_id.clone();
            Arc::new(move |service, status, mut metadata| {
                enrich_metadata(&mut metadata, &request_id, pipeline_run_id);
                inner(service, status, metadata);
            })
        };

        let outcome =
            executor.run(snapshot.clone(), ports, self.event_sink.clone(), cancel).await;

        run.total_latency_ms = Some(start_instant.elapsed().as_millis() as u64);
        run.completed_at = Some(Utc::now());

        match outcome {
            PipelineOutcome::Completed(outputs) => {
                run.success = true;
                run.stages = stage_summary(&outputs);

                let (content, canned) = completion_content(&outputs);

                self.event_sink.record(
                    run.id,
                    "orchestrator".to_string(),
                    tf_domain::stage::StageEvent {
                        kind: "pipeline.completed".to_string(),
                        data: json!({ "total_latency_ms": run.total_latency_ms }),
                        timestamp: Utc::now(),
                    },
                );

                OrchestratorResult::Completed { content, canned, run }
            }
            PipelineOutcome::Cancelled { stage, reason, .. } => {
                run.success = false;
                run.error = Some(format!("cancelled at {stage}: {reason}"));

                self.event_sink.record(
                    run.id,
                    "orchestrator".to_string(),
                    tf_domain::stage::StageEvent {
                        kind: "pipeline.cancelled".to_string(),
                        data: json!({ "stage": stage, "reason": reason }),
                        timestamp: Utc::now(),
                    },
                );

                OrchestratorResult::Cancelled { reason, run }
            }
            PipelineOutcome::Failed { stage, error } => {
                run.success = false;
                run.error = Some(error.clone());

                self.event_sink.record(
                    run.id,
                    "orchestrator".to_string(),
                    tf_domain::stage::StageEvent {
                        kind: "pipeline.failed".to_string(),
                        data: json!({ "stage": stage, "error": error }),
                        timestamp: Utc::now(),
                    },
                );

                let dlq = DeadLetterQueue {
                    id: Uuid::new_v4(),
                    pipeline_run_id: run.id,
                    error_type: "StageExecutionError".to_string(),
                    error_message: error.clone(),
                    failed_stage: stage.clone(),
                    context_snapshot: serde_json::to_value(&snapshot).unwrap_or(json!({})),
                    input_data: json!({}),
                    status: DlqStatus::Pending,
                    retry_count: 0,
                };

                OrchestratorResult::Failed { stage, error, run, dlq }
            }
        }
    }
}

fn enrich_metadata(metadata: &mut serde_json::Value, request_id: &str, pipeline_run_id: Uuid) {
    if let Some(obj) = metadata.as_object_mut() {
        obj.insert("request_id".to_string(), json!(request_id));
        obj.insert("pipeline_run_id".to_string(), json!(pipeline_run_id));
        obj.insert("timestamp".to_string(), json!(Utc::now()));
    }
}

fn stage_summary(outputs: &HashMap<String, StageOutput>) -> serde_json::Value {
    let map: HashMap<&str, &str> = outputs
        .iter()
        .map(|(name, output)| (name.as_str(), status_label(output)))
        .collect();
    json!(map)
}

fn status_label(output: &StageOutput) -> &'static str {
    use tf_domain::stage::StageStatus::*;
    match output.status {
        Ok => "OK",
        Skip => "SKIP",
        Cancel => "CANCEL",
        Fail => "FAIL",
        Retry => "RETRY",
    }
}

/// Pulls the LLM stage's text out of the outputs map, falling back to
/// the canned safe message when the LLM stage was skipped (policy or
/// guardrails block) or never ran.
fn completion_content(outputs: &HashMap<String, StageOutput>) -> (String, bool) {
    for output in outputs.values() {
        if let Some(text) = output.data.get("full_text").and_then(|v| v.as_str()) {
            return (text.to_string(), false);
        }
    }
    (CANNED_TROUBLE_MESSAGE.to_string(), true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::{Stage, StageSpec};
    use crate::event_sink::NullEventSink;
    use tf_domain::stage::{Behavior, Channel, StageContext, StageKind, Topology};

    struct StubLlm(&'static str);

    #[async_trait::async_trait]
    impl Stage for StubLlm {
        async fn execute(&self, ctx: StageContext) -> StageOutput {
            let mut data = HashMap::new();
            data.insert("full_text".to_string(), json!(self.0));
            ctx.into_output(StageOutput::ok(data))
        }
    }

    fn snapshot() -> ContextSnapshot {
        ContextSnapshot {
            pipeline_run_id: Uuid::new_v4(),
            request_id: "r1".into(),
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
            input_text: Some("hi".into()),
            input_audio_duration_ms: None,
            exercise_id: None,
            assessment_state: None,
            routing_decision: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn completed_run_marks_success_and_extracts_text() {
        let spec = StageSpec::new("llm", StageKind::Work, Arc::new(StubLlm("hello there")));
        let executor = DagExecutor::new(vec![spec]).unwrap();
        let orchestrator = Orchestrator::new(Arc::new(NullEventSink));

        let result = orchestrator
            .run(
                &executor,
                snapshot(),
                "chat",
                "fast",
                tf_domain::stage::StagePorts::new(Arc::new(|_, _, _| {}), Arc::new(|_| {})),
                CancelToken::new(),
            )
            .await;

        match result {
            OrchestratorResult::Completed { content, canned, run } => {
                assert_eq!(content, "hello there");
                assert!(!canned);
                assert!(run.success);
                assert!(run.total_latency_ms.is_some());
            }
            _ => panic!("expected completion"),
        }
    }

    #[tokio::test]
    async fn failed_run_produces_dlq_row() {
        struct Boom;
        #[async_trait::async_trait]
        impl Stage for Boom {
            async fn execute(&self, _ctx: StageContext) -> StageOutput {
                StageOutput::fail("boom")
            }
        }
        let spec = StageSpec::new("llm", StageKind::Work, Arc::new(Boom));
        let executor = DagExecutor::new(vec![spec]).unwrap();
        let orchestrator = Orchestrator::new(Arc::new(NullEventSink));

        let result = orchestrator
            .run(
                &executor,
                snapshot(),
                "chat",
                "fast",
                tf_domain::stage::StagePorts::new(Arc::new(|_, _, _| {}), Arc::new(|_| {})),
                CancelToken::new(),
            )
            .await;

        match result {
            OrchestratorResult::Failed { dlq, run, .. } => {
                assert!(!run.success);
                assert_eq!(dlq.failed_stage, "llm");
            }
            _ => panic!("expected failure"),
        }
    }
}
