//! Inbound `WsMessage` dispatch (spec.md §6.1).
//!
//! One call to [`dispatch`] per inbound frame. Each arm resolves whatever
//! state it needs from `AppState`/`ConnectionManager` and replies through
//! [`project_and_send`] — never by constructing a frame and writing to the
//! socket directly, so every outbound message passes through the same
//! counters and metadata stamping.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use tf_domain::entities::{InputType, Interaction, InteractionRole};
use tf_domain::message::Role;
use tf_domain::stage::{Behavior, ContextSnapshot, SnapshotMessage, StagePorts, Topology};
use tf_pipeline::cancel::CancelToken;
use tf_pipeline::orchestrator::{OrchestratorResult, CANNED_TROUBLE_MESSAGE};
use tf_protocol::ws::{PipelineMode, WsMessage};

use crate::auth;
use crate::state::AppState;
use crate::ws::connection::ConnectionManager;
use crate::ws::projector::{project_and_send, ProjectionContext};

/// Handle one inbound frame for `connection_id`.
pub async fn dispatch(state: &AppState, connection_id: Uuid, message: WsMessage) {
    match message {
        WsMessage::Auth { token, platform, session_id } => {
            handle_auth(state, connection_id, token, platform, session_id).await;
        }
        WsMessage::ChatTyped { session_id, message_id, request_id, content } => {
            handle_chat_typed(state, connection_id, session_id, message_id, request_id, content).await;
        }
        WsMessage::VoiceStart { session_id: _, format } => {
            state.connections.arm_recorder(connection_id, format);
            project_and_send(
                &state.connections,
                connection_id,
                WsMessage::StatusUpdate {
                    service: "voice".to_string(),
                    status: "recording".to_string(),
                    metadata: json!({}),
                },
                ProjectionContext::default(),
            );
        }
        WsMessage::VoiceChunk { data } => {
            if let Ok(bytes) = hex::decode(&data) {
                state.connections.append_chunk(connection_id, &bytes);
            } else {
                state.connections.bump_contract_violation("malformed_voice_chunk");
            }
        }
        WsMessage::VoiceEnd { message_id } => {
            handle_voice_end(state, connection_id, message_id).await;
        }
        WsMessage::SettingsSetPipelineMode { mode } => {
            state.connections.set_pipeline_mode(connection_id, mode);
        }

        // External collaborator surface — payload shapes are real, the
        // domain logic behind them is out of scope; reply with empty
        // catalogs/history rather than leaving the client hanging.
        WsMessage::SkillsList | WsMessage::SkillsTracked => {
            project_and_send(
                &state.connections,
                connection_id,
                WsMessage::SkillsCatalog { skills: json!([]) },
                ProjectionContext::default(),
            );
        }
        WsMessage::SkillsTrack { skill_id } => {
            project_and_send(
                &state.connections,
                connection_id,
                WsMessage::SkillsTrackSuccess { skill_id },
                ProjectionContext::default(),
            );
        }
        WsMessage::SkillsUntrack { .. } | WsMessage::SkillsDetail { .. } => {}
        WsMessage::AssessmentTrigger { .. } => {
            project_and_send(
                &state.connections,
                connection_id,
                WsMessage::AssessmentSkipped { reason: "assessment scoring is not available".to_string() },
                ProjectionContext::default(),
            );
        }
        WsMessage::AssessmentHistory { .. } => {
            project_and_send(
                &state.connections,
                connection_id,
                WsMessage::AssessmentHistoryList { items: json!([]) },
                ProjectionContext::default(),
            );
        }
        WsMessage::AssessmentDelete { assessment_id, .. } => {
            project_and_send(
                &state.connections,
                connection_id,
                WsMessage::AssessmentDeleted { assessment_id },
                ProjectionContext::default(),
            );
        }
        WsMessage::SailwindPracticeStart { .. } | WsMessage::SailwindPracticeMessage { .. } => {}

        // Outbound-only variants never arrive inbound; a client sending one
        // is a protocol violation, not something to act on.
        _ => {
            state.connections.bump_contract_violation("unexpected_inbound_variant");
        }
    }
}

async fn handle_auth(
    state: &AppState,
    connection_id: Uuid,
    token: String,
    platform: Option<String>,
    requested_session_id: Option<Uuid>,
) {
    let claims = match auth::verify_token(&token, state.config.server.environment) {
        Ok(claims) => claims,
        Err(err) => {
            project_and_send(
                &state.connections,
                connection_id,
                WsMessage::AuthError { code: err.code, message: err.message },
                ProjectionContext::default(),
            );
            return;
        }
    };

    let (user, org) = state.identity.resolve(&claims);
    let session_id = requested_session_id.unwrap_or_else(Uuid::new_v4);
    let (_session, _is_new) = state.sessions.get_or_create(session_id, user.id);
    state.session_state.get_or_create(session_id);

    state.connections.authenticate(connection_id, user.id, session_id, org.as_ref().map(|o| o.id));
    state.connections.set_platform(connection_id, platform);

    project_and_send(
        &state.connections,
        connection_id,
        WsMessage::AuthSuccess { user_id: user.id, session_id, org_id: org.map(|o| o.id) },
        ProjectionContext::default(),
    );
}

async fn handle_chat_typed(
    state: &AppState,
    connection_id: Uuid,
    session_id: Option<Uuid>,
    message_id: String,
    request_id: String,
    content: String,
) {
    let Some((user_id, session_id, org_id)) = resolved_identity(state, connection_id, session_id) else {
        project_and_send(
            &state.connections,
            connection_id,
            WsMessage::Error {
                code: "NOT_AUTHENTICATED".to_string(),
                message: "send auth before chat.typed".to_string(),
                request_id: Some(request_id),
                pipeline_run_id: None,
            },
            ProjectionContext::default(),
        );
        return;
    };

    state.sessions.append_interaction(Interaction {
        id: Uuid::new_v4(),
        session_id,
        message_id: message_id.clone(),
        role: InteractionRole::User,
        content: content.clone(),
        input_type: InputType::Text,
        created_at: Utc::now(),
    });

    let topology = match state.connections.pipeline_mode(connection_id) {
        PipelineMode::Fast => Topology::ChatFast,
        PipelineMode::Accurate | PipelineMode::AccurateFiller => Topology::ChatAccurate,
    };
    let behavior = state.session_state.get_or_create(session_id).behavior;
    let messages = vec![SnapshotMessage {
        role: Role::User,
        content: content.clone(),
        timestamp: Utc::now(),
        metadata: HashMap::new(),
    }];

    let result = run_turn(
        state,
        connection_id,
        topology,
        behavior,
        request_id.clone(),
        session_id,
        user_id,
        org_id,
        Some(content),
        messages,
        "chat",
    )
    .await;

    finish_turn(state, connection_id, session_id, &message_id, &request_id, result, false);
    maybe_summarize(state, session_id).await;
}

async fn handle_voice_end(state: &AppState, connection_id: Uuid, message_id: String) {
    let Some((user_id, session_id, org_id)) = resolved_identity(state, connection_id, None) else {
        return;
    };
    let Some((audio, _format)) = state.connections.take_recording(connection_id) else {
        return;
    };

    // No real transcription provider exists in this deployment; the STT
    // stage treats a non-empty recording as "transcribed" verbatim and an
    // empty one as an empty transcript, which cancels the run.
    let transcript = if audio.is_empty() {
        String::new()
    } else {
        format!("[{} bytes of recorded audio]", audio.len())
    };

    let topology = match state.connections.pipeline_mode(connection_id) {
        PipelineMode::Fast => Topology::VoiceFast,
        PipelineMode::Accurate | PipelineMode::AccurateFiller => Topology::VoiceAccurate,
    };
    let behavior = state.session_state.get_or_create(session_id).behavior;
    let request_id = Uuid::new_v4().to_string();
    let messages = if transcript.is_empty() {
        vec![]
    } else {
        vec![SnapshotMessage {
            role: Role::User,
            content: transcript.clone(),
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }]
    };

    let result = run_turn(
        state,
        connection_id,
        topology,
        behavior,
        request_id.clone(),
        session_id,
        user_id,
        org_id,
        Some(transcript.clone()),
        messages,
        "voice",
    )
    .await;

    match result {
        OrchestratorResult::Completed { content, run, .. } => {
            state.sessions.append_interaction(Interaction {
                id: Uuid::new_v4(),
                session_id,
                message_id: message_id.clone(),
                role: InteractionRole::Assistant,
                content: content.clone(),
                input_type: InputType::Voice,
                created_at: Utc::now(),
            });
            state.pulse.insert_run(run);
            state.pulse.insert_events(state.event_sink.flush());
            project_and_send(
                &state.connections,
                connection_id,
                WsMessage::VoiceComplete {
                    message_id,
                    transcript,
                    response: content,
                    audio_format: "pcm16".to_string(),
                },
                ProjectionContext::default(),
            );
        }
        OrchestratorResult::Cancelled { run, .. } => {
            state.pulse.insert_run(run);
            state.pulse.insert_events(state.event_sink.flush());
            project_and_send(
                &state.connections,
                connection_id,
                WsMessage::StatusUpdate {
                    service: "pipeline".to_string(),
                    status: "listening".to_string(),
                    metadata: json!({}),
                },
                ProjectionContext::default(),
            );
        }
        OrchestratorResult::Failed { run, dlq, error, .. } => {
            state.pulse.insert_run(run);
            state.pulse.insert_dlq(dlq);
            state.pulse.insert_events(state.event_sink.flush());
            project_and_send(
                &state.connections,
                connection_id,
                WsMessage::Error {
                    code: "PIPELINE_FAILED".to_string(),
                    message: error,
                    request_id: None,
                    pipeline_run_id: None,
                },
                ProjectionContext::default(),
            );
        }
    }
    maybe_summarize(state, session_id).await;
}

#[allow(clippy::too_many_arguments)]
async fn run_turn(
    state: &AppState,
    connection_id: Uuid,
    topology: Topology,
    behavior: Behavior,
    request_id: String,
    session_id: Uuid,
    user_id: Uuid,
    org_id: Option<Uuid>,
    input_text: Option<String>,
    messages: Vec<SnapshotMessage>,
    service: &str,
) -> OrchestratorResult {
    let pipeline_run_id = Uuid::new_v4();
    let snapshot = ContextSnapshot {
        pipeline_run_id,
        request_id: request_id.clone(),
        session_id,
        user_id,
        org_id,
        interaction_id: None,
        topology,
        channel: topology.channel(),
        behavior,
        messages,
        profile: None,
        memory: None,
        skills: None,
        documents: None,
        web_results: None,
        input_text,
        input_audio_duration_ms: None,
        exercise_id: None,
        assessment_state: None,
        routing_decision: None,
        created_at: Utc::now(),
    };

    let quality_mode = match topology {
        Topology::ChatFast | Topology::VoiceFast => "fast",
        Topology::ChatAccurate | Topology::VoiceAccurate => "accurate",
    };

    let executor = match tf_pipeline::registry::build(
        topology,
        state.router.clone(),
        &state.config,
        Some(state.call_log.clone()),
    ) {
        Ok(executor) => executor,
        Err(err) => {
            let run = failed_run_placeholder(&snapshot, service, quality_mode, &err.to_string());
            return OrchestratorResult::Failed {
                stage: "registry".to_string(),
                error: err.to_string(),
                dlq: dlq_for(&run, &snapshot, &err.to_string()),
                run,
            };
        }
    };

    let proj_ctx = ProjectionContext {
        request_id: Some(request_id),
        pipeline_run_id: Some(pipeline_run_id),
        org_id,
    };
    let ports = build_ports(state.connections.clone(), connection_id, session_id, proj_ctx);

    state.orchestrator.run(&executor, snapshot, service, quality_mode, ports, CancelToken::new()).await
}

fn build_ports(
    connections: Arc<ConnectionManager>,
    connection_id: Uuid,
    session_id: Uuid,
    proj_ctx: ProjectionContext,
) -> StagePorts {
    let send_status = {
        let connections = connections.clone();
        let proj_ctx = proj_ctx.clone();
        Arc::new(move |service: &str, status: &str, metadata: serde_json::Value| {
            project_and_send(
                &connections,
                connection_id,
                WsMessage::StatusUpdate { service: service.to_string(), status: status.to_string(), metadata },
                proj_ctx.clone(),
            );
        })
    };
    let send_token = {
        let connections = connections;
        Arc::new(move |token: &str| {
            project_and_send(
                &connections,
                connection_id,
                WsMessage::ChatToken { session_id, token: token.to_string() },
                proj_ctx.clone(),
            );
        })
    };
    StagePorts::new(send_status, send_token)
}

fn finish_turn(
    state: &AppState,
    connection_id: Uuid,
    session_id: Uuid,
    message_id: &str,
    request_id: &str,
    result: OrchestratorResult,
    _voice: bool,
) {
    match result {
        OrchestratorResult::Completed { content, run, .. } => {
            state.sessions.append_interaction(Interaction {
                id: Uuid::new_v4(),
                session_id,
                message_id: message_id.to_string(),
                role: InteractionRole::Assistant,
                content: content.clone(),
                input_type: InputType::Text,
                created_at: Utc::now(),
            });
            let pipeline_run_id = run.id;
            state.pulse.insert_run(run);
            state.pulse.insert_events(state.event_sink.flush());
            project_and_send(
                &state.connections,
                connection_id,
                WsMessage::ChatComplete {
                    session_id,
                    message_id: message_id.to_string(),
                    content,
                    role: "assistant".to_string(),
                    request_id: request_id.to_string(),
                    pipeline_run_id,
                },
                ProjectionContext::default(),
            );
        }
        OrchestratorResult::Cancelled { run, .. } => {
            state.pulse.insert_run(run);
            state.pulse.insert_events(state.event_sink.flush());
            project_and_send(
                &state.connections,
                connection_id,
                WsMessage::StatusUpdate {
                    service: "pipeline".to_string(),
                    status: "listening".to_string(),
                    metadata: json!({}),
                },
                ProjectionContext::default(),
            );
        }
        OrchestratorResult::Failed { run, dlq, .. } => {
            let pipeline_run_id = run.id;
            state.pulse.insert_run(run);
            state.pulse.insert_dlq(dlq);
            state.pulse.insert_events(state.event_sink.flush());
            project_and_send(
                &state.connections,
                connection_id,
                WsMessage::ChatComplete {
                    session_id,
                    message_id: message_id.to_string(),
                    content: CANNED_TROUBLE_MESSAGE.to_string(),
                    role: "assistant".to_string(),
                    request_id: request_id.to_string(),
                    pipeline_run_id,
                },
                ProjectionContext::default(),
            );
        }
    }
}

/// Trigger the rolling summary when the session has crossed the
/// turn-pair threshold (spec.md §4.9). Runs after the turn's own
/// completion is already on the wire, so a slow summary call never
/// delays `chat.complete`/`voice.complete`.
async fn maybe_summarize(state: &AppState, session_id: Uuid) {
    let summary_state = state.sessions.increment_turns_since(session_id);
    if !state.summaries.should_trigger(summary_state.turns_since) {
        return;
    }
    let previous = state.sessions.latest_summary(session_id);
    let cutoff = previous.as_ref().map(|p| p.cutoff_idx);
    let interactions = state.sessions.interactions_since(session_id, cutoff);
    if interactions.is_empty() {
        return;
    }
    match state.summaries.summarize(session_id, previous.as_ref(), &interactions).await {
        Ok(summary) => {
            state.sessions.append_summary(summary);
        }
        Err(err) => {
            tracing::warn!(%session_id, error = %err, "summary generation failed");
        }
    }
}

fn resolved_identity(
    state: &AppState,
    connection_id: Uuid,
    requested_session_id: Option<Uuid>,
) -> Option<(Uuid, Uuid, Option<Uuid>)> {
    if !state.connections.is_authenticated(connection_id) {
        return None;
    }
    let user_id = state.connections.user_id(connection_id)?;
    let session_id = requested_session_id
        .or_else(|| state.connections.session_id(connection_id))?;
    let org_id = state.connections.org_id(connection_id);
    Some((user_id, session_id, org_id))
}

fn failed_run_placeholder(
    snapshot: &ContextSnapshot,
    service: &str,
    quality_mode: &str,
    error: &str,
) -> tf_domain::entities::PipelineRun {
    tf_domain::entities::PipelineRun {
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
        error: Some(error.to_string()),
        total_latency_ms: Some(0),
        ttft_ms: None,
        ttfa_ms: None,
        ttfc_ms: None,
        tokens_in: None,
        tokens_out: None,
        cost_cents: None,
        stages: json!({}),
        run_metadata: json!({}),
        context_snapshot_metadata: json!({ "topology": snapshot.topology }),
        started_at: Utc::now(),
        completed_at: Some(Utc::now()),
    }
}

fn dlq_for(
    run: &tf_domain::entities::PipelineRun,
    snapshot: &ContextSnapshot,
    error: &str,
) -> tf_domain::entities::DeadLetterQueue {
    tf_domain::entities::DeadLetterQueue {
        id: Uuid::new_v4(),
        pipeline_run_id: run.id,
        error_type: "DagBuildError".to_string(),
        error_message: error.to_string(),
        failed_stage: "registry".to_string(),
        context_snapshot: serde_json::to_value(snapshot).unwrap_or(json!({})),
        input_data: json!({}),
        status: tf_domain::entities::DlqStatus::Pending,
        retry_count: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> ContextSnapshot {
        ContextSnapshot {
            pipeline_run_id: Uuid::new_v4(),
            request_id: "r1".to_string(),
            session_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            org_id: None,
            interaction_id: None,
            topology: Topology::ChatFast,
            channel: Topology::ChatFast.channel(),
            behavior: Behavior::FreeConversation,
            messages: vec![],
            profile: None,
            memory: None,
            skills: None,
            documents: None,
            web_results: None,
            input_text: Some("hi".to_string()),
            input_audio_duration_ms: None,
            exercise_id: None,
            assessment_state: None,
            routing_decision: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn failed_run_placeholder_carries_the_snapshot_identifiers() {
        let snap = snapshot();
        let run = failed_run_placeholder(&snap, "chat", "fast", "dag build failed");
        assert_eq!(run.id, snap.pipeline_run_id);
        assert_eq!(run.session_id, snap.session_id);
        assert!(!run.success);
        assert_eq!(run.error.as_deref(), Some("dag build failed"));
    }

    #[test]
    fn dlq_for_points_back_at_the_failed_run() {
        let snap = snapshot();
        let run = failed_run_placeholder(&snap, "chat", "fast", "boom");
        let dlq = dlq_for(&run, &snap, "boom");
        assert_eq!(dlq.pipeline_run_id, run.id);
        assert_eq!(dlq.status, tf_domain::entities::DlqStatus::Pending);
        assert_eq!(dlq.failed_stage, "registry");
    }

    #[test]
    fn a_freshly_registered_connection_is_unauthenticated() {
        let connections = ConnectionManager::new();
        let connection_id = connections.register(
            tokio::sync::mpsc::unbounded_channel().0,
            tf_protocol::ws::PipelineMode::Fast,
            tf_domain::config::ModelChoice::Model1,
        );
        assert!(!connections.is_authenticated(connection_id));
        assert!(connections.session_id(connection_id).is_none());
    }
}
