//! Outbound projector (spec.md §4.8).
//!
//! Every outbound `WsMessage` passes through here before it reaches the
//! wire: metadata gets stamped, emit/contract counters get bumped, then
//! the frame is serialized and handed to the connection manager's send
//! path, which silently drops it if the socket is already gone.

use axum::extract::ws::Message as WsWireMessage;
use chrono::Utc;
use tf_protocol::ws::{WsFrame, WsMessage, WsMetadata};
use uuid::Uuid;

use super::connection::ConnectionManager;

#[derive(Debug, Clone, Default)]
pub struct ProjectionContext {
    pub request_id: Option<String>,
    pub pipeline_run_id: Option<Uuid>,
    pub org_id: Option<Uuid>,
}

/// Project and send `message` on `connection_id` (spec.md §4.8 steps 1-6).
pub fn project_and_send(
    connections: &ConnectionManager,
    connection_id: Uuid,
    message: WsMessage,
    ctx: ProjectionContext,
) {
    let type_name = message.type_name();
    connections.bump_emit_count(type_name);

    if message.is_chat_complete() {
        if let Some(run_id) = ctx.pipeline_run_id {
            if connections.bump_chat_complete(run_id) > 1 {
                connections.bump_contract_violation("duplicate_chat_complete");
            }
        }
    }

    if let WsMessage::StatusUpdate { service, status, .. } = &message {
        if service == "pipeline" && matches!(status.as_str(), "completed" | "complete") {
            if let Some(run_id) = ctx.pipeline_run_id {
                if connections.chat_complete_count(run_id) == 0 {
                    connections.bump_contract_violation("missing_chat_complete");
                }
            }
        }
    }

    let metadata = WsMetadata {
        request_id: ctx.request_id,
        pipeline_run_id: ctx.pipeline_run_id,
        org_id: ctx.org_id,
        timestamp: Utc::now(),
    };
    let frame = WsFrame::with_metadata(message, metadata);

    match serde_json::to_string(&frame) {
        Ok(json) => connections.send(connection_id, WsWireMessage::Text(json.into())),
        Err(e) => tracing::error!(error = %e, "failed to serialize outbound ws frame"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tf_domain::config::ModelChoice;
    use tf_protocol::ws::PipelineMode;

    fn manager_with_connection() -> (std::sync::Arc<ConnectionManager>, Uuid) {
        let manager = ConnectionManager::new();
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let id = manager.register(tx, PipelineMode::Fast, ModelChoice::Model1);
        (manager, id)
    }

    #[test]
    fn a_second_chat_complete_for_the_same_run_is_flagged() {
        let (manager, id) = manager_with_connection();
        let run_id = Uuid::new_v4();
        let msg = || WsMessage::ChatComplete {
            session_id: Uuid::nil(),
            message_id: "m".into(),
            content: "hi".into(),
            role: "assistant".into(),
            request_id: "r".into(),
            pipeline_run_id: run_id,
        };
        let ctx = ProjectionContext { pipeline_run_id: Some(run_id), ..Default::default() };
        project_and_send(&manager, id, msg(), ctx.clone());
        project_and_send(&manager, id, msg(), ctx);
        assert_eq!(manager.chat_complete_count(run_id), 2);
        assert_eq!(manager.contract_violation_count("duplicate_chat_complete"), 1);
    }

    #[test]
    fn pipeline_completed_status_without_chat_complete_is_flagged() {
        let (manager, id) = manager_with_connection();
        let run_id = Uuid::new_v4();
        let msg = WsMessage::StatusUpdate {
            service: "pipeline".into(),
            status: "completed".into(),
            metadata: serde_json::json!({}),
        };
        let ctx = ProjectionContext { pipeline_run_id: Some(run_id), ..Default::default() };
        project_and_send(&manager, id, msg, ctx);
        assert_eq!(manager.chat_complete_count(run_id), 0);
        assert_eq!(manager.contract_violation_count("missing_chat_complete"), 1);
    }
}
