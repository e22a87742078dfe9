//! WebSocket wire protocol (spec.md §6.1).
//!
//! Every frame is `{type, payload, metadata?}`. `metadata` is stamped by the
//! projector (tf-gateway) on every outbound send, never by the client;
//! inbound frames deserialize with `metadata: None`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Projector-stamped envelope metadata (spec.md §4.8 step 1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsMetadata {
    #[serde(rename = "requestId", default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(rename = "pipelineRunId", default, skip_serializing_if = "Option::is_none")]
    pub pipeline_run_id: Option<Uuid>,
    #[serde(rename = "orgId", default, skip_serializing_if = "Option::is_none")]
    pub org_id: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
}

/// A full wire frame: the tagged message plus projector metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsFrame {
    #[serde(flatten)]
    pub message: WsMessage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<WsMetadata>,
}

impl WsFrame {
    pub fn new(message: WsMessage) -> Self {
        Self { message, metadata: None }
    }

    pub fn with_metadata(message: WsMessage, metadata: WsMetadata) -> Self {
        Self { message, metadata: Some(metadata) }
    }
}

/// `settings.setPipelineMode` payload (spec.md §6.1). Re-exported from
/// `tf_domain` rather than duplicated: it's the same closed set used for
/// `ServerConfig::default_pipeline_mode`, just overridable per connection.
pub use tf_domain::config::PipelineMode;

/// The full inbound/outbound message catalog, adjacently tagged as
/// `{"type": "...", "payload": {...}}` per spec.md §6.1.
///
/// `skills.*`/`assessment.*`/`sailwind.*` variants are the external
/// collaborator surface named in spec.md §6.1 — their payload shapes are
/// reproduced faithfully, but the domain logic behind them (skill
/// catalogs, assessment scoring, Sailwind practice sessions) is out of
/// scope; handlers that dispatch on these variants are free to reply with
/// an empty catalog/history rather than a real implementation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum WsMessage {
    // ─── Inbound ───────────────────────────────────────────────────
    #[serde(rename = "auth")]
    Auth {
        token: String,
        #[serde(default)]
        platform: Option<String>,
        #[serde(rename = "sessionId", default)]
        session_id: Option<Uuid>,
    },

    #[serde(rename = "chat.typed")]
    ChatTyped {
        #[serde(rename = "sessionId", default)]
        session_id: Option<Uuid>,
        #[serde(rename = "messageId")]
        message_id: String,
        #[serde(rename = "requestId")]
        request_id: String,
        content: String,
    },

    #[serde(rename = "voice.start")]
    VoiceStart {
        #[serde(rename = "sessionId", default)]
        session_id: Option<Uuid>,
        format: String,
    },

    /// `data` is hex-encoded audio; the connection manager appends the
    /// decoded bytes to the armed recorder's buffer.
    #[serde(rename = "voice.chunk")]
    VoiceChunk { data: String },

    #[serde(rename = "voice.end")]
    VoiceEnd {
        #[serde(rename = "messageId")]
        message_id: String,
    },

    #[serde(rename = "settings.setPipelineMode")]
    SettingsSetPipelineMode { mode: PipelineMode },

    #[serde(rename = "skills.list")]
    SkillsList,

    #[serde(rename = "skills.tracked")]
    SkillsTracked,

    #[serde(rename = "skills.track")]
    SkillsTrack {
        #[serde(rename = "skillId")]
        skill_id: String,
    },

    #[serde(rename = "skills.untrack")]
    SkillsUntrack {
        #[serde(rename = "skillId")]
        skill_id: String,
    },

    #[serde(rename = "skills.detail")]
    SkillsDetail {
        #[serde(rename = "skillId")]
        skill_id: String,
    },

    #[serde(rename = "assessment.trigger")]
    AssessmentTrigger {
        #[serde(rename = "sessionId")]
        session_id: Uuid,
        #[serde(rename = "interactionId", default)]
        interaction_id: Option<Uuid>,
    },

    #[serde(rename = "assessment.history")]
    AssessmentHistory {
        #[serde(rename = "sessionId", default)]
        session_id: Option<Uuid>,
        #[serde(rename = "skillId", default)]
        skill_id: Option<String>,
        #[serde(default)]
        limit: Option<u32>,
    },

    #[serde(rename = "assessment.delete")]
    AssessmentDelete {
        #[serde(rename = "assessmentId")]
        assessment_id: Uuid,
        #[serde(default)]
        reason: Option<String>,
    },

    #[serde(rename = "sailwind.practice.start")]
    SailwindPracticeStart {
        #[serde(rename = "strategyId")]
        strategy_id: String,
        #[serde(rename = "repAssignmentId", default)]
        rep_assignment_id: Option<String>,
    },

    #[serde(rename = "sailwind.practice.message")]
    SailwindPracticeMessage {
        #[serde(rename = "practiceSessionId")]
        practice_session_id: String,
        content: String,
        #[serde(rename = "requestId", default)]
        request_id: Option<String>,
    },

    // ─── Outbound ──────────────────────────────────────────────────
    #[serde(rename = "auth.success")]
    AuthSuccess {
        #[serde(rename = "userId")]
        user_id: Uuid,
        #[serde(rename = "sessionId")]
        session_id: Uuid,
        #[serde(rename = "orgId")]
        org_id: Option<Uuid>,
    },

    #[serde(rename = "auth.error")]
    AuthError { code: String, message: String },

    #[serde(rename = "chat.token")]
    ChatToken {
        #[serde(rename = "sessionId")]
        session_id: Uuid,
        token: String,
    },

    /// At most one per pipeline run (spec.md §6.1, §8 invariant); the
    /// projector enforces this with `chat_complete_counts_by_run`.
    #[serde(rename = "chat.complete")]
    ChatComplete {
        #[serde(rename = "sessionId")]
        session_id: Uuid,
        #[serde(rename = "messageId")]
        message_id: String,
        content: String,
        role: String,
        #[serde(rename = "requestId")]
        request_id: String,
        #[serde(rename = "pipelineRunId")]
        pipeline_run_id: Uuid,
    },

    #[serde(rename = "voice.complete")]
    VoiceComplete {
        #[serde(rename = "messageId")]
        message_id: String,
        transcript: String,
        response: String,
        #[serde(rename = "audioFormat")]
        audio_format: String,
    },

    #[serde(rename = "status.update")]
    StatusUpdate { service: String, status: String, metadata: Value },

    #[serde(rename = "error")]
    Error {
        code: String,
        message: String,
        #[serde(rename = "requestId", default)]
        request_id: Option<String>,
        #[serde(rename = "pipelineRunId", default)]
        pipeline_run_id: Option<Uuid>,
    },

    #[serde(rename = "skills.catalog")]
    SkillsCatalog { skills: Value },

    #[serde(rename = "skills.tracked.list")]
    SkillsTrackedList { skills: Value },

    #[serde(rename = "skills.track.success")]
    SkillsTrackSuccess {
        #[serde(rename = "skillId")]
        skill_id: String,
    },

    #[serde(rename = "skills.track.error")]
    SkillsTrackError {
        #[serde(rename = "skillId")]
        skill_id: String,
        message: String,
    },

    #[serde(rename = "assessment.complete")]
    AssessmentComplete {
        #[serde(rename = "assessmentId")]
        assessment_id: Uuid,
        result: Value,
    },

    #[serde(rename = "assessment.history.list")]
    AssessmentHistoryList { items: Value },

    #[serde(rename = "assessment.deleted")]
    AssessmentDeleted {
        #[serde(rename = "assessmentId")]
        assessment_id: Uuid,
    },

    #[serde(rename = "assessment.skipped")]
    AssessmentSkipped { reason: String },
}

impl WsMessage {
    /// The `type` discriminant this message serializes as, e.g.
    /// `"chat.complete"`. Used by the projector to key its per-type
    /// emit counters without round-tripping through JSON.
    pub fn type_name(&self) -> &'static str {
        match self {
            WsMessage::Auth { .. } => "auth",
            WsMessage::ChatTyped { .. } => "chat.typed",
            WsMessage::VoiceStart { .. } => "voice.start",
            WsMessage::VoiceChunk { .. } => "voice.chunk",
            WsMessage::VoiceEnd { .. } => "voice.end",
            WsMessage::SettingsSetPipelineMode { .. } => "settings.setPipelineMode",
            WsMessage::SkillsList => "skills.list",
            WsMessage::SkillsTracked => "skills.tracked",
            WsMessage::SkillsTrack { .. } => "skills.track",
            WsMessage::SkillsUntrack { .. } => "skills.untrack",
            WsMessage::SkillsDetail { .. } => "skills.detail",
            WsMessage::AssessmentTrigger { .. } => "assessment.trigger",
            WsMessage::AssessmentHistory { .. } => "assessment.history",
            WsMessage::AssessmentDelete { .. } => "assessment.delete",
            WsMessage::SailwindPracticeStart { .. } => "sailwind.practice.start",
            WsMessage::SailwindPracticeMessage { .. } => "sailwind.practice.message",
            WsMessage::AuthSuccess { .. } => "auth.success",
            WsMessage::AuthError { .. } => "auth.error",
            WsMessage::ChatToken { .. } => "chat.token",
            WsMessage::ChatComplete { .. } => "chat.complete",
            WsMessage::VoiceComplete { .. } => "voice.complete",
            WsMessage::StatusUpdate { .. } => "status.update",
            WsMessage::Error { .. } => "error",
            WsMessage::SkillsCatalog { .. } => "skills.catalog",
            WsMessage::SkillsTrackedList { .. } => "skills.tracked.list",
            WsMessage::SkillsTrackSuccess { .. } => "skills.track.success",
            WsMessage::SkillsTrackError { .. } => "skills.track.error",
            WsMessage::AssessmentComplete { .. } => "assessment.complete",
            WsMessage::AssessmentHistoryList { .. } => "assessment.history.list",
            WsMessage::AssessmentDeleted { .. } => "assessment.deleted",
            WsMessage::AssessmentSkipped { .. } => "assessment.skipped",
        }
    }

    /// `true` for `chat.complete` — the projector's duplicate-detection
    /// hook (spec.md §4.8 step 4).
    pub fn is_chat_complete(&self) -> bool {
        matches!(self, WsMessage::ChatComplete { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_typed_round_trips_through_the_adjacent_tag() {
        let msg = WsMessage::ChatTyped {
            session_id: Some(Uuid::nil()),
            message_id: "m1".into(),
            request_id: "r1".into(),
            content: "hello".into(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "chat.typed");
        assert_eq!(json["payload"]["content"], "hello");
        let back: WsMessage = serde_json::from_value(json).unwrap();
        assert_eq!(back.type_name(), "chat.typed");
    }

    #[test]
    fn frame_with_metadata_serializes_sibling_fields() {
        let frame = WsFrame::with_metadata(
            WsMessage::ChatToken { session_id: Uuid::nil(), token: "hi".into() },
            WsMetadata {
                request_id: Some("r1".into()),
                pipeline_run_id: Some(Uuid::nil()),
                org_id: None,
                timestamp: Utc::now(),
            },
        );
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "chat.token");
        assert_eq!(json["metadata"]["requestId"], "r1");
    }

    #[test]
    fn frame_without_metadata_omits_the_key() {
        let frame = WsFrame::new(WsMessage::SkillsList);
        let json = serde_json::to_value(&frame).unwrap();
        assert!(json.get("metadata").is_none());
    }

    #[test]
    fn type_name_matches_serialized_tag() {
        let msg = WsMessage::AuthError { code: "bad_token".into(), message: "x".into() };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], msg.type_name());
    }

    #[test]
    fn is_chat_complete_identifies_only_that_variant() {
        let complete = WsMessage::ChatComplete {
            session_id: Uuid::nil(),
            message_id: "m".into(),
            content: "c".into(),
            role: "assistant".into(),
            request_id: "r".into(),
            pipeline_run_id: Uuid::nil(),
        };
        assert!(complete.is_chat_complete());
        assert!(!WsMessage::SkillsList.is_chat_complete());
    }
}
