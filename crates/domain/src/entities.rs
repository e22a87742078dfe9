use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::stage::{Behavior, Topology};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Persisted entities (spec.md §3). These are value-object shapes for
// the in-memory stores in tf-sessions/tf-gateway — no SQL/DDL, per
// SPEC_FULL.md §D.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub auth_provider: String,
    pub auth_subject: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organization {
    pub id: Uuid,
    pub workos_org_id: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipRole {
    Owner,
    Admin,
    Member,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganizationMembership {
    pub user_id: Uuid,
    pub org_id: Uuid,
    pub role: MembershipRole,
    #[serde(default)]
    pub permissions: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionLifecycleState {
    Active,
    Ended,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub state: SessionLifecycleState,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub interaction_count: u64,
    pub is_onboarding: bool,
}

/// Per-session routing tuple (spec.md §3), validated against the closed
/// `Topology`/`Behavior` enums on every update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: Uuid,
    pub topology: Topology,
    pub behavior: Behavior,
    pub config: Value,
    pub updated_at: DateTime<Utc>,
    /// Optimistic-locking counter, surfaced per SPEC_FULL.md §C decision
    /// (spec.md §9 Open Questions leaves this deployment-specific).
    pub version: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputType {
    Text,
    Voice,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interaction {
    pub id: Uuid,
    pub session_id: Uuid,
    pub message_id: String,
    pub role: InteractionRole,
    pub content: String,
    pub input_type: InputType,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: Uuid,
    pub session_id: Uuid,
    /// Strictly increasing per session; no gaps (spec.md §3 invariant).
    pub version: u64,
    pub text: String,
    pub cutoff_idx: u64,
    pub token_count: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryState {
    pub session_id: Uuid,
    pub turns_since: u32,
    pub last_summary_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderOperation {
    Llm,
    Stt,
    Tts,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderCall {
    pub id: Uuid,
    pub pipeline_run_id: Option<Uuid>,
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub service: String,
    pub operation: ProviderOperation,
    pub provider: String,
    pub model_id: String,
    #[serde(default)]
    pub prompt_messages: Option<Value>,
    #[serde(default)]
    pub output_content: Option<String>,
    #[serde(default)]
    pub output_parsed: Option<Value>,
    pub latency_ms: u64,
    pub tokens_in: Option<u32>,
    pub tokens_out: Option<u32>,
    pub audio_duration_ms: Option<u64>,
    pub cost_cents: Option<f64>,
    pub success: bool,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: Uuid,
    pub service: String,
    pub topology: Topology,
    pub behavior: Behavior,
    pub quality_mode: String,
    pub request_id: String,
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub org_id: Option<Uuid>,
    pub success: bool,
    pub error: Option<String>,
    pub total_latency_ms: Option<u64>,
    pub ttft_ms: Option<u64>,
    pub ttfa_ms: Option<u64>,
    pub ttfc_ms: Option<u64>,
    pub tokens_in: Option<u32>,
    pub tokens_out: Option<u32>,
    pub cost_cents: Option<f64>,
    pub stages: Value,
    pub run_metadata: Value,
    pub context_snapshot_metadata: Value,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineEvent {
    pub id: Uuid,
    pub pipeline_run_id: Uuid,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub session_id: Option<Uuid>,
    #[serde(default)]
    pub request_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DlqStatus {
    Pending,
    Investigating,
    Resolved,
    Reprocessed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterQueue {
    pub id: Uuid,
    pub pipeline_run_id: Uuid,
    pub error_type: String,
    pub error_message: String,
    pub failed_stage: String,
    pub context_snapshot: Value,
    pub input_data: Value,
    pub status: DlqStatus,
    pub retry_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerState {
    pub operation: String,
    pub provider: String,
    pub model_id: String,
    pub state: BreakerState,
    pub opened_at: Option<DateTime<Utc>>,
}
