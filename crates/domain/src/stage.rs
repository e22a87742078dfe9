use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

use crate::message::{Message, Role};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Closed enums shared by the snapshot and persisted entities
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// `PipelineRun.topology` — the named shape of a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topology {
    ChatFast,
    ChatAccurate,
    VoiceFast,
    VoiceAccurate,
}

impl Topology {
    pub fn channel(&self) -> Channel {
        match self {
            Topology::ChatFast | Topology::ChatAccurate => Channel::TextChannel,
            Topology::VoiceFast | Topology::VoiceAccurate => Channel::VoiceChannel,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    TextChannel,
    VoiceChannel,
}

/// The high-level conversational mode (spec.md GLOSSARY).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Behavior {
    Onboarding,
    Practice,
    Roleplay,
    DocEdit,
    FreeConversation,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ContextSnapshot
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A single message in the snapshot's ordered transcript, distinct from
/// [`Message`] sent to providers: it carries a timestamp and metadata
/// the way a persisted turn does.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl SnapshotMessage {
    pub fn to_provider_message(&self) -> Message {
        Message {
            role: self.role,
            content: crate::message::MessageContent::Text(self.content.clone()),
        }
    }
}

/// Frozen per-turn input handed to every stage (spec.md §3). Every field
/// set at construction; no setters. Clone to derive a new snapshot rather
/// than mutating — e.g. a "context build" stage returns a fresh value via
/// [`ContextSnapshot::with_enrichment`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub pipeline_run_id: Uuid,
    pub request_id: String,
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub org_id: Option<Uuid>,
    pub interaction_id: Option<Uuid>,
    pub topology: Topology,
    pub channel: Channel,
    pub behavior: Behavior,
    pub messages: Vec<SnapshotMessage>,
    #[serde(default)]
    pub profile: Option<Value>,
    #[serde(default)]
    pub memory: Option<Value>,
    #[serde(default)]
    pub skills: Option<Value>,
    #[serde(default)]
    pub documents: Option<Value>,
    #[serde(default)]
    pub web_results: Option<Value>,
    pub input_text: Option<String>,
    pub input_audio_duration_ms: Option<u64>,
    pub exercise_id: Option<String>,
    pub assessment_state: Option<Value>,
    pub routing_decision: Option<Value>,
    pub created_at: DateTime<Utc>,
}

impl ContextSnapshot {
    /// Build a new snapshot with an additional enrichment field set,
    /// leaving `self` untouched (snapshots are never mutated in place).
    pub fn with_enrichment(&self, field: &str, value: Value) -> Self {
        let mut next = self.clone();
        match field {
            "profile" => next.profile = Some(value),
            "memory" => next.memory = Some(value),
            "skills" => next.skills = Some(value),
            "documents" => next.documents = Some(value),
            "web_results" => next.web_results = Some(value),
            _ => {}
        }
        next
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// StageOutput
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageStatus {
    Ok,
    Skip,
    Cancel,
    Fail,
    Retry,
}

/// `StageKind` is informational — used for UI grouping and policy
/// selection, never for scheduling (spec.md §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageKind {
    Transform,
    Enrich,
    Route,
    Guard,
    Work,
    Agent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

/// Frozen result of a stage (spec.md §3). Built exclusively through the
/// `ok`/`skip`/`cancel`/`fail`/`retry` factories; fields are never
/// reassigned after construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageOutput {
    pub status: StageStatus,
    pub data: HashMap<String, Value>,
    pub error: Option<String>,
    pub artifacts: Vec<Artifact>,
    pub events: Vec<StageEvent>,
}

impl StageOutput {
    pub fn ok(data: HashMap<String, Value>) -> Self {
        Self {
            status: StageStatus::Ok,
            data,
            error: None,
            artifacts: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn skip(reason: impl Into<String>) -> Self {
        Self {
            status: StageStatus::Skip,
            data: HashMap::new(),
            error: Some(reason.into()),
            artifacts: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn cancel(reason: impl Into<String>, data: HashMap<String, Value>) -> Self {
        Self {
            status: StageStatus::Cancel,
            data,
            error: Some(reason.into()),
            artifacts: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            status: StageStatus::Fail,
            data: HashMap::new(),
            error: Some(error.into()),
            artifacts: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn retry(error: impl Into<String>) -> Self {
        Self {
            status: StageStatus::Retry,
            data: HashMap::new(),
            error: Some(error.into()),
            artifacts: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn is_terminal_failure(&self) -> bool {
        matches!(self.status, StageStatus::Fail)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// StagePorts
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Frozen bundle of injected capabilities available to stages. Ports are
/// assembled once per run from `PipelineContext.data` and never mutated;
/// callbacks are cheap `Arc`-cloned closures over the owning connection's
/// outbound channel.
///
/// `database`, `chat_service`, `providers`, and `queues` are type-erased
/// (`tf-domain` can't name concrete types from `tf-providers`/`tf-sessions`/
/// `tf-gateway` without a dependency cycle) the same way `axum::Extensions`
/// hands typed state through a layer boundary. A stage downcasts with
/// `ErasedHandle::downcast_ref::<ConcreteType>()`.
#[derive(Clone)]
pub struct StagePorts {
    pub send_status: SendStatusFn,
    pub send_token: SendTokenFn,
    pub send_audio_chunk: Option<SendAudioChunkFn>,
    pub raw_audio: Option<Vec<u8>>,
    /// Persistence handle (sessions/run/event stores), downcast by name.
    pub database: Option<ErasedHandle>,
    /// Reference to the owning connection's chat/session service.
    pub chat_service: Option<ErasedHandle>,
    /// LLM/TTS provider handles, keyed by provider id.
    pub providers: HashMap<String, ErasedHandle>,
    /// Outbound work queues (e.g. delivery, DLQ), keyed by queue name.
    pub queues: HashMap<String, ErasedHandle>,
}

impl StagePorts {
    pub fn new(send_status: SendStatusFn, send_token: SendTokenFn) -> Self {
        Self {
            send_status,
            send_token,
            send_audio_chunk: None,
            raw_audio: None,
            database: None,
            chat_service: None,
            providers: HashMap::new(),
            queues: HashMap::new(),
        }
    }

    /// Look up and downcast a named provider handle.
    pub fn provider<T: std::any::Any + Send + Sync>(&self, id: &str) -> Option<std::sync::Arc<T>> {
        self.providers.get(id).and_then(|h| h.clone().downcast::<T>().ok())
    }

    /// Look up and downcast a named queue handle.
    pub fn queue<T: std::any::Any + Send + Sync>(&self, name: &str) -> Option<std::sync::Arc<T>> {
        self.queues.get(name).and_then(|h| h.clone().downcast::<T>().ok())
    }

    /// Downcast the database handle.
    pub fn database_as<T: std::any::Any + Send + Sync>(&self) -> Option<std::sync::Arc<T>> {
        self.database.clone().and_then(|h| h.downcast::<T>().ok())
    }

    /// Downcast the chat service handle.
    pub fn chat_service_as<T: std::any::Any + Send + Sync>(&self) -> Option<std::sync::Arc<T>> {
        self.chat_service.clone().and_then(|h| h.downcast::<T>().ok())
    }
}

pub type SendStatusFn = std::sync::Arc<dyn Fn(&str, &str, Value) + Send + Sync>;
pub type SendTokenFn = std::sync::Arc<dyn Fn(&str) + Send + Sync>;
pub type SendAudioChunkFn = std::sync::Arc<dyn Fn(&[u8], bool) + Send + Sync>;
/// A type-erased, downcastable capability handle shared through `StagePorts`.
pub type ErasedHandle = std::sync::Arc<dyn std::any::Any + Send + Sync>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// StageInputs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Frozen; wraps the snapshot, the restricted view of prior outputs, and
/// the injected ports. A stage only ever sees the declared dependencies
/// of *itself* in `prior_outputs` — see spec.md §3 invariant and §8
/// property 2.
#[derive(Clone)]
pub struct StageInputs {
    pub snapshot: ContextSnapshot,
    /// Keyed by stage name; restricted by the executor to this stage's
    /// declared dependencies before construction.
    pub prior_outputs: HashMap<String, StageOutput>,
    /// Insertion order of `prior_outputs`, preserved for `get()`'s search.
    dependency_order: Vec<String>,
    pub ports: StagePorts,
}

impl StageInputs {
    pub fn new(
        snapshot: ContextSnapshot,
        prior_outputs: HashMap<String, StageOutput>,
        dependency_order: Vec<String>,
        ports: StagePorts,
    ) -> Self {
        Self {
            snapshot,
            prior_outputs,
            dependency_order,
            ports,
        }
    }

    pub fn has_output(&self, stage: &str) -> bool {
        self.prior_outputs.contains_key(stage)
    }

    pub fn get_from(&self, stage: &str, key: &str, default: Option<Value>) -> Option<Value> {
        self.prior_outputs
            .get(stage)
            .and_then(|o| o.data.get(key).cloned())
            .or(default)
    }

    /// Searches all declared dependencies in insertion order, returning
    /// the first match.
    pub fn get(&self, key: &str, default: Option<Value>) -> Option<Value> {
        for stage in &self.dependency_order {
            if let Some(output) = self.prior_outputs.get(stage) {
                if let Some(v) = output.data.get(key) {
                    return Some(v.clone());
                }
            }
        }
        default
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// StageContext
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-stage execution handle. Stages call `emit_event`/`add_artifact`
/// rather than writing directly to the event sink, so the executor can
/// atomically collect or discard them on failure (spec.md §4.1).
pub struct StageContext {
    pub snapshot: ContextSnapshot,
    pub inputs: StageInputs,
    events: Vec<StageEvent>,
    artifacts: Vec<Artifact>,
}

impl StageContext {
    pub fn new(snapshot: ContextSnapshot, inputs: StageInputs) -> Self {
        Self {
            snapshot,
            inputs,
            events: Vec::new(),
            artifacts: Vec::new(),
        }
    }

    pub fn emit_event(&mut self, kind: impl Into<String>, data: Value) {
        self.events.push(StageEvent {
            kind: kind.into(),
            data,
            timestamp: Utc::now(),
        });
    }

    pub fn add_artifact(&mut self, kind: impl Into<String>, payload: Value) {
        self.artifacts.push(Artifact {
            kind: kind.into(),
            payload,
        });
    }

    /// Consume the context, folding collected events/artifacts into a
    /// finished `StageOutput`.
    pub fn into_output(self, mut output: StageOutput) -> StageOutput {
        output.events = self.events;
        output.artifacts = self.artifacts;
        output
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// PipelineContext
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Orchestrator-scoped mutable scratch area for a single run. Never
/// shared across runs; `data` carries large dependencies (provider
/// handles, queues) into stages at construction time.
pub struct PipelineContext {
    pub pipeline_run_id: Uuid,
    pub request_id: String,
    pub routing_decision: Option<Value>,
    pub data: HashMap<String, Value>,
}

impl PipelineContext {
    pub fn new(pipeline_run_id: Uuid, request_id: impl Into<String>) -> Self {
        Self {
            pipeline_run_id,
            request_id: request_id.into(),
            routing_decision: None,
            data: HashMap::new(),
        }
    }
}
