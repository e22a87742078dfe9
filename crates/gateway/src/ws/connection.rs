//! Connection manager (spec.md §4.8).
//!
//! One `Connection` row per live WebSocket, keyed by a server-generated
//! `connection_id`. `auth` resolves identity and flips `authenticated`;
//! everything else on the connection (pipeline mode, model choice, voice
//! recorder buffer) is mutated from that connection's own task only.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::Message as WsWireMessage;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tf_domain::config::ModelChoice;
use tf_protocol::ws::PipelineMode;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

/// Per-connection state (spec.md §4.8's `Connection` tuple).
pub struct Connection {
    pub sender: UnboundedSender<WsWireMessage>,
    pub user_id: Option<Uuid>,
    pub session_id: Option<Uuid>,
    pub org_id: Option<Uuid>,
    pub authenticated: bool,
    pub pipeline_mode: PipelineMode,
    pub model_choice: ModelChoice,
    pub platform: Option<String>,
    pub last_ping: DateTime<Utc>,
    /// Armed by `voice.start`, appended to by `voice.chunk`, drained by
    /// `voice.end`. `None` when no recording is in progress.
    pub voice_buffer: Option<Vec<u8>>,
    pub voice_format: Option<String>,
}

/// Holds every live connection plus the projector's duplicate/missing
/// `chat.complete` contract counters (spec.md §4.8 steps 3-5), which are
/// cross-connection by nature since a run belongs to exactly one
/// connection but the counters are inspected for the whole server.
pub struct ConnectionManager {
    connections: RwLock<HashMap<Uuid, Connection>>,
    emit_counts: RwLock<HashMap<String, u64>>,
    chat_complete_counts_by_run: RwLock<HashMap<Uuid, u64>>,
    contract_violation_counts: RwLock<HashMap<String, u64>>,
}

impl ConnectionManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            connections: RwLock::new(HashMap::new()),
            emit_counts: RwLock::new(HashMap::new()),
            chat_complete_counts_by_run: RwLock::new(HashMap::new()),
            contract_violation_counts: RwLock::new(HashMap::new()),
        })
    }

    pub fn register(
        &self,
        sender: UnboundedSender<WsWireMessage>,
        default_mode: PipelineMode,
        default_model: ModelChoice,
    ) -> Uuid {
        let connection_id = Uuid::new_v4();
        let connection = Connection {
            sender,
            user_id: None,
            session_id: None,
            org_id: None,
            authenticated: false,
            pipeline_mode: default_mode,
            model_choice: default_model,
            platform: None,
            last_ping: Utc::now(),
            voice_buffer: None,
            voice_format: None,
        };
        self.connections.write().insert(connection_id, connection);
        connection_id
    }

    pub fn remove(&self, connection_id: Uuid) {
        self.connections.write().remove(&connection_id);
    }

    pub fn authenticate(&self, connection_id: Uuid, user_id: Uuid, session_id: Uuid, org_id: Option<Uuid>) {
        if let Some(conn) = self.connections.write().get_mut(&connection_id) {
            conn.authenticated = true;
            conn.user_id = Some(user_id);
            conn.session_id = Some(session_id);
            conn.org_id = org_id;
        }
    }

    pub fn set_platform(&self, connection_id: Uuid, platform: Option<String>) {
        if let Some(conn) = self.connections.write().get_mut(&connection_id) {
            conn.platform = platform;
        }
    }

    pub fn set_pipeline_mode(&self, connection_id: Uuid, mode: PipelineMode) {
        if let Some(conn) = self.connections.write().get_mut(&connection_id) {
            conn.pipeline_mode = mode;
        }
    }

    pub fn touch_ping(&self, connection_id: Uuid) {
        if let Some(conn) = self.connections.write().get_mut(&connection_id) {
            conn.last_ping = Utc::now();
        }
    }

    pub fn arm_recorder(&self, connection_id: Uuid, format: String) {
        if let Some(conn) = self.connections.write().get_mut(&connection_id) {
            conn.voice_buffer = Some(Vec::new());
            conn.voice_format = Some(format);
        }
    }

    pub fn append_chunk(&self, connection_id: Uuid, bytes: &[u8]) {
        if let Some(conn) = self.connections.write().get_mut(&connection_id) {
            if let Some(buf) = conn.voice_buffer.as_mut() {
                buf.extend_from_slice(bytes);
            }
        }
    }

    /// Drain and return the armed recorder's buffer plus its format,
    /// disarming the recorder.
    pub fn take_recording(&self, connection_id: Uuid) -> Option<(Vec<u8>, String)> {
        let mut connections = self.connections.write();
        let conn = connections.get_mut(&connection_id)?;
        let buf = conn.voice_buffer.take()?;
        let format = conn.voice_format.take().unwrap_or_else(|| "pcm16".to_string());
        Some((buf, format))
    }

    pub fn is_authenticated(&self, connection_id: Uuid) -> bool {
        self.connections.read().get(&connection_id).map(|c| c.authenticated).unwrap_or(false)
    }

    pub fn pipeline_mode(&self, connection_id: Uuid) -> PipelineMode {
        self.connections
            .read()
            .get(&connection_id)
            .map(|c| c.pipeline_mode)
            .unwrap_or(PipelineMode::Fast)
    }

    pub fn model_choice(&self, connection_id: Uuid) -> ModelChoice {
        self.connections.read().get(&connection_id).map(|c| c.model_choice).unwrap_or_default()
    }

    pub fn session_id(&self, connection_id: Uuid) -> Option<Uuid> {
        self.connections.read().get(&connection_id)?.session_id
    }

    pub fn user_id(&self, connection_id: Uuid) -> Option<Uuid> {
        self.connections.read().get(&connection_id)?.user_id
    }

    pub fn org_id(&self, connection_id: Uuid) -> Option<Uuid> {
        self.connections.read().get(&connection_id)?.org_id
    }

    /// Send a wire frame down this connection. Silently drops the send if
    /// the connection has already gone away (spec.md §4.8 step 6).
    pub fn send(&self, connection_id: Uuid, message: WsWireMessage) {
        let connections = self.connections.read();
        if let Some(conn) = connections.get(&connection_id) {
            if conn.sender.send(message).is_err() {
                tracing::debug!(%connection_id, "send on closed connection, dropping");
            }
        }
    }

    // ── Projector counters (spec.md §4.8 steps 3-5) ─────────────────────

    pub fn bump_emit_count(&self, message_type: &str) {
        *self.emit_counts.write().entry(message_type.to_string()).or_insert(0) += 1;
    }

    /// Returns the post-increment count for `pipeline_run_id`'s
    /// `chat.complete` emissions. A caller-side `> 1` means a duplicate.
    pub fn bump_chat_complete(&self, pipeline_run_id: Uuid) -> u64 {
        let mut counts = self.chat_complete_counts_by_run.write();
        let count = counts.entry(pipeline_run_id).or_insert(0);
        *count += 1;
        *count
    }

    pub fn chat_complete_count(&self, pipeline_run_id: Uuid) -> u64 {
        *self.chat_complete_counts_by_run.read().get(&pipeline_run_id).unwrap_or(&0)
    }

    pub fn bump_contract_violation(&self, kind: &str) {
        *self.contract_violation_counts.write().entry(kind.to_string()).or_insert(0) += 1;
        tracing::warn!(violation = kind, "projector contract violation");
    }

    pub fn contract_violation_count(&self, kind: &str) -> u64 {
        *self.contract_violation_counts.read().get(kind).unwrap_or(&0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_remove_drops_the_connection() {
        let manager = ConnectionManager::new();
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let id = manager.register(tx, PipelineMode::Fast, ModelChoice::Model1);
        assert!(!manager.is_authenticated(id));
        manager.remove(id);
        assert_eq!(manager.pipeline_mode(id), PipelineMode::Fast);
    }

    #[test]
    fn authenticate_sets_identity_fields() {
        let manager = ConnectionManager::new();
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let id = manager.register(tx, PipelineMode::Fast, ModelChoice::Model1);
        let user_id = Uuid::new_v4();
        let session_id = Uuid::new_v4();
        manager.authenticate(id, user_id, session_id, None);
        assert!(manager.is_authenticated(id));
        assert_eq!(manager.user_id(id), Some(user_id));
        assert_eq!(manager.session_id(id), Some(session_id));
    }

    #[test]
    fn voice_recorder_arms_appends_and_drains() {
        let manager = ConnectionManager::new();
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let id = manager.register(tx, PipelineMode::Fast, ModelChoice::Model1);
        manager.arm_recorder(id, "pcm16".into());
        manager.append_chunk(id, &[1, 2, 3]);
        manager.append_chunk(id, &[4, 5]);
        let (bytes, format) = manager.take_recording(id).unwrap();
        assert_eq!(bytes, vec![1, 2, 3, 4, 5]);
        assert_eq!(format, "pcm16");
        assert!(manager.take_recording(id).is_none());
    }

    #[test]
    fn bump_chat_complete_counts_duplicates() {
        let manager = ConnectionManager::new();
        let run_id = Uuid::new_v4();
        assert_eq!(manager.bump_chat_complete(run_id), 1);
        assert_eq!(manager.bump_chat_complete(run_id), 2);
    }
}
