//! Session store: `Session`, `Interaction`, `SessionSummary`, and
//! `SummaryState` rows (spec.md §3), held in memory and snapshotted to
//! `sessions.json` under the configured state path.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use tf_domain::entities::{Interaction, Session, SessionLifecycleState, SessionSummary, SummaryState};
use tf_domain::error::{Error, Result};
use tf_domain::trace::TraceEvent;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Snapshot {
    sessions: HashMap<Uuid, Session>,
    summaries: HashMap<Uuid, Vec<SessionSummary>>,
    summary_state: HashMap<Uuid, SummaryState>,
    #[serde(default)]
    interactions: HashMap<Uuid, Vec<Interaction>>,
}

/// In-memory session store backed by a JSON snapshot file.
pub struct SessionStore {
    path: PathBuf,
    sessions: RwLock<HashMap<Uuid, Session>>,
    summaries: RwLock<HashMap<Uuid, Vec<SessionSummary>>>,
    summary_state: RwLock<HashMap<Uuid, SummaryState>>,
    interactions: RwLock<HashMap<Uuid, Vec<Interaction>>>,
}

impl SessionStore {
    /// Load or create the store at `state_path/sessions/sessions.json`.
    pub fn new(state_path: &Path) -> Result<Self> {
        let dir = state_path.join("sessions");
        std::fs::create_dir_all(&dir).map_err(Error::Io)?;

        let path = dir.join("sessions.json");
        let snapshot: Snapshot = if path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(Error::Io)?;
            serde_json::from_str(&raw).unwrap_or_default()
        } else {
            Snapshot::default()
        };

        tracing::info!(
            sessions = snapshot.sessions.len(),
            path = %path.display(),
            "session store loaded"
        );

        Ok(Self {
            path,
            sessions: RwLock::new(snapshot.sessions),
            summaries: RwLock::new(snapshot.summaries),
            summary_state: RwLock::new(snapshot.summary_state),
            interactions: RwLock::new(snapshot.interactions),
        })
    }

    /// Resolve a session by ID, or create a new active one for `user_id`.
    /// Returns `(session, is_new)`.
    pub fn get_or_create(&self, session_id: Uuid, user_id: Uuid) -> (Session, bool) {
        if let Some(existing) = self.sessions.read().get(&session_id) {
            return (existing.clone(), false);
        }

        let session = Session {
            id: session_id,
            user_id,
            state: SessionLifecycleState::Active,
            started_at: Utc::now(),
            ended_at: None,
            interaction_count: 0,
            is_onboarding: false,
        };
        self.sessions.write().insert(session_id, session.clone());
        TraceEvent::SessionCreated {
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
        }
        .emit();
        (session, true)
    }

    pub fn get(&self, session_id: Uuid) -> Option<Session> {
        self.sessions.read().get(&session_id).cloned()
    }

    /// Mark a session ended. No-op if the session doesn't exist or is
    /// already ended.
    pub fn end(&self, session_id: Uuid) -> Option<Session> {
        let mut sessions = self.sessions.write();
        let session = sessions.get_mut(&session_id)?;
        if session.state == SessionLifecycleState::Ended {
            return Some(session.clone());
        }
        session.state = SessionLifecycleState::Ended;
        session.ended_at = Some(Utc::now());
        Some(session.clone())
    }

    /// Bump `interaction_count`. Called by the `Persist` stage once per
    /// turn (spec.md §3 invariant: `interaction_count` equals the number of
    /// persisted `Interaction` rows).
    pub fn record_interaction(&self, session_id: Uuid) {
        if let Some(session) = self.sessions.write().get_mut(&session_id) {
            session.interaction_count += 1;
        }
    }

    /// Append a full `Interaction` row and bump `interaction_count` in one
    /// step. The row is kept around (rather than discarded once the count
    /// is bumped) so the summary service has a transcript to merge.
    pub fn append_interaction(&self, interaction: Interaction) {
        let session_id = interaction.session_id;
        self.interactions.write().entry(session_id).or_default().push(interaction);
        self.record_interaction(session_id);
    }

    /// Every persisted `Interaction` row for a session, oldest first.
    pub fn interactions_for(&self, session_id: Uuid) -> Vec<Interaction> {
        self.interactions.read().get(&session_id).cloned().unwrap_or_default()
    }

    /// Interactions persisted after `cutoff_millis` (a `SessionSummary.cutoff_idx`),
    /// or the whole transcript when `cutoff_millis` is `None` (first summary).
    pub fn interactions_since(&self, session_id: Uuid, cutoff_millis: Option<u64>) -> Vec<Interaction> {
        let all = self.interactions_for(session_id);
        match cutoff_millis {
            Some(cutoff) => all
                .into_iter()
                .filter(|i| i.created_at.timestamp_millis() as u64 > cutoff)
                .collect(),
            None => all,
        }
    }

    /// Append a new summary version. Rejected (returns `None`) if `version`
    /// doesn't immediately follow the last one, preserving the no-gaps
    /// invariant.
    pub fn append_summary(&self, summary: SessionSummary) -> Option<SessionSummary> {
        let mut summaries = self.summaries.write();
        let versions = summaries.entry(summary.session_id).or_default();
        let expected = versions.last().map(|s| s.version + 1).unwrap_or(1);
        if summary.version != expected {
            return None;
        }
        versions.push(summary.clone());

        self.summary_state
            .write()
            .entry(summary.session_id)
            .and_modify(|s| {
                s.turns_since = 0;
                s.last_summary_at = Some(summary.created_at);
            })
            .or_insert_with(|| SummaryState {
                session_id: summary.session_id,
                turns_since: 0,
                last_summary_at: Some(summary.created_at),
            });

        Some(summary)
    }

    pub fn latest_summary(&self, session_id: Uuid) -> Option<SessionSummary> {
        self.summaries.read().get(&session_id)?.last().cloned()
    }

    /// Increment the per-session turn counter, seeding a fresh counter on
    /// first use.
    pub fn increment_turns_since(&self, session_id: Uuid) -> SummaryState {
        let mut states = self.summary_state.write();
        let state = states
            .entry(session_id)
            .or_insert_with(|| SummaryState {
                session_id,
                turns_since: 0,
                last_summary_at: None,
            });
        state.turns_since += 1;
        state.clone()
    }

    pub fn summary_state(&self, session_id: Uuid) -> Option<SummaryState> {
        self.summary_state.read().get(&session_id).cloned()
    }

    pub fn list(&self) -> Vec<Session> {
        self.sessions.read().values().cloned().collect()
    }

    /// Persist the current state to disk.
    pub fn flush(&self) -> Result<()> {
        let snapshot = Snapshot {
            sessions: self.sessions.read().clone(),
            summaries: self.summaries.read().clone(),
            summary_state: self.summary_state.read().clone(),
            interactions: self.interactions.read().clone(),
        };
        let json = serde_json::to_string_pretty(&snapshot)
            .map_err(|e| Error::Other(format!("serializing sessions: {e}")))?;
        std::fs::write(&self.path, json).map_err(Error::Io)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tf_domain::entities::{InputType, InteractionRole};

    fn temp_store() -> SessionStore {
        let dir = std::env::temp_dir().join(format!("tf-sessions-test-{}", Uuid::new_v4()));
        SessionStore::new(&dir).unwrap()
    }

    #[test]
    fn get_or_create_returns_is_new_true_only_the_first_time() {
        let store = temp_store();
        let session_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let (_, first_is_new) = store.get_or_create(session_id, user_id);
        let (_, second_is_new) = store.get_or_create(session_id, user_id);
        assert!(first_is_new);
        assert!(!second_is_new);
    }

    #[test]
    fn record_interaction_increments_the_session_counter() {
        let store = temp_store();
        let session_id = Uuid::new_v4();
        store.get_or_create(session_id, Uuid::new_v4());
        store.record_interaction(session_id);
        store.record_interaction(session_id);
        assert_eq!(store.get(session_id).unwrap().interaction_count, 2);
    }

    #[test]
    fn end_marks_the_session_ended_and_sets_ended_at() {
        let store = temp_store();
        let session_id = Uuid::new_v4();
        store.get_or_create(session_id, Uuid::new_v4());
        let ended = store.end(session_id).unwrap();
        assert_eq!(ended.state, SessionLifecycleState::Ended);
        assert!(ended.ended_at.is_some());
    }

    fn summary(session_id: Uuid, version: u64) -> SessionSummary {
        SessionSummary {
            id: Uuid::new_v4(),
            session_id,
            version,
            text: "summary text".into(),
            cutoff_idx: 0,
            token_count: 10,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn append_summary_rejects_a_version_gap() {
        let store = temp_store();
        let session_id = Uuid::new_v4();
        assert!(store.append_summary(summary(session_id, 1)).is_some());
        assert!(store.append_summary(summary(session_id, 3)).is_none());
        assert!(store.append_summary(summary(session_id, 2)).is_some());
    }

    #[test]
    fn append_summary_resets_turns_since() {
        let store = temp_store();
        let session_id = Uuid::new_v4();
        store.increment_turns_since(session_id);
        store.increment_turns_since(session_id);
        store.append_summary(summary(session_id, 1));
        assert_eq!(store.summary_state(session_id).unwrap().turns_since, 0);
    }

    #[test]
    fn append_interaction_stores_the_row_and_bumps_the_count() {
        let store = temp_store();
        let session_id = Uuid::new_v4();
        store.get_or_create(session_id, Uuid::new_v4());
        store.append_interaction(tf_domain::entities::Interaction {
            id: Uuid::new_v4(),
            session_id,
            message_id: "m1".into(),
            role: InteractionRole::User,
            content: "hi".into(),
            input_type: InputType::Text,
            created_at: Utc::now(),
        });
        assert_eq!(store.get(session_id).unwrap().interaction_count, 1);
        assert_eq!(store.interactions_for(session_id).len(), 1);
    }

    #[test]
    fn interactions_since_excludes_rows_at_or_before_the_cutoff() {
        let store = temp_store();
        let session_id = Uuid::new_v4();
        let old = Utc::now() - chrono::Duration::seconds(60);
        store.append_interaction(tf_domain::entities::Interaction {
            id: Uuid::new_v4(),
            session_id,
            message_id: "m1".into(),
            role: InteractionRole::User,
            content: "old".into(),
            input_type: InputType::Text,
            created_at: old,
        });
        let cutoff = old.timestamp_millis() as u64;
        store.append_interaction(tf_domain::entities::Interaction {
            id: Uuid::new_v4(),
            session_id,
            message_id: "m2".into(),
            role: InteractionRole::User,
            content: "new".into(),
            input_type: InputType::Text,
            created_at: Utc::now(),
        });
        let since = store.interactions_since(session_id, Some(cutoff));
        assert_eq!(since.len(), 1);
        assert_eq!(since[0].content, "new");
    }

    #[test]
    fn interaction_role_and_input_type_round_trip_through_json() {
        let interaction = tf_domain::entities::Interaction {
            id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            message_id: "m1".into(),
            role: InteractionRole::User,
            content: "hi".into(),
            input_type: InputType::Text,
            created_at: Utc::now(),
        };
        let json = serde_json::to_string(&interaction).unwrap();
        let back: tf_domain::entities::Interaction = serde_json::from_str(&json).unwrap();
        assert_eq!(back.role, interaction.role);
    }
}
