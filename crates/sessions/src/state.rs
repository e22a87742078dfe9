//! `SessionState` store — the per-session routing tuple (spec.md §3).
//!
//! `get_or_create` seeds a default row on first read; `update` bumps the
//! optimistic-locking `version` counter (DESIGN.md Open Questions: version
//! increments from the prior row, `prev.version + 1`, starting at `1`) and
//! re-validates `topology`/`behavior` against their closed enums, which the
//! `#[derive(Deserialize)]` on those types already enforces at the
//! deserialization boundary.

use std::collections::HashMap;

use chrono::Utc;
use parking_lot::RwLock;
use serde_json::Value;
use uuid::Uuid;

use tf_domain::stage::{Behavior, Topology};
use tf_domain::entities::SessionState;
use tf_domain::trace::TraceEvent;

/// In-memory `SessionState` store, one row per `session_id`.
pub struct SessionStateStore {
    rows: RwLock<HashMap<Uuid, SessionState>>,
    default_topology: Topology,
    default_behavior: Behavior,
}

impl SessionStateStore {
    pub fn new(default_topology: Topology, default_behavior: Behavior) -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
            default_topology,
            default_behavior,
        }
    }

    /// Return the existing row, or seed and return a default one at
    /// `version = 1`.
    pub fn get_or_create(&self, session_id: Uuid) -> SessionState {
        if let Some(existing) = self.rows.read().get(&session_id) {
            return existing.clone();
        }
        let row = SessionState {
            session_id,
            topology: self.default_topology,
            behavior: self.default_behavior,
            config: Value::Object(Default::default()),
            updated_at: Utc::now(),
            version: 1,
        };
        self.rows.write().insert(session_id, row.clone());
        row
    }

    /// Apply a client-driven update, bumping `version` from whatever row
    /// currently exists (seeding one at version 0 first if this is the
    /// first write this session has ever seen).
    pub fn update(
        &self,
        session_id: Uuid,
        topology: Topology,
        behavior: Behavior,
        config: Value,
    ) -> SessionState {
        let mut rows = self.rows.write();
        let prev_version = rows.get(&session_id).map(|r| r.version).unwrap_or(0);
        let row = SessionState {
            session_id,
            topology,
            behavior,
            config,
            updated_at: Utc::now(),
            version: prev_version + 1,
        };
        rows.insert(session_id, row.clone());
        TraceEvent::SessionStateUpdated {
            session_id: session_id.to_string(),
            version: row.version,
        }
        .emit();
        row
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SessionStateStore {
        SessionStateStore::new(Topology::ChatFast, Behavior::FreeConversation)
    }

    #[test]
    fn get_or_create_seeds_a_default_row_at_version_one() {
        let store = store();
        let id = Uuid::new_v4();
        let row = store.get_or_create(id);
        assert_eq!(row.version, 1);
        assert_eq!(row.topology, Topology::ChatFast);
    }

    #[test]
    fn get_or_create_is_idempotent() {
        let store = store();
        let id = Uuid::new_v4();
        let first = store.get_or_create(id);
        let second = store.get_or_create(id);
        assert_eq!(first.version, second.version);
    }

    #[test]
    fn update_increments_version_from_the_prior_row() {
        let store = store();
        let id = Uuid::new_v4();
        store.get_or_create(id);
        let updated = store.update(id, Topology::VoiceFast, Behavior::Roleplay, Value::Null);
        assert_eq!(updated.version, 2);
        assert_eq!(updated.topology, Topology::VoiceFast);
    }

    #[test]
    fn update_on_an_unseen_session_starts_at_version_one() {
        let store = store();
        let id = Uuid::new_v4();
        let updated = store.update(id, Topology::ChatAccurate, Behavior::Onboarding, Value::Null);
        assert_eq!(updated.version, 1);
    }
}
