use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Persistence config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//
// spec.md §3 excludes schema migrations and SQL DDL from scope and §9
// directs normalizing to explicit foreign-key IDs + repository functions
// rather than reifying object graphs in memory. Entities are held in
// in-memory, lock-guarded collections snapshotted to JSON/JSONL files
// under `state_dir`, the same shape as the teacher's `SessionStore` and
// `RunStore`. `database_url`/`redis_url` are accepted as configuration
// surface (spec.md §6.3) but unused by this in-memory implementation.

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default = "d_state_dir")]
    pub state_dir: PathBuf,
    /// `database_url` — accepted for config-surface parity; the in-memory
    /// store does not connect to it.
    #[serde(default)]
    pub database_url: Option<String>,
    /// `redis_url` — accepted for config-surface parity; unused.
    #[serde(default)]
    pub redis_url: Option<String>,
    #[serde(default = "d_max_runs_in_memory")]
    pub max_runs_in_memory: usize,
    #[serde(default = "d_max_events_in_memory")]
    pub max_events_in_memory: usize,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            state_dir: d_state_dir(),
            database_url: None,
            redis_url: None,
            max_runs_in_memory: d_max_runs_in_memory(),
            max_events_in_memory: d_max_events_in_memory(),
        }
    }
}

fn d_state_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn d_max_runs_in_memory() -> usize {
    2_000
}
fn d_max_events_in_memory() -> usize {
    10_000
}
