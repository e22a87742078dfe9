//! Shared application state passed to the WS handler and the Pulse
//! HTTP surface.

use std::sync::Arc;

use tf_domain::config::Config;
use tf_pipeline::event_sink::InMemoryEventSink;
use tf_pipeline::orchestrator::Orchestrator;
use tf_pipeline::provider_log::InMemoryProviderCallSink;
use tf_pipeline::summary::SummaryService;
use tf_providers::LlmRouter;
use tf_sessions::{IdentityResolver, SessionStateStore, SessionStore};

use crate::store::PulseStore;
use crate::ws::connection::ConnectionManager;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub router: Arc<LlmRouter>,
    pub call_log: Arc<InMemoryProviderCallSink>,
    pub event_sink: Arc<InMemoryEventSink>,
    pub pulse: Arc<PulseStore>,
    pub connections: Arc<ConnectionManager>,
    pub identity: Arc<IdentityResolver>,
    pub sessions: Arc<SessionStore>,
    pub session_state: Arc<SessionStateStore>,
    pub summaries: Arc<SummaryService>,
    pub orchestrator: Arc<Orchestrator>,
    /// SHA-256 hash of the Pulse bearer token. `None` = dev mode (no auth
    /// enforced on `/pulse/*`).
    pub pulse_token_hash: Option<Vec<u8>>,
}
