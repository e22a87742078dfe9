//! Session state: identity resolution, the per-session routing tuple
//! (`SessionState`), and the `Session`/`Interaction`/`SessionSummary`/
//! `SummaryState` store (spec.md §3).

pub mod identity;
pub mod state;
pub mod store;

pub use identity::{IdentityResolver, VerifiedClaims};
pub use state::SessionStateStore;
pub use store::SessionStore;
