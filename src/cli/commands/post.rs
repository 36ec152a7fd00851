//! Post phase: save the omni cache if needed
//!
//! Runs after the rest of the pipeline, possibly in a separate process;
//! everything it needs was persisted by the main phase.

use crate::cache::{self, DirStore};
use crate::error::SetupResult;
use crate::workflow::GithubStateStore;

/// Execute the post phase
pub async fn post() -> SetupResult<()> {
    let mut state = GithubStateStore::new();
    let store = DirStore::new();
    cache::save(&mut state, &store).await
}
