pub mod attempt;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod handlers;
pub mod models;
pub mod queue;
pub mod routes;
pub mod session;
pub mod shuffle;
pub mod state;

use std::sync::Arc;

pub fn build_state(config: &config::Config) -> anyhow::Result<state::AppState> {
    let store: Arc<dyn state::SnapshotStore> = match config.local_state_path.as_deref() {
        Some(path) => Arc::new(state::FileSnapshotStore::new(path)),
        None => Arc::new(state::NoopSnapshotStore),
    };
    state::AppState::new(store)
}
