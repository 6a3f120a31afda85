//! Application state management
//!
//! Contains shared state accessible across all handlers.

use crate::config::AnalysisConfig;
use crate::query::QueryFacade;
use crate::snapshot::SnapshotStore;
use std::sync::Arc;

/// Application state shared across all handlers
pub struct AppState {
    /// Every read and write goes through the façade
    pub facade: QueryFacade,

    /// Kept for health reporting
    pub store: Arc<SnapshotStore>,

    /// Whether snapshots are written through to Postgres
    pub persistent: bool,
}

impl AppState {
    pub fn new(store: Arc<SnapshotStore>, analysis: AnalysisConfig, persistent: bool) -> Self {
        Self {
            facade: QueryFacade::new(store.clone(), analysis),
            store,
            persistent,
        }
    }

    /// In-memory state, used when no database is configured
    pub fn in_memory(analysis: AnalysisConfig) -> Self {
        Self::new(Arc::new(SnapshotStore::new(analysis.cache_capacity)), analysis, false)
    }
}

/// Type alias for shared state
pub type SharedState = Arc<AppState>;
