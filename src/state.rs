//! Application state shared by every request.

use std::sync::Arc;

use crate::config::Tuning;
use crate::db::DbPool;

/// Application state passed to all handlers and service calls
#[derive(Clone)]
pub struct AppState {
    /// Shared game database
    pub pool: DbPool,

    /// Selector, ability and scoring constants
    pub tuning: Arc<Tuning>,
}

impl AppState {
    pub fn new(pool: DbPool, tuning: Tuning) -> Self {
        Self {
            pool,
            tuning: Arc::new(tuning),
        }
    }
}
