//! Application state shared across all request handlers.

use fairway_core::events::InMemoryBus;
use fairway_core::processors::TagSwapMatcher;
use sqlx::PgPool;
use std::sync::Arc;

/// Application state that is shared across all request handlers.
///
/// This is cloneable and cheap to pass around (everything is behind Arc).
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool, absent in `--memory` runs.
    pub db: Option<PgPool>,
    /// Event bus; ingress publishes here.
    pub bus: Arc<InMemoryBus>,
    pub matcher: Arc<TagSwapMatcher>,
}

impl AppState {
    pub fn new(db: Option<PgPool>, bus: Arc<InMemoryBus>, matcher: Arc<TagSwapMatcher>) -> Self {
        Self { db, bus, matcher }
    }
}
