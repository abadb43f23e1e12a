use moka::future::Cache;
use std::sync::Arc;

use crate::config::Config;
use crate::session::SessionRegistry;
use crate::store::{LiveStateSnapshot, StateStore};

/// Memoised `valve_system` reads. A single key; the TTL is the whole policy.
pub type LiveCache = Cache<&'static str, Arc<LiveStateSnapshot>>;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn StateStore>,
    /// `None` when memoisation is disabled (`LIVE_CACHE_TTL_MS=0`).
    pub live_cache: Option<LiveCache>,
    pub sessions: Arc<SessionRegistry>,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn StateStore>) -> Self {
        let live_cache = (config.live_cache_ttl_ms > 0).then(|| {
            Cache::builder()
                .max_capacity(1)
                .time_to_live(config.live_cache_ttl())
                .build()
        });

        Self {
            config: Arc::new(config),
            store,
            live_cache,
            sessions: Arc::new(SessionRegistry::new()),
        }
    }
}
