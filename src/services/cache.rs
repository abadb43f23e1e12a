//! Live-state fetching: a short-TTL memoised read composed with the per-session
//! fallback copy.
//!
//! ```text
//! store ──(TTL cache, coalesced)──▶ snapshot ──(field merge)──▶ session fallback
//! ```
//!
//! | Outcome of the read | Session fallback | `online` |
//! |---------------------|------------------|----------|
//! | tree present        | merged field-by-field | `true` |
//! | tree empty (`null`) | unchanged (defaults until first data) | `true` |
//! | store error         | unchanged, served as last known values | `false` |
//!
//! Read errors never leave this module; writes go through `control::dispatch`
//! and call [`invalidate`] so the next render sees their effect.

use chrono::Utc;
use std::sync::Arc;

use crate::common::AppState;
use crate::session::Session;
use crate::store::{LiveState, LiveStateSnapshot, StoreError};

pub const LIVE_STATE_KEY: &str = "valve_system";

/// Result of one fetch-and-merge for a session.
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub live: LiveState,
    pub online: bool,
}

async fn read_snapshot(state: &AppState) -> Result<Arc<LiveStateSnapshot>, StoreError> {
    let raw = state.store.read_live_state().await?;
    Ok(Arc::new(LiveStateSnapshot::from_value(&raw)))
}

/// Read `valve_system`, served from the TTL cache when a fresh copy exists.
///
/// Concurrent callers during a miss share one store read. Errors are not cached.
///
/// # Errors
///
/// Returns the `StoreError` of the underlying read.
pub async fn fetch_snapshot(state: &AppState) -> Result<Arc<LiveStateSnapshot>, StoreError> {
    let Some(cache) = &state.live_cache else {
        return read_snapshot(state).await;
    };

    let entry = cache
        .entry(LIVE_STATE_KEY)
        .or_try_insert_with(read_snapshot(state))
        .await
        .map_err(|e| (*e).clone())?;

    if entry.is_fresh() {
        tracing::debug!(cache_key = LIVE_STATE_KEY, "cache_miss");
    } else {
        tracing::debug!(cache_key = LIVE_STATE_KEY, "cache_hit");
    }
    Ok(entry.into_value())
}

/// Fetch live state and fold it into the session's fallback copy, adding one
/// pressure sample. Called once per render cycle.
///
/// Never fails: on a store error the session's last known values are returned
/// with `online = false`.
pub async fn sync_session(state: &AppState, session: &Session) -> SyncOutcome {
    sync(state, session, true).await
}

/// Like [`sync_session`] but without touching the pressure history; used to
/// validate a command against current state.
pub async fn refresh_fallback(state: &AppState, session: &Session) -> SyncOutcome {
    sync(state, session, false).await
}

async fn sync(state: &AppState, session: &Session, sample: bool) -> SyncOutcome {
    match fetch_snapshot(state).await {
        Ok(snapshot) => {
            let mut ctx = session.context.write().await;
            if sample {
                ctx.record_sync(&snapshot, Utc::now(), state.config.pressure_history_len);
            } else {
                ctx.merge_snapshot(&snapshot, Utc::now());
            }
            SyncOutcome {
                live: ctx.fallback.clone(),
                online: true,
            }
        }
        Err(e) => {
            tracing::warn!(
                session_id = %session.id,
                error = %e,
                "Live state read failed, serving last known values"
            );
            let mut ctx = session.context.write().await;
            ctx.online = false;
            SyncOutcome {
                live: ctx.fallback.clone(),
                online: false,
            }
        }
    }
}

/// Drop the memoised read so the next fetch goes to the store.
pub async fn invalidate(state: &AppState) {
    if let Some(cache) = &state.live_cache {
        cache.invalidate(LIVE_STATE_KEY).await;
        tracing::debug!(cache_key = LIVE_STATE_KEY, "cache_invalidated");
    }
}
