use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

use crate::common::AppState;

/// Spawn the sweep that expires idle sessions, or `None` if expiry is disabled.
///
/// The sweep runs once per poll interval, so an abandoned session costs at
/// most one extra cycle past its timeout.
pub fn spawn(state: AppState, cancel: CancellationToken) -> Option<JoinHandle<()>> {
    let timeout = state.config.session_idle_timeout()?;
    Some(tokio::spawn(run(state, timeout, cancel)))
}

async fn run(state: AppState, timeout: Duration, cancel: CancellationToken) {
    let mut ticker = interval(state.config.poll_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(idle_timeout_secs = timeout.as_secs(), "Starting session reaper");

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let reaped = state.sessions.reap_idle(timeout, Instant::now());
        if reaped > 0 {
            tracing::info!(
                reaped,
                remaining = state.sessions.len(),
                "Expired idle sessions"
            );
        }
    }

    tracing::info!("Session reaper stopped");
}
